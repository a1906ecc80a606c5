//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息，以及
//! 文件名清理 / 输出目录解析等路径工具。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // 下载配置
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_false")]
    pub download_covers: bool,

    // 路径配置
    #[serde(default)]
    pub save_path: String,

    // 交互配置
    #[serde(default = "default_false")]
    pub auto_confirm: bool,
    #[serde(default = "default_false")]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            inactivity_timeout: default_inactivity_timeout(),
            user_agent: default_user_agent(),
            audio_format: default_audio_format(),
            chunk_size: default_chunk_size(),
            download_covers: default_false(),
            save_path: String::new(),
            auto_confirm: default_false(),
            verbose: default_false(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 10] = [
            FieldMeta {
                name: "request_timeout",
                description: "页面请求超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "列表页抓取的最大重试次数",
            },
            FieldMeta {
                name: "inactivity_timeout",
                description: "流式下载块间不活动超时（秒），0 表示不限",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "audio_format",
                description: "下载格式（mp3/flac/...），留空取页面宣告的第一个",
            },
            FieldMeta {
                name: "chunk_size",
                description: "每次读写的字节数，影响进度粒度与内存占用，不影响正确性",
            },
            FieldMeta {
                name: "download_covers",
                description: "是否同时下载封面",
            },
            FieldMeta {
                name: "save_path",
                description: "保存目录，留空表示当前目录",
            },
            FieldMeta {
                name: "auto_confirm",
                description: "跳过下载前的确认提示",
            },
            FieldMeta {
                name: "verbose",
                description: "打印解析到的二进制直链等额外信息",
            },
        ];
        &FIELDS
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }
}

pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            // Convert forbidden Windows filename characters to fullwidth equivalents
            ':' => '：',
            '"' => '＂',
            '<' => '《',
            '>' => '》',
            '/' | '\\' => '、',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            c if (c as u32) < 32 => replacement.chars().next().unwrap_or('_'),
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let upper = cleaned.to_uppercase();
    if RESERVED.contains(&upper.as_str()) {
        cleaned = format!("_{}", cleaned);
    }

    if cleaned.len() > max_len {
        // 避免在多字节 UTF-8 字符中间截断导致 panic
        let mut end = max_len;
        while !cleaned.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        cleaned.truncate(end);
        while cleaned.ends_with(' ') || cleaned.ends_with('.') {
            cleaned.pop();
        }
        if cleaned.is_empty() {
            cleaned.push_str("unnamed");
        }
    }

    cleaned
}

fn default_false() -> bool {
    false
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_inactivity_timeout() -> u64 {
    0
}

fn default_chunk_size() -> usize {
    1024
}

fn default_audio_format() -> String {
    String::new()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_fs_name_replaces_forbidden_characters() {
        let name = safe_fs_name("Intro: Part 1 / Reprise?", "_", 120);
        assert!(!name.contains(':'));
        assert!(!name.contains('/'));
        assert!(!name.contains('?'));
    }

    #[test]
    fn safe_fs_name_never_returns_empty() {
        assert_eq!(safe_fs_name("", "_", 120), "unnamed");
        assert_eq!(safe_fs_name("...", "_", 120), "unnamed");
    }

    #[test]
    fn safe_fs_name_prefixes_reserved_names() {
        assert_eq!(safe_fs_name("CON", "_", 120), "_CON");
    }

    #[test]
    fn safe_fs_name_truncates_on_char_boundary() {
        let name = safe_fs_name("曲目曲目曲目曲目", "_", 10);
        assert!(name.len() <= 10);
        assert!(!name.is_empty());
    }
}
