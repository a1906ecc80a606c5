//! 专辑列表页的结构化解析。
//!
//! khinsider 的页面布局是固定契约，这里用一组独立的小提取规则做
//! 模式匹配，而不是完整的 DOM 解析；缺“可选”区块得到空集合，
//! 缺关键锚点（内容容器 / 专辑名 / 曲目表）才算解析失败。

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::download::models::{AlbumMeta, CoverRef, DownloadPlan, TrackRef};

/// 必需的结构锚点缺失。区别于“锚点存在但内容为空”。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("album content block not found")]
    ContentMissing,
    #[error("album name not found")]
    NameMissing,
    #[error("tracklist not found")]
    TracklistMissing,
}

// 编译一次复用的正则缓存
fn re_h2() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<h2[^>]*>(.*?)</h2>").unwrap())
}

fn re_songlist() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r#"(?is)<table[^>]*\bid\s*=\s*['"]songlist['"][^>]*>(.*?)</table>"#).unwrap())
}

fn re_tr() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<tr([^>]*)>(.*?)</tr>").unwrap())
}

fn re_th() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<th[^>]*>(.*?)</th>").unwrap())
}

fn re_td() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap())
}

fn re_href() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r#"(?is)<a[^>]*?\bhref\s*=\s*['"]([^'"]+)['"][^>]*>(.*?)</a>"#).unwrap())
}

fn re_album_image() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"(?is)<div[^>]*\bclass\s*=\s*['"][^'"]*albumImage[^'"]*['"][^>]*>(.*?)</div>"#)
            .unwrap()
    })
}

fn re_img_src() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r#"(?is)<img[^>]*?\bsrc\s*=\s*['"]([^'"]+)['"]"#).unwrap())
}

fn re_all_tags() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<[^>]+>").unwrap())
}

pub(crate) struct AlbumParser;

impl AlbumParser {
    /// 从列表页 HTML 解析出完整的下载计划。
    ///
    /// 曲目索引按出现顺序从 0 开始分配，不使用页面里打印的序号。
    pub fn parse_album(html: &str, album_url: &str) -> Result<DownloadPlan, ParseError> {
        // 相关内容都在 pageContent 容器里，先缩小范围
        let lower = html.to_ascii_lowercase();
        let pos = lower
            .find(r#"id="pagecontent""#)
            .or_else(|| lower.find(r#"id='pagecontent'"#))
            .ok_or(ParseError::ContentMissing)?;
        let content = &html[pos..];

        let name = re_h2()
            .captures(content)
            .map(|c| cell_text(c.get(1).map(|m| m.as_str()).unwrap_or("")))
            .filter(|s| !s.is_empty())
            .ok_or(ParseError::NameMissing)?;

        let base = Url::parse(album_url).ok();

        let table = re_songlist()
            .captures(content)
            .and_then(|c| c.get(1))
            .ok_or(ParseError::TracklistMissing)?
            .as_str();

        let mut headers: Vec<String> = Vec::new();
        let mut footer: Vec<String> = Vec::new();
        let mut data_rows: Vec<&str> = Vec::new();

        for caps in re_tr().captures_iter(table) {
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let inner = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            if attrs.contains("songlist_header") {
                headers = th_texts(inner);
            } else if attrs.contains("songlist_footer") {
                footer = th_texts(inner);
            } else if re_href().is_match(inner) {
                // 没有链接的行是占位/分隔行，跳过
                data_rows.push(inner);
            }
        }

        let name_pos = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("song name"));

        // 表头在"Song Name"之后、末尾两个辅助列之前的非空单元格是格式标签。
        // 数据行在曲名后多一个无表头的时长列，因此格式列的 td 下标 = 表头下标 + 1。
        let mut formats: Vec<(usize, String)> = Vec::new();
        if let Some(p) = name_pos {
            let upper = headers.len().saturating_sub(2);
            for (k, label) in headers.iter().enumerate().take(upper).skip(p + 1) {
                if !label.is_empty() {
                    formats.push((k + 1, label.clone()));
                }
            }
        }

        let mut tracks = Vec::with_capacity(data_rows.len());
        for (index, row) in data_rows.iter().enumerate() {
            let Some(anchor) = re_href().captures(row) else {
                continue;
            };
            let href = anchor.get(1).map(|m| m.as_str()).unwrap_or("");
            let Some(page_url) = normalize_url(base.as_ref(), href) else {
                continue;
            };

            let tds: Vec<&str> = re_td()
                .captures_iter(row)
                .map(|c| c.get(1).map(|m| m.as_str()).unwrap_or(""))
                .collect();

            let title = name_pos
                .and_then(|p| tds.get(p))
                .map(|raw| cell_text(raw))
                .filter(|s| !s.is_empty())
                // 表头缺失或错位时退回锚点文本
                .unwrap_or_else(|| cell_text(anchor.get(2).map(|m| m.as_str()).unwrap_or("")));

            let duration = name_pos
                .and_then(|p| tds.get(p + 1))
                .map(|raw| cell_text(raw))
                .filter(|s| !s.is_empty());

            let mut sizes = HashMap::new();
            for (td_idx, label) in &formats {
                if let Some(raw) = tds.get(*td_idx) {
                    let text = cell_text(raw);
                    if !text.is_empty() {
                        sizes.insert(label.clone(), text);
                    }
                }
            }

            tracks.push(TrackRef {
                index,
                title,
                page_url,
                duration,
                sizes,
            });
        }

        // 页脚的 "Total:" 行给出总时长与各格式总大小（展示用，可缺失）
        let mut total_duration = None;
        let mut format_totals = vec![None; formats.len()];
        if let Some(p) = footer.iter().position(|c| c.eq_ignore_ascii_case("total:")) {
            total_duration = footer.get(p + 1).filter(|s| !s.is_empty()).cloned();
            for (j, slot) in format_totals.iter_mut().enumerate() {
                *slot = footer.get(p + 2 + j).filter(|s| !s.is_empty()).cloned();
            }
        }

        let mut covers = Vec::new();
        for caps in re_album_image().captures_iter(content) {
            let block = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let Some(full_url) = re_href()
                .captures(block)
                .and_then(|c| c.get(1))
                .and_then(|m| normalize_url(base.as_ref(), m.as_str()))
            else {
                continue;
            };
            let thumb_url = re_img_src()
                .captures(block)
                .and_then(|c| c.get(1))
                .and_then(|m| normalize_url(base.as_ref(), m.as_str()));
            covers.push(CoverRef {
                index: covers.len(),
                thumb_url,
                full_url,
            });
        }

        Ok(DownloadPlan {
            album_url: album_url.to_string(),
            meta: AlbumMeta {
                name,
                formats: formats.iter().map(|(_, l)| l.clone()).collect(),
                total_duration,
                format_totals,
            },
            tracks,
            covers,
        })
    }
}

fn th_texts(row_inner: &str) -> Vec<String> {
    re_th()
        .captures_iter(row_inner)
        .map(|c| cell_text(c.get(1).map(|m| m.as_str()).unwrap_or("")))
        .collect()
}

/// 去标签 + 实体解码 + 空白折叠后的单元格文本。
pub(crate) fn cell_text(raw: &str) -> String {
    let stripped = re_all_tags().replace_all(raw, "");
    let decoded = unescape_basic_entities(stripped.as_ref());
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn unescape_basic_entities(s: &str) -> Cow<'_, str> {
    if !(s.contains("&amp;")
        || s.contains("&lt;")
        || s.contains("&gt;")
        || s.contains("&quot;")
        || s.contains("&#34;")
        || s.contains("&#39;")
        || s.contains("&#x27;")
        || s.contains("&#x22;")
        || s.contains("&nbsp;"))
    {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.replace("&nbsp;", " ")
            .replace("&quot;", "\"")
            .replace("&#34;", "\"")
            .replace("&#x22;", "\"")
            .replace("&#39;", "'")
            .replace("&#x27;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

/// 把标记里找到的 href 归一化成绝对、可直接请求的 URL。
///
/// 相对路径按列表页地址拼接；空格等不安全字符由 `Url` 百分号转义。
pub(crate) fn normalize_url(base: Option<&Url>, href: &str) -> Option<String> {
    let href = unescape_basic_entities(href.trim());
    if href.is_empty() {
        return None;
    }
    match base {
        Some(b) => b.join(href.as_ref()).ok().map(|u| u.to_string()),
        None => Url::parse(href.as_ref()).ok().map(|u| u.to_string()),
    }
}
