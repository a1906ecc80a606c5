//! 下载计划准备与任务构建。
//!
//! 负责抓取并解析列表页、校验配置（格式 / 范围 / 输出目录）、
//! 按范围挑选曲目并生成交给下载引擎的任务列表。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::base_system::context::safe_fs_name;
use crate::network_parser::extract::AlbumParser;
use crate::network_parser::network::KhWebNetwork;

use super::models::{DownloadPlan, DownloadTask, TaskSource, TrackRange, TrackRef};

const ALBUM_URL_PREFIX: &str = "https://downloads.khinsider.com/game-soundtracks/album/";

/// 输入校验错误，在任何下载类网络活动开始前暴露。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("\"{0}\" is not a khinsider album url")]
    InvalidAlbumUrl(String),
    #[error("format {requested} is not advertised by this album (available: {available})")]
    UnknownFormat { requested: String, available: String },
    #[error("invalid track range {start}..={end} for an album of {total} tracks")]
    InvalidRange {
        start: usize,
        end: usize,
        total: usize,
    },
    #[error("output path {0} is not a usable directory")]
    OutputDir(PathBuf),
}

/// 列表页地址必须落在 khinsider 的专辑前缀下，抓取前先拦住明显的错误输入。
pub fn validate_album_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with(ALBUM_URL_PREFIX) {
        Ok(())
    } else {
        Err(ConfigError::InvalidAlbumUrl(url.to_string()))
    }
}

/// 抓取列表页并解析成下载计划。列表页拿不到或解析失败都是致命错误。
pub fn prepare_download_plan(network: &KhWebNetwork, album_url: &str) -> Result<DownloadPlan> {
    info!("准备下载计划: {}", album_url);

    let html = network
        .fetch_album_page(album_url)
        .with_context(|| format!("抓取列表页失败: {album_url}"))?;

    let plan = AlbumParser::parse_album(&html, album_url)
        .with_context(|| format!("解析列表页失败: {album_url}"))?;

    info!(
        "专辑 \"{}\"（{}）: {} 首曲目 / {} 张封面 / 格式 [{}]",
        plan.meta.name,
        plan.album_url,
        plan.tracks.len(),
        plan.covers.len(),
        plan.meta.formats.join(", ")
    );
    Ok(plan)
}

/// 决定本次使用的格式。
///
/// 未指定时取页面宣告的第一个格式，页面没有宣告任何格式时退回 mp3；
/// 显式指定但不在宣告列表里（忽略大小写）则是配置错误。
pub fn pick_format(formats: &[String], requested: Option<&str>) -> Result<String, ConfigError> {
    match requested {
        None => Ok(formats
            .first()
            .cloned()
            .unwrap_or_else(|| "mp3".to_string())),
        Some(want) => {
            if formats.is_empty() {
                // 页面没宣告格式时只能相信用户，按曲目粒度再失败
                return Ok(want.to_string());
            }
            formats
                .iter()
                .find(|f| f.eq_ignore_ascii_case(want))
                .cloned()
                .ok_or_else(|| ConfigError::UnknownFormat {
                    requested: want.to_string(),
                    available: formats.join(", "),
                })
        }
    }
}

/// 校验含两端的 0 起始下载范围。
///
/// 越界或颠倒的范围是输入错误，直接拒绝，不做静默收敛。
pub fn validate_range(
    start: Option<usize>,
    end: Option<usize>,
    total: usize,
) -> Result<Option<TrackRange>, ConfigError> {
    if start.is_none() && end.is_none() {
        return Ok(None);
    }

    let s = start.unwrap_or(0);
    let e = end.unwrap_or(total.saturating_sub(1));
    if total == 0 || s > e || e >= total {
        return Err(ConfigError::InvalidRange {
            start: s,
            end: e,
            total,
        });
    }
    Ok(Some(TrackRange { start: s, end: e }))
}

/// 按已校验的范围挑出曲目子序列（`None` 表示整张专辑）。
pub fn apply_range(tracks: &[TrackRef], range: Option<TrackRange>) -> Vec<TrackRef> {
    match range {
        None => tracks.to_vec(),
        Some(r) => tracks
            .iter()
            .skip(r.start)
            .take(r.end - r.start + 1)
            .cloned()
            .collect(),
    }
}

/// 确保输出目录存在且确实是目录。
pub fn ensure_output_dir(dir: &Path) -> Result<(), ConfigError> {
    if fs::create_dir_all(dir).is_err() || !dir.is_dir() {
        return Err(ConfigError::OutputDir(dir.to_path_buf()));
    }
    Ok(())
}

/// 生成任务列表：封面在前（直链），选中的曲目随后（下载时再解析直链）。
///
/// 文件名清理在这里一次完成，引擎只负责把字节写进给定路径。
pub fn build_tasks(
    plan: &DownloadPlan,
    selected: &[TrackRef],
    format: &str,
    include_covers: bool,
    out_dir: &Path,
) -> Vec<DownloadTask> {
    let mut tasks = Vec::new();

    if include_covers {
        for cover in &plan.covers {
            debug!(
                "封面 {:02}: 直链 {} 缩略图 {}",
                cover.index + 1,
                cover.full_url,
                cover.thumb_url.as_deref().unwrap_or("-")
            );
            tasks.push(DownloadTask {
                label: format!("封面 {:02}", cover.index + 1),
                source: TaskSource::Direct {
                    url: cover.full_url.clone(),
                },
                dest: out_dir.join(cover_file_name(cover.index, &cover.full_url)),
                expected_size: None,
            });
        }
    }

    for track in selected {
        tasks.push(DownloadTask {
            label: track.title.clone(),
            source: TaskSource::TrackPage {
                page_url: track.page_url.clone(),
                track_index: track.index,
            },
            dest: out_dir.join(track_file_name(track, format)),
            expected_size: None,
        });
    }

    tasks
}

fn track_file_name(track: &TrackRef, format: &str) -> String {
    let stem = if track.title.is_empty() {
        format!("{:02}", track.index + 1)
    } else {
        safe_fs_name(&track.title, "_", 120)
    };
    format!(
        "{:02} {}.{}",
        track.index + 1,
        stem,
        format.to_ascii_lowercase()
    )
}

fn cover_file_name(index: usize, url: &str) -> String {
    let ext = Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
        })
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "jpg".to_string());
    format!("cover_{:02}.{}", index + 1, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::{AlbumMeta, CoverRef};
    use std::collections::HashMap;

    fn track(i: usize, title: &str) -> TrackRef {
        TrackRef {
            index: i,
            title: title.to_string(),
            page_url: format!("https://downloads.khinsider.com/t/{i}"),
            duration: None,
            sizes: HashMap::new(),
        }
    }

    fn plan_with(tracks: Vec<TrackRef>, covers: Vec<CoverRef>) -> DownloadPlan {
        DownloadPlan {
            album_url: "https://downloads.khinsider.com/game-soundtracks/album/x".to_string(),
            meta: AlbumMeta {
                name: "X".to_string(),
                formats: vec!["MP3".to_string()],
                ..AlbumMeta::default()
            },
            tracks,
            covers,
        }
    }

    #[test]
    fn rejects_non_album_urls() {
        assert!(validate_album_url("https://example.com/album/x").is_err());
        assert!(
            validate_album_url("https://downloads.khinsider.com/game-soundtracks/album/x").is_ok()
        );
    }

    #[test]
    fn range_selection_keeps_order_and_length() {
        let tracks: Vec<TrackRef> = (0..5).map(|i| track(i, "t")).collect();
        let range = validate_range(Some(1), Some(3), tracks.len()).unwrap();
        let selected = apply_range(&tracks, range);
        assert_eq!(selected.len(), 3);
        assert_eq!(
            selected.iter().map(|t| t.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn open_ended_range_defaults() {
        // 只给 start：一直取到专辑末尾
        let r = validate_range(Some(2), None, 5).unwrap().unwrap();
        assert_eq!((r.start, r.end), (2, 4));
        // 只给 end：从头开始
        let r = validate_range(None, Some(2), 5).unwrap().unwrap();
        assert_eq!((r.start, r.end), (0, 2));
        // 都不给：不限范围
        assert!(validate_range(None, None, 5).unwrap().is_none());
    }

    #[test]
    fn inverted_or_out_of_bounds_range_is_config_error() {
        assert!(matches!(
            validate_range(Some(3), Some(1), 5),
            Err(ConfigError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_range(Some(0), Some(5), 5),
            Err(ConfigError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_range(Some(0), None, 0),
            Err(ConfigError::InvalidRange { .. })
        ));
    }

    #[test]
    fn format_defaults_to_first_advertised() {
        let formats = vec!["FLAC".to_string(), "MP3".to_string()];
        assert_eq!(pick_format(&formats, None).unwrap(), "FLAC");
        assert_eq!(pick_format(&[], None).unwrap(), "mp3");
    }

    #[test]
    fn format_match_is_case_insensitive() {
        let formats = vec!["MP3".to_string()];
        assert_eq!(pick_format(&formats, Some("mp3")).unwrap(), "MP3");
        assert!(matches!(
            pick_format(&formats, Some("ogg")),
            Err(ConfigError::UnknownFormat { .. })
        ));
    }

    #[test]
    fn tasks_put_covers_first_then_tracks_in_order() {
        let plan = plan_with(
            (0..3).map(|i| track(i, "Song")).collect(),
            vec![CoverRef {
                index: 0,
                thumb_url: None,
                full_url: "https://vgmsite.com/covers/front.png".to_string(),
            }],
        );
        let selected = apply_range(&plan.tracks, Some(TrackRange { start: 1, end: 2 }));
        let tasks = build_tasks(&plan, &selected, "MP3", true, Path::new("/tmp/out"));

        assert_eq!(tasks.len(), 3);
        assert!(matches!(tasks[0].source, TaskSource::Direct { .. }));
        assert!(tasks[0].dest.ends_with("cover_01.png"));
        assert!(matches!(
            tasks[1].source,
            TaskSource::TrackPage { track_index: 1, .. }
        ));
        assert!(tasks[1].dest.ends_with("02 Song.mp3"));
        assert!(tasks[2].dest.ends_with("03 Song.mp3"));
    }

    #[test]
    fn track_file_names_are_sanitized() {
        let t = track(0, "Intro: Part 1 / Reprise?");
        let name = track_file_name(&t, "MP3");
        assert!(!name.contains('/'));
        assert!(!name.contains('?'));
        assert!(name.ends_with(".mp3"));
    }
}
