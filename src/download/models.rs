//! 下载相关的数据模型定义。
//!
//! 包含专辑元数据、曲目/封面条目、下载任务、单项错误与汇总报告等核心数据结构。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;

use crate::network_parser::network::FetchError;

/// 专辑级元数据（从列表页解析得到，只读）。
#[derive(Debug, Clone, Default)]
pub struct AlbumMeta {
    pub name: String,
    /// 页面上宣告的编码格式，按文档顺序排列，可能为空。
    pub formats: Vec<String>,
    /// 页脚的总时长单元格（展示用，可能缺失）。
    pub total_duration: Option<String>,
    /// 页脚各格式的总大小单元格，与 `formats` 对齐（展示用）。
    pub format_totals: Vec<Option<String>>,
}

/// 列表页中的一条曲目。`index` 按枚举顺序从 0 开始分配，
/// 页面上打印的序号只是展示文本，不作为依据。
#[derive(Debug, Clone)]
pub struct TrackRef {
    pub index: usize,
    pub title: String,
    /// 中间页地址（不是二进制直链）。
    pub page_url: String,
    pub duration: Option<String>,
    /// 格式 -> 大小展示文本（如 "4.18 MB"），仅用于展示。
    pub sizes: HashMap<String, String>,
}

/// 列表页中的一张封面。`full_url` 已是二进制直链，无需二次解析。
#[derive(Debug, Clone)]
pub struct CoverRef {
    pub index: usize,
    pub thumb_url: Option<String>,
    pub full_url: String,
}

/// 一次运行的下载计划：专辑元数据 + 曲目列表 + 封面列表。
///
/// 由一次成功的列表页抓取构建，之后只读；直链在下载时按需解析。
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub album_url: String,
    pub meta: AlbumMeta,
    pub tracks: Vec<TrackRef>,
    pub covers: Vec<CoverRef>,
}

/// 曲目下载范围（含两端，0 起始）。
#[derive(Debug, Clone, Copy)]
pub struct TrackRange {
    pub start: usize,
    pub end: usize,
}

/// 任务来源：封面是直链，曲目需要先抓中间页解析直链。
#[derive(Debug, Clone)]
pub enum TaskSource {
    Direct { url: String },
    TrackPage { page_url: String, track_index: usize },
}

/// 交给下载引擎的一条任务，运行期临时值，不落盘。
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub label: String,
    pub source: TaskSource,
    pub dest: PathBuf,
    pub expected_size: Option<u64>,
}

/// 单条任务的状态机：
/// `Pending → Connecting → Streaming → {Completed | TimedOut | Failed | Canceled}`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Connecting,
    Streaming,
    Completed,
    TimedOut,
    Failed,
    Canceled,
}

/// 单条任务失败的原因。
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("http status {status}")]
    Http { status: StatusCode },
    #[error("no {format} link on the track page")]
    Resolution { format: String },
    #[error("inactivity timeout after {seconds}s of silence")]
    Timeout { seconds: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ItemError {
    /// 失败时对应的终态（超时与其他失败分开统计）。
    pub fn final_state(&self) -> TaskState {
        match self {
            ItemError::Timeout { .. } => TaskState::TimedOut,
            _ => TaskState::Failed,
        }
    }
}

/// 报告中的一条失败记录，保留足够的上下文便于手动重试。
#[derive(Debug)]
pub struct ItemFailure {
    pub label: String,
    pub state: TaskState,
    pub error: ItemError,
}

/// 整次运行的汇总：单项失败不会中止后续任务，也不改变进程退出码。
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub success: u32,
    pub failed: u32,
    pub canceled: u32,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    pub failures: Vec<ItemFailure>,
}

impl DownloadReport {
    pub fn attempted(&self) -> u32 {
        self.success + self.failed + self.canceled
    }
}
