//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`     — 数据模型（DownloadPlan / DownloadTask / 报告等）
//! - `plan`       — 计划准备、输入校验、范围选择与任务构建
//! - `resolver`   — 曲目中间页 -> 二进制直链解析（带缓存）
//! - `progress`   — 单条传输的 CLI 进度条
//! - `downloader` — 顺序下载引擎

pub mod downloader;
pub mod models;
pub mod plan;
pub(crate) mod progress;
pub mod resolver;
