//! 列表页 / 中间页的抓取与解析。
//!
//! 子模块：
//! - `network` — 阻塞 HTTP 客户端、请求头、退避重试
//! - `extract` — 列表页的正则提取规则（专辑名/格式/曲目/封面）

pub mod extract;
pub mod network;
