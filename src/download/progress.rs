//! 单条传输的 CLI 进度条。
//!
//! 服务器报了 Content-Length 就画按字节的确定进度条，
//! 否则退化为不定长的 spinner 样式；进度纯观察用，不影响产物。

use indicatif::{ProgressBar, ProgressStyle};

fn known_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("##-")
}

fn unknown_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [{elapsed_precise}] {spinner} {bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// 为一条任务建进度条（默认画到 stderr，与普通输出分离）。
pub(crate) fn item_bar(total: Option<u64>, prefix: String) -> ProgressBar {
    let bar = match total {
        Some(len) => {
            let b = ProgressBar::new(len);
            b.set_style(known_style());
            b
        }
        None => {
            let b = ProgressBar::new_spinner();
            b.set_style(unknown_style());
            b
        }
    };
    bar.set_prefix(prefix);
    bar
}

/// 成功：保留完成状态的进度条。
pub(crate) fn finish_ok(bar: &ProgressBar) {
    bar.finish();
}

/// 失败 / 取消：清掉半截的进度条，错误信息走日志与汇总。
pub(crate) fn discard(bar: &ProgressBar) {
    bar.finish_and_clear();
}
