//! 命令行交互：专辑摘要、选项回显、确认提示与结果汇总。
//!
//! 这里只消费核心的数据结构做展示，不含下载逻辑。

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Result;

use crate::download::models::{DownloadPlan, DownloadReport, TrackRange};

/// 打印专辑摘要：曲目表、总时长、各格式总大小与封面数。
pub fn print_album_summary(plan: &DownloadPlan) {
    println!("\n{}\n", plan.meta.name);

    let index_w = 3;
    let title_w = plan
        .tracks
        .iter()
        .map(|t| t.title.chars().count())
        .max()
        .unwrap_or(0)
        .max("Song Name".len());

    // 表头
    print!("{:>index_w$} | {:<title_w$} | {:>6}", "#", "Song Name", "Length");
    for fmt in &plan.meta.formats {
        print!(" | {:>9}", fmt);
    }
    println!();

    for track in &plan.tracks {
        print!(
            "{:>index_w$} | {:<title_w$} | {:>6}",
            track.index + 1,
            track.title,
            track.duration.as_deref().unwrap_or("-"),
        );
        for fmt in &plan.meta.formats {
            print!(
                " | {:>9}",
                track.sizes.get(fmt).map(String::as_str).unwrap_or("-")
            );
        }
        println!();
    }

    // 页脚有总时长就用页脚的，否则自己把各曲目时长加起来
    let total_secs: u64 = plan
        .tracks
        .iter()
        .filter_map(|t| t.duration.as_deref().and_then(parse_duration_secs))
        .sum();
    match plan.meta.total_duration.as_deref() {
        Some(total) => println!("\n总时长: {total}"),
        None if total_secs > 0 => println!("\n总时长: {}", format_duration(total_secs)),
        None => println!(),
    }

    for (fmt, total) in plan.meta.formats.iter().zip(&plan.meta.format_totals) {
        if let Some(total) = total {
            println!("{} 总大小: {}", fmt, total);
        }
    }

    println!("封面数量: {}", plan.covers.len());
}

/// 下载开始前回显生效的选项。
pub fn print_chosen_options(
    out_dir: &Path,
    format: &str,
    inactivity_timeout: u64,
    chunk_size: usize,
    range: Option<TrackRange>,
    covers: bool,
) {
    println!("\n选定格式: {}", format.to_uppercase());
    println!("保存目录: {}", out_dir.display());
    if inactivity_timeout > 0 {
        println!("不活动超时: {} 秒", inactivity_timeout);
    }
    println!("块大小: {} 字节", chunk_size);
    if let Some(r) = range {
        println!("曲目范围: {} ~ {}（含两端，0 起始）", r.start, r.end);
    }
    println!("下载封面: {}", if covers { "是" } else { "否" });
}

/// 结束汇总：成功/失败/取消逐项列出，部分成功不会被当成全部成功。
pub fn print_report(report: &DownloadReport) {
    println!(
        "\n下载完成 成功: {} | 失败: {} | 取消: {} | 共 {} 项",
        report.success,
        report.failed,
        report.canceled,
        report.attempted()
    );
    if !report.failures.is_empty() {
        println!("失败明细（可手动重试）:");
        for failure in &report.failures {
            println!("  - \"{}\" [{:?}]: {}", failure.label, failure.state, failure.error);
        }
    }
    println!(
        "共传输 {}，用时 {:.1} 秒",
        format_bytes(report.bytes_transferred),
        report.elapsed.as_secs_f32()
    );
}

/// y/n 确认，空输入取默认值。
pub fn confirm(question: &str, default_yes: bool) -> Result<bool> {
    let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
    loop {
        let line = read_line(&format!("{question} {hint} "))?;
        let ans = line.trim().to_ascii_lowercase();
        match ans.as_str() {
            "" => return Ok(default_yes),
            "y" | "ye" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => {}
        }
    }
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line)
}

/// 解析 "3:02" / "1:02:03" 形式的时长为秒数。
fn parse_duration_secs(text: &str) -> Option<u64> {
    let mut total = 0u64;
    for part in text.split(':') {
        let n: u64 = part.trim().parse().ok()?;
        total = total * 60 + n;
    }
    Some(total)
}

fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours} 小时 {minutes} 分 {seconds} 秒")
    } else {
        format!("{minutes} 分 {seconds} 秒")
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
