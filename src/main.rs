//! khinsider Album Downloader（khinsider 专辑下载器）Rust 实现。
//!
//! 本 crate 负责：从专辑列表页解析元数据（曲目/格式/封面），
//! 逐条解析曲目二进制直链，并以带进度与不活动超时保护的
//! 流式方式顺序下载到本地目录。
//!
//! 代码结构（读代码入口）：
//! - `base_system`    ：配置/日志/路径等基础设施
//! - `network_parser` ：列表页/中间页抓取与正则提取
//! - `download`       ：计划构建、直链解析与顺序下载引擎
//! - `ui`             ：摘要表格、确认提示与结果汇总

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;

mod base_system;
mod download;
mod network_parser;
mod ui;

use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use download::downloader::AlbumDownloader;
use download::plan;
use network_parser::network::{KhWebConfig, KhWebNetwork};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "khinsider-album-downloader")]
#[command(about = "Download tracklist and covers from a khinsider album URL")]
struct Cli {
    /// khinsider 专辑列表页 URL
    #[arg(value_name = "URL", required_unless_present = "version")]
    url: Option<String>,

    /// 输出目录（默认取配置文件的 save_path，再默认当前目录）
    #[arg(short, long)]
    output: Option<String>,

    /// 下载格式（mp3/flac/...，默认取页面宣告的第一个）
    #[arg(short, long)]
    format: Option<String>,

    /// 块间不活动超时（秒），0 表示不限
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// 每次读写的块大小（字节），不清楚用途请不要修改
    #[arg(long = "chunk")]
    chunk_size: Option<usize>,

    /// 起始曲目索引（含，0 起始，默认从第一首开始）
    #[arg(long)]
    start: Option<usize>,

    /// 结束曲目索引（含，0 起始，默认到最后一首）
    #[arg(long)]
    end: Option<usize>,

    /// 同时下载封面
    #[arg(short = 'c', long)]
    covers: bool,

    /// 跳过下载前的确认提示
    #[arg(short = 'y', long)]
    yes: bool,

    /// 打印解析到的二进制直链等额外信息
    #[arg(short = 'v', long)]
    verbose: bool,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件，方便 Docker 挂载）
    #[arg(long)]
    data_dir: Option<String>,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("khinsider Album Downloader v{}", VERSION);
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    let cancel = Arc::new(AtomicBool::new(false));
    let _log = init_logging(cli.debug, data_dir, Arc::clone(&cancel))?;

    let mut config = load_or_create::<Config>(data_dir).map_err(|e| anyhow!(e.to_string()))?;
    apply_cli_overrides(&mut config, &cli);

    run(&config, &cli, cancel)
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(output) = &cli.output {
        config.save_path = output.clone();
    }
    if let Some(format) = &cli.format {
        config.audio_format = format.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.inactivity_timeout = timeout;
    }
    if let Some(chunk) = cli.chunk_size {
        config.chunk_size = chunk;
    }
    if cli.covers {
        config.download_covers = true;
    }
    if cli.yes {
        config.auto_confirm = true;
    }
    if cli.verbose {
        config.verbose = true;
    }
}

fn run(config: &Config, cli: &Cli, cancel: Arc<AtomicBool>) -> Result<()> {
    let url = cli.url.as_deref().context("缺少专辑 URL")?;

    // 输入校验先行：URL 前缀不对直接拒绝，不发任何请求
    plan::validate_album_url(url)?;

    let network = KhWebNetwork::new(KhWebConfig {
        request_timeout: Duration::from_secs(config.request_timeout.max(1)),
        max_retries: config.max_retries.max(1) as usize,
        user_agent: config.user_agent.clone(),
    })?;

    // 列表页拿不到或解析失败是致命错误，整个运行以非零状态退出
    let album = plan::prepare_download_plan(&network, url)?;

    // 其余校验都在下载类网络活动开始之前完成
    let format = plan::pick_format(&album.meta.formats, non_empty(&config.audio_format))?;
    let range = plan::validate_range(cli.start, cli.end, album.tracks.len())?;
    let out_dir = config.default_save_dir();
    plan::ensure_output_dir(&out_dir)?;

    ui::print_album_summary(&album);
    ui::print_chosen_options(
        &out_dir,
        &format,
        config.inactivity_timeout,
        config.chunk_size,
        range,
        config.download_covers,
    );

    if !config.auto_confirm && !ui::confirm("\n确认开始下载？", true)? {
        println!("已取消。");
        return Ok(());
    }

    let selected = plan::apply_range(&album.tracks, range);
    let tasks = plan::build_tasks(
        &album,
        &selected,
        &format,
        config.download_covers,
        &out_dir,
    );
    if tasks.is_empty() {
        println!("没有需要下载的内容。");
        return Ok(());
    }

    let mut engine = AlbumDownloader::new(config, &network, format, Some(cancel))?;
    let report = engine.download_tasks(&tasks);
    ui::print_report(&report);

    info!(
        "运行结束: 成功 {} / 失败 {} / 取消 {}",
        report.success, report.failed, report.canceled
    );

    // 单项失败不改变退出状态：专辑已解析且任务都被尝试过即算运行成功
    Ok(())
}

fn non_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

fn init_logging(
    debug: bool,
    base_dir: Option<&Path>,
    cancel: Arc<AtomicBool>,
) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: debug,
    };
    LogSystem::init_with_base(opts, base_dir, cancel).map_err(|e| anyhow!(e))
}
