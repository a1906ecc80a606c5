//! 下载主流程编排。
//!
//! 任务按给定顺序逐条执行，条与条之间不重叠；单条传输内部按块
//! 推进，块间可观察到取消信号。引擎自身不重试：一条任务失败就
//! 记入报告并继续下一条。

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::ProgressBar;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderValue};
use tracing::{debug, error, info, warn};

use crate::base_system::context::Config;
use crate::network_parser::network::{FetchError, KhWebNetwork};

use super::models::{
    DownloadReport, DownloadTask, ItemError, ItemFailure, TaskSource, TaskState,
};
use super::progress;
use super::resolver::TrackResolver;

enum ItemOutcome {
    Done(u64),
    Canceled,
}

/// 顺序下载引擎。
///
/// 持有流式下载专用的 HTTP 客户端（整体不限时，靠块间不活动超时
/// 兜底）和直链解析缓存；对专辑结构一无所知，只消费任务列表。
pub struct AlbumDownloader<'a> {
    client: Client,
    resolver: TrackResolver<'a>,
    format: String,
    chunk_size: usize,
    inactivity_timeout: Option<Duration>,
    verbose: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> AlbumDownloader<'a> {
    pub fn new(
        config: &Config,
        network: &'a KhWebNetwork,
        format: String,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Self> {
        let inactivity = (config.inactivity_timeout > 0)
            .then(|| Duration::from_secs(config.inactivity_timeout));

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        // 大文件禁用整体超时：慢而稳定的传输不能被杀，
        // 只在块与块之间的静默超过阈值时放弃。
        let mut builder = Client::builder()
            .default_headers(default_headers)
            .timeout(None::<Duration>)
            .connect_timeout(Duration::from_secs(config.request_timeout.max(1)));
        if let Some(d) = inactivity {
            builder = builder.read_timeout(d);
        }

        Ok(Self {
            client: builder.build()?,
            resolver: TrackResolver::new(network),
            format,
            chunk_size: config.chunk_size.max(1),
            inactivity_timeout: inactivity,
            verbose: config.verbose,
            cancel,
        })
    }

    fn is_canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 逐条执行任务并汇总报告。单项失败不会让整次运行返回 Err。
    pub fn download_tasks(&mut self, tasks: &[DownloadTask]) -> DownloadReport {
        let started = Instant::now();
        let mut report = DownloadReport::default();
        let total = tasks.len();

        for (pos, task) in tasks.iter().enumerate() {
            if self.is_canceled() {
                info!("收到停止信号，结束剩余任务");
                break;
            }

            println!("下载 \"{}\" [{}/{}]...", task.label, pos + 1, total);

            match self.run_item(task) {
                Ok(ItemOutcome::Done(bytes)) => {
                    report.success += 1;
                    report.bytes_transferred += bytes;
                    info!("完成 \"{}\"（{} 字节）", task.label, bytes);
                }
                Ok(ItemOutcome::Canceled) => {
                    report.canceled += 1;
                    warn!("已取消 \"{}\"", task.label);
                    break;
                }
                Err(err) => {
                    report.failed += 1;
                    error!("下载 \"{}\" 失败: {}", task.label, err);
                    report.failures.push(ItemFailure {
                        label: task.label.clone(),
                        state: err.final_state(),
                        error: err,
                    });
                }
            }
        }

        report.elapsed = started.elapsed();
        report
    }

    fn run_item(&mut self, task: &DownloadTask) -> Result<ItemOutcome, ItemError> {
        let mut state = TaskState::Pending;
        debug!("任务 \"{}\" 状态: {:?}", task.label, state);

        // 封面自带直链；曲目在这一刻才解析中间页
        let url = match &task.source {
            TaskSource::Direct { url } => url.clone(),
            TaskSource::TrackPage {
                page_url,
                track_index,
            } => self
                .resolver
                .resolve(*track_index, page_url, &self.format)?,
        };
        if self.verbose {
            println!("直链: {url}");
        }

        state = TaskState::Connecting;
        debug!("任务 \"{}\" 状态: {:?}", task.label, state);

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ItemError::Fetch(FetchError::Transport(e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ItemError::Http { status });
        }
        let total = resp.content_length().or(task.expected_size);

        if let Some(parent) = task.dest.parent() {
            fs::create_dir_all(parent)?;
        }

        state = TaskState::Streaming;
        debug!("任务 \"{}\" 状态: {:?}", task.label, state);

        let bar = progress::item_bar(total, task.label.clone());
        match self.stream_to_file(resp, &task.dest, &bar) {
            Ok(Some(bytes)) => {
                progress::finish_ok(&bar);
                state = TaskState::Completed;
                debug!("任务 \"{}\" 状态: {:?}", task.label, state);
                Ok(ItemOutcome::Done(bytes))
            }
            Ok(None) => {
                // 取消：半截文件不能冒充完整产物
                progress::discard(&bar);
                let _ = fs::remove_file(&task.dest);
                state = TaskState::Canceled;
                debug!("任务 \"{}\" 状态: {:?}", task.label, state);
                Ok(ItemOutcome::Canceled)
            }
            Err(err) => {
                progress::discard(&bar);
                if let Err(rm) = fs::remove_file(&task.dest) {
                    warn!("清理半截文件失败: {}: {}", task.dest.display(), rm);
                }
                Err(err)
            }
        }
    }

    /// 按块把响应体写进目标文件。
    ///
    /// 返回 `Ok(None)` 表示在块边界观察到了取消信号。
    /// 目标文件总是整体覆盖，重复运行得到确定的结果。
    fn stream_to_file(
        &self,
        mut resp: reqwest::blocking::Response,
        dest: &Path,
        bar: &ProgressBar,
    ) -> Result<Option<u64>, ItemError> {
        let mut writer = BufWriter::new(File::create(dest)?);
        let mut buf = vec![0u8; self.chunk_size];
        let mut bytes = 0u64;

        loop {
            if self.is_canceled() {
                return Ok(None);
            }

            let n = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => return Err(self.classify_read_error(err)),
            };

            writer.write_all(&buf[..n])?;
            bytes += n as u64;
            bar.inc(n as u64);
        }

        writer.flush()?;
        Ok(Some(bytes))
    }

    /// 流读取出错时区分“块间静默超时”和其他 IO 错误。
    fn classify_read_error(&self, err: std::io::Error) -> ItemError {
        let timed_out = matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
            || err.to_string().contains("timed out");
        if timed_out {
            ItemError::Timeout {
                seconds: self
                    .inactivity_timeout
                    .map(|d| d.as_secs())
                    .unwrap_or_default(),
            }
        } else {
            ItemError::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::TaskSource;
    use crate::network_parser::network::KhWebConfig;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    /// 起一个极简 HTTP 桩：按顺序应答 `responses`，每个连接应答一条后关闭。
    fn spawn_stub(responses: Vec<StubResponse>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for resp in responses {
                let (stream, _) = match listener.accept() {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
                // 读掉请求头，直到空行
                let mut line = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                }
                resp.write_to(stream);
            }
        });
        format!("http://{addr}")
    }

    enum StubResponse {
        Ok { body: Vec<u8>, content_length: bool },
        Status(u16),
        /// 发送一部分字节后停住，保持连接不关闭。
        Stall { head: Vec<u8>, hold: Duration },
    }

    impl StubResponse {
        fn write_to(self, mut stream: std::net::TcpStream) {
            match self {
                StubResponse::Ok {
                    body,
                    content_length,
                } => {
                    let mut head = String::from("HTTP/1.1 200 OK\r\nConnection: close\r\n");
                    if content_length {
                        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
                    }
                    head.push_str("\r\n");
                    let _ = stream.write_all(head.as_bytes());
                    let _ = stream.write_all(&body);
                }
                StubResponse::Status(code) => {
                    let head = format!(
                        "HTTP/1.1 {code} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    );
                    let _ = stream.write_all(head.as_bytes());
                }
                StubResponse::Stall { head, hold } => {
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        head.len() + 1024
                    );
                    let _ = stream.write_all(header.as_bytes());
                    let _ = stream.write_all(&head);
                    let _ = stream.flush();
                    thread::sleep(hold);
                }
            }
        }
    }

    fn test_config(inactivity: u64) -> Config {
        Config {
            chunk_size: 64,
            inactivity_timeout: inactivity,
            request_timeout: 5,
            ..Config::default()
        }
    }

    fn direct_task(url: String, dest: std::path::PathBuf, label: &str) -> DownloadTask {
        DownloadTask {
            label: label.to_string(),
            source: TaskSource::Direct { url },
            dest,
            expected_size: None,
        }
    }

    fn network() -> KhWebNetwork {
        KhWebNetwork::new(KhWebConfig::default()).unwrap()
    }

    #[test]
    fn downloads_all_tasks_and_reports_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let body_a = vec![0xAAu8; 1000];
        let body_b = vec![0xBBu8; 2048];
        let base_a = spawn_stub(vec![StubResponse::Ok {
            body: body_a.clone(),
            content_length: true,
        }]);
        let base_b = spawn_stub(vec![StubResponse::Ok {
            body: body_b.clone(),
            content_length: true,
        }]);

        let net = network();
        let config = test_config(0);
        let mut engine =
            AlbumDownloader::new(&config, &net, "MP3".to_string(), None).unwrap();

        let dest_a = dir.path().join("01 a.mp3");
        let dest_b = dir.path().join("02 b.mp3");
        let tasks = vec![
            direct_task(format!("{base_a}/a.mp3"), dest_a.clone(), "a"),
            direct_task(format!("{base_b}/b.mp3"), dest_b.clone(), "b"),
        ];

        let report = engine.download_tasks(&tasks);
        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.bytes_transferred, 1000 + 2048);
        assert_eq!(fs::read(&dest_a).unwrap(), body_a);
        assert_eq!(fs::read(&dest_b).unwrap().len(), 2048);
    }

    #[test]
    fn works_without_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let body = vec![0x11u8; 500];
        let base = spawn_stub(vec![StubResponse::Ok {
            body: body.clone(),
            content_length: false,
        }]);

        let net = network();
        let config = test_config(0);
        let mut engine =
            AlbumDownloader::new(&config, &net, "MP3".to_string(), None).unwrap();

        let dest = dir.path().join("x.mp3");
        let report =
            engine.download_tasks(&[direct_task(format!("{base}/x.mp3"), dest.clone(), "x")]);
        assert_eq!(report.success, 1);
        assert_eq!(fs::read(&dest).unwrap(), body);
    }

    #[test]
    fn http_failure_is_recorded_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let bad = spawn_stub(vec![StubResponse::Status(404)]);
        let good_body = vec![0x22u8; 100];
        let good = spawn_stub(vec![StubResponse::Ok {
            body: good_body.clone(),
            content_length: true,
        }]);

        let net = network();
        let config = test_config(0);
        let mut engine =
            AlbumDownloader::new(&config, &net, "MP3".to_string(), None).unwrap();

        let dest_bad = dir.path().join("bad.mp3");
        let dest_good = dir.path().join("good.mp3");
        let report = engine.download_tasks(&[
            direct_task(format!("{bad}/bad.mp3"), dest_bad.clone(), "bad"),
            direct_task(format!("{good}/good.mp3"), dest_good.clone(), "good"),
        ]);

        assert_eq!(report.success, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].state, TaskState::Failed);
        // 失败项不留产物，成功项完整
        assert!(!dest_bad.exists());
        assert_eq!(fs::read(&dest_good).unwrap(), good_body);
    }

    #[test]
    fn stalled_stream_times_out_and_partial_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let stalled = spawn_stub(vec![StubResponse::Stall {
            head: vec![0x33u8; 128],
            hold: Duration::from_secs(5),
        }]);
        let good_body = vec![0x44u8; 64];
        let good = spawn_stub(vec![StubResponse::Ok {
            body: good_body.clone(),
            content_length: true,
        }]);

        let net = network();
        let config = test_config(1);
        let mut engine =
            AlbumDownloader::new(&config, &net, "MP3".to_string(), None).unwrap();

        let dest_stall = dir.path().join("stall.mp3");
        let dest_good = dir.path().join("good.mp3");
        let report = engine.download_tasks(&[
            direct_task(format!("{stalled}/stall.mp3"), dest_stall.clone(), "stall"),
            direct_task(format!("{good}/good.mp3"), dest_good.clone(), "good"),
        ]);

        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].state, TaskState::TimedOut);
        assert!(matches!(
            report.failures[0].error,
            ItemError::Timeout { .. }
        ));
        assert!(!dest_stall.exists());
        // 超时不影响后续任务
        assert_eq!(report.success, 1);
        assert_eq!(fs::read(&dest_good).unwrap(), good_body);
    }

    #[test]
    fn rerun_overwrites_destination_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.mp3");
        fs::write(&dest, vec![0u8; 9999]).unwrap();

        let body = vec![0x55u8; 256];
        let base = spawn_stub(vec![StubResponse::Ok {
            body: body.clone(),
            content_length: true,
        }]);

        let net = network();
        let config = test_config(0);
        let mut engine =
            AlbumDownloader::new(&config, &net, "MP3".to_string(), None).unwrap();
        let report =
            engine.download_tasks(&[direct_task(format!("{base}/x.mp3"), dest.clone(), "x")]);

        assert_eq!(report.success, 1);
        assert_eq!(fs::read(&dest).unwrap(), body);
    }

    #[test]
    fn track_task_resolves_intermediate_page_first() {
        let dir = tempfile::tempdir().unwrap();
        let body = vec![0x66u8; 321];
        let binary = spawn_stub(vec![StubResponse::Ok {
            body: body.clone(),
            content_length: true,
        }]);
        let page_html = format!(
            r#"<a href="{binary}/01.mp3"><span>Click here to download as MP3</span></a>"#
        );
        let page = spawn_stub(vec![StubResponse::Ok {
            body: page_html.into_bytes(),
            content_length: true,
        }]);

        let net = network();
        let config = test_config(0);
        let mut engine =
            AlbumDownloader::new(&config, &net, "mp3".to_string(), None).unwrap();

        let dest = dir.path().join("01 intro.mp3");
        let task = DownloadTask {
            label: "Intro".to_string(),
            source: TaskSource::TrackPage {
                page_url: format!("{page}/track"),
                track_index: 0,
            },
            dest: dest.clone(),
            expected_size: None,
        };

        let report = engine.download_tasks(&[task]);
        assert_eq!(report.success, 1);
        assert_eq!(fs::read(&dest).unwrap(), body);
    }

    #[test]
    fn missing_format_on_track_page_is_per_item_failure() {
        let dir = tempfile::tempdir().unwrap();
        let page = spawn_stub(vec![StubResponse::Ok {
            body: br#"<a href="/x.flac"><span>Click here to download as FLAC</span></a>"#.to_vec(),
            content_length: true,
        }]);

        let net = network();
        let config = test_config(0);
        let mut engine =
            AlbumDownloader::new(&config, &net, "mp3".to_string(), None).unwrap();

        let task = DownloadTask {
            label: "Intro".to_string(),
            source: TaskSource::TrackPage {
                page_url: format!("{page}/track"),
                track_index: 0,
            },
            dest: dir.path().join("01.mp3"),
            expected_size: None,
        };

        let report = engine.download_tasks(&[task]);
        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.failures[0].error,
            ItemError::Resolution { .. }
        ));
    }

    #[test]
    fn cancellation_is_observed_between_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_stub(vec![StubResponse::Ok {
            body: vec![0x77u8; 4096],
            content_length: true,
        }]);

        let cancel = Arc::new(AtomicBool::new(true));
        let net = network();
        let config = test_config(0);
        let mut engine =
            AlbumDownloader::new(&config, &net, "MP3".to_string(), Some(cancel)).unwrap();

        let dest = dir.path().join("x.mp3");
        let report =
            engine.download_tasks(&[direct_task(format!("{base}/x.mp3"), dest.clone(), "x")]);

        // 信号在进入任务循环前就已置位：不再开始任何任务
        assert_eq!(report.attempted(), 0);
        assert!(!dest.exists());
    }
}
