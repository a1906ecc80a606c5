//! khinsider 页面抓取的网络层。
//!
//! 只负责把列表页 / 曲目中间页的 HTML 拉回来；解析在 `extract` 中完成。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::{debug, error, warn};

/// 到达某个 URL 失败（传输层错误或非成功状态码）。
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    Status { url: String, status: StatusCode },
}

#[derive(Debug, Clone)]
pub struct KhWebConfig {
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub user_agent: String,
}

impl Default for KhWebConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            max_retries: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_string(),
        }
    }
}

pub struct KhWebNetwork {
    client: Client,
    config: KhWebConfig,
}

impl KhWebNetwork {
    pub fn new(config: KhWebConfig) -> anyhow::Result<Self> {
        // reqwest 在本项目里关闭了默认特性（没有 gzip 解码器），
        // 这里显式要求 identity 编码，拿到的字节可以直接使用。
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        default_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn get_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent)
                .unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
        );
        headers
    }

    /// 抓取专辑列表页，带退避重试（列表页失败是致命错误，多试几次值得）。
    pub fn fetch_album_page(&self, url: &str) -> Result<String, FetchError> {
        let retries = self.config.max_retries.max(1);
        let mut backoff = 0.6f64;
        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=retries {
            if attempt > 1 {
                debug!("重试第 {} 次抓取列表页，URL: {}", attempt, url);
            }

            match self.fetch_page(url) {
                Ok(html) => return Ok(html),
                Err(FetchError::Status { url, status }) if status.is_client_error() => {
                    // 4xx 不会因为重试而好转
                    error!("列表页返回 {}，不再重试", status);
                    return Err(FetchError::Status { url, status });
                }
                Err(e) => {
                    warn!("抓取列表页失败: {}", e);
                    last_error = Some(e);
                    sleep_backoff(attempt, retries, &mut backoff, 0.3);
                }
            }
        }

        Err(last_error.expect("at least one attempt was made"))
    }

    /// 抓取任意一个页面（曲目中间页走这里，单次尝试）。
    pub fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let resp = self.client.get(url).headers(self.get_headers()).send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        Ok(resp.text()?)
    }
}

fn sleep_backoff(attempt: usize, retries: usize, backoff: &mut f64, jitter_max: f64) {
    if attempt >= retries {
        return;
    }
    let jitter = jitter_seconds(jitter_max);
    let sleep_s = (*backoff + jitter).min(3.0);
    std::thread::sleep(Duration::from_millis((sleep_s * 1000.0) as u64));
    *backoff = (*backoff * 2.0).min(3.0);
}

fn jitter_seconds(max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    // 用时间戳制造一个轻量抖动（避免引入 rand 依赖）
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let bucket = (nanos % 10_000) as f64 / 10_000.0; // [0,1)
    bucket * max
}
