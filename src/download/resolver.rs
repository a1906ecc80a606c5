//! 曲目直链解析。
//!
//! 列表页只给到中间页；真正的二进制直链要再抓一次中间页，
//! 从带格式标签的下载链接里挑出匹配项。

use std::collections::HashMap;

use tracing::debug;
use url::Url;

use crate::network_parser::extract::{cell_text, normalize_url};
use crate::network_parser::network::KhWebNetwork;

use super::models::ItemError;

/// 中间页 -> 直链的解析器，带 (曲目索引, 格式) 维度的缓存。
///
/// 缓存归下载引擎所有，Album 模型本身保持只读；
/// 每条曲目在被选中下载时才解析一次，不跨格式复用。
pub struct TrackResolver<'a> {
    network: &'a KhWebNetwork,
    cache: HashMap<(usize, String), String>,
}

impl<'a> TrackResolver<'a> {
    pub fn new(network: &'a KhWebNetwork) -> Self {
        Self {
            network,
            cache: HashMap::new(),
        }
    }

    /// 抓取曲目中间页并找到指定格式的二进制直链。
    ///
    /// 专辑级宣告过的格式在单条曲目上缺失时，这里返回
    /// `ItemError::Resolution`，由调用方按单项失败处理，不中止整次运行。
    pub fn resolve(
        &mut self,
        track_index: usize,
        page_url: &str,
        format: &str,
    ) -> Result<String, ItemError> {
        let key = (track_index, format.to_ascii_lowercase());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let html = self.network.fetch_page(page_url)?;
        let url = find_format_link(&html, page_url, format).ok_or_else(|| {
            ItemError::Resolution {
                format: format.to_string(),
            }
        })?;

        debug!("曲目 {} 的 {} 直链: {}", track_index, format, url);
        self.cache.insert(key, url.clone());
        Ok(url)
    }
}

/// 在中间页标记里扫描格式匹配的下载链接，返回第一个命中的绝对 URL。
///
/// 站点上的格式标签大小写不统一（"MP3" / "mp3"），两边都按小写比较；
/// 链接文本不含格式时退回到 URL 扩展名判断。
pub(crate) fn find_format_link(html: &str, page_url: &str, format: &str) -> Option<String> {
    let base = Url::parse(page_url).ok();
    let want = format.to_ascii_lowercase();

    for caps in anchor_iter(html) {
        let (href, inner) = caps;
        let text = cell_text(inner).to_ascii_lowercase();

        let label_matches = text.split_whitespace().any(|w| w == want);
        let ext_matches = href
            .rsplit('.')
            .next()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&want));

        if label_matches || ext_matches {
            if let Some(url) = normalize_url(base.as_ref(), href) {
                return Some(url);
            }
        }
    }

    None
}

fn anchor_iter(html: &str) -> impl Iterator<Item = (&str, &str)> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r#"(?is)<a[^>]*?\bhref\s*=\s*['"]([^'"]+)['"][^>]*>(.*?)</a>"#).unwrap()
    });
    re.captures_iter(html).map(|c| {
        (
            c.get(1).map(|m| m.as_str()).unwrap_or(""),
            c.get(2).map(|m| m.as_str()).unwrap_or(""),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str =
        "https://downloads.khinsider.com/game-soundtracks/album/test-album/01%20Intro.mp3";

    const TRACK_PAGE: &str = r#"
<div id="pageContent">
  <p><a href="/game-soundtracks/album/test-album"><span>Back to album</span></a></p>
  <p><a href="https://vgmsite.com/soundtracks/test-album/01 Intro.mp3"><span class="songDownloadLink">Click here to download as MP3</span></a></p>
  <p><a href="https://vgmsite.com/soundtracks/test-album/01 Intro.flac"><span class="songDownloadLink">Click here to download as FLAC</span></a></p>
</div>"#;

    #[test]
    fn matches_format_case_insensitively() {
        let url = find_format_link(TRACK_PAGE, PAGE_URL, "mp3").unwrap();
        assert_eq!(url, "https://vgmsite.com/soundtracks/test-album/01%20Intro.mp3");

        let url = find_format_link(TRACK_PAGE, PAGE_URL, "FLAC").unwrap();
        assert_eq!(url, "https://vgmsite.com/soundtracks/test-album/01%20Intro.flac");
    }

    #[test]
    fn absent_format_yields_none() {
        assert!(find_format_link(TRACK_PAGE, PAGE_URL, "ogg").is_none());
    }

    #[test]
    fn falls_back_to_extension_when_label_is_bare() {
        let page = r#"<a href="https://vgmsite.com/x/track.ogg"><span>Click here</span></a>"#;
        let url = find_format_link(page, PAGE_URL, "OGG").unwrap();
        assert_eq!(url, "https://vgmsite.com/x/track.ogg");
    }

    #[test]
    fn first_match_wins() {
        let page = r#"
            <a href="https://a.example/one.mp3"><span>download as MP3</span></a>
            <a href="https://a.example/two.mp3"><span>download as MP3</span></a>"#;
        assert_eq!(
            find_format_link(page, PAGE_URL, "mp3").unwrap(),
            "https://a.example/one.mp3"
        );
    }
}
