use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::info;

use crate::config::HttpSettings;
use crate::errors::FetchError;

pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One GET, no retries. Retry policy belongs to the stage loop.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// `referer` pins the Referer header to the index origin.
    pub fn new(settings: &HttpSettings, referer: Option<&str>) -> anyhow::Result<Self> {
        Self::with_timeout(settings, referer, Duration::from_secs(settings.timeout_secs))
    }

    pub fn with_timeout(
        settings: &HttpSettings,
        referer: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(browser_headers(settings, referer)?)
            .timeout(timeout)
            .build()?;
        Ok(HttpFetcher { client })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let network = |source| FetchError::Network {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status().as_u16();
        info!("Status code: {} for {}", status, url);
        let body = response.bytes().await.map_err(network)?.to_vec();
        Ok(FetchResponse { status, body })
    }
}

fn browser_headers(settings: &HttpSettings, referer: Option<&str>) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_str(&settings.user_agent)?);
    headers.insert(header::ACCEPT, HeaderValue::from_str(&settings.accept)?);
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_str(&settings.accept_language)?,
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert("Sec-GPC", HeaderValue::from_static("1"));
    if let Some(r) = referer {
        headers.insert(header::REFERER, HeaderValue::from_str(r)?);
    }
    Ok(headers)
}

/// Joins a handle or file name onto an origin the way a browser resolves a relative link.
pub fn join_url(base: &str, path: &str) -> Result<String, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: format!("{}{}", base, path),
        reason,
    };
    let base = reqwest::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    let joined = base.join(path).map_err(|e| invalid(e.to_string()))?;
    Ok(joined.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_relative_and_absolute_paths() {
        assert_eq!(
            join_url("https://index.example", "/torrent/123/name/").unwrap(),
            "https://index.example/torrent/123/name/"
        );
        assert_eq!(
            join_url("https://cache.example/torrents/", "ABC.torrent").unwrap(),
            "https://cache.example/torrents/ABC.torrent"
        );
        assert!(join_url("not a url", "/x").is_err());
    }

    #[test]
    fn headers_carry_referer() {
        let headers = browser_headers(&HttpSettings::default(), Some("https://index.example")).unwrap();
        assert_eq!(headers[header::REFERER], "https://index.example");
        assert!(headers[header::USER_AGENT].to_str().unwrap().contains("Firefox"));
    }

    #[test]
    fn status_classification() {
        let ok = FetchResponse { status: 204, body: vec![] };
        let missing = FetchResponse { status: 404, body: b"gone".to_vec() };
        assert!(ok.is_success());
        assert!(!missing.is_success());
        assert_eq!(missing.text(), "gone");
    }
}
