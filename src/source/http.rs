//! HTTP page fetcher backed by a shared reqwest client.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use snafu::prelude::*;
use std::time::Duration;
use tracing::debug;

use super::PageFetcher;
use crate::config::SourceConfig;
use crate::error::{ConfigError, DecodeSnafu, FetchError, HttpSnafu, InvalidHeaderSnafu, InvalidUrlSnafu};

/// Fetches `GET {url}?{page_param}={page}` and decodes the JSON body.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    url: Url,
    page_param: String,
    headers: HeaderMap,
}

impl HttpPageFetcher {
    /// Build a fetcher for one configured source on top of a shared client.
    pub fn from_config(
        client: Client,
        name: &str,
        config: &SourceConfig,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse(&config.url).map_err(|e| {
            InvalidUrlSnafu {
                source_name: name,
                url: config.url.clone(),
                message: e.to_string(),
            }
            .build()
        })?;

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let invalid = || {
                InvalidHeaderSnafu {
                    source_name: name,
                    header: key.clone(),
                }
                .build()
            };
            let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header_name, header_value);
        }

        Ok(Self {
            client,
            url,
            page_param: config.page_param.clone(),
            headers,
        })
    }
}

impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, page: u32) -> Result<Value, FetchError> {
        debug!(url = %self.url, page, "Requesting page");
        let response = self
            .client
            .get(self.url.clone())
            .query(&[(self.page_param.as_str(), page)])
            .headers(self.headers.clone())
            .send()
            .await
            .context(HttpSnafu)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        response.json::<Value>().await.context(DecodeSnafu)
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_parse_retry_after_ignores_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let config: SourceConfig = serde_yaml::from_str("url: 'not a url'\nstream: 1\npages: 1").unwrap();
        let err = HttpPageFetcher::from_config(Client::new(), "users", &config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_from_config_rejects_bad_header() {
        let yaml = "url: http://localhost/api\nstream: 1\npages: 1\nheaders:\n  'bad header': x";
        let config: SourceConfig = serde_yaml::from_str(yaml).unwrap();
        let err = HttpPageFetcher::from_config(Client::new(), "users", &config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader { .. }));
    }
}
