//! REST/JSON node client backed by `reqwest`.
//!
//! - Automatic retry with exponential backoff for transient errors
//! - `404 Not Found` maps to `Ok(None)`
//! - Streaming head monitor over a chunked, newline-delimited body

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;

use stakeindex_core::config::NodeSettings;
use stakeindex_core::error::IndexerError;
use stakeindex_core::raw::{RawBlock, RawConstants, RawHeader, RawRight};

use crate::client::{HeadStream, NodeClient, RightsScope};
use crate::retry::{RetryConfig, RetryPolicy};

/// Configuration for [`HttpNodeClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&NodeSettings> for HttpClientConfig {
    fn from(s: &NodeSettings) -> Self {
        Self {
            retry: RetryConfig::from(s),
            request_timeout: Duration::from_millis(s.timeout_ms),
        }
    }
}

/// Why a single request failed.
#[derive(Debug)]
enum RequestError {
    /// Connection problems, timeouts and 5xx responses.
    Transient(String),
    /// Anything retrying will not fix.
    Permanent(IndexerError),
}

impl From<RequestError> for IndexerError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Transient(msg) => IndexerError::Rpc(msg),
            RequestError::Permanent(e) => e,
        }
    }
}

pub struct HttpNodeClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpNodeClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Rpc(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            http,
            retry: RetryPolicy::new(config.retry),
        })
    }

    pub fn from_settings(settings: &NodeSettings) -> Result<Self, IndexerError> {
        Self::new(settings.url.clone(), HttpClientConfig::from(settings))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, RequestError> {
        let url = format!("{}{}", self.url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RequestError::Transient(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RequestError::Transient(format!("HTTP {}: {body}", status.as_u16())));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RequestError::Permanent(IndexerError::Rpc(format!(
                "HTTP {} for {path}: {body}",
                status.as_u16()
            ))));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RequestError::Transient(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RequestError::Permanent(IndexerError::decode(path, e)))
    }

    /// GET with retry. Returns `Ok(None)` on 404.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, IndexerError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get_once(path).await {
                Ok(v) => return Ok(v),
                Err(RequestError::Transient(msg)) => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %msg,
                            path,
                            "retrying node request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %msg, path, "max retries exceeded");
                        return Err(IndexerError::Rpc(msg));
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get_required<T: DeserializeOwned>(&self, path: &str) -> Result<T, IndexerError> {
        self.get(path)
            .await?
            .ok_or_else(|| IndexerError::Rpc(format!("{path}: not found")))
    }
}

fn rights_query(scope: RightsScope) -> String {
    match scope {
        RightsScope::Level(level) => format!("level={level}"),
        RightsScope::Cycle(cycle) => format!("cycle={cycle}"),
    }
}

/// Balances come back as decimal strings.
fn parse_amount(v: &serde_json::Value) -> Result<i64, IndexerError> {
    match v {
        serde_json::Value::String(s) => s.parse().map_err(|e| IndexerError::decode("balance", e)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| IndexerError::decode("balance", format!("{n} out of range"))),
        other => Err(IndexerError::decode("balance", format!("unexpected {other}"))),
    }
}

/// Pop the next complete, non-empty line from `buf`.
fn next_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        if line.iter().any(|b| !b.is_ascii_whitespace()) {
            return Some(line);
        }
    }
    None
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn head(&self) -> Result<RawHeader, IndexerError> {
        self.get_required("/chains/main/blocks/head/header").await
    }

    async fn header(&self, level: i64) -> Result<Option<RawHeader>, IndexerError> {
        if level < 0 {
            return Ok(None);
        }
        self.get(&format!("/chains/main/blocks/{level}/header")).await
    }

    async fn block(&self, level: i64) -> Result<Option<RawBlock>, IndexerError> {
        if level < 0 {
            return Ok(None);
        }
        self.get(&format!("/chains/main/blocks/{level}")).await
    }

    async fn constants(&self, level: i64) -> Result<RawConstants, IndexerError> {
        self.get_required(&format!("/chains/main/blocks/{level}/context/constants"))
            .await
    }

    async fn cycle_seed(&self, level: i64, cycle: i64) -> Result<String, IndexerError> {
        self.get_required(&format!(
            "/chains/main/blocks/{level}/context/raw/json/cycle/{cycle}/random_seed"
        ))
        .await
    }

    async fn baking_rights(&self, level: i64, scope: RightsScope) -> Result<Option<Vec<RawRight>>, IndexerError> {
        self.get(&format!(
            "/chains/main/blocks/{level}/helpers/baking_rights?{}&max_round=0",
            rights_query(scope)
        ))
        .await
    }

    async fn attestation_rights(
        &self,
        level: i64,
        scope: RightsScope,
    ) -> Result<Option<Vec<RawRight>>, IndexerError> {
        self.get(&format!(
            "/chains/main/blocks/{level}/helpers/attestation_rights?{}",
            rights_query(scope)
        ))
        .await
    }

    async fn balance(&self, level: i64, address: &str) -> Result<Option<i64>, IndexerError> {
        let v: Option<serde_json::Value> = self
            .get(&format!("/chains/main/blocks/{level}/context/contracts/{address}/balance"))
            .await?;
        v.as_ref().map(parse_amount).transpose()
    }

    async fn monitor_heads(&self) -> Result<HeadStream, IndexerError> {
        let url = format!("{}/monitor/heads/main", self.url);
        // The monitor is long-lived: no request timeout.
        let resp = reqwest::Client::new()
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexerError::Rpc(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(IndexerError::Rpc(format!("HTTP {} for {url}", resp.status().as_u16())));
        }

        let bytes = resp.bytes_stream().boxed();
        let stream = futures::stream::unfold((bytes, Vec::new()), |(mut bytes, mut buf)| async move {
            loop {
                if let Some(line) = next_line(&mut buf) {
                    let item = serde_json::from_slice::<RawHeader>(&line)
                        .map_err(|e| IndexerError::decode("monitored head", e));
                    return Some((item, (bytes, buf)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(IndexerError::Rpc(e.to_string())), (bytes, buf))),
                    None => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_on_newline_and_skip_blanks() {
        let mut buf = b"{\"a\":1}\n\n  \n{\"b\":".to_vec();
        assert_eq!(next_line(&mut buf).unwrap(), b"{\"a\":1}\n".to_vec());
        assert!(next_line(&mut buf).is_none());
        assert_eq!(buf, b"{\"b\":".to_vec());
        buf.extend_from_slice(b"2}\n");
        assert_eq!(next_line(&mut buf).unwrap(), b"{\"b\":2}\n".to_vec());
        assert!(buf.is_empty());
    }

    #[test]
    fn amounts_parse_from_string_or_number() {
        assert_eq!(parse_amount(&serde_json::json!("1234")).unwrap(), 1234);
        assert_eq!(parse_amount(&serde_json::json!(55)).unwrap(), 55);
        assert!(parse_amount(&serde_json::json!("x")).is_err());
        assert!(parse_amount(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn rights_query_by_scope() {
        assert_eq!(rights_query(RightsScope::Level(12)), "level=12");
        assert_eq!(rights_query(RightsScope::Cycle(3)), "cycle=3");
    }

    #[test]
    fn client_trims_trailing_slash() {
        let c = HttpNodeClient::new("http://node:8732/", HttpClientConfig::default()).unwrap();
        assert_eq!(c.url(), "http://node:8732");
    }

    #[tokio::test]
    async fn unreachable_node_is_transient() {
        let c = HttpNodeClient::new(
            "http://127.0.0.1:1",
            HttpClientConfig {
                retry: RetryConfig {
                    max_retries: 0,
                    ..Default::default()
                },
                request_timeout: Duration::from_millis(500),
            },
        )
        .unwrap();
        let err = c.header(1).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert!(c.header(-1).await.unwrap().is_none());
    }
}
