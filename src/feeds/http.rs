use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const MAX_RETRIES: u32 = 5;
pub const BASE_DELAY_S: f64 = 1.0;
pub const MAX_DELAY_S: f64 = 32.0;

/// How long a source is skipped after an HTTP 429.
pub const RATE_LIMIT_PAUSE_S: f64 = 60.0;

#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 429. The caller decides the pause (typically 60s) and skips the source.
    #[error("rate limited")]
    RateLimited,
    /// 5xx, timeouts, transport resets. Retried with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// 4xx other than 429. Retrying will not help.
    #[error("permanent: HTTP {status}: {body}")]
    Permanent { status: u16, body: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Classify a response status per the shared error taxonomy.
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(FetchError::RateLimited);
    }
    if status.is_server_error() {
        return Some(FetchError::Transient(format!("HTTP {}", status.as_u16())));
    }
    Some(FetchError::Permanent {
        status: status.as_u16(),
        body: String::new(),
    })
}

/// Thin wrapper around a shared reqwest client. One instance per process;
/// every caller goes through the same connection pool.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }

    /// Access the underlying client for feeds that need custom headers or
    /// response-header inspection.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Single GET returning parsed JSON, classified per the error taxonomy.
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = resp.status();
        if let Some(mut err) = classify_status(status) {
            if let FetchError::Permanent { body, .. } = &mut err {
                *body = resp.text().await.unwrap_or_default().chars().take(200).collect();
            }
            return Err(err);
        }

        resp.json::<Value>()
            .await
            .map_err(|e| FetchError::Transient(format!("bad JSON: {e}")))
    }

    /// GET with exponential backoff on transient errors: 1s initial delay,
    /// doubling to 32s, up to 5 attempts, then the last error surfaces.
    /// `RateLimited` and `Permanent` are never retried.
    pub async fn get_json_with_backoff<F>(
        &self,
        url: &str,
        params: &[(&str, String)],
        timeout: Duration,
        mut on_retry: F,
    ) -> Result<Value, FetchError>
    where
        F: FnMut(u32, f64, &FetchError),
    {
        let mut delay = BASE_DELAY_S;
        let mut last_err = FetchError::Transient("no attempts made".into());

        for attempt in 1..=MAX_RETRIES {
            match self.get_json(url, params, timeout).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt < MAX_RETRIES {
                        warn!("Fetch attempt {attempt} failed: {err} — retrying in {delay:.1}s");
                        on_retry(attempt, delay, &err);
                        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                        delay = (delay * 2.0).min(MAX_DELAY_S);
                    }
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(classify_status(StatusCode::CREATED).is_none());
    }

    #[test]
    fn test_classify_rate_limited() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(FetchError::RateLimited)
        ));
    }

    #[test]
    fn test_classify_server_errors_transient() {
        for code in [500u16, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(matches!(
                classify_status(status),
                Some(FetchError::Transient(_))
            ));
        }
    }

    #[test]
    fn test_classify_client_errors_permanent() {
        for code in [400u16, 401, 403, 404] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(matches!(
                classify_status(status),
                Some(FetchError::Permanent { .. })
            ));
        }
    }
}
