use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreResult, TracewireError};

/// Status and body of a completed HTTP exchange, whatever the status code.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
    pub latency_ms: u32,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as JSON when it parses, otherwise the text truncated to 300 chars.
    pub fn error_payload(&self) -> Option<serde_json::Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(&self.body) {
            Ok(v) => Some(v),
            Err(_) => Some(serde_json::Value::String(truncate(&self.body, 300))),
        }
    }
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| TracewireError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("tracewire/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// POST `body` as JSON. Only transport failures are errors; any HTTP status is
    /// returned in the reply for the caller to interpret.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<HttpReply> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|e| TracewireError::Transport {
            status: None,
            message: e.to_string(),
        })?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let latency_ms = u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX);
        Ok(HttpReply {
            status,
            body,
            latency_ms,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut t = s[..idx].to_string();
            t.push_str("...");
            t
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_json_sends_headers_and_returns_status() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/ingest")
                .header("x-api-key", "k")
                .json_body(json!({"msg": "hi"}));
            then.status(202).body("accepted");
        });

        let client = HttpClient::new_default().unwrap();
        let reply = client
            .post_json(
                &format!("{}/ingest", server.base_url()),
                &json!({"msg": "hi"}),
                &[("x-api-key", "k")],
            )
            .await
            .unwrap();

        assert!(reply.is_success());
        assert_eq!(reply.status, 202);
        assert_eq!(reply.body, "accepted");
        m.assert();
    }

    #[tokio::test]
    async fn non_2xx_is_a_reply_not_an_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/ingest");
            then.status(401).json_body(json!({"error": "invalid key"}));
        });
        let client = HttpClient::new_default().unwrap();
        let reply = client
            .post_json(&format!("{}/ingest", server.base_url()), &json!([]), &[])
            .await
            .unwrap();
        assert!(!reply.is_success());
        assert_eq!(reply.error_payload(), Some(json!({"error": "invalid key"})));
    }

    #[test]
    fn error_payload_truncates_text_bodies() {
        let reply = HttpReply {
            status: 500,
            body: "x".repeat(1000),
            latency_ms: 0,
        };
        match reply.error_payload() {
            Some(serde_json::Value::String(s)) => {
                assert!(s.ends_with("..."));
                assert_eq!(s.len(), 303);
            }
            other => panic!("expected truncated string, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_transport() {
        // port 9 (discard) is typically closed
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json("http://127.0.0.1:9/ingest", &json!([]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TracewireError::Transport { status: None, .. }));
    }
}
