use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{CoreResult, TracewireError};
use crate::http_client::HttpClient;
use crate::trace::FinishedSpan;

use super::{ExportResult, SpanExporter};

/// Header carrying the delivery credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// POSTs span batches as a JSON array to a remote collector.
///
/// With `write_to_remote = false` every export succeeds without network I/O.
#[derive(Debug)]
pub struct RemoteExporter {
    http: HttpClient,
    api_key: SecretString,
    url: Option<String>,
    write_to_remote: bool,
}

impl RemoteExporter {
    /// The credential is required in both modes; the URL only when writing remotely.
    pub fn new(
        api_key: Option<SecretString>,
        url: Option<String>,
        write_to_remote: bool,
    ) -> CoreResult<Self> {
        Self::with_http(api_key, url, write_to_remote, HttpClient::new_default()?)
    }

    pub fn with_http(
        api_key: Option<SecretString>,
        url: Option<String>,
        write_to_remote: bool,
        http: HttpClient,
    ) -> CoreResult<Self> {
        let api_key = api_key
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| TracewireError::Configuration("no API key provided".into()))?;
        let url = url.filter(|u| !u.trim().is_empty());
        if write_to_remote && url.is_none() {
            return Err(TracewireError::Configuration(
                "no URL provided for remote span delivery".into(),
            ));
        }
        Ok(Self {
            http,
            api_key,
            url,
            write_to_remote,
        })
    }

    pub fn writes_to_remote(&self) -> bool {
        self.write_to_remote
    }
}

#[async_trait]
impl SpanExporter for RemoteExporter {
    async fn export(&self, batch: Vec<FinishedSpan>) -> ExportResult {
        if !self.write_to_remote {
            return ExportResult::success();
        }
        let Some(url) = self.url.as_deref() else {
            return ExportResult::failure(Some("no URL configured".into()));
        };
        let count = batch.len();
        let headers = [(API_KEY_HEADER, self.api_key.expose_secret())];
        match self.http.post_json(url, &batch, &headers).await {
            Ok(reply) if reply.is_success() => {
                tracing::debug!(count, status = reply.status, latency_ms = reply.latency_ms, "spans delivered");
                ExportResult::success()
            }
            Ok(reply) => {
                tracing::warn!(count, status = reply.status, "span delivery rejected");
                ExportResult::failure(reply.error_payload())
            }
            Err(e) => {
                tracing::warn!(count, error = %e, "span delivery failed");
                ExportResult::failure(Some(e.to_string().into()))
            }
        }
    }

    async fn shutdown(&self) -> CoreResult<()> {
        tracing::debug!("remote exporter shutdown");
        Ok(())
    }
}
