use std::collections::BTreeSet;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::config::{Integration, TraceConfig};
use crate::error::CoreResult;
use crate::exporter::{ConsoleExporter, RemoteExporter, SpanExporter};
use crate::http_client::HttpClient;
use crate::instrumentation::{Instrumented, Interceptor};
use crate::router::ProviderResolver;
use crate::trace::{
    AlwaysOn, BatchSpanProcessor, ParentBased, Resource, SimpleSpanProcessor, TracerProvider,
    set_global_provider,
};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "TRACEWIRE_API_KEY";

/// Initialized tracing pipeline plus the per-integration switches from configuration.
pub struct Telemetry {
    provider: TracerProvider,
    providers: Arc<ProviderResolver>,
    enabled: BTreeSet<Integration>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Explicit key first, then the environment; blank values count as missing.
pub fn resolve_api_key(explicit: Option<SecretString>, env: Option<String>) -> Option<SecretString> {
    explicit
        .filter(|k| !k.expose_secret().trim().is_empty())
        .or_else(|| {
            env.filter(|k| !k.trim().is_empty())
                .map(|k| SecretString::new(k.into()))
        })
}

/// Build the pipeline described by `cfg`.
///
/// Remote delivery uses `RemoteExporter` against `api_host`; otherwise spans are
/// printed by the console exporter. Must be called within a tokio runtime when
/// `batch` is set.
pub fn init(mut cfg: TraceConfig) -> CoreResult<Telemetry> {
    // conflicting directives fail before anything is built
    cfg.disable_instrumentations.enabled()?;
    let exporter: Arc<dyn SpanExporter> = if cfg.write_to_remote {
        let api_key = resolve_api_key(cfg.api_key.take(), std::env::var(API_KEY_ENV).ok());
        let http = HttpClient::new(&cfg.http)?;
        Arc::new(RemoteExporter::with_http(
            api_key,
            Some(cfg.api_host.clone()),
            true,
            http,
        )?)
    } else {
        Arc::new(ConsoleExporter::new())
    };
    Telemetry::with_exporter(&cfg, exporter)
}

impl Telemetry {
    /// Same as `init` with a caller-supplied exporter; credential and remote settings
    /// in `cfg` are ignored.
    pub fn with_exporter(cfg: &TraceConfig, exporter: Arc<dyn SpanExporter>) -> CoreResult<Self> {
        let enabled = cfg.disable_instrumentations.enabled()?;
        let providers = Arc::new(ProviderResolver::new(&cfg.providers)?);

        let mut resource = Resource::default();
        if let Some(name) = &cfg.service_name {
            resource
                .attributes
                .insert("service.name".into(), name.as_str().into());
        }
        let builder = TracerProvider::builder()
            .with_sampler(ParentBased::new(AlwaysOn))
            .with_resource(resource);
        let builder = if cfg.batch {
            builder.with_processor(BatchSpanProcessor::from_shared(exporter, &cfg.batch_processor)?)
        } else {
            builder.with_processor(SimpleSpanProcessor::from_shared(exporter))
        };

        tracing::debug!(
            batch = cfg.batch,
            remote = cfg.write_to_remote,
            enabled = enabled.len(),
            "tracing pipeline initialized"
        );
        Ok(Self {
            provider: builder.build(),
            providers,
            enabled,
        })
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    pub fn is_enabled(&self, integration: Integration) -> bool {
        self.enabled.contains(&integration)
    }

    /// Interceptor for one integration; disabled integrations forward without spans.
    pub fn interceptor(&self, integration: Integration, version: &str) -> Interceptor {
        let tracer = self
            .provider
            .versioned_tracer(format!("tracewire-{}", integration.as_str()), env!("CARGO_PKG_VERSION"));
        Interceptor::new(tracer)
            .with_providers(self.providers.clone())
            .with_version(version)
            .with_enabled(self.is_enabled(integration))
    }

    /// Wrap an OpenAI-compatible client. `version` is the client library's version tag.
    pub fn instrument_openai<C>(&self, client: C, version: &str) -> Instrumented<C> {
        self.interceptor(Integration::OpenAi, version).wrap(client)
    }

    /// Make this pipeline the process-wide provider. Returns `false` if one was
    /// already installed.
    pub fn install_global(&self) -> bool {
        set_global_provider(self.provider.clone())
    }

    /// Flush pending spans and shut the exporter down.
    pub async fn shutdown(&self) -> CoreResult<()> {
        self.provider.shutdown().await
    }
}
