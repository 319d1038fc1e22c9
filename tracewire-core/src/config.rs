use std::collections::BTreeSet;
use std::{fs, path::Path};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreResult, TracewireError};
use crate::trace::keys;

/// Default collector endpoint for remote span delivery.
pub const DEFAULT_API_HOST: &str = "https://app.tracewire.dev/api/trace";

/// Instrumentable client libraries addressable from configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Integration {
    OpenAi,
    Anthropic,
    Cohere,
    Groq,
    Pinecone,
    LlamaIndex,
    ChromaDb,
    Qdrant,
}

impl Integration {
    pub const ALL: [Integration; 8] = [
        Integration::OpenAi,
        Integration::Anthropic,
        Integration::Cohere,
        Integration::Groq,
        Integration::Pinecone,
        Integration::LlamaIndex,
        Integration::ChromaDb,
        Integration::Qdrant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Integration::OpenAi => "openai",
            Integration::Anthropic => "anthropic",
            Integration::Cohere => "cohere",
            Integration::Groq => "groq",
            Integration::Pinecone => "pinecone",
            Integration::LlamaIndex => "llamaindex",
            Integration::ChromaDb => "chromadb",
            Integration::Qdrant => "qdrant",
        }
    }
}

/// `only` disables the listed integrations; `all_except` disables everything else.
/// The two directives are mutually exclusive.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct DisableInstrumentations {
    #[serde(default)]
    pub only: Option<Vec<Integration>>,
    #[serde(default)]
    pub all_except: Option<Vec<Integration>>,
}

impl DisableInstrumentations {
    /// Integrations left enabled after applying the directives.
    pub fn enabled(&self) -> CoreResult<BTreeSet<Integration>> {
        match (&self.only, &self.all_except) {
            (Some(_), Some(_)) => Err(TracewireError::Configuration(
                "cannot specify both `only` and `all_except` in disable_instrumentations".into(),
            )),
            (Some(only), None) => Ok(Integration::ALL
                .into_iter()
                .filter(|i| !only.contains(i))
                .collect()),
            (None, Some(keep)) => Ok(Integration::ALL
                .into_iter()
                .filter(|i| keep.contains(i))
                .collect()),
            (None, None) => Ok(Integration::ALL.into_iter().collect()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 30000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BatchCfg {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_max_export_batch_size")]
    pub max_export_batch_size: usize,
    #[serde(default = "default_scheduled_delay_ms")]
    pub scheduled_delay_ms: u64,
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_export_batch_size: default_max_export_batch_size(),
            scheduled_delay_ms: default_scheduled_delay_ms(),
        }
    }
}

fn default_max_queue_size() -> usize {
    2048
}
fn default_max_export_batch_size() -> usize {
    512
}
fn default_scheduled_delay_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderRule {
    /// Regex applied to the client's base URL, e.g. `azure`
    pub base_url: String,
    /// Provider identity reported when this rule matches
    pub provider: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderCfg {
    #[serde(default = "default_provider")]
    pub default: String,
    #[serde(default = "default_provider_rules")]
    pub rules: Vec<ProviderRule>,
}

impl Default for ProviderCfg {
    fn default() -> Self {
        Self {
            default: default_provider(),
            rules: default_provider_rules(),
        }
    }
}

fn default_provider() -> String {
    keys::PROVIDER_OPENAI.to_string()
}
fn default_provider_rules() -> Vec<ProviderRule> {
    vec![ProviderRule {
        base_url: "azure".into(),
        provider: keys::PROVIDER_AZURE.into(),
    }]
}

fn default_api_host() -> String {
    DEFAULT_API_HOST.to_string()
}
fn default_write_to_remote() -> bool {
    true
}

fn deserialize_secret<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(d)?.map(|s| SecretString::new(s.into())))
}

/// Initialization options. Every field has a default, so an empty file is valid.
#[derive(Debug, Deserialize)]
pub struct TraceConfig {
    /// Delivery credential. Falls back to `TRACEWIRE_API_KEY` at init.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Batch spans before export instead of exporting each span as it ends.
    #[serde(default)]
    pub batch: bool,
    /// Deliver spans to `api_host`; when false spans go to the console.
    #[serde(default = "default_write_to_remote")]
    pub write_to_remote: bool,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub disable_instrumentations: DisableInstrumentations,
    #[serde(default)]
    pub providers: ProviderCfg,
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub batch_processor: BatchCfg,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_host: default_api_host(),
            batch: false,
            write_to_remote: default_write_to_remote(),
            service_name: None,
            disable_instrumentations: DisableInstrumentations::default(),
            providers: ProviderCfg::default(),
            http: HttpCfg::default(),
            batch_processor: BatchCfg::default(),
        }
    }
}

impl TraceConfig {
    /// Load a TraceConfig from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(TracewireError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| TracewireError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| TracewireError::Other(e.into()))?
            }
            Some("toml") => {
                toml::from_str::<Self>(s).map_err(|e| TracewireError::Other(e.into()))?
            }
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| TracewireError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| TracewireError::Other(e.into())))?,
        };
        Ok(cfg)
    }
}
