/// Span attribute keys emitted by the instrumentation.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const SERVICE_NAME: &str = "tracewire.service.name";
pub const SERVICE_TYPE: &str = "tracewire.service.type";
pub const SERVICE_VERSION: &str = "tracewire.service.version";
pub const SDK_VERSION: &str = "tracewire.version";

pub const URL_FULL: &str = "url.full";
pub const HTTP_MAX_RETRIES: &str = "http.max.retries";
pub const HTTP_TIMEOUT: &str = "http.timeout";

pub const LLM_API: &str = "llm.api";
pub const LLM_MODEL: &str = "llm.model";
pub const LLM_PROMPTS: &str = "llm.prompts";
pub const LLM_TEMPERATURE: &str = "llm.temperature";
pub const LLM_TOP_P: &str = "llm.top_p";
pub const LLM_USER: &str = "llm.user";
pub const LLM_FUNCTION_PROMPTS: &str = "llm.function.prompts";
pub const LLM_RESPONSES: &str = "llm.responses";
pub const LLM_TOKEN_COUNTS: &str = "llm.token.counts";
pub const LLM_SYSTEM_FINGERPRINT: &str = "llm.system.fingerprint";
pub const LLM_ENCODING_FORMAT: &str = "llm.encoding.format";
pub const LLM_DIMENSIONS: &str = "llm.dimensions";

pub const FRAMEWORK_TASK_NAME: &str = "framework.task.name";

pub const EXCEPTION_TYPE: &str = "exception.type";
pub const EXCEPTION_MESSAGE: &str = "exception.message";

/// Event names
pub const EVENT_EXCEPTION: &str = "exception";
pub const EVENT_STREAM_START: &str = "stream.start";
pub const EVENT_STREAM_OUTPUT: &str = "stream.output";
pub const EVENT_STREAM_END: &str = "stream.end";
pub const EVENT_STREAM_ABANDONED: &str = "stream.abandoned";

/// Service type values
pub const SERVICE_TYPE_LLM: &str = "llm";
pub const SERVICE_TYPE_FRAMEWORK: &str = "framework";

/// Provider identities
pub const PROVIDER_OPENAI: &str = "OpenAI";
pub const PROVIDER_AZURE: &str = "Azure";
pub const PROVIDER_LLAMAINDEX: &str = "LlamaIndex";
