use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::model::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ChunkChoice,
    ChunkDelta, Choice, Embedding, EmbeddingInput, EmbeddingRequest, EmbeddingResponse,
    FunctionCallDelta, ImageData, ImageRequest, ImageResponse, Role, Usage,
};

/// Lazily produced response fragments of a streamed chat completion.
pub type ChunkStream<E> = BoxStream<'static, Result<ChatCompletionChunk, E>>;

/// Response of a chat completion call: a whole completion, or a fragment stream
/// when the request asked for streaming.
pub enum ChatOutput<E> {
    Completion(ChatCompletion),
    Stream(ChunkStream<E>),
}

impl<E> ChatOutput<E> {
    pub fn into_completion(self) -> Option<ChatCompletion> {
        match self {
            Self::Completion(c) => Some(c),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ChunkStream<E>> {
        match self {
            Self::Stream(s) => Some(s),
            Self::Completion(_) => None,
        }
    }
}

impl<E> std::fmt::Debug for ChatOutput<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completion(c) => f.debug_tuple("Completion").field(c).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Client settings visible to the instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub base_url: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
}

/// Common surface of an instrumentable provider client.
pub trait ProviderClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn client_options(&self) -> ClientOptions;
}

#[async_trait]
pub trait ChatCompletions: ProviderClient {
    async fn create(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatOutput<Self::Error>, Self::Error>;
}

#[async_trait]
pub trait Embeddings: ProviderClient {
    async fn create_embedding(&self, req: EmbeddingRequest)
    -> Result<EmbeddingResponse, Self::Error>;
}

#[async_trait]
pub trait ImageGeneration: ProviderClient {
    async fn generate(&self, req: ImageRequest) -> Result<ImageResponse, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NullClientError {
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

/// A client that answers every call with canned data and never touches the network.
/// Useful for tests, demos or as a placeholder.
#[derive(Debug, Clone)]
pub struct NullClient {
    options: ClientOptions,
    chunks: Vec<String>,
    usage: Option<Usage>,
    fingerprint: Option<String>,
    reject: Option<String>,
    interrupt: Option<(usize, String)>,
}

impl Default for NullClient {
    fn default() -> Self {
        Self {
            options: ClientOptions {
                base_url: Some("https://api.openai.com/v1".into()),
                max_retries: Some(2),
                timeout_ms: Some(600_000),
            },
            chunks: vec!["[null client response]".into()],
            usage: None,
            fingerprint: None,
            reject: None,
            interrupt: None,
        }
    }
}

impl NullClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.options.base_url = Some(base_url.into());
        self
    }

    /// Reply text, one stream fragment per entry; whole completions concatenate them.
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Every call fails with `NullClientError::Rejected`.
    pub fn rejecting(mut self, message: impl Into<String>) -> Self {
        self.reject = Some(message.into());
        self
    }

    /// Streams yield `after` fragments, then an `Interrupted` error, then the rest.
    pub fn interrupt_after(mut self, after: usize, message: impl Into<String>) -> Self {
        self.interrupt = Some((after, message.into()));
        self
    }

    fn check(&self) -> Result<(), NullClientError> {
        match &self.reject {
            Some(msg) => Err(NullClientError::Rejected(msg.clone())),
            None => Ok(()),
        }
    }

    fn reply_text(&self) -> String {
        self.chunks.concat()
    }

    fn chunk(&self, model: &str, text: &str, function_call: bool) -> ChatCompletionChunk {
        let delta = if function_call {
            ChunkDelta {
                function_call: Some(FunctionCallDelta {
                    name: None,
                    arguments: Some(text.to_string()),
                }),
                ..Default::default()
            }
        } else {
            ChunkDelta {
                content: Some(text.to_string()),
                ..Default::default()
            }
        };
        ChatCompletionChunk {
            id: "null-chunk".into(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
        }
    }
}

impl ProviderClient for NullClient {
    type Error = NullClientError;

    fn client_options(&self) -> ClientOptions {
        self.options.clone()
    }
}

#[async_trait]
impl ChatCompletions for NullClient {
    async fn create(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatOutput<NullClientError>, NullClientError> {
        self.check()?;
        if req.is_stream() {
            let function_call = req.is_function_call();
            let mut items: Vec<Result<ChatCompletionChunk, NullClientError>> = self
                .chunks
                .iter()
                .map(|text| Ok(self.chunk(&req.model, text, function_call)))
                .collect();
            if let Some((after, msg)) = &self.interrupt {
                let at = (*after).min(items.len());
                items.insert(at, Err(NullClientError::Interrupted(msg.clone())));
            }
            return Ok(ChatOutput::Stream(futures::stream::iter(items).boxed()));
        }

        let text = self.reply_text();
        let usage = self.usage.unwrap_or_else(|| {
            let prompt = req
                .messages
                .iter()
                .filter_map(|m| m.content.as_deref())
                .map(|c| c.len() as u64)
                .sum::<u64>();
            let completion = text.len() as u64;
            Usage {
                prompt_tokens: Some(prompt),
                completion_tokens: Some(completion),
                total_tokens: Some(prompt + completion),
            }
        });
        Ok(ChatOutput::Completion(ChatCompletion {
            id: "null-completion".into(),
            model: req.model,
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::new(Role::Assistant, text),
                finish_reason: Some("stop".into()),
                content_filter_results: None,
            }],
            usage: Some(usage),
            system_fingerprint: self.fingerprint.clone(),
        }))
    }
}

#[async_trait]
impl Embeddings for NullClient {
    async fn create_embedding(
        &self,
        req: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, NullClientError> {
        self.check()?;
        let inputs = match &req.input {
            EmbeddingInput::Single(_) => 1,
            EmbeddingInput::Many(v) => v.len(),
        };
        let dims = req.dimensions.unwrap_or(3) as usize;
        Ok(EmbeddingResponse {
            model: req.model,
            data: (0..inputs)
                .map(|i| Embedding {
                    index: i as u32,
                    embedding: vec![0.0_f32; dims],
                })
                .collect(),
            usage: None,
        })
    }
}

#[async_trait]
impl ImageGeneration for NullClient {
    async fn generate(&self, req: ImageRequest) -> Result<ImageResponse, NullClientError> {
        self.check()?;
        Ok(ImageResponse {
            created: 0,
            data: (0..req.n.unwrap_or(1))
                .map(|i| ImageData {
                    url: Some(format!("null://image/{i}")),
                    b64_json: None,
                    revised_prompt: None,
                })
                .collect(),
        })
    }
}
