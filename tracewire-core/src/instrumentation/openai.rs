use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::context::{TraceContext, with_context};
use crate::model::{
    ChatCompletion, ChatCompletionRequest, EmbeddingInput, EmbeddingRequest, EmbeddingResponse,
    ImageRequest, ImageResponse,
};
use crate::provider::{
    ChatCompletions, ChatOutput, ClientOptions, Embeddings, ImageGeneration, ProviderClient,
};
use crate::trace::span::EndOnDrop;
use crate::trace::{Attributes, Span, SpanKind, SpanStatus, keys};

use super::stream::{StreamState, TracedStream};
use super::{Interceptor, fail_span, guarded, to_json};

/// Instrumented OpenAI operations: span name and reported endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiApi {
    ChatCompletion,
    ImagesGenerate,
    EmbeddingsCreate,
}

impl OpenAiApi {
    pub fn method(&self) -> &'static str {
        match self {
            Self::ChatCompletion => "openai.chat.completion.create",
            Self::ImagesGenerate => "openai.images.generate",
            Self::EmbeddingsCreate => "openai.embeddings.create",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::ChatCompletion => "/chat/completions",
            Self::ImagesGenerate => "/images/generations",
            Self::EmbeddingsCreate => "/embeddings",
        }
    }
}

/// A client whose calls each produce one span. Implements the same capability
/// traits as the wrapped client, with the same error type.
#[derive(Debug)]
pub struct Instrumented<C> {
    inner: C,
    interceptor: Interceptor,
}

impl<C> Instrumented<C> {
    pub fn new(inner: C, interceptor: Interceptor) -> Self {
        Self { inner, interceptor }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn request_attributes(&self, api: OpenAiApi, options: &ClientOptions) -> Attributes {
        let mut attrs = self
            .interceptor
            .service_attributes(keys::SERVICE_TYPE_LLM, options);
        attrs.insert(keys::LLM_API.into(), api.endpoint().into());
        attrs
    }
}

impl<C: ProviderClient> ProviderClient for Instrumented<C> {
    type Error = C::Error;

    fn client_options(&self) -> ClientOptions {
        self.inner.client_options()
    }
}

fn chat_request_attributes(req: &ChatCompletionRequest, attrs: &mut Attributes) {
    attrs.insert(keys::LLM_MODEL.into(), req.model.as_str().into());
    if let Some(prompts) = to_json("llm.prompts", &req.messages) {
        attrs.insert(keys::LLM_PROMPTS.into(), prompts.into());
    }
    if let Some(t) = req.temperature {
        attrs.insert(keys::LLM_TEMPERATURE.into(), t.into());
    }
    if let Some(p) = req.top_p {
        attrs.insert(keys::LLM_TOP_P.into(), p.into());
    }
    if let Some(user) = &req.user {
        attrs.insert(keys::LLM_USER.into(), user.as_str().into());
    }
    if let Some(functions) = &req.functions
        && let Some(json) = to_json("llm.function.prompts", functions)
    {
        attrs.insert(keys::LLM_FUNCTION_PROMPTS.into(), json.into());
    }
}

fn record_completion(span: &Span, completion: &ChatCompletion) {
    let responses: Vec<Value> = completion
        .choices
        .iter()
        .map(|choice| {
            let mut entry = json!({ "message": choice.message });
            if let Some(filter) = &choice.content_filter_results {
                entry["content_filter_results"] = filter.clone();
            }
            entry
        })
        .collect();
    if let Some(json) = to_json("llm.responses", &responses) {
        span.set_attribute(keys::LLM_RESPONSES, json);
    }
    span.set_attribute(keys::LLM_MODEL, completion.model.as_str());
    if let Some(fingerprint) = &completion.system_fingerprint {
        span.set_attribute(keys::LLM_SYSTEM_FINGERPRINT, fingerprint.as_str());
    }
    let usage = completion.usage.unwrap_or_default();
    let input = usage.prompt_tokens.unwrap_or(0);
    let output = usage.completion_tokens.unwrap_or(0);
    let total = usage.total_tokens.unwrap_or(input + output);
    let counts = json!({
        "input_tokens": input,
        "output_tokens": output,
        "total_tokens": total,
    });
    span.set_attribute(keys::LLM_TOKEN_COUNTS, counts.to_string());
}

fn embedding_request_attributes(req: &EmbeddingRequest, attrs: &mut Attributes) {
    attrs.insert(keys::LLM_MODEL.into(), req.model.as_str().into());
    let prompts = match &req.input {
        EmbeddingInput::Single(s) => to_json("llm.prompts", &[s]),
        EmbeddingInput::Many(v) => to_json("llm.prompts", v),
    };
    if let Some(prompts) = prompts {
        attrs.insert(keys::LLM_PROMPTS.into(), prompts.into());
    }
    if let Some(format) = &req.encoding_format {
        attrs.insert(keys::LLM_ENCODING_FORMAT.into(), format.as_str().into());
    }
    if let Some(dims) = req.dimensions {
        attrs.insert(keys::LLM_DIMENSIONS.into(), dims.into());
    }
    if let Some(user) = &req.user {
        attrs.insert(keys::LLM_USER.into(), user.as_str().into());
    }
}

fn image_request_attributes(req: &ImageRequest, attrs: &mut Attributes) {
    if let Some(model) = &req.model {
        attrs.insert(keys::LLM_MODEL.into(), model.as_str().into());
    }
    if let Some(prompts) = to_json("llm.prompts", &[&req.prompt]) {
        attrs.insert(keys::LLM_PROMPTS.into(), prompts.into());
    }
}

#[async_trait]
impl<C: ChatCompletions> ChatCompletions for Instrumented<C> {
    async fn create(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<ChatOutput<Self::Error>, Self::Error> {
        let ic = &self.interceptor;
        if !ic.is_enabled() {
            return self.inner.create(req).await;
        }
        let api = OpenAiApi::ChatCompletion;
        let ctx = TraceContext::current();
        let mut attributes = self.request_attributes(api, &self.inner.client_options());
        guarded("chat request attributes", || {
            chat_request_attributes(&req, &mut attributes)
        });
        let span = ic.start(api.method(), SpanKind::Client, attributes, &ctx);
        let guard = EndOnDrop::new(span.clone());

        let function_call = req.is_function_call();
        let prompt_tokens = if req.is_stream() {
            let first = req
                .messages
                .first()
                .and_then(|m| to_json("stream prompt", m))
                .unwrap_or_default();
            ic.estimate(&first, &req.model)
        } else {
            0
        };

        let result = with_context(ctx.with_span_context(span.context()), self.inner.create(req)).await;
        match result {
            Ok(ChatOutput::Completion(completion)) => {
                guarded("chat response attributes", || {
                    record_completion(&span, &completion)
                });
                span.set_status(SpanStatus::Ok);
                drop(guard);
                Ok(ChatOutput::Completion(completion))
            }
            Ok(ChatOutput::Stream(stream)) => {
                guard.disarm();
                let state = StreamState::new(prompt_tokens, function_call);
                let traced = TracedStream::new(stream, span, state, ic.estimator());
                Ok(ChatOutput::Stream(traced.boxed()))
            }
            Err(e) => {
                fail_span(&span, &e);
                drop(guard);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<C: Embeddings> Embeddings for Instrumented<C> {
    async fn create_embedding(
        &self,
        req: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, Self::Error> {
        let ic = &self.interceptor;
        if !ic.is_enabled() {
            return self.inner.create_embedding(req).await;
        }
        let api = OpenAiApi::EmbeddingsCreate;
        let ctx = TraceContext::current();
        let mut attributes = self.request_attributes(api, &self.inner.client_options());
        guarded("embedding request attributes", || {
            embedding_request_attributes(&req, &mut attributes)
        });
        let span = ic.start(api.method(), SpanKind::Server, attributes, &ctx);
        let _guard = EndOnDrop::new(span.clone());

        let result = with_context(
            ctx.with_span_context(span.context()),
            self.inner.create_embedding(req),
        )
        .await;
        match &result {
            Ok(_) => span.set_status(SpanStatus::Ok),
            Err(e) => fail_span(&span, e),
        }
        result
    }
}

#[async_trait]
impl<C: ImageGeneration> ImageGeneration for Instrumented<C> {
    async fn generate(&self, req: ImageRequest) -> Result<ImageResponse, Self::Error> {
        let ic = &self.interceptor;
        if !ic.is_enabled() {
            return self.inner.generate(req).await;
        }
        let api = OpenAiApi::ImagesGenerate;
        let ctx = TraceContext::current();
        let mut attributes = self.request_attributes(api, &self.inner.client_options());
        guarded("image request attributes", || {
            image_request_attributes(&req, &mut attributes)
        });
        let span = ic.start(api.method(), SpanKind::Server, attributes, &ctx);
        let _guard = EndOnDrop::new(span.clone());

        let result = with_context(ctx.with_span_context(span.context()), self.inner.generate(req)).await;
        match &result {
            Ok(resp) => {
                if let Some(json) = to_json("llm.responses", &resp.data) {
                    span.set_attribute(keys::LLM_RESPONSES, json);
                }
                span.set_status(SpanStatus::Ok);
            }
            Err(e) => fail_span(&span, e),
        }
        result
    }
}
