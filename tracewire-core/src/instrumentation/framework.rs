use std::future::Future;

use crate::trace::{Attributes, SpanKind, keys};

use super::Interceptor;

impl Interceptor {
    /// Trace one unit of work of an orchestration framework (query engine, retriever,
    /// agent step). The span is named `method` and tagged with the task name.
    pub async fn trace_task<T, E, F>(
        &self,
        service: &str,
        method: &str,
        task: &str,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attributes = Attributes::new();
        attributes.insert(keys::SERVICE_NAME.into(), service.into());
        attributes.insert(keys::SERVICE_TYPE.into(), keys::SERVICE_TYPE_FRAMEWORK.into());
        attributes.insert(keys::SERVICE_VERSION.into(), self.version().into());
        attributes.insert(keys::SDK_VERSION.into(), env!("CARGO_PKG_VERSION").into());
        attributes.insert(keys::FRAMEWORK_TASK_NAME.into(), task.into());
        self.trace(method, SpanKind::Client, attributes, fut).await
    }
}
