use super::types::{Attributes, SpanContext, SpanKind, TraceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDecision {
    /// Span is created non-recording: it still propagates parentage but is never exported.
    Drop,
    RecordAndSample,
}

/// Decision point consulted once per span at creation.
pub trait Sampler: Send + Sync + 'static {
    fn should_sample(
        &self,
        parent: Option<&SpanContext>,
        trace_id: TraceId,
        name: &str,
        kind: SpanKind,
        attributes: &Attributes,
    ) -> SamplingDecision;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOn;

impl Sampler for AlwaysOn {
    fn should_sample(
        &self,
        _parent: Option<&SpanContext>,
        _trace_id: TraceId,
        _name: &str,
        _kind: SpanKind,
        _attributes: &Attributes,
    ) -> SamplingDecision {
        SamplingDecision::RecordAndSample
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOff;

impl Sampler for AlwaysOff {
    fn should_sample(
        &self,
        _parent: Option<&SpanContext>,
        _trace_id: TraceId,
        _name: &str,
        _kind: SpanKind,
        _attributes: &Attributes,
    ) -> SamplingDecision {
        SamplingDecision::Drop
    }
}

/// Follows the parent's decision; roots are delegated to `root`.
pub struct ParentBased {
    root: Box<dyn Sampler>,
}

impl ParentBased {
    pub fn new(root: impl Sampler) -> Self {
        Self {
            root: Box::new(root),
        }
    }
}

impl Sampler for ParentBased {
    fn should_sample(
        &self,
        parent: Option<&SpanContext>,
        trace_id: TraceId,
        name: &str,
        kind: SpanKind,
        attributes: &Attributes,
    ) -> SamplingDecision {
        match parent {
            Some(p) if p.sampled => SamplingDecision::RecordAndSample,
            Some(_) => SamplingDecision::Drop,
            None => self.root.should_sample(None, trace_id, name, kind, attributes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::types::SpanId;

    fn parent(sampled: bool) -> SpanContext {
        SpanContext {
            trace_id: TraceId::from_u128(7),
            span_id: SpanId::from_u64(9),
            sampled,
        }
    }

    #[test]
    fn parent_based_follows_parent_then_root() {
        let sampler = ParentBased::new(AlwaysOff);
        let attrs = Attributes::new();
        let tid = TraceId::from_u128(7);
        assert_eq!(
            sampler.should_sample(Some(&parent(true)), tid, "x", SpanKind::Client, &attrs),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(
            sampler.should_sample(Some(&parent(false)), tid, "x", SpanKind::Client, &attrs),
            SamplingDecision::Drop
        );
        assert_eq!(
            sampler.should_sample(None, tid, "x", SpanKind::Client, &attrs),
            SamplingDecision::Drop
        );
    }
}
