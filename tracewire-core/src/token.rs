/// Estimates the token count of a text fragment for a given model.
pub trait TokenEstimator: Send + Sync + 'static {
    fn estimate(&self, text: &str, model: &str) -> u64;
}

/// Roughly four characters per token, rounded up. Empty text is zero tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharHeuristic;

impl TokenEstimator for CharHeuristic {
    fn estimate(&self, text: &str, _model: &str) -> u64 {
        let chars = text.chars().count() as u64;
        chars.div_ceil(4)
    }
}
