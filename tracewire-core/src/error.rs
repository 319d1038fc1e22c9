use thiserror::Error;

/// Core error type for tracewire.
///
/// Errors raised by an instrumented delegate never pass through this type: the
/// instrumented wrapper surfaces the delegate's own error unchanged.
#[derive(Debug, Error)]
pub enum TracewireError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("span delivery failed ({}): {message}", describe_status(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no response".to_string(),
    }
}

pub type CoreResult<T> = std::result::Result<T, TracewireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_includes_status() {
        let err = TracewireError::Transport {
            status: Some(502),
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "span delivery failed (502): bad gateway");

        let err = TracewireError::Transport {
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "span delivery failed (no response): connection refused"
        );
    }
}
