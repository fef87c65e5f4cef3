use thiserror::Error;

/// Result alias for the per-turn chat pipeline.
pub type ChatResult<T> = std::result::Result<T, ChatError>;

/// Errors a single chat turn can fail with.
///
/// All three kinds are recoverable at the turn boundary: the shell shows an
/// apologetic message, the transcript is left untouched and the user can
/// retry. None of them should ever terminate the process.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The selector produced output that could not be mapped to a known
    /// retriever tool.
    #[error("tool selection failed: {0}")]
    Routing(String),

    /// The vector index backing a retriever tool was unavailable or the
    /// query against it failed.
    #[error("index retrieval failed: {0}")]
    Retrieval(String),

    /// The hosted model call failed: auth, rate limit, network, timeout or
    /// an empty/malformed response.
    #[error("model generation failed: {0}")]
    Generation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_reason() {
        let err = ChatError::Routing("no JSON object in reply".into());
        assert!(err.to_string().contains("no JSON object"));

        let err = ChatError::Retrieval("collection missing".into());
        assert!(err.to_string().starts_with("index retrieval failed"));
    }
}
