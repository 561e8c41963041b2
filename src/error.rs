#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("tool loop detected: {0}")]
    LoopDetected(String),
    #[error("turn cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection dropped: {0}")]
    Dropped(String),
    #[error("credential error: {0}")]
    Credential(String),
}
