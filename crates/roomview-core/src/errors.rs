use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomviewError {
    /// Bad or expired token. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network unreachable: {0}")]
    Network(String),
    /// Surface or track rejected by the renderer. Views swallow this.
    #[error("bind failed: {0}")]
    Bind(String),
    #[error("engine failure: {0}")]
    FatalEngine(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}
