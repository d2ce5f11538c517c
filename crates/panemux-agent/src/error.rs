//! Error types for the change-agent layer

/// Change-agent layer error
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent process could not be started at all.
    #[error("change agent '{program}' could not start: {source}")]
    Launch {
        /// The binary we tried to execute.
        program: String,
        /// The underlying spawn failure.
        source: std::io::Error,
    },
}

impl AgentError {
    /// Short machine-readable tag for the presentation layer.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Launch { .. } => "agent_launch",
        }
    }
}
