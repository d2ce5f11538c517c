//! Panemux change-agent layer
//!
//! Wraps the external code-modification agent as a process behind a trait:
//! - One invocation = one subprocess with a natural-language instruction
//! - Output surfaced as an ordered event stream, terminated exactly once
//! - Handles are externally terminable even though the core never uses it

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod process;

pub use error::AgentError;
pub use process::AgentCli;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Terminal status of an agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentExit {
    /// Process exit code; `None` when killed by a signal.
    pub code: Option<i32>,
}

impl AgentExit {
    /// True for a zero exit code.
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// One element of an agent's output stream.
///
/// `Exited` is always the last event and is delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A line of agent output (stdout or stderr, in production order).
    Output(String),
    /// The process exited.
    Exited(AgentExit),
}

/// Handle to a running agent invocation.
///
/// Dropping the handle does not kill the process; the stream simply stops
/// being observed.
#[derive(Debug)]
pub struct AgentHandle {
    events: mpsc::Receiver<AgentEvent>,
    kill: Option<oneshot::Sender<()>>,
}

impl AgentHandle {
    /// Build a handle without termination support (used by fakes).
    #[inline]
    #[must_use]
    pub fn new(events: mpsc::Receiver<AgentEvent>) -> Self {
        Self { events, kill: None }
    }

    /// Build a handle wired to a kill switch.
    #[inline]
    #[must_use]
    pub fn with_kill(events: mpsc::Receiver<AgentEvent>, kill: oneshot::Sender<()>) -> Self {
        Self {
            events,
            kill: Some(kill),
        }
    }

    /// Next event, or `None` once the stream is exhausted after `Exited`.
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.recv().await
    }

    /// Request process termination. The `Exited` event still fires.
    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// External code-modification agent.
#[async_trait]
pub trait ChangeAgent: Send + Sync {
    /// Start one invocation against `workdir` with the given instruction.
    ///
    /// Failure here means the process never produced output and the caller
    /// may keep its prior state.
    async fn start(&self, workdir: &Path, instruction: &str) -> Result<AgentHandle, AgentError>;
}
