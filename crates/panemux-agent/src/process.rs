//! Subprocess implementation of the change-agent trait
//!
//! The agent binary is invoked as `<program> <instruction>` in the pane's
//! working directory. Stdout and stderr are pumped line-by-line into the
//! event stream; the terminal `Exited` event is sent only after both pipes
//! close and the process has been reaped, so consumers never observe output
//! after completion.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::{AgentEvent, AgentExit, AgentHandle, ChangeAgent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change agent driven through an external CLI binary.
#[derive(Debug, Clone)]
pub struct AgentCli {
    program: String,
}

impl AgentCli {
    /// Create an agent runner for the given binary.
    #[inline]
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Binary this runner invokes.
    #[inline]
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for AgentCli {
    fn default() -> Self {
        Self::new("cursor-agent")
    }
}

#[async_trait]
impl ChangeAgent for AgentCli {
    async fn start(&self, workdir: &Path, instruction: &str) -> Result<AgentHandle, AgentError> {
        debug!(program = %self.program, ?workdir, "starting change agent");
        let mut child = Command::new(&self.program)
            .arg(instruction)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AgentError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_pump = stdout.map(|s| tokio::spawn(pump_lines(s, tx.clone())));
        let err_pump = stderr.map(|s| tokio::spawn(pump_lines(s, tx.clone())));

        tokio::spawn(async move {
            let mut kill_requested = false;
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    res = &mut kill_rx, if !kill_requested => {
                        kill_requested = true;
                        // A dropped kill switch is not a termination request.
                        if res.is_ok() {
                            debug!("terminating change agent on request");
                            let _ = child.start_kill();
                        }
                    }
                }
            };
            if let Some(pump) = out_pump {
                let _ = pump.await;
            }
            if let Some(pump) = err_pump {
                let _ = pump.await;
            }
            let exit = match status {
                Ok(status) => AgentExit {
                    code: status.code(),
                },
                Err(err) => {
                    warn!(%err, "failed to reap change agent");
                    AgentExit { code: None }
                }
            };
            let _ = tx.send(AgentEvent::Exited(exit)).await;
        });

        Ok(AgentHandle::with_kill(rx, kill_tx))
    }
}

async fn pump_lines<R>(reader: R, tx: mpsc::Sender<AgentEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(AgentEvent::Output(line)).await.is_err() {
            break;
        }
    }
}
