//! Tool executor subprocess and its line-delimited JSON protocol
//!
//! The executor reads one JSON-RPC request per line on stdin and writes one reply per line
//! on stdout. Anything on stdout that is not a reply, and everything on stderr, is logged
//! as diagnostics and never reaches a client.

use std::process::Stdio;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorCommand;
use crate::errors::ExecutorError;
use crate::mcp::correlation::CorrelationKey;
use crate::mcp::server::Relay;

#[derive(Debug, PartialEq)]
pub enum ExecutorLine {
    Blank,
    Diagnostic {
        line: String,
        reason: &'static str,
    },
    Reply {
        key: Option<CorrelationKey>,
        message: Map<String, Value>,
    },
}

/// Classifies one stdout line by parsing it, never by sniffing its first or last character.
pub fn classify_line(raw: &str) -> ExecutorLine {
    let line = raw.trim();
    if line.is_empty() {
        return ExecutorLine::Blank;
    }

    let diagnostic = |reason| ExecutorLine::Diagnostic {
        line: line.to_string(),
        reason,
    };

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(message)) if is_reply(&message) => ExecutorLine::Reply {
            key: message.get("id").and_then(Value::as_u64),
            message,
        },
        Ok(Value::Object(_)) => diagnostic("not a reply"),
        Ok(_) => diagnostic("not a JSON object"),
        Err(_) => diagnostic("not valid JSON"),
    }
}

fn is_reply(message: &Map<String, Value>) -> bool {
    message.contains_key("id") && (message.contains_key("result") != message.contains_key("error"))
}

/// Handle kept by the process owner to stop the executor on shutdown.
#[derive(Debug)]
pub struct ExecutorProcess {
    pid: Option<u32>,
    terminate_tx: Option<oneshot::Sender<()>>,
}

impl ExecutorProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Best effort: signals the process and returns without waiting for it to exit.
    pub fn terminate(mut self) {
        if let Some(terminate_tx) = self.terminate_tx.take() {
            let _ = terminate_tx.send(());
        }
    }
}

pub async fn spawn_executor(
    relay: Arc<Relay>,
    command: &ExecutorCommand,
) -> Result<ExecutorProcess, ExecutorError> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecutorError::Spawn {
            program: command.program.clone(),
            source,
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or(ExecutorError::MissingStream("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or(ExecutorError::MissingStream("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or(ExecutorError::MissingStream("stderr"))?;

    let pid = child.id();
    relay.attach_executor(Box::new(stdin), pid).await;

    tokio::spawn(pump_output(Arc::clone(&relay), stdout));
    tokio::spawn(pump_diagnostics(stderr));

    let (terminate_tx, terminate_rx) = oneshot::channel();
    tokio::spawn(supervise(relay, child, terminate_rx));

    info!(program = %command.program, pid = ?pid, "tool executor started");
    Ok(ExecutorProcess {
        pid,
        terminate_tx: Some(terminate_tx),
    })
}

/// Splits the executor's stdout into lines and hands each one to the relay.
pub async fn pump_output<R>(relay: Arc<Relay>, stdout: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                relay.handle_executor_line(&line).await;
            }
            Err(err) => {
                warn!(error = %err, "failed to read tool executor output");
                break;
            }
        }
    }

    info!("tool executor output closed");
    relay.executor_output_closed().await;
}

async fn pump_diagnostics<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(line = %line, "tool executor stderr"),
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "stopped reading tool executor stderr");
                break;
            }
        }
    }
}

async fn supervise(relay: Arc<Relay>, mut child: Child, mut terminate_rx: oneshot::Receiver<()>) {
    tokio::select! {
        status = child.wait() => {
            let exit_code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    error!(error = %err, "failed to wait on tool executor");
                    None
                }
            };
            relay.executor_exited(exit_code).await;
        }
        Ok(()) = &mut terminate_rx => {
            info!(pid = ?child.id(), "terminating tool executor");
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "failed to signal tool executor");
            }
            relay.executor_detached().await;
        }
    }
}
