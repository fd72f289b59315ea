//! Transports between an engine client and its host.
//!
//! Every transport reduces to the same pair of bounded channels: commands
//! flow out, responses flow back. When the far side goes away the channels
//! close, which the client reports as an unusable engine.
//!
//! ```text
//!   Engine                 mpsc<Command>         host
//!   ┌──────────────┐  ─────────────────────▶  ┌───────────────────────────┐
//!   │ task()       │                          │ in-process: blocking task │
//!   │              │  ◀─────────────────────  │ child: JSON lines, stdio  │
//!   └──────────────┘     mpsc<Response>       └───────────────────────────┘
//! ```

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::host::EngineHost;
use crate::protocol::{encode_line, Command, CommandName, Response};

/// Bound on in-flight messages per direction.
pub const CHANNEL_CAPACITY: usize = 16;

/// Keeps the far side of a channel alive for as long as the engine is.
#[derive(Debug)]
pub enum HostGuard {
    Task(JoinHandle<()>),
    Process {
        child: Child,
        pumps: Vec<JoinHandle<()>>,
    },
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        if let HostGuard::Process { pumps, .. } = self {
            for pump in pumps {
                pump.abort();
            }
        }
    }
}

/// Client side of a transport.
#[derive(Debug)]
pub struct HostChannel {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) responses: mpsc::Receiver<Response>,
    pub(crate) guard: Option<HostGuard>,
}

/// Host side of a bare channel pair.
#[derive(Debug)]
pub struct HostEnd {
    pub commands: mpsc::Receiver<Command>,
    pub responses: mpsc::Sender<Response>,
}

impl HostChannel {
    /// A connected pair with nothing attached to the host end.
    pub fn pair() -> (HostChannel, HostEnd) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            HostChannel {
                commands: command_tx,
                responses: response_rx,
                guard: None,
            },
            HostEnd {
                commands: command_rx,
                responses: response_tx,
            },
        )
    }
}

/// Run `host` on a dedicated blocking thread that owns it.
///
/// The host sends the load handshake, then serves commands until
/// `graceful-close` or until the client drops its channel.
pub fn spawn_in_process(mut host: EngineHost) -> HostChannel {
    let (mut channel, mut end) = HostChannel::pair();
    let task = tokio::task::spawn_blocking(move || {
        if end.responses.blocking_send(Response::load()).is_err() {
            return;
        }
        while let Some(command) = end.commands.blocking_recv() {
            let closing = command.name() == CommandName::GracefulClose;
            let response = host.dispatch(command);
            if end.responses.blocking_send(response).is_err() || closing {
                break;
            }
        }
        debug!("in-process engine host stopped");
    });
    channel.guard = Some(HostGuard::Task(task));
    channel
}

/// Spawn `program` as an engine host speaking JSON lines over stdio.
///
/// stderr is inherited so the host's logs reach the terminal. The child
/// is killed when the channel's guard is dropped.
pub fn spawn_process<I, S>(program: impl AsRef<OsStr>, args: I) -> EngineResult<HostChannel>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref().to_owned();
    let mut child = ProcessCommand::new(&program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("child stdin not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;

    let (mut channel, end) = HostChannel::pair();
    let HostEnd {
        commands: mut outbound,
        responses,
    } = end;
    let label = program.to_string_lossy().into_owned();

    let writer_label = label.clone();
    let writer = tokio::spawn(async move {
        while let Some(command) = outbound.recv().await {
            let line = match encode_line(&command) {
                Ok(line) => line,
                Err(e) => {
                    warn!(host = %writer_label, error = %e, "failed to encode command");
                    break;
                }
            };
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(host = %writer_label, error = %e, "engine host stdin closed");
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Response>(&line) {
                    Ok(response) => {
                        if responses.send(response).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(host = %label, error = %e, "malformed response from engine host");
                        break;
                    }
                },
                Ok(None) => {
                    debug!(host = %label, "engine host closed stdout");
                    break;
                }
                Err(e) => {
                    warn!(host = %label, error = %e, "failed reading engine host stdout");
                    break;
                }
            }
        }
    });

    channel.guard = Some(HostGuard::Process {
        child,
        pumps: vec![writer, reader],
    });
    Ok(channel)
}
