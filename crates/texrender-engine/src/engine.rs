//! Engine client: one isolated host, one task at a time.
//!
//! ```text
//!   Init ──load──▶ Ready ──task()──▶ Busy ──ok──▶ Ready
//!                                      │
//!                                      └──failure──▶ Error (terminal)
//! ```
//!
//! `task` takes `&mut self`, so a single owner can never overlap tasks.
//! Shared access goes through [`EngineHandle`], whose non-blocking lock
//! turns a concurrent second caller into an immediate `NotReady(Busy)`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::protocol::{CacheData, Command, CompileOutput, Response, LOAD};
use crate::transport::{HostChannel, HostGuard};

/// Default time a single task may take before the engine is abandoned.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum EngineStatus {
    /// Waiting for the load handshake.
    Init,
    Ready,
    /// A task is outstanding.
    Busy,
    /// Unrecoverable; the engine must be rebuilt.
    Error,
}

/// Client for one engine host.
pub struct Engine {
    label: String,
    status: EngineStatus,
    commands: mpsc::Sender<Command>,
    responses: mpsc::Receiver<Response>,
    timeout: Duration,
    _guard: Option<HostGuard>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("label", &self.label)
            .field("status", &self.status)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Engine {
    /// Wrap a channel. The engine stays in `Init` until [`Engine::await_load`].
    pub fn new(label: impl Into<String>, channel: HostChannel, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            status: EngineStatus::Init,
            commands: channel.commands,
            responses: channel.responses,
            timeout,
            _guard: channel.guard,
        }
    }

    /// Wrap a channel and wait for the host's load handshake.
    pub async fn connect(
        label: impl Into<String>,
        channel: HostChannel,
        timeout: Duration,
    ) -> EngineResult<Self> {
        let mut engine = Self::new(label, channel, timeout);
        engine.await_load().await?;
        Ok(engine)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == EngineStatus::Ready
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        self.status = EngineStatus::Error;
        warn!(engine = %self.label, error = %err, "engine unusable");
        err
    }

    /// Consume the load handshake and move `Init -> Ready`.
    pub async fn await_load(&mut self) -> EngineResult<()> {
        if self.status != EngineStatus::Init {
            return Err(EngineError::NotReady(self.status));
        }
        match tokio::time::timeout(self.timeout, self.responses.recv()).await {
            Ok(Some(response)) if response.cmd == LOAD && response.is_ok() => {
                self.status = EngineStatus::Ready;
                info!(engine = %self.label, "engine ready");
                Ok(())
            }
            Ok(Some(response)) => Err(self.fail(EngineError::Unusable(format!(
                "expected load handshake, got {}",
                response.cmd
            )))),
            Ok(None) => Err(self.fail(EngineError::Unusable(
                "host closed before load".into(),
            ))),
            Err(_) => Err(self.fail(EngineError::Timeout {
                cmd: LOAD.into(),
                after: self.timeout,
            })),
        }
    }

    /// Send one command and wait for its response.
    ///
    /// Fails immediately unless the engine is `Ready`. A compile-class
    /// command whose render failed still returns `Ok` with a non-zero
    /// status; every other failure leaves the engine in `Error`.
    ///
    /// Dropping the returned future before it completes leaves the engine
    /// `Busy`: the response it was waiting for can no longer be matched.
    pub async fn task(&mut self, command: Command) -> EngineResult<Response> {
        if self.status != EngineStatus::Ready {
            return Err(EngineError::NotReady(self.status));
        }
        let name = command.name();
        self.status = EngineStatus::Busy;
        debug!(engine = %self.label, cmd = %name, "task sent");

        if self.commands.send(command).await.is_err() {
            return Err(self.fail(EngineError::Unusable(format!(
                "channel closed sending {}",
                name
            ))));
        }

        let response = match tokio::time::timeout(self.timeout, self.responses.recv()).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                return Err(self.fail(EngineError::Unusable(format!(
                    "channel closed awaiting {}",
                    name
                ))));
            }
            Err(_) => {
                return Err(self.fail(EngineError::Timeout {
                    cmd: name.to_string(),
                    after: self.timeout,
                }));
            }
        };

        if response.cmd != name.as_ref() {
            return Err(self.fail(EngineError::Unusable(format!(
                "response tag {} does not match {}",
                response.cmd, name
            ))));
        }
        if !response.is_ok() {
            let render_failure = name.is_compile() && response.status.is_some();
            if !render_failure {
                let message = response.error.unwrap_or_else(|| "unspecified".into());
                return Err(self.fail(EngineError::Host {
                    cmd: name.to_string(),
                    message,
                }));
            }
        }

        self.status = EngineStatus::Ready;
        debug!(engine = %self.label, cmd = %name, result = ?response.result, "task done");
        Ok(response)
    }

    /// Run a compile-class command and unpack its output.
    pub async fn compile(&mut self, command: Command) -> EngineResult<CompileOutput> {
        Ok(self.task(command).await?.into_compile_output())
    }

    /// Fetch a file's bytes from the host.
    pub async fn fetch_file(&mut self, path: impl Into<String>) -> EngineResult<Vec<u8>> {
        let response = self.task(Command::FetchFile { path: path.into() }).await?;
        Ok(response.data.unwrap_or_default())
    }

    pub async fn fetch_cache_data(&mut self) -> EngineResult<CacheData> {
        let response = self.task(Command::FetchCacheData).await?;
        Ok(response.cache.unwrap_or_default())
    }
}

/// Clonable, shareable access to an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<Engine>>,
}

impl EngineHandle {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run a task, or fail with `NotReady(Busy)` at once if another caller
    /// holds the engine.
    pub async fn task(&self, command: Command) -> EngineResult<Response> {
        let mut engine = self
            .inner
            .try_lock()
            .map_err(|_| EngineError::NotReady(EngineStatus::Busy))?;
        engine.task(command).await
    }

    /// Current status; `Busy` while another caller holds the engine.
    pub fn status(&self) -> EngineStatus {
        match self.inner.try_lock() {
            Ok(engine) => engine.status(),
            Err(_) => EngineStatus::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandName;
    use crate::transport::HostEnd;

    async fn ready_engine(timeout: Duration) -> (Engine, HostEnd) {
        let (channel, end) = HostChannel::pair();
        end.responses.send(Response::load()).await.expect("load");
        let engine = Engine::connect("test", channel, timeout).await.expect("connect");
        (engine, end)
    }

    #[tokio::test]
    async fn test_handshake_and_task() {
        let (mut engine, mut end) = ready_engine(DEFAULT_TASK_TIMEOUT).await;
        assert_eq!(engine.status(), EngineStatus::Ready);

        let host = tokio::spawn(async move {
            let cmd = end.commands.recv().await.expect("command");
            assert_eq!(cmd, Command::SetMainFile { path: "doc.tex".into() });
            end.responses.send(Response::ok("set-main-file")).await.expect("reply");
            end
        });
        let response = engine
            .task(Command::SetMainFile { path: "doc.tex".into() })
            .await
            .expect("task");
        assert!(response.is_ok());
        assert_eq!(engine.status(), EngineStatus::Ready);
        host.await.expect("host");
    }

    #[tokio::test]
    async fn test_not_ready_before_load() {
        let (channel, _end) = HostChannel::pair();
        let mut engine = Engine::new("cold", channel, DEFAULT_TASK_TIMEOUT);
        let err = engine.task(Command::Compile).await.expect_err("init");
        assert!(matches!(err, EngineError::NotReady(EngineStatus::Init)));
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_bad_handshake() {
        let (channel, end) = HostChannel::pair();
        end.responses.send(Response::ok("compile")).await.expect("send");
        let err = Engine::connect("x", channel, DEFAULT_TASK_TIMEOUT)
            .await
            .expect_err("mismatch");
        assert!(matches!(err, EngineError::Unusable(_)));
    }

    #[tokio::test]
    async fn test_tag_mismatch_is_terminal() {
        let (mut engine, mut end) = ready_engine(DEFAULT_TASK_TIMEOUT).await;
        tokio::spawn(async move {
            end.commands.recv().await;
            end.responses.send(Response::ok("fetch-file")).await.ok();
            end
        });
        let err = engine.task(Command::Compile).await.expect_err("mismatch");
        assert!(err.is_terminal());
        assert_eq!(engine.status(), EngineStatus::Error);

        let again = engine.task(Command::Compile).await.expect_err("error state");
        assert!(matches!(again, EngineError::NotReady(EngineStatus::Error)));
    }

    #[tokio::test]
    async fn test_compile_failure_keeps_engine_ready() {
        let (mut engine, mut end) = ready_engine(DEFAULT_TASK_TIMEOUT).await;
        tokio::spawn(async move {
            end.commands.recv().await;
            let output = CompileOutput {
                status: 1,
                log: "! Missing $ inserted.".into(),
                data: None,
                path: None,
            };
            end.responses
                .send(Response::compiled(CommandName::Compile, output))
                .await
                .ok();
            end
        });
        let output = engine.compile(Command::Compile).await.expect("compile");
        assert_eq!(output.status, 1);
        assert_eq!(output.log, "! Missing $ inserted.");
        assert_eq!(engine.status(), EngineStatus::Ready);
    }

    #[tokio::test]
    async fn test_host_failure_is_terminal() {
        let (mut engine, mut end) = ready_engine(DEFAULT_TASK_TIMEOUT).await;
        tokio::spawn(async move {
            end.commands.recv().await;
            end.responses
                .send(Response::failed("fetch-file", "no such file"))
                .await
                .ok();
            end
        });
        let err = engine.fetch_file("missing.pdf").await.expect_err("failure");
        assert!(matches!(err, EngineError::Host { ref message, .. } if message == "no such file"));
        assert_eq!(engine.status(), EngineStatus::Error);
    }

    #[tokio::test]
    async fn test_timeout_moves_to_error() {
        let (mut engine, _end) = ready_engine(Duration::from_millis(50)).await;
        let err = engine.task(Command::Compile).await.expect_err("timeout");
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert_eq!(engine.status(), EngineStatus::Error);
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (mut engine, end) = ready_engine(DEFAULT_TASK_TIMEOUT).await;
        drop(end);
        let err = engine.task(Command::FlushWorkingArea).await.expect_err("closed");
        assert!(matches!(err, EngineError::Unusable(_)));
    }

    #[tokio::test]
    async fn test_dropped_task_leaves_engine_busy() {
        let (mut engine, _end) = ready_engine(DEFAULT_TASK_TIMEOUT).await;
        {
            let pending = engine.task(Command::Compile);
            let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;
        }
        assert_eq!(engine.status(), EngineStatus::Busy);
        let err = engine.task(Command::Compile).await.expect_err("busy");
        assert!(matches!(err, EngineError::NotReady(EngineStatus::Busy)));
    }

    #[tokio::test]
    async fn test_handle_rejects_second_caller() {
        let (engine, mut end) = ready_engine(DEFAULT_TASK_TIMEOUT).await;
        let handle = EngineHandle::new(engine);

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.task(Command::Compile).await })
        };
        let cmd = end.commands.recv().await.expect("first command");
        assert_eq!(cmd, Command::Compile);

        let err = handle
            .task(Command::FetchCacheData)
            .await
            .expect_err("second caller");
        assert!(matches!(err, EngineError::NotReady(EngineStatus::Busy)));
        assert_eq!(handle.status(), EngineStatus::Busy);

        let output = CompileOutput {
            status: 0,
            log: String::new(),
            data: Some(b"%PDF".to_vec()),
            path: Some("main.pdf".into()),
        };
        end.responses
            .send(Response::compiled(CommandName::Compile, output))
            .await
            .expect("reply");
        let response = first.await.expect("join").expect("first task");
        assert_eq!(response.data.as_deref(), Some(&b"%PDF"[..]));
        assert_eq!(handle.status(), EngineStatus::Ready);
        assert!(end.commands.try_recv().is_err());
    }
}
