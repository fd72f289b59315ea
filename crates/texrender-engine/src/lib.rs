//! # texrender-engine
//!
//! Drives isolated typesetting engines.
//!
//! - [`protocol`]: the JSON command/response envelope
//! - [`Engine`]: client state machine, one task at a time, with timeouts
//! - [`EngineHost`]: the far side; owns a [`texrender_vfs::Vfs`] and a [`Typesetter`]
//! - [`transport`]: in-process and child-process channels between the two
//! - [`Compiler`]: broadcast, exactly-one and chained orchestration
//!
//! ```no_run
//! use texrender_engine::{spawn_in_process, CommandTypesetter, Compiler, Engine, EngineHost};
//! use texrender_engine::DEFAULT_TASK_TIMEOUT;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let typesetter = CommandTypesetter::new("pdflatex", vec!["{main}".into()], "pdf");
//! let host = EngineHost::new(Box::new(typesetter))?;
//! let engine = Engine::connect("pdf", spawn_in_process(host), DEFAULT_TASK_TIMEOUT).await?;
//!
//! let mut compiler = Compiler::new(vec![engine]);
//! compiler.write_main_input("main.tex", b"\\documentclass{article}...").await?;
//! let output = compiler.compile().await?;
//! println!("status {}: {} bytes", output.status, output.data.map_or(0, |d| d.len()));
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod engine;
pub mod error;
pub mod host;
pub mod protocol;
pub mod resolver;
pub mod transport;
pub mod typesetter;

pub use compiler::{Compiler, Composition};
pub use engine::{Engine, EngineHandle, EngineStatus, DEFAULT_TASK_TIMEOUT};
pub use error::{EngineError, EngineResult};
pub use host::{serve, EngineHost, DEFAULT_MAIN_FILE};
pub use protocol::{CacheData, Command, CommandName, CompileOutput, Response};
pub use resolver::{Category, PackageResolver, SUPPORT_DIR};
pub use transport::{spawn_in_process, spawn_process, HostChannel, HostEnd};
pub use typesetter::{CommandTypesetter, CompilePass, HostContext, Typesetter, WORK_DIR};
