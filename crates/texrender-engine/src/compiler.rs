//! Compile orchestration over one or more engines.
//!
//! Setup commands broadcast to every engine and join. Everything that
//! concerns one document targets exactly one engine; with more than one
//! engine that is a configuration error unless the composition is
//! chained, where the first engine takes the input and the last one
//! produces the final artifact.

use futures::future::join_all;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::protocol::{CacheData, Command, CompileOutput, Response};

/// Name used for the intermediate file when the first engine reports none.
pub const DEFAULT_INTERMEDIATE: &str = "main.xdv";

/// How the engines combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Composition {
    /// One engine does everything.
    #[default]
    Single,
    /// The first engine's output is the last engine's input.
    Chained,
}

#[derive(Debug)]
pub struct Compiler {
    engines: Vec<Engine>,
    composition: Composition,
}

impl Compiler {
    pub fn new(engines: Vec<Engine>) -> Self {
        Self {
            engines,
            composition: Composition::Single,
        }
    }

    /// Two engines in sequence.
    pub fn chained(first: Engine, second: Engine) -> Self {
        Self {
            engines: vec![first, second],
            composition: Composition::Chained,
        }
    }

    pub fn composition(&self) -> Composition {
        self.composition
    }

    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }

    /// True once every engine is ready.
    pub fn is_ready(&self) -> bool {
        !self.engines.is_empty() && self.engines.iter().all(Engine::is_ready)
    }

    async fn broadcast(&mut self, command: Command) -> EngineResult<Vec<Response>> {
        if self.engines.is_empty() {
            return Err(EngineError::Configuration("no engines configured".into()));
        }
        debug!(cmd = %command.name(), engines = self.engines.len(), "broadcast");
        let command = &command;
        join_all(
            self.engines
                .iter_mut()
                .map(|engine| engine.task(command.clone())),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Engine that receives document input.
    fn primary(&mut self) -> EngineResult<&mut Engine> {
        let count = self.engines.len();
        let allowed = count == 1 || (self.composition == Composition::Chained && count > 1);
        if !allowed {
            return Err(EngineError::Configuration(format!(
                "operation needs exactly one engine, {} configured",
                count
            )));
        }
        self.engines
            .first_mut()
            .ok_or_else(|| EngineError::Configuration("no engines configured".into()))
    }

    /// Engine that produces the final artifact.
    fn finisher(&mut self) -> EngineResult<&mut Engine> {
        if self.composition == Composition::Chained {
            return self
                .engines
                .last_mut()
                .ok_or_else(|| EngineError::Configuration("no engines configured".into()));
        }
        self.primary()
    }

    // Broadcast

    pub async fn write_support_file(&mut self, path: &str, data: &[u8]) -> EngineResult<()> {
        self.broadcast(Command::WriteSupportFile {
            path: path.to_string(),
            data: data.to_vec(),
        })
        .await
        .map(|_| ())
    }

    pub async fn set_network_endpoint(&mut self, url: &str) -> EngineResult<()> {
        self.broadcast(Command::SetNetworkEndpoint {
            url: url.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn flush_working_area(&mut self) -> EngineResult<()> {
        self.broadcast(Command::FlushWorkingArea).await.map(|_| ())
    }

    pub async fn flush_full_cache(&mut self) -> EngineResult<()> {
        self.broadcast(Command::FlushFullCache).await.map(|_| ())
    }

    pub async fn write_cache_data(&mut self, cache: CacheData) -> EngineResult<()> {
        self.broadcast(Command::WriteCacheData { cache }).await.map(|_| ())
    }

    /// Ask every host to exit.
    pub async fn close(&mut self) -> EngineResult<()> {
        info!(engines = self.engines.len(), "closing engines");
        self.broadcast(Command::GracefulClose).await.map(|_| ())
    }

    // Exactly one

    pub async fn write_main_input(&mut self, path: &str, data: &[u8]) -> EngineResult<()> {
        self.primary()?
            .task(Command::WriteMemoryFile {
                path: path.to_string(),
                data: data.to_vec(),
            })
            .await
            .map(|_| ())
    }

    pub async fn set_main_file(&mut self, path: &str) -> EngineResult<()> {
        self.primary()?
            .task(Command::SetMainFile {
                path: path.to_string(),
            })
            .await
            .map(|_| ())
    }

    pub async fn make_directory(&mut self, path: &str) -> EngineResult<()> {
        self.primary()?
            .task(Command::MakeDirectory {
                path: path.to_string(),
            })
            .await
            .map(|_| ())
    }

    pub async fn remove_memory_file(&mut self, path: &str) -> EngineResult<()> {
        self.primary()?
            .task(Command::RemoveMemoryFile {
                path: path.to_string(),
            })
            .await
            .map(|_| ())
    }

    pub async fn fetch_file(&mut self, path: &str) -> EngineResult<Vec<u8>> {
        self.primary()?.fetch_file(path).await
    }

    pub async fn compile_format_data(&mut self) -> EngineResult<CompileOutput> {
        self.primary()?.compile(Command::CompileFormatData).await
    }

    pub async fn compile_to_final_format(&mut self) -> EngineResult<CompileOutput> {
        self.finisher()?.compile(Command::CompileToFinalFormat).await
    }

    /// Compile the main input.
    ///
    /// Chained: a non-zero status from the first engine comes back as is
    /// and the second engine is never asked.
    pub async fn compile(&mut self) -> EngineResult<CompileOutput> {
        if self.composition == Composition::Single {
            return self.primary()?.compile(Command::Compile).await;
        }

        let (first, rest) = self
            .engines
            .split_first_mut()
            .ok_or_else(|| EngineError::Configuration("no engines configured".into()))?;
        let second = rest
            .last_mut()
            .ok_or_else(|| EngineError::Configuration("chained composition needs two engines".into()))?;

        let intermediate = first.compile(Command::Compile).await?;
        if !intermediate.succeeded() {
            info!(status = intermediate.status, "first pass failed");
            return Ok(intermediate);
        }
        let Some(data) = intermediate.data else {
            let mut log = intermediate.log;
            log.push_str("\nfirst pass produced no output");
            return Ok(CompileOutput {
                status: -1,
                log,
                data: None,
                path: None,
            });
        };
        let path = intermediate
            .path
            .unwrap_or_else(|| DEFAULT_INTERMEDIATE.to_string());
        debug!(path = %path, bytes = data.len(), "handing intermediate to second pass");

        second
            .task(Command::WriteMemoryFile {
                path: path.clone(),
                data,
            })
            .await?;
        second.task(Command::SetMainFile { path }).await?;
        second.compile(Command::CompileToFinalFormat).await
    }

    /// Lookup caches of the primary engine, or of every engine merged with
    /// later engines winning when chained.
    pub async fn fetch_cache_data(&mut self) -> EngineResult<CacheData> {
        if self.composition == Composition::Single {
            return self.primary()?.fetch_cache_data().await;
        }
        let mut merged = CacheData::new();
        for engine in &mut self.engines {
            for (key, entries) in engine.fetch_cache_data().await? {
                merged.entry(key).or_default().extend(entries);
            }
        }
        Ok(merged)
    }
}
