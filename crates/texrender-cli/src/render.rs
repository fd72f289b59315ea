//! The render pipeline: cache lookup, engine compile, cache update, cleanup.

use std::future::Future;
use std::path::{Path, PathBuf};

use texrender_cache::{
    content_hash, BackendKind, CacheError, CacheResult, CleanupReport, FsCatalog, ResultCache,
    SourceCatalog,
};
use texrender_engine::{
    spawn_process, CompileOutput, Compiler, Engine, EngineError, EngineResult, DEFAULT_MAIN_FILE,
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One document to render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub input: PathBuf,
    /// Auxiliary files the document needs. Sent to every engine and hashed
    /// into the cache key.
    pub dependencies: Vec<PathBuf>,
    /// Cache bookkeeping name. Defaults to the input path.
    pub referencing: Option<String>,
}

impl RenderRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            dependencies: Vec::new(),
            referencing: None,
        }
    }

    fn referencing_file(&self) -> String {
        self.referencing
            .clone()
            .unwrap_or_else(|| self.input.to_string_lossy().into_owned())
    }

    fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub status: i32,
    pub log: String,
    pub artifact: Option<Vec<u8>>,
    /// Served from the cache without starting an engine.
    pub cached: bool,
    pub cleanup: Option<CleanupReport>,
}

impl RenderOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == 0
    }
}

/// Open the cache described by `config`.
pub async fn open_cache(config: &Config) -> CacheResult<ResultCache> {
    match config.cache.backend {
        BackendKind::Memory => Ok(ResultCache::in_memory(config.cache.fallback)),
        BackendKind::Directory => {
            ResultCache::in_directory(config.cache_root(), &config.cache.extension, config.cache.fallback)
                .await
        }
    }
}

/// Start one `texrender host --pass N` child per configured pass.
pub async fn spawn_engines(
    config: &Config,
    exe: &Path,
    config_path: Option<&Path>,
) -> EngineResult<Compiler> {
    let mut engines = Vec::with_capacity(config.engine.passes.len());
    for (index, pass) in config.engine.passes.iter().enumerate() {
        let mut args: Vec<String> = Vec::new();
        if let Some(path) = config_path {
            args.push("--config".into());
            args.push(path.to_string_lossy().into_owned());
        }
        args.extend(["host".to_string(), "--pass".to_string(), index.to_string()]);
        debug!(pass = index, program = %pass.program, "spawning engine host");
        let channel = spawn_process(exe, &args)?;
        engines.push(Engine::connect(pass.program.clone(), channel, config.task_timeout()).await?);
    }
    compiler_for(engines)
}

/// One engine compiles alone; two run chained.
pub fn compiler_for(engines: Vec<Engine>) -> EngineResult<Compiler> {
    match engines.len() {
        1 => Ok(Compiler::new(engines)),
        2 => {
            let mut engines = engines.into_iter();
            match (engines.next(), engines.next()) {
                (Some(first), Some(second)) => Ok(Compiler::chained(first, second)),
                _ => Err(EngineError::Configuration("expected two engines".into())),
            }
        }
        n => Err(EngineError::Configuration(format!(
            "one or two passes supported, {} configured",
            n
        ))),
    }
}

async fn read(path: &Path) -> Result<Vec<u8>, RenderError> {
    tokio::fs::read(path).await.map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Regular files directly inside `dir`, by name.
async fn support_files(dir: &Path) -> Result<Vec<(String, Vec<u8>)>, RenderError> {
    let io_err = |source| RenderError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if !entry.file_type().await.map_err(io_err)?.is_file() {
            continue;
        }
        let data = read(&entry.path()).await?;
        files.push((entry.file_name().to_string_lossy().into_owned(), data));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

async fn compile_with(
    compiler: &mut Compiler,
    config: &Config,
    request: &RenderRequest,
    source: &[u8],
) -> Result<CompileOutput, RenderError> {
    if let Some(dir) = &config.support_dir {
        for (name, data) in support_files(dir).await? {
            compiler.write_support_file(&name, &data).await?;
        }
    }
    for dependency in &request.dependencies {
        let data = read(dependency).await?;
        compiler.write_support_file(&file_name(dependency), &data).await?;
    }
    if let Some(url) = &config.engine.network_endpoint {
        compiler.set_network_endpoint(url).await?;
    }
    compiler.write_main_input(DEFAULT_MAIN_FILE, source).await?;
    compiler.set_main_file(DEFAULT_MAIN_FILE).await?;
    Ok(compiler.compile().await?)
}

/// Render `request`, consulting and updating `cache`.
///
/// `engines` is only called on a cache miss. Engines are closed before
/// this returns, whatever the compile did.
pub async fn render<F, Fut>(
    config: &Config,
    cache: &ResultCache,
    catalog: &dyn SourceCatalog,
    request: &RenderRequest,
    engines: F,
) -> Result<RenderOutcome, RenderError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = EngineResult<Compiler>>,
{
    let source = read(&request.input).await?;
    let source_hash = content_hash(&source);
    let dependencies = request.dependency_names();
    let referencing = request.referencing_file();

    if let Some(artifact) = cache
        .restore_exact(&source_hash, &dependencies, &referencing)
        .await?
    {
        info!(input = %request.input.display(), %source_hash, "served from cache");
        return Ok(RenderOutcome {
            status: 0,
            log: String::new(),
            artifact: Some(artifact),
            cached: true,
            cleanup: None,
        });
    }

    let mut compiler = engines().await?;
    let result = compile_with(&mut compiler, config, request, &source).await;
    if let Err(e) = compiler.close().await {
        warn!(error = %e, "closing engines failed");
    }
    let output = result?;

    if output.succeeded() {
        match &output.data {
            Some(data) => {
                cache.release(&source_hash, &referencing).await?;
                cache
                    .add_file(data, &source_hash, &dependencies, &referencing)
                    .await?;
            }
            None => warn!(input = %request.input.display(), "compile succeeded without output"),
        }
    } else {
        info!(status = output.status, input = %request.input.display(), "render failed");
    }

    let current = RequestCatalog {
        inner: catalog,
        file: &referencing,
        dependencies: &dependencies,
    };
    let cleanup = cache.clean_up(&current).await?;
    Ok(RenderOutcome {
        status: output.status,
        log: output.log,
        artifact: output.data,
        cached: false,
        cleanup: Some(cleanup),
    })
}

/// Answers for the file just rendered with the dependency list it was
/// rendered with, so cleanup can drop its entries recorded under an older
/// list. Every other question goes to `inner`.
struct RequestCatalog<'a> {
    inner: &'a dyn SourceCatalog,
    file: &'a str,
    dependencies: &'a [String],
}

#[async_trait]
impl SourceCatalog for RequestCatalog<'_> {
    async fn exists(&self, file: &str) -> bool {
        file == self.file || self.inner.exists(file).await
    }

    async fn dependencies(&self, file: &str) -> Option<Vec<String>> {
        if file == self.file {
            return Some(self.dependencies.to_vec());
        }
        self.inner.dependencies(file).await
    }
}

/// Catalog used by the binary: referencing files are paths relative to
/// the working directory.
///
/// The binary keeps no record of each document's `--dep` list between
/// runs, so this catalog never knows dependencies. `cache gc` therefore
/// only drops entries of deleted files. Entries recorded under an older
/// dependency list are dropped when that document is rendered again.
pub fn working_dir_catalog() -> FsCatalog {
    FsCatalog::new(".")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use texrender_cache::{FallbackPolicy, MemoryCatalog};
    use texrender_engine::{
        spawn_in_process, CompilePass, EngineHost, HostContext, Typesetter, DEFAULT_TASK_TIMEOUT,
        SUPPORT_DIR,
    };

    use super::*;

    /// Echoes the main input, prefixed with every support file name it sees.
    struct Echo {
        status: i32,
        runs: Arc<AtomicUsize>,
    }

    impl Typesetter for Echo {
        fn compile(&mut self, _pass: CompilePass, ctx: &mut HostContext<'_>) -> CompileOutput {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut data = Vec::new();
            for entry in ctx.vfs.readdir(SUPPORT_DIR).unwrap_or_default() {
                data.extend_from_slice(entry.name.as_bytes());
                data.push(b';');
            }
            data.extend(ctx.vfs.read_file(&ctx.main_path()).unwrap_or_default());
            let ok = self.status == 0;
            CompileOutput {
                status: self.status,
                log: "echo".into(),
                data: ok.then_some(data),
                path: ok.then(|| "main.pdf".to_string()),
            }
        }
    }

    fn factory(status: i32, runs: Arc<AtomicUsize>) -> impl Future<Output = EngineResult<Compiler>> {
        async move {
            let host = EngineHost::new(Box::new(Echo { status, runs })).map_err(|e| {
                EngineError::Configuration(e.to_string())
            })?;
            let engine = Engine::connect("echo", spawn_in_process(host), DEFAULT_TASK_TIMEOUT).await?;
            compiler_for(vec![engine])
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
        cache: ResultCache,
        catalog: MemoryCatalog,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("doc.tex"), b"\\relax").expect("write");
        std::fs::write(dir.path().join("macros.sty"), b"%").expect("write");
        let catalog = MemoryCatalog::new();
        catalog.insert_unknown("doc.tex");
        Fixture {
            dir,
            config: Config::default(),
            cache: ResultCache::in_memory(FallbackPolicy::Strict),
            catalog,
        }
    }

    fn request(fx: &Fixture) -> RenderRequest {
        RenderRequest {
            input: fx.dir.path().join("doc.tex"),
            dependencies: vec![fx.dir.path().join("macros.sty")],
            referencing: Some("doc.tex".into()),
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let fx = fixture();
        let runs = Arc::new(AtomicUsize::new(0));

        let first = render(&fx.config, &fx.cache, &fx.catalog, &request(&fx), || {
            factory(0, runs.clone())
        })
        .await
        .expect("render");
        assert!(first.succeeded());
        assert!(!first.cached);
        assert_eq!(first.artifact.as_deref(), Some(&b"macros.sty;\\relax"[..]));
        assert!(first.cleanup.is_some_and(|r| r.is_clean()));

        let second = render(&fx.config, &fx.cache, &fx.catalog, &request(&fx), || {
            factory(0, runs.clone())
        })
        .await
        .expect("render");
        assert!(second.cached);
        assert_eq!(second.artifact, first.artifact);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let fx = fixture();
        let runs = Arc::new(AtomicUsize::new(0));
        let outcome = render(&fx.config, &fx.cache, &fx.catalog, &request(&fx), || {
            factory(1, runs.clone())
        })
        .await
        .expect("render");
        assert_eq!(outcome.status, 1);
        assert!(outcome.artifact.is_none());
        assert_eq!(fx.cache.stats().await.expect("stats").entries, 0);
    }

    #[tokio::test]
    async fn test_changed_dependencies_replace_entry() {
        let fx = fixture();
        let runs = Arc::new(AtomicUsize::new(0));
        render(&fx.config, &fx.cache, &fx.catalog, &request(&fx), || factory(0, runs.clone()))
            .await
            .expect("render");

        let mut fewer = request(&fx);
        fewer.dependencies.clear();
        let outcome = render(&fx.config, &fx.cache, &fx.catalog, &fewer, || factory(0, runs.clone()))
            .await
            .expect("render");
        assert_eq!(outcome.artifact.as_deref(), Some(&b"\\relax"[..]));

        let stats = fx.cache.stats().await.expect("stats");
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.artifacts, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_render_drops_entry_for_old_dependencies() {
        let fx = fixture();
        let runs = Arc::new(AtomicUsize::new(0));
        render(&fx.config, &fx.cache, &fx.catalog, &request(&fx), || factory(0, runs.clone()))
            .await
            .expect("render");

        // doc.tex no longer needs macros.sty but fails to compile
        let mut fewer = request(&fx);
        fewer.dependencies.clear();
        let outcome = render(&fx.config, &fx.cache, &fx.catalog, &fewer, || factory(1, runs.clone()))
            .await
            .expect("render");
        assert_eq!(outcome.status, 1);
        let cleanup = outcome.cleanup.expect("cleanup ran");
        assert_eq!(cleanup.stale_references, 1);

        let stats = fx.cache.stats().await.expect("stats");
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.artifacts, 0);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let fx = fixture();
        let req = RenderRequest::new(fx.dir.path().join("absent.tex"));
        let err = render(&fx.config, &fx.cache, &fx.catalog, &req, || {
            factory(0, Arc::new(AtomicUsize::new(0)))
        })
        .await
        .expect_err("missing input");
        assert!(matches!(err, RenderError::Io { .. }));
    }

    #[test]
    fn test_compiler_shape() {
        assert!(matches!(
            compiler_for(Vec::new()),
            Err(EngineError::Configuration(_))
        ));
    }
}
