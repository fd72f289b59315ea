//! texrender binary.
//!
//! Usage:
//!   # Render a document, reusing the cache when the source is unchanged
//!   texrender render paper.tex --dep refs.bib --out paper.pdf
//!
//!   # Cache maintenance
//!   texrender cache stats
//!   texrender cache gc
//!
//!   # Engine host over stdio (spawned by `render`, not run by hand)
//!   texrender host --pass 0

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use texrender_cli::{open_cache, render, spawn_engines, working_dir_catalog, Config, RenderRequest};
use texrender_engine::{serve, CommandTypesetter, EngineHost};

/// Cached LaTeX rendering through isolated engine hosts.
#[derive(Parser, Debug)]
#[command(name = "texrender")]
#[command(about = "Render LaTeX documents through isolated engines, with a result cache")]
struct Args {
    /// Config file (RON). Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve engine commands as JSON lines on stdin/stdout
    Host {
        /// Which configured pass this host runs
        #[arg(long, default_value_t = 0)]
        pass: usize,
    },
    /// Render a document
    Render {
        input: PathBuf,

        /// Auxiliary file the document depends on (repeatable)
        #[arg(long = "dep")]
        dependencies: Vec<PathBuf>,

        /// Name the cache records this render under (default: the input path)
        #[arg(long)]
        referencing: Option<String>,

        /// Where to write the artifact (default: input with the output extension)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Cache directory, overriding the config
        #[arg(long, global = true)]
        root: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CacheAction {
    /// Print entry and artifact counts
    Stats,
    /// Delete every cached artifact
    Clear,
    /// Drop entries whose referencing files are gone
    Gc,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout carries the engine protocol in host mode
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())
        .with_context(|| match &args.config {
            Some(path) => format!("loading config {}", path.display()),
            None => "loading default config".to_string(),
        })?;

    match args.command {
        Command::Host { pass } => run_host(config, pass).await,
        Command::Render {
            input,
            dependencies,
            referencing,
            out,
        } => {
            let request = RenderRequest {
                input,
                dependencies,
                referencing,
            };
            run_render(config, args.config, request, out).await
        }
        Command::Cache { action, root } => {
            let mut config = config;
            if root.is_some() {
                config.cache.root = root;
            }
            run_cache(config, action).await
        }
    }
}

async fn run_host(config: Config, pass: usize) -> Result<ExitCode> {
    let pass_config = config
        .engine
        .passes
        .get(pass)
        .cloned()
        .with_context(|| format!("no pass {} configured", pass))?;
    tracing::info!(pass, program = %pass_config.program, "engine host starting");

    let typesetter = CommandTypesetter::new(
        pass_config.program,
        pass_config.args,
        pass_config.output_extension,
    );
    let mut host = EngineHost::new(Box::new(typesetter))?;
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        serve(&mut host, stdin.lock(), stdout.lock())
    })
    .await?
    .context("engine host I/O")?;
    Ok(ExitCode::SUCCESS)
}

async fn run_render(
    config: Config,
    config_path: Option<PathBuf>,
    request: RenderRequest,
    out: Option<PathBuf>,
) -> Result<ExitCode> {
    let cache = open_cache(&config).await.context("opening cache")?;
    let exe = std::env::current_exe().context("locating texrender executable")?;
    let catalog = working_dir_catalog();

    let outcome = render(&config, &cache, &catalog, &request, || {
        spawn_engines(&config, &exe, config_path.as_deref())
    })
    .await?;

    if !outcome.succeeded() {
        eprintln!("{}", outcome.log);
        println!("status {}", outcome.status);
        let code = u8::try_from(outcome.status).unwrap_or(1).max(1);
        return Ok(ExitCode::from(code));
    }

    let out = out.unwrap_or_else(|| request.input.with_extension(config.output_extension()));
    match &outcome.artifact {
        Some(artifact) => {
            tokio::fs::write(&out, artifact)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "status 0{}: {}",
                if outcome.cached { " (cached)" } else { "" },
                out.display()
            );
        }
        None => println!("status 0: no output produced"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_cache(config: Config, action: CacheAction) -> Result<ExitCode> {
    let cache = open_cache(&config).await.context("opening cache")?;
    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await?;
            println!("{}", ron::ser::to_string_pretty(&stats, Default::default())?);
        }
        CacheAction::Clear => {
            let removed = cache.remove_all_cached().await?;
            println!("removed {} artifacts", removed);
        }
        CacheAction::Gc => {
            let report = cache.clean_up(&working_dir_catalog()).await?;
            println!("{}", ron::ser::to_string_pretty(&report, Default::default())?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
