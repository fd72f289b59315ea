//! Engine host: owns a VFS and a typesetter, answers commands.
//!
//! The host is synchronous. The in-process transport runs it on a blocking
//! thread; `texrender host` runs it over stdio through [`serve`].

use std::io::{BufRead, Write};

use texrender_vfs::{path as vpath, Vfs, VfsError, VfsResult};
use tracing::{debug, info};

use crate::protocol::{decode_command, encode_line, Command, CommandName, Response};
use crate::resolver::{PackageResolver, SUPPORT_DIR};
use crate::typesetter::{CompilePass, HostContext, Typesetter, WORK_DIR};

/// Main file used until `set-main-file` says otherwise.
pub const DEFAULT_MAIN_FILE: &str = "main.tex";

pub struct EngineHost {
    vfs: Vfs,
    typesetter: Box<dyn Typesetter>,
    main_file: String,
    resolver: PackageResolver,
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("main_file", &self.main_file)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

fn fresh_vfs() -> VfsResult<Vfs> {
    let mut vfs = Vfs::new();
    vfs.mkdir_tree(WORK_DIR, 0o777)?;
    vfs.mkdir_tree(SUPPORT_DIR, 0o777)?;
    vfs.chdir(WORK_DIR)?;
    Ok(vfs)
}

/// Resolve `path` against `base`, refusing anything that lands outside it.
fn confine(base: &str, path: &str) -> VfsResult<String> {
    let full = vpath::resolve(base, path);
    if full == base || !vpath::is_within(&full, base) {
        return Err(VfsError::invalid(format!("{} is outside {}", path, base)));
    }
    Ok(full)
}

impl EngineHost {
    pub fn new(typesetter: Box<dyn Typesetter>) -> VfsResult<Self> {
        Self::with_resolver(typesetter, PackageResolver::new())
    }

    pub fn with_resolver(
        typesetter: Box<dyn Typesetter>,
        resolver: PackageResolver,
    ) -> VfsResult<Self> {
        Ok(Self {
            vfs: fresh_vfs()?,
            typesetter,
            main_file: DEFAULT_MAIN_FILE.to_string(),
            resolver,
        })
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn vfs_mut(&mut self) -> &mut Vfs {
        &mut self.vfs
    }

    pub fn main_file(&self) -> &str {
        &self.main_file
    }

    /// Handle one command. Never panics on bad input; every failure becomes
    /// a failure response tagged with the command's name.
    pub fn dispatch(&mut self, command: Command) -> Response {
        let name = command.name();
        debug!(cmd = %name, "dispatch");
        let result = match command {
            Command::Compile => return self.compile(name, CompilePass::Compile),
            Command::CompileToFinalFormat => return self.compile(name, CompilePass::FinalFormat),
            Command::CompileFormatData => return self.compile(name, CompilePass::FormatData),
            Command::WriteMemoryFile { path, data } => self.write_under(WORK_DIR, &path, &data),
            Command::WriteSupportFile { path, data } => self.write_under(SUPPORT_DIR, &path, &data),
            Command::RemoveMemoryFile { path } => self.remove_memory_file(&path),
            Command::MakeDirectory { path } => confine(WORK_DIR, &path)
                .and_then(|full| self.vfs.mkdir_tree(&full, 0o777))
                .map(|_| Response::ok(name)),
            Command::FetchFile { path } => self.fetch_file(&path),
            Command::FetchCacheData => Ok(Response::ok(name).with_cache(self.resolver.cache_data())),
            Command::WriteCacheData { cache } => {
                self.resolver.replace_cache_data(cache);
                Ok(Response::ok(name))
            }
            Command::SetNetworkEndpoint { url } => {
                self.resolver.set_endpoint(url);
                Ok(Response::ok(name))
            }
            Command::SetMainFile { path } => self.set_main_file(&path),
            Command::FlushFullCache => self.flush_full_cache(),
            Command::FlushWorkingArea => self.flush_working_area(),
            Command::GracefulClose => {
                info!("engine host closing");
                Ok(Response::ok(name))
            }
        };
        result.unwrap_or_else(|e| Response::failed(name, e.to_string()))
    }

    fn compile(&mut self, name: CommandName, pass: CompilePass) -> Response {
        let stdout = self.vfs.stdout();
        let stderr = self.vfs.stderr();
        stdout.clear();
        stderr.clear();

        let mut ctx = HostContext {
            vfs: &mut self.vfs,
            main_file: &self.main_file,
            resolver: &mut self.resolver,
        };
        let mut output = self.typesetter.compile(pass, &mut ctx);

        for captured in [stdout.take(), stderr.take()] {
            if !captured.is_empty() {
                if !output.log.is_empty() && !output.log.ends_with('\n') {
                    output.log.push('\n');
                }
                output.log.push_str(&String::from_utf8_lossy(&captured));
            }
        }
        info!(cmd = %name, status = output.status, "compile finished");
        Response::compiled(name, output)
    }

    fn write_under(&mut self, base: &str, path: &str, data: &[u8]) -> VfsResult<Response> {
        let full = confine(base, path)?;
        self.vfs.mkdir_tree(vpath::dirname(&full), 0o777)?;
        self.vfs.write_file(&full, data)?;
        debug!(path = %full, bytes = data.len(), "file written");
        let name = if base == WORK_DIR {
            CommandName::WriteMemoryFile
        } else {
            CommandName::WriteSupportFile
        };
        Ok(Response::ok(name))
    }

    fn remove_memory_file(&mut self, path: &str) -> VfsResult<Response> {
        let full = confine(WORK_DIR, path)?;
        if self.vfs.lstat(&full)?.is_dir() {
            self.vfs.remove_tree(&full)?;
        } else {
            self.vfs.unlink(&full)?;
        }
        Ok(Response::ok(CommandName::RemoveMemoryFile))
    }

    /// Absolute paths may name the support area; everything else is read
    /// from the working area.
    fn fetch_file(&mut self, path: &str) -> VfsResult<Response> {
        let full = match confine(SUPPORT_DIR, path) {
            Ok(full) if path.starts_with('/') => full,
            _ => confine(WORK_DIR, path)?,
        };
        let data = self.vfs.read_file(&full)?;
        Ok(Response::ok(CommandName::FetchFile)
            .with_data(data)
            .with_path(path))
    }

    fn set_main_file(&mut self, path: &str) -> VfsResult<Response> {
        let full = confine(WORK_DIR, path)?;
        let relative = full
            .strip_prefix(WORK_DIR)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full.as_str());
        self.main_file = relative.to_string();
        debug!(main_file = %self.main_file, "main file set");
        Ok(Response::ok(CommandName::SetMainFile))
    }

    fn flush_full_cache(&mut self) -> VfsResult<Response> {
        self.vfs = fresh_vfs()?;
        self.resolver.clear();
        info!("filesystem rebuilt, lookup caches cleared");
        Ok(Response::ok(CommandName::FlushFullCache))
    }

    fn flush_working_area(&mut self) -> VfsResult<Response> {
        self.vfs.chdir("/")?;
        self.vfs.remove_tree(WORK_DIR)?;
        self.vfs.mkdir(WORK_DIR, 0o777)?;
        self.vfs.chdir(WORK_DIR)?;
        Ok(Response::ok(CommandName::FlushWorkingArea))
    }
}

/// Serve JSON-line commands from `reader` until `graceful-close` or EOF.
///
/// The load handshake is written first. Lines that do not parse get a
/// failure response and the loop continues.
pub fn serve<R: BufRead, W: Write>(host: &mut EngineHost, reader: R, mut writer: W) -> std::io::Result<()> {
    write_response(&mut writer, &Response::load())?;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (response, closing) = match decode_command(&line) {
            Ok(command) => {
                let closing = command.name() == CommandName::GracefulClose;
                (host.dispatch(command), closing)
            }
            Err(failure) => {
                debug!(error = ?failure.error, "rejected request");
                (failure, false)
            }
        };
        write_response(&mut writer, &response)?;
        if closing {
            break;
        }
    }
    Ok(())
}

fn write_response<W: Write>(writer: &mut W, response: &Response) -> std::io::Result<()> {
    let line = encode_line(response).map_err(std::io::Error::other)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}
