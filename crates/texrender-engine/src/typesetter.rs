//! The typesetting seam.
//!
//! The host owns the filesystem and the package lookups; a [`Typesetter`]
//! borrows both for the length of one pass and reports a status and a log.

use std::path::Path;
use std::process::Command as ProcessCommand;

use regex::Regex;
use texrender_vfs::{path as vpath, FileType, Vfs, VfsError};
use tracing::{debug, info, warn};

use crate::protocol::CompileOutput;
use crate::resolver::{Category, PackageResolver, SUPPORT_DIR};

/// Working area: memory files, the main input, compile outputs.
pub const WORK_DIR: &str = "/work";

/// Placeholder in typesetter arguments replaced by the main file name.
pub const MAIN_PLACEHOLDER: &str = "{main}";

/// Which compile-class command is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CompilePass {
    /// Intermediate output.
    Compile,
    /// Final artifact.
    FinalFormat,
    /// Format file dump.
    FormatData,
}

/// What a typesetter may touch during a pass.
pub struct HostContext<'a> {
    pub vfs: &'a mut Vfs,
    /// Main file name, relative to [`WORK_DIR`].
    pub main_file: &'a str,
    pub resolver: &'a mut PackageResolver,
}

impl HostContext<'_> {
    /// Resolve a package or font through the host's lookups.
    pub fn resolve(&mut self, category: Category, name: &str) -> Option<String> {
        self.resolver.resolve(self.vfs, category, name)
    }

    pub fn main_path(&self) -> String {
        vpath::join(WORK_DIR, self.main_file)
    }
}

/// Typesetting logic run by an engine host.
///
/// A non-zero status is a render failure: the host reports it with the log
/// and stays usable.
pub trait Typesetter: Send {
    fn compile(&mut self, pass: CompilePass, ctx: &mut HostContext<'_>) -> CompileOutput;
}

/// Runs an external program against a materialized copy of the host VFS.
///
/// `/work` and `/tex` are written to a temporary directory, the program runs
/// in the work copy with `TEXINPUTS` pointing at the support copy, and the
/// regular files it leaves in the work copy are read back into `/work`.
#[derive(Debug, Clone)]
pub struct CommandTypesetter {
    program: String,
    args: Vec<String>,
    output_extension: String,
}

impl CommandTypesetter {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        output_extension: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            output_extension: output_extension.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn output_name(&self, pass: CompilePass, main_file: &str) -> String {
        let stem = Path::new(main_file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| main_file.to_string());
        let extension = match pass {
            CompilePass::FormatData => "fmt",
            CompilePass::Compile | CompilePass::FinalFormat => self.output_extension.as_str(),
        };
        format!("{}.{}", stem, extension)
    }

    fn run(&self, pass: CompilePass, ctx: &mut HostContext<'_>) -> std::io::Result<CompileOutput> {
        let scratch = tempfile::tempdir()?;
        let work = scratch.path().join("work");
        let support = scratch.path().join("tex");
        materialize(ctx.vfs, WORK_DIR, &work)?;
        materialize(ctx.vfs, SUPPORT_DIR, &support)?;

        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(MAIN_PLACEHOLDER, ctx.main_file))
            .collect();
        debug!(program = %self.program, ?args, %pass, "running typesetter");

        let output = match ProcessCommand::new(&self.program)
            .args(&args)
            .current_dir(&work)
            .env("TEXINPUTS", format!("{}:", support.display()))
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!(program = %self.program, error = %e, "typesetter did not start");
                return Ok(CompileOutput {
                    status: 127,
                    log: format!("failed to start {}: {}", self.program, e),
                    data: None,
                    path: None,
                });
            }
        };

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        let status = output.status.code().unwrap_or(-1);

        collect_outputs(ctx.vfs, &work)?;

        let output_name = self.output_name(pass, ctx.main_file);
        let output_path = vpath::join(WORK_DIR, &output_name);
        let data = if status == 0 && ctx.vfs.exists(&output_path) {
            ctx.vfs.read_file(&output_path).ok()
        } else {
            None
        };
        let path = data.as_ref().map(|_| output_name);
        Ok(CompileOutput {
            status,
            log,
            data,
            path,
        })
    }
}

impl Typesetter for CommandTypesetter {
    fn compile(&mut self, pass: CompilePass, ctx: &mut HostContext<'_>) -> CompileOutput {
        let main_path = ctx.main_path();
        let source = match ctx.vfs.read_file(&main_path) {
            Ok(source) => source,
            Err(e) => {
                return CompileOutput {
                    status: 1,
                    log: format!("cannot read main file {}: {}", main_path, e),
                    data: None,
                    path: None,
                };
            }
        };
        // A chained second pass gets the first pass's binary output as its
        // main file; only TeX source is scanned for packages.
        if let Ok(source) = std::str::from_utf8(&source) {
            for (category, name) in required_inputs(source) {
                if ctx.resolve(category, &name).is_none() {
                    debug!(%category, name, "input not resolved, leaving it to the typesetter");
                }
            }
        }

        match self.run(pass, ctx) {
            Ok(output) => {
                info!(program = %self.program, %pass, status = output.status, "typesetter finished");
                output
            }
            Err(e) => CompileOutput {
                status: -1,
                log: format!("typesetter workspace failed: {}", e),
                data: None,
                path: None,
            },
        }
    }
}

/// Classes and packages named by `\documentclass`, `\usepackage` and
/// `\RequirePackage`, as file names.
pub fn required_inputs(source: &str) -> Vec<(Category, String)> {
    let Ok(pattern) = Regex::new(
        r"\\(documentclass|usepackage|RequirePackage)\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}",
    ) else {
        return Vec::new();
    };
    let mut inputs = Vec::new();
    for line in source.lines() {
        let line = strip_comment(line);
        for captures in pattern.captures_iter(line) {
            let extension = if &captures[1] == "documentclass" {
                "cls"
            } else {
                "sty"
            };
            for name in captures[2].split(',') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let file = format!("{}.{}", name, extension);
                if !inputs.iter().any(|(_, existing)| existing == &file) {
                    inputs.push((Category::Texlive, file));
                }
            }
        }
    }
    inputs
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'%' && (i == 0 || bytes[i - 1] != b'\\') {
            return &line[..i];
        }
    }
    line
}

fn vfs_to_io(e: VfsError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// Copy the VFS tree at `from` into the host directory `to`.
fn materialize(vfs: &mut Vfs, from: &str, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    if !vfs.exists(from) {
        return Ok(());
    }
    let entries = vfs.readdir(from).map_err(vfs_to_io)?;
    for entry in entries {
        let source = vpath::join(from, &entry.name);
        let target = to.join(&entry.name);
        match entry.kind {
            FileType::Directory => materialize(vfs, &source, &target)?,
            FileType::File | FileType::Symlink => {
                match vfs.read_file(&source) {
                    Ok(bytes) => std::fs::write(&target, bytes)?,
                    Err(e) => debug!(path = %source, error = %e, "skipped while materializing"),
                }
            }
            FileType::CharDevice => {}
        }
    }
    Ok(())
}

/// Read regular files the program left at the top of `work` back into `/work`.
fn collect_outputs(vfs: &mut Vfs, work: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(work)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let bytes = std::fs::read(entry.path())?;
        vfs.write_file(&vpath::join(WORK_DIR, &name), &bytes)
            .map_err(vfs_to_io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_inputs() {
        let source = r"\documentclass[11pt]{article}
\usepackage{amsmath, amssymb}
\usepackage[utf8]{inputenc}
% \usepackage{ignored}
\RequirePackage{amsmath}
50\% off \usepackage{tikz}";
        let names: Vec<String> = required_inputs(source).into_iter().map(|(_, n)| n).collect();
        assert_eq!(
            names,
            ["article.cls", "amsmath.sty", "amssymb.sty", "inputenc.sty", "tikz.sty"]
        );
    }

    #[test]
    fn test_output_name() {
        let typesetter = CommandTypesetter::new("pdftex", vec![], "pdf");
        assert_eq!(typesetter.output_name(CompilePass::Compile, "main.tex"), "main.pdf");
        assert_eq!(typesetter.output_name(CompilePass::FormatData, "main.tex"), "main.fmt");
        assert_eq!(typesetter.output_name(CompilePass::FinalFormat, "doc"), "doc.pdf");
    }

    #[test]
    fn test_missing_main_file_is_render_failure() {
        let mut vfs = Vfs::new();
        vfs.mkdir(WORK_DIR, 0o777).expect("mkdir");
        let mut resolver = PackageResolver::new();
        let mut ctx = HostContext {
            vfs: &mut vfs,
            main_file: "main.tex",
            resolver: &mut resolver,
        };
        let mut typesetter = CommandTypesetter::new("true", vec![], "pdf");
        let output = typesetter.compile(CompilePass::Compile, &mut ctx);
        assert_eq!(output.status, 1);
        assert!(output.log.contains("/work/main.tex"));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_program_and_collects_output() {
        let mut vfs = Vfs::new();
        vfs.mkdir(WORK_DIR, 0o777).expect("mkdir");
        vfs.mkdir(SUPPORT_DIR, 0o777).expect("mkdir");
        vfs.write_file("/work/main.tex", b"hello").expect("write");
        let mut resolver = PackageResolver::new();
        let mut ctx = HostContext {
            vfs: &mut vfs,
            main_file: "main.tex",
            resolver: &mut resolver,
        };
        let mut typesetter = CommandTypesetter::new(
            "sh",
            vec!["-c".into(), "cp {main} main.out && echo done".into()],
            "out",
        );
        let output = typesetter.compile(CompilePass::Compile, &mut ctx);
        assert_eq!(output.status, 0, "log: {}", output.log);
        assert_eq!(output.data.as_deref(), Some(&b"hello"[..]));
        assert_eq!(output.path.as_deref(), Some("main.out"));
        assert!(output.log.contains("done"));
        assert!(vfs.exists("/work/main.out"));
    }

    #[cfg(unix)]
    #[test]
    fn test_binary_main_file_reaches_program() {
        let dvi = [0xF7, 0x02, 0x01, 0x83, 0x92, 0xC0, 0x1C];
        let mut vfs = Vfs::new();
        vfs.mkdir(WORK_DIR, 0o777).expect("mkdir");
        vfs.write_file("/work/main.dvi", &dvi).expect("write");
        let mut resolver = PackageResolver::new();
        let mut ctx = HostContext {
            vfs: &mut vfs,
            main_file: "main.dvi",
            resolver: &mut resolver,
        };
        let mut typesetter =
            CommandTypesetter::new("sh", vec!["-c".into(), "cp {main} main.svg".into()], "svg");
        let output = typesetter.compile(CompilePass::FinalFormat, &mut ctx);
        assert_eq!(output.status, 0, "log: {}", output.log);
        assert_eq!(output.data.as_deref(), Some(&dvi[..]));
        assert_eq!(output.path.as_deref(), Some("main.svg"));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_carries_log() {
        let mut vfs = Vfs::new();
        vfs.mkdir(WORK_DIR, 0o777).expect("mkdir");
        vfs.write_file("/work/main.tex", b"x").expect("write");
        let mut resolver = PackageResolver::new();
        let mut ctx = HostContext {
            vfs: &mut vfs,
            main_file: "main.tex",
            resolver: &mut resolver,
        };
        let mut typesetter = CommandTypesetter::new(
            "sh",
            vec!["-c".into(), "echo '! Emergency stop.' >&2; exit 1".into()],
            "pdf",
        );
        let output = typesetter.compile(CompilePass::Compile, &mut ctx);
        assert_eq!(output.status, 1);
        assert!(output.log.contains("Emergency stop"));
        assert!(output.data.is_none());
    }
}
