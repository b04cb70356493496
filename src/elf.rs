// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! The ELF oracle: dependency tracing via the host linker, rpath reads via
//! `goblin`, and rpath writes via `patchelf`.

use goblin::elf::Elf as GoblinElf;
use log::debug;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::runner::{resolve_tool, CommandRunner, ProcessRunner, RunnerError};

type Result<T> = std::result::Result<T, ElfError>;

/// Errors that can occur when inspecting or rewriting ELF files.
#[derive(Debug, Error)]
pub enum ElfError {
    #[error("File is too small to be an ELF file: {path:?}")]
    FileTooSmall { path: PathBuf },
    #[error("File is not an ELF file: {path:?}")]
    NotElfFile { path: PathBuf },
    #[error("Failed to open file: {path:?}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read file: {path:?}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse ELF file: {path:?}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: goblin::error::Error,
    },
    #[error("Could not locate dependency {name} of {path:?}")]
    DependencyNotFound { name: String, path: PathBuf },
    #[error("Failed to trace dependencies of {path:?}")]
    TraceFailed {
        path: PathBuf,
        #[source]
        source: RunnerError,
    },
    #[error("Failed to set rpath in ELF file {path:?}: {reason}")]
    RpathWriteFailed { path: PathBuf, reason: String },
}

/// Capability for inspecting and rewriting ELF binaries.
///
/// The deployment engine depends only on this contract; the host
/// implementation below wraps the system linker tools.
pub trait ElfOracle {
    /// List the transitive dynamic dependencies of an ELF file, resolved the
    /// way the host's dynamic linker would resolve them.
    ///
    /// # Errors
    /// Returns [`ElfError::DependencyNotFound`] when a needed library cannot
    /// be located; this is fatal for the enclosing deployment request.
    fn trace_dynamic_dependencies(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Read the current rpath. `DT_RUNPATH` is preferred over `DT_RPATH`;
    /// entries are joined with `:`. An ELF without either yields an empty
    /// string.
    fn read_rpath(&self, path: &Path) -> Result<String>;

    /// Rewrite the rpath of an ELF file in place.
    fn set_rpath(&self, path: &Path, rpath: &str) -> Result<()>;

    /// Whether the file parses as ELF. Used to silently filter directory
    /// listings, so this never errors.
    fn is_elf(&self, path: &Path) -> bool;
}

impl<T: ElfOracle + ?Sized> ElfOracle for std::sync::Arc<T> {
    fn trace_dynamic_dependencies(&self, path: &Path) -> Result<Vec<PathBuf>> {
        (**self).trace_dynamic_dependencies(path)
    }

    fn read_rpath(&self, path: &Path) -> Result<String> {
        (**self).read_rpath(path)
    }

    fn set_rpath(&self, path: &Path, rpath: &str) -> Result<()> {
        (**self).set_rpath(path, rpath)
    }

    fn is_elf(&self, path: &Path) -> bool {
        (**self).is_elf(path)
    }
}

/// [`ElfOracle`] backed by `goblin`, `ldd`, and `patchelf` on the host.
pub struct HostElfOracle {
    runner: Box<dyn CommandRunner>,
}

impl HostElfOracle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runner: Box::new(ProcessRunner::new()),
        }
    }

    #[must_use]
    pub fn with_runner(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Default for HostElfOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfOracle for HostElfOracle {
    fn trace_dynamic_dependencies(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let output = self
            .runner
            .run(&[OsStr::new("ldd"), path.as_os_str()], &[])
            .map_err(|e| ElfError::TraceFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        if !output.success() {
            // ldd exits non-zero for static binaries and other non-dynamic
            // inputs; those simply have no dependencies to deploy.
            debug!("ldd reported no dynamic section for {}", path.display());
            return Ok(Vec::new());
        }
        parse_ldd_output(&output.stdout_text(), path)
    }

    fn read_rpath(&self, path: &Path) -> Result<String> {
        let bytes = read_elf_bytes(path)?;
        let elf = GoblinElf::parse(&bytes).map_err(|e| ElfError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut rpath = Vec::new();
        let mut runpath = Vec::new();
        if let Some(dynamic) = &elf.dynamic {
            for dyn_entry in &dynamic.dyns {
                let entries = match dyn_entry.d_tag {
                    goblin::elf::dynamic::DT_RPATH => &mut rpath,
                    goblin::elf::dynamic::DT_RUNPATH => &mut runpath,
                    _ => continue,
                };
                if let Ok(strtab_idx) = usize::try_from(dyn_entry.d_val) {
                    if let Some(text) = elf.dynstrtab.get_at(strtab_idx) {
                        entries.extend(
                            text.split(':')
                                .filter(|entry| !entry.is_empty())
                                .map(str::to_string),
                        );
                    }
                }
            }
        }

        // The dynamic linker ignores DT_RPATH when DT_RUNPATH is present.
        let entries = if runpath.is_empty() { rpath } else { runpath };
        Ok(entries.join(":"))
    }

    fn set_rpath(&self, path: &Path, rpath: &str) -> Result<()> {
        let patchelf = resolve_tool("patchelf");
        let output = self
            .runner
            .run(
                &[
                    patchelf.as_os_str(),
                    OsStr::new("--set-rpath"),
                    OsStr::new(rpath),
                    path.as_os_str(),
                ],
                &[],
            )
            .map_err(|e| ElfError::RpathWriteFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !output.success() {
            return Err(ElfError::RpathWriteFailed {
                path: path.to_path_buf(),
                reason: output.stderr_text().trim().to_string(),
            });
        }
        Ok(())
    }

    fn is_elf(&self, path: &Path) -> bool {
        read_elf_bytes(path).is_ok_and(|bytes| GoblinElf::parse(&bytes).is_ok())
    }
}

/// Reads the entire file at `path` into bytes if the file is an ELF file.
///
/// # Errors
/// Returns an error if the file is not an ELF file or cannot be read.
fn read_elf_bytes(path: &Path) -> Result<Vec<u8>> {
    // ELF magic bytes: 0x7f followed by ASCII "ELF", per e_ident[EI_MAG0..EI_MAG3].
    const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

    let metadata = fs::metadata(path).map_err(|e| ElfError::OpenFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    // Anything smaller than the ELF header cannot be an ELF file.
    if metadata.len() < 64 {
        return Err(ElfError::FileTooSmall {
            path: path.to_path_buf(),
        });
    }

    let mut file = fs::File::open(path).map_err(|e| ElfError::OpenFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|e| ElfError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    if magic != ELF_MAGIC {
        return Err(ElfError::NotElfFile {
            path: path.to_path_buf(),
        });
    }

    file.seek(SeekFrom::Start(0)).map_err(|e| ElfError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| ElfError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(bytes)
}

/// Parse `ldd` output into resolved dependency paths.
///
/// Lines of the form `name => /path (0xaddr)` contribute a dependency;
/// `name => not found` is fatal; lines without `=>` (the vDSO and the
/// interpreter) carry nothing deployable and are skipped.
fn parse_ldd_output(text: &str, path: &Path) -> Result<Vec<PathBuf>> {
    let mut dependencies = Vec::new();
    for line in text.lines() {
        let Some((name, resolved)) = line.split_once("=>") else {
            continue;
        };
        let name = name.trim();
        let resolved = resolved.trim();
        if resolved.starts_with("not found") {
            return Err(ElfError::DependencyNotFound {
                name: name.to_string(),
                path: path.to_path_buf(),
            });
        }
        // Drop the trailing load address, e.g. "(0x00007f...)".
        let resolved = resolved.split_whitespace().next().unwrap_or("");
        if resolved.starts_with('/') {
            dependencies.push(PathBuf::from(resolved));
        }
    }
    Ok(dependencies)
}
