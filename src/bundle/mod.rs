// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! The bundle: an AppDir tree under construction plus its deferred work.

mod deploy;
mod links;
mod planner;

pub use links::select_desktop_file;
pub use planner::ExecuteError;

use log::{info, warn};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::desktop::DesktopFile;
use crate::elf::{ElfError, ElfOracle, HostElfOracle};
use crate::excludelist::{ExcludeError, ExcludeList};
use crate::fsutil::{self, FsError};
use crate::runner::{CommandRunner, ProcessRunner};
use planner::DeferredOperations;

type Result<T> = std::result::Result<T, DeployError>;

/// Errors from planning or finalizing a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Elf(#[from] ElfError),
    #[error(transparent)]
    FileSystem(#[from] FsError),
    #[error(transparent)]
    Exclude(#[from] ExcludeError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error("Failed to decode image {path:?}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Icon {path:?} has invalid {axis} resolution: {value}")]
    InvalidIconResolution {
        path: PathBuf,
        axis: char,
        value: u32,
    },
    #[error("{key} entry missing in desktop file: {path:?}")]
    DesktopEntryMissing { key: &'static str, path: PathBuf },
    #[error("Could not find suitable icon for Icon entry: {name}")]
    IconNotFound { name: String },
    #[error("Could not find suitable executable for Exec entry: {name}")]
    ExecutableNotFound { name: String },
}

/// Resolutions that get a directory under `usr/share/icons/hicolor`.
const ICON_DIRECTORIES: [&str; 6] = ["16x16", "32x32", "64x64", "128x128", "256x256", "scalable"];

/// An AppDir under construction.
///
/// Deployment requests accumulate deferred copy, strip, and rpath work;
/// [`Bundle::execute_deferred`] performs the filesystem mutations in one
/// pass. The visited set spans the bundle's whole lifetime, so repeating a
/// request for the same source is a no-op. Not meant to be shared across
/// threads.
pub struct Bundle {
    root: PathBuf,
    app_name: Option<String>,
    operations: DeferredOperations,
    visited: HashSet<PathBuf>,
    oracle: Box<dyn ElfOracle>,
    runner: Box<dyn CommandRunner>,
    excludes: ExcludeList,
}

impl Bundle {
    /// Create a bundle rooted at `root`, using the host ELF tools.
    ///
    /// # Errors
    /// Returns an error if the embedded exclude list fails to compile.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_collaborators(
            root,
            Box::new(HostElfOracle::new()),
            Box::new(ProcessRunner::new()),
        )
    }

    /// Create a bundle with explicit capability implementations.
    ///
    /// # Errors
    /// Returns an error if the embedded exclude list fails to compile.
    pub fn with_collaborators(
        root: impl Into<PathBuf>,
        oracle: Box<dyn ElfOracle>,
        runner: Box<dyn CommandRunner>,
    ) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            app_name: None,
            operations: DeferredOperations::default(),
            visited: HashSet::new(),
            oracle,
            runner,
            excludes: ExcludeList::new()?,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Set the application name used to rename icons and to pick between
    /// multiple deployed desktop files.
    pub fn set_app_name(&mut self, app_name: impl Into<String>) {
        self.app_name = Some(app_name.into());
    }

    #[must_use]
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// Create the conventional AppDir directory skeleton.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created.
    pub fn create_basic_structure(&self) -> Result<()> {
        let mut directories = vec![
            PathBuf::from("usr/bin"),
            PathBuf::from("usr/lib"),
            PathBuf::from("usr/share/applications"),
            PathBuf::from("usr/share/icons/hicolor"),
        ];
        for resolution in ICON_DIRECTORIES {
            directories.push(
                Path::new("usr/share/icons/hicolor")
                    .join(resolution)
                    .join("apps"),
            );
        }

        for directory in directories {
            let full_path = self.root.join(directory);
            if full_path.is_dir() {
                continue;
            }
            info!("Creating directory {}", full_path.display());
            fs::create_dir_all(&full_path).map_err(|e| FsError::CreateDirFailed {
                path: full_path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// All deployed icon files: the hicolor tree plus legacy pixmaps.
    #[must_use]
    pub fn deployed_icon_paths(&self) -> Vec<PathBuf> {
        let mut icons = fsutil::list_files(&self.root.join("usr/share/icons"), true);
        icons.extend(fsutil::list_files(
            &self.root.join("usr/share/pixmaps"),
            false,
        ));
        icons
    }

    /// All deployed executables (top level of `usr/bin`).
    #[must_use]
    pub fn deployed_executable_paths(&self) -> Vec<PathBuf> {
        fsutil::list_files(&self.root.join("usr/bin"), false)
    }

    /// All parseable desktop files deployed to `usr/share/applications`.
    #[must_use]
    pub fn deployed_desktop_files(&self) -> Vec<DesktopFile> {
        fsutil::list_files(&self.root.join("usr/share/applications"), false)
            .into_iter()
            .filter(|path| path.extension() == Some(OsStr::new("desktop")))
            .filter_map(|path| match DesktopFile::load(&path) {
                Ok(desktop_file) => Some(desktop_file),
                Err(e) => {
                    warn!("Skipping unreadable desktop file {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    /// ELF executables already present in `usr/bin`. Non-ELF files (scripts,
    /// wrappers) are filtered out silently.
    pub(crate) fn list_executables(&self) -> Vec<PathBuf> {
        fsutil::list_files(&self.root.join("usr/bin"), false)
            .into_iter()
            .filter(|path| self.oracle.is_elf(path))
            .collect()
    }

    /// ELF shared libraries already present anywhere under `usr/lib`.
    pub(crate) fn list_shared_libraries(&self) -> Vec<PathBuf> {
        fsutil::list_files(&self.root.join("usr/lib"), true)
            .into_iter()
            .filter(|path| self.oracle.is_elf(path))
            .collect()
    }

    /// Perform all deferred copy, strip, and rpath operations.
    ///
    /// # Errors
    /// Fails with the sticky-within-phase, stop-between-phases semantics of
    /// the planner; partial on-disk state is left for diagnosis.
    pub fn execute_deferred(&mut self) -> Result<()> {
        self.operations
            .execute(self.oracle.as_ref(), self.runner.as_ref())
            .map_err(Into::into)
    }

    #[cfg(test)]
    pub(crate) fn operations(&self) -> &DeferredOperations {
        &self.operations
    }

    #[cfg(test)]
    pub(crate) fn visited(&self) -> &HashSet<PathBuf> {
        &self.visited
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::elf::ElfError;
    use crate::runner::{CommandOutput, RunnerError};
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::sync::{Mutex, PoisonError};

    /// Serializes tests that read or write process-wide environment state
    /// (`NO_STRIP`), including indirectly via the planner's strip phase.
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// In-memory oracle with scripted dependencies and rpaths.
    #[derive(Default)]
    pub(crate) struct FakeOracle {
        pub dependencies: HashMap<PathBuf, Vec<PathBuf>>,
        pub missing: HashMap<PathBuf, String>,
        pub rpaths: Mutex<HashMap<PathBuf, String>>,
        pub set_rpath_calls: Mutex<Vec<(PathBuf, String)>>,
        pub elf_files: Mutex<HashSet<PathBuf>>,
    }

    impl FakeOracle {
        pub(crate) fn with_dependencies(
            dependencies: impl IntoIterator<Item = (PathBuf, Vec<PathBuf>)>,
        ) -> Self {
            Self {
                dependencies: dependencies.into_iter().collect(),
                ..Self::default()
            }
        }

        pub(crate) fn set_current_rpath(&self, path: impl Into<PathBuf>, rpath: &str) {
            self.rpaths
                .lock()
                .unwrap()
                .insert(path.into(), rpath.to_string());
        }

        pub(crate) fn mark_elf(&self, path: impl Into<PathBuf>) {
            self.elf_files.lock().unwrap().insert(path.into());
        }

        pub(crate) fn recorded_rpaths(&self) -> Vec<(PathBuf, String)> {
            self.set_rpath_calls.lock().unwrap().clone()
        }
    }

    impl ElfOracle for FakeOracle {
        fn trace_dynamic_dependencies(
            &self,
            path: &Path,
        ) -> std::result::Result<Vec<PathBuf>, ElfError> {
            if let Some(name) = self.missing.get(path) {
                return Err(ElfError::DependencyNotFound {
                    name: name.clone(),
                    path: path.to_path_buf(),
                });
            }
            Ok(self.dependencies.get(path).cloned().unwrap_or_default())
        }

        fn read_rpath(&self, path: &Path) -> std::result::Result<String, ElfError> {
            Ok(self
                .rpaths
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .unwrap_or_default())
        }

        fn set_rpath(&self, path: &Path, rpath: &str) -> std::result::Result<(), ElfError> {
            self.set_rpath_calls
                .lock()
                .unwrap()
                .push((path.to_path_buf(), rpath.to_string()));
            Ok(())
        }

        fn is_elf(&self, path: &Path) -> bool {
            self.elf_files.lock().unwrap().contains(path)
        }
    }

    /// Runner that records every invocation and replies from a script.
    #[derive(Default)]
    pub(crate) struct RecordingRunner {
        pub calls: Mutex<Vec<Vec<String>>>,
        /// Scripted replies keyed by tool basename: (status, stdout, stderr).
        pub replies: HashMap<String, (i32, String, String)>,
    }

    impl RecordingRunner {
        pub(crate) fn reply(mut self, tool: &str, status: i32, stdout: &str, stderr: &str) -> Self {
            self.replies
                .insert(tool.to_string(), (status, stdout.to_string(), stderr.to_string()));
            self
        }

        pub(crate) fn recorded_calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn calls_to(&self, tool: &str) -> Vec<Vec<String>> {
            self.recorded_calls()
                .into_iter()
                .filter(|argv| {
                    argv.first().is_some_and(|program| {
                        Path::new(program)
                            .file_name()
                            .is_some_and(|name| name.to_string_lossy() == tool)
                    })
                })
                .collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(
            &self,
            argv: &[&OsStr],
            _env: &[(&str, &str)],
        ) -> std::result::Result<CommandOutput, RunnerError> {
            let call: Vec<String> = argv
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();
            let tool = call
                .first()
                .map(|program| {
                    Path::new(program)
                        .file_name()
                        .map_or_else(|| program.clone(), |name| name.to_string_lossy().into_owned())
                })
                .unwrap_or_default();
            self.calls.lock().unwrap().push(call);

            let (status, stdout, stderr) = self
                .replies
                .get(&tool)
                .cloned()
                .unwrap_or((0, String::new(), String::new()));
            Ok(CommandOutput {
                status,
                stdout: stdout.into_bytes(),
                stderr: stderr.into_bytes(),
            })
        }
    }
}
