// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! The deployment engine: computes destinations and rpaths for libraries,
//! executables, icons, and desktop files, and registers the deferred work.

use log::{debug, error, info, warn};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::{Bundle, DeployError, Result};
use crate::copyright;
use crate::desktop::DesktopFile;
use crate::fsutil;

/// Square icon edge lengths accepted by the hicolor theme layout.
const VALID_ICON_SIZES: [u32; 14] = [8, 16, 20, 22, 24, 32, 48, 64, 72, 96, 128, 192, 256, 512];

impl Bundle {
    /// Deploy a shared library and, transitively, everything it links
    /// against. Excluded and already-visited libraries are skipped.
    ///
    /// # Errors
    /// Fails when a transitive dependency cannot be located.
    pub fn deploy_library(&mut self, src: &Path, destination: Option<&Path>) -> Result<()> {
        self.deploy_library_internal(src, 0, false, destination)
    }

    /// Deploy a shared library even if it was visited before or matches the
    /// exclude list. Dependencies are still deployed under the normal rules.
    ///
    /// # Errors
    /// Fails when a transitive dependency cannot be located.
    pub fn force_deploy_library(&mut self, src: &Path, destination: Option<&Path>) -> Result<()> {
        self.deploy_library_internal(src, 0, true, destination)
    }

    fn deploy_library_internal(
        &mut self,
        src: &Path,
        recursion: usize,
        force: bool,
        destination: Option<&Path>,
    ) -> Result<()> {
        let log_prefix = "  ".repeat(recursion);

        if !force && self.visited.contains(src) {
            debug!(
                "{log_prefix}File has been visited already: {}",
                src.display()
            );
            return Ok(());
        }

        if !force && self.excludes.is_excluded(&file_name_string(src)) {
            info!(
                "{log_prefix}Skipping deployment of excluded library {}",
                src.display()
            );
            self.visited.insert(src.to_path_buf());
            return Ok(());
        }

        match destination {
            Some(destination) => info!(
                "{log_prefix}Deploying shared library {} (destination: {})",
                src.display(),
                destination.display()
            ),
            None => info!("{log_prefix}Deploying shared library {}", src.display()),
        }

        let destination_path = match destination {
            Some(destination) => destination.to_path_buf(),
            None => self.root.join("usr/lib/"),
        };
        let destination_path = fsutil::resolve_cp_destination(src, &destination_path);

        self.deploy_file(src, &destination_path);
        self.deploy_copyright_files(src);

        // Without an override the library sits next to its peers in usr/lib
        // and plain $ORIGIN suffices. At an override location, the first
        // entry reaches back into the canonical lib dir and the second keeps
        // sibling resolution working.
        let rpath = match destination {
            None => "$ORIGIN".to_string(),
            Some(destination) => {
                let relative = fsutil::relative_path(
                    &self.root.join("usr/lib"),
                    &rpath_base_directory(destination),
                );
                format!("$ORIGIN/{}:$ORIGIN", relative.display())
            }
        };

        self.operations.enqueue_rpath(destination_path.clone(), rpath);
        self.operations.enqueue_strip(destination_path);

        self.deploy_elf_dependencies(src, recursion)
    }

    /// Deploy an executable to `usr/bin` (or an override location) along
    /// with its transitive library dependencies.
    ///
    /// # Errors
    /// Fails when a transitive dependency cannot be located.
    pub fn deploy_executable(&mut self, src: &Path, destination: Option<&Path>) -> Result<()> {
        if self.visited.contains(src) {
            debug!("File has been visited already: {}", src.display());
            return Ok(());
        }

        info!("Deploying executable {}", src.display());

        let destination_path = match destination {
            Some(destination) => destination.to_path_buf(),
            None => self.root.join("usr/bin/"),
        };

        self.deploy_file(src, &destination_path);
        self.deploy_copyright_files(src);

        let rpath = match destination {
            None => "$ORIGIN/../lib".to_string(),
            Some(destination) => {
                let relative = fsutil::relative_path(
                    &self.root.join("usr/lib"),
                    &rpath_base_directory(destination),
                );
                format!("$ORIGIN/{}", relative.display())
            }
        };

        let deployed = destination_path.join(src.file_name().unwrap_or_default());
        self.operations
            .mark_executable(fsutil::resolve_cp_destination(src, &destination_path));
        self.operations.enqueue_rpath(deployed.clone(), rpath);
        self.operations.enqueue_strip(deployed);

        self.deploy_elf_dependencies(src, 0)
    }

    /// Deploy an icon into the hicolor bucket matching its resolution.
    ///
    /// # Errors
    /// Fails when the image cannot be decoded or its resolution is not one
    /// of the hicolor sizes.
    pub fn deploy_icon(&mut self, src: &Path) -> Result<()> {
        if self.visited.contains(src) {
            debug!("File has been visited already: {}", src.display());
            return Ok(());
        }

        info!("Deploying icon {}", src.display());
        let bucket = icon_bucket(src)?;

        let mut file_name = file_name_string(src);
        // Rename icons like <appname>_*.png to <appname>.png so the desktop
        // file's Icon= key finds them without edits.
        if let Some(app_name) = self.app_name.as_deref().filter(|name| !name.is_empty()) {
            if file_name.starts_with(app_name) {
                let extension = src
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
                    .unwrap_or_default();
                let new_file_name = format!("{app_name}{extension}");
                if new_file_name != file_name {
                    warn!("Renaming icon {} to {}", src.display(), new_file_name);
                    file_name = new_file_name;
                }
            }
        }

        let destination = self
            .root
            .join("usr/share/icons/hicolor")
            .join(bucket)
            .join("apps")
            .join(file_name);
        self.deploy_file(src, &destination);
        self.deploy_copyright_files(src);
        Ok(())
    }

    /// Deploy a desktop file to `usr/share/applications`.
    ///
    /// A file that fails validation is still deployed; the broken entry is
    /// reported and left for the caller to fix.
    pub fn deploy_desktop_file(&mut self, desktop_file: &DesktopFile) -> Result<()> {
        let src = desktop_file.path().to_path_buf();
        if self.visited.contains(&src) {
            debug!("File has been visited already: {}", src.display());
            return Ok(());
        }

        if !desktop_file.validate() {
            error!("Failed to validate desktop file: {}", src.display());
        }

        info!("Deploying desktop file {}", src.display());
        let destination = self.root.join("usr/share/applications/");
        self.deploy_file(&src, &destination);
        Ok(())
    }

    /// Complete the dependencies of everything already present in the
    /// bundle: `usr/bin` (flat) and `usr/lib` (recursive), non-ELF files
    /// silently ignored. All existing files get their canonical rpath
    /// planned unconditionally.
    ///
    /// # Errors
    /// Fails when a dependency of an existing file cannot be located.
    pub fn deploy_dependencies_for_existing_files(&mut self) -> Result<()> {
        for executable in self.list_executables() {
            self.deploy_elf_dependencies(&executable, 0)?;
            self.operations
                .enqueue_rpath(executable, "$ORIGIN/../lib".to_string());
        }

        for library in self.list_shared_libraries() {
            self.deploy_elf_dependencies(&library, 0)?;
            self.operations.enqueue_rpath(library, "$ORIGIN".to_string());
        }

        Ok(())
    }

    /// Register a copy into the plan and mark the source as visited.
    ///
    /// Compiling the list of files to copy instead of copying eagerly
    /// guarantees each source is touched once only.
    pub fn deploy_file(&mut self, from: &Path, to: &Path) {
        debug!("Deploying file {} to {}", from.display(), to.display());
        let to = fsutil::resolve_cp_destination(from, to);
        self.operations.enqueue_copy(from.to_path_buf(), to);
        self.visited.insert(from.to_path_buf());
    }

    fn deploy_copyright_files(&mut self, src: &Path) {
        debug!("Deploying copyright files for file {}", src.display());
        let copyright_files =
            copyright::find_copyright_files(self.runner.as_ref(), src, &self.root);
        if copyright_files.is_empty() {
            return;
        }
        for file in copyright_files {
            // Mirror the host location under the bundle root so license
            // aggregation tools find the files where they expect them.
            let Ok(stripped) = file.strip_prefix("/") else {
                continue;
            };
            let destination = self.root.join(stripped);
            self.deploy_file(&file, &destination);
        }
    }

    fn deploy_elf_dependencies(&mut self, path: &Path, recursion: usize) -> Result<()> {
        let log_prefix = "  ".repeat(recursion);
        info!(
            "{log_prefix}Deploying dependencies for ELF file {}",
            path.display()
        );
        for dependency in self.oracle.trace_dynamic_dependencies(path)? {
            self.deploy_library_internal(&dependency, recursion + 1, false, None)?;
        }
        Ok(())
    }
}

/// The directory an rpath override is computed against: the override itself
/// when it denotes a directory (trailing slash), its parent otherwise.
fn rpath_base_directory(destination: &Path) -> PathBuf {
    let text = destination.to_string_lossy();
    if text.ends_with('/') {
        PathBuf::from(text.trim_end_matches('/'))
    } else {
        destination
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .to_path_buf()
    }
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Pick the hicolor directory for an icon: `scalable` for vector images,
/// `<W>x<H>` for raster images with an accepted resolution.
fn icon_bucket(path: &Path) -> Result<String> {
    if path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"))
    {
        return Ok("scalable".to_string());
    }

    let (width, height) =
        image::image_dimensions(path).map_err(|e| DeployError::ImageDecode {
            path: path.to_path_buf(),
            source: e,
        })?;

    if width != height {
        warn!(
            "x and y resolution of icon are not equal: {}",
            path.display()
        );
    }
    if !VALID_ICON_SIZES.contains(&width) {
        return Err(DeployError::InvalidIconResolution {
            path: path.to_path_buf(),
            axis: 'x',
            value: width,
        });
    }
    if !VALID_ICON_SIZES.contains(&height) {
        return Err(DeployError::InvalidIconResolution {
            path: path.to_path_buf(),
            axis: 'y',
            value: height,
        });
    }

    Ok(format!("{width}x{height}"))
}
