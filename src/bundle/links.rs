// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Creates the top-level bundle entries: the desktop-file symlink, the icon
//! symlink, and the `AppRun` entry point.

use log::{info, warn};
use std::ffi::OsStr;
use std::path::Path;

use super::{Bundle, DeployError, Result};
use crate::desktop::{DesktopFile, DESKTOP_ENTRY_SECTION};
use crate::fsutil;

impl Bundle {
    /// Link the chosen desktop file, its icon, and an `AppRun` entry point
    /// into the bundle root.
    ///
    /// # Errors
    /// Fails when the desktop file lacks the needed keys or no deployed
    /// icon/executable matches them.
    pub fn create_links_in_root(
        &mut self,
        desktop_file: &DesktopFile,
        custom_apprun: Option<&Path>,
    ) -> Result<()> {
        info!(
            "Deploying desktop file to AppDir root: {}",
            desktop_file.path().display()
        );
        fsutil::symlink_file(desktop_file.path(), &self.root, true)?;

        self.link_icon(desktop_file)?;
        self.link_apprun(desktop_file, custom_apprun)
    }

    fn link_icon(&self, desktop_file: &DesktopFile) -> Result<()> {
        let Some(icon_name) = desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Icon") else {
            return Err(DeployError::DesktopEntryMissing {
                key: "Icon",
                path: desktop_file.path().to_path_buf(),
            });
        };

        let candidates = self.deployed_icon_paths();
        let stem_match = candidates
            .iter()
            .find(|path| path.file_stem() == Some(OsStr::new(icon_name)));
        let chosen = match stem_match {
            Some(path) => path,
            None => {
                // Icon= values should not carry the file extension, but it
                // happens often enough to tolerate.
                let filename_match = candidates
                    .iter()
                    .find(|path| path.file_name() == Some(OsStr::new(icon_name)));
                match filename_match {
                    Some(path) => {
                        warn!("Icon= entry filename contains extension");
                        path
                    }
                    None => {
                        return Err(DeployError::IconNotFound {
                            name: icon_name.to_string(),
                        })
                    }
                }
            }
        };

        info!("Deploying icon to AppDir root: {}", chosen.display());
        fsutil::symlink_file(chosen, &self.root, true)?;
        Ok(())
    }

    fn link_apprun(&self, desktop_file: &DesktopFile, custom_apprun: Option<&Path>) -> Result<()> {
        let apprun = self.root.join("AppRun");

        if let Some(custom) = custom_apprun {
            info!("Deploying custom AppRun: {}", custom.display());
            fsutil::copy_file(custom, &apprun, false)?;
            fsutil::make_executable(&apprun)?;
            return Ok(());
        }

        if apprun.exists() {
            warn!("Custom AppRun detected, skipping deployment of symlink");
            return Ok(());
        }

        let Some(exec_line) = desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Exec") else {
            return Err(DeployError::DesktopEntryMissing {
                key: "Exec",
                path: desktop_file.path().to_path_buf(),
            });
        };
        // Exec carries the command line; only its first token names the binary.
        let Some(executable_name) = exec_line.split_whitespace().next() else {
            return Err(DeployError::DesktopEntryMissing {
                key: "Exec",
                path: desktop_file.path().to_path_buf(),
            });
        };

        let executables = self.deployed_executable_paths();
        let matching = executables
            .iter()
            .find(|path| path.file_name() == Some(OsStr::new(executable_name)));
        match matching {
            Some(executable) => {
                info!(
                    "Deploying AppRun symlink for executable in AppDir root: {}",
                    executable.display()
                );
                fsutil::symlink_file(executable, &apprun, true)?;
                Ok(())
            }
            None => Err(DeployError::ExecutableNotFound {
                name: executable_name.to_string(),
            }),
        }
    }
}

/// Pick the desktop file to link in the root: the first whose filename
/// starts with the app name wins, the first enumerated otherwise.
#[must_use]
pub fn select_desktop_file(
    mut deployed: Vec<DesktopFile>,
    app_name: Option<&str>,
) -> Option<DesktopFile> {
    if deployed.is_empty() {
        return None;
    }

    if let Some(app_name) = app_name.filter(|name| !name.is_empty()) {
        let matching = deployed.iter().position(|desktop_file| {
            desktop_file
                .path()
                .file_name()
                .and_then(OsStr::to_str)
                .is_some_and(|file_name| {
                    file_name.starts_with(app_name) && file_name.ends_with(".desktop")
                })
        });
        if let Some(index) = matching {
            let chosen = deployed.remove(index);
            info!(
                "Found desktop file matching app name: {}",
                chosen.path().display()
            );
            return Some(chosen);
        }
        warn!(
            "Could not find suitable desktop file for given app name {}, using first desktop file found: {}",
            app_name,
            deployed[0].path().display()
        );
    } else {
        warn!(
            "App name not specified, using first desktop file found: {}",
            deployed[0].path().display()
        );
    }

    Some(deployed.remove(0))
}
