// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.
mod args;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use std::path::Path;

use appdir_builder::bundle::{select_desktop_file, Bundle};
use appdir_builder::desktop::DesktopFile;
use appdir_builder::plugin;
use args::Args;

fn main() {
    if let Err(e) = run() {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbosity);
    info!("appdir_builder version {}", env!("CARGO_PKG_VERSION"));

    if args.list_plugins {
        list_plugins();
        return Ok(());
    }

    let appdir = args
        .appdir
        .as_deref()
        .context("--appdir parameter required")?;

    let mut bundle = Bundle::new(appdir)?;

    if let Some(app_name) = &args.app_name {
        info!("-- Deploying application \"{app_name}\" --");
        bundle.set_app_name(app_name.clone());
    }

    if args.init_appdir {
        info!("-- Creating basic AppDir structure --");
        bundle.create_basic_structure()?;
    }

    info!("-- Deploying dependencies for existing files in AppDir --");
    bundle
        .deploy_dependencies_for_existing_files()
        .context("Failed to deploy dependencies for existing files")?;

    if !args.libraries.is_empty() {
        info!("-- Deploying shared libraries --");
        for library in &args.libraries {
            require_input(library)?;
            bundle
                .force_deploy_library(library, None)
                .with_context(|| format!("Failed to deploy library: {}", library.display()))?;
        }
    }

    if !args.executables.is_empty() {
        info!("-- Deploying executables --");
        for executable in &args.executables {
            require_input(executable)?;
            bundle
                .deploy_executable(executable, None)
                .with_context(|| {
                    format!("Failed to deploy executable: {}", executable.display())
                })?;
        }
    }

    if !args.icon_files.is_empty() {
        info!("-- Deploying icons --");
        for icon in &args.icon_files {
            require_input(icon)?;
            bundle
                .deploy_icon(icon)
                .with_context(|| format!("Failed to deploy icon: {}", icon.display()))?;
        }
    }

    if !args.desktop_files.is_empty() {
        info!("-- Deploying desktop files --");
        for path in &args.desktop_files {
            require_input(path)?;
            let desktop_file = DesktopFile::load(path)
                .with_context(|| format!("Failed to read desktop file: {}", path.display()))?;
            bundle
                .deploy_desktop_file(&desktop_file)
                .with_context(|| format!("Failed to deploy desktop file: {}", path.display()))?;
        }
    }

    // Drain the plan before anything below inspects the deployed contents.
    info!("-- Copying files into AppDir --");
    bundle.execute_deferred()?;

    if args.create_desktop_file {
        info!("-- Creating desktop file --");
        create_desktop_file(&bundle, &args)?;
    }

    info!("-- Deploying files into AppDir root directory --");
    let deployed_desktop_files = bundle.deployed_desktop_files();
    if deployed_desktop_files.is_empty() {
        warn!(
            "Could not find desktop file in AppDir, cannot create links for AppRun, \
             desktop file and icon in AppDir root"
        );
    } else if let Some(desktop_file) =
        select_desktop_file(deployed_desktop_files, args.app_name.as_deref())
    {
        info!("Deploying desktop file: {}", desktop_file.path().display());
        bundle.create_links_in_root(&desktop_file, args.custom_apprun.as_deref())?;
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Debug,
        1 => LevelFilter::Info,
        2 => LevelFilter::Warn,
        _ => LevelFilter::Error,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn list_plugins() {
    let plugins = plugin::find_plugins();
    println!("Available plugins:");
    for (name, path) in plugins {
        println!("{}: {}", name, path.display());
    }
}

fn require_input(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("No such file or directory: {}", path.display());
    }
    Ok(())
}

/// Create (or complete) a desktop file for the first deployed executable.
///
/// # Errors
/// Returns an error if no executable was passed or the file cannot be saved.
fn create_desktop_file(bundle: &Bundle, args: &Args) -> Result<()> {
    let Some(first_executable) = args.executables.first() else {
        bail!("--create-desktop-file requires at least one executable to be passed");
    };
    warn!(
        "Please beware the created desktop file is of low quality and should be edited \
         or replaced before using it for production releases!"
    );

    let executable_name = first_executable
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| {
            format!(
                "Cannot derive desktop file name from: {}",
                first_executable.display()
            )
        })?;

    let desktop_file_path = bundle
        .root()
        .join("usr/share/applications")
        .join(format!("{executable_name}.desktop"));

    let mut desktop_file = if desktop_file_path.exists() {
        warn!(
            "Working on existing desktop file: {}",
            desktop_file_path.display()
        );
        DesktopFile::load(&desktop_file_path)?
    } else {
        info!(
            "Creating new desktop file: {}",
            desktop_file_path.display()
        );
        DesktopFile::new(&desktop_file_path)
    };

    if !desktop_file.add_default_keys(&executable_name) {
        warn!(
            "Tried to overwrite existing entries in desktop file: {}",
            desktop_file_path.display()
        );
    }

    desktop_file.save().with_context(|| {
        format!(
            "Failed to save desktop file: {}",
            desktop_file_path.display()
        )
    })?;
    Ok(())
}
