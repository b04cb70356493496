// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Deferred copy, strip, and rpath operations.
//!
//! Deployment requests only register work here; [`DeferredOperations::execute`]
//! performs it in one pass. Collecting the plan first guarantees every source
//! file is touched at most once, no matter how often the dependency walk
//! revisits it.

use log::{error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::elf::ElfOracle;
use crate::fsutil;
use crate::runner::{resolve_tool, CommandRunner};

type Result<T> = std::result::Result<T, ExecuteError>;

/// strip cannot grow the program header table of some pre-linked binaries;
/// this exact diagnostic marks the case that is safe to ignore.
const STRIP_KNOWN_LIMITATION: &str = "Not enough room for program headers";

/// Errors from executing the deferred plan. Failures within a phase are
/// sticky (the phase drains completely), but a failed phase stops the
/// phases after it.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("{failures} of {total} copy operations failed")]
    CopyPhaseFailed { failures: usize, total: usize },
    #[error("{failures} of {total} strip operations failed")]
    StripPhaseFailed { failures: usize, total: usize },
    #[error("{failures} of {total} rpath operations failed")]
    RpathPhaseFailed { failures: usize, total: usize },
}

/// Pending filesystem and ELF mutations, keyed for uniqueness.
#[derive(Default)]
pub(crate) struct DeferredOperations {
    /// Source → destination. Registering a source twice keeps the latest
    /// destination; the engine's visited set prevents that from happening
    /// for anything but forced re-deployments.
    copy_plan: BTreeMap<PathBuf, PathBuf>,
    strip_plan: BTreeSet<PathBuf>,
    rpath_plan: BTreeMap<PathBuf, String>,
    /// Destinations that get their executable bits set after copying.
    exec_plan: BTreeSet<PathBuf>,
}

impl DeferredOperations {
    pub(crate) fn enqueue_copy(&mut self, from: PathBuf, to: PathBuf) {
        self.copy_plan.insert(from, to);
    }

    pub(crate) fn enqueue_strip(&mut self, destination: PathBuf) {
        self.strip_plan.insert(destination);
    }

    pub(crate) fn enqueue_rpath(&mut self, destination: PathBuf, rpath: String) {
        self.rpath_plan.insert(destination, rpath);
    }

    pub(crate) fn mark_executable(&mut self, destination: PathBuf) {
        self.exec_plan.insert(destination);
    }

    /// Execute all pending operations: copies, then strips, then rpath
    /// rewrites. All plans are empty afterwards, whatever the outcome.
    pub(crate) fn execute(
        &mut self,
        oracle: &dyn ElfOracle,
        runner: &dyn CommandRunner,
    ) -> Result<()> {
        self.drain_copies()?;
        self.drain_strips(oracle, runner)?;
        self.drain_rpaths(oracle)
    }

    fn drain_copies(&mut self) -> Result<()> {
        let copy_plan = std::mem::take(&mut self.copy_plan);
        let exec_plan = std::mem::take(&mut self.exec_plan);
        let total = copy_plan.len();
        let mut failures = 0;

        for (from, to) in copy_plan {
            if let Err(e) = fsutil::copy_file(&from, &to, false) {
                error!("{e}");
                failures += 1;
                continue;
            }
            if exec_plan.contains(&to) {
                if let Err(e) = fsutil::make_executable(&to) {
                    error!("{e}");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            return Err(ExecuteError::CopyPhaseFailed { failures, total });
        }
        Ok(())
    }

    fn drain_strips(&mut self, oracle: &dyn ElfOracle, runner: &dyn CommandRunner) -> Result<()> {
        let strip_plan = std::mem::take(&mut self.strip_plan);

        if env::var_os("NO_STRIP").is_some() {
            warn!("$NO_STRIP environment variable detected, not stripping binaries");
            return Ok(());
        }

        let strip_tool = resolve_tool("strip");
        let total = strip_plan.len();
        let mut failures = 0;

        for path in strip_plan {
            // Stripping a binary whose rpath was already rewritten to an
            // $ORIGIN form can corrupt PT_INTERP/PT_DYNAMIC.
            let rpath = oracle.read_rpath(&path).unwrap_or_default();
            if rpath.starts_with('$') {
                warn!(
                    "Not calling strip on binary {}: rpath starts with $",
                    path.display()
                );
                continue;
            }

            info!("Calling strip on library {}", path.display());
            let output = match runner.run(
                &[strip_tool.as_os_str(), path.as_os_str()],
                &[("LC_ALL", "C")],
            ) {
                Ok(output) => output,
                Err(e) => {
                    error!("Strip call failed: {e}");
                    failures += 1;
                    continue;
                }
            };

            if !output.success() {
                let stderr = output.stderr_text();
                if stderr.contains(STRIP_KNOWN_LIMITATION) {
                    warn!(
                        "Strip reported a known limitation for {}: {}",
                        path.display(),
                        stderr.trim()
                    );
                } else {
                    error!("Strip call failed: {}", stderr.trim());
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            return Err(ExecuteError::StripPhaseFailed { failures, total });
        }
        Ok(())
    }

    fn drain_rpaths(&mut self, oracle: &dyn ElfOracle) -> Result<()> {
        let rpath_plan = std::mem::take(&mut self.rpath_plan);
        let total = rpath_plan.len();
        let mut failures = 0;

        for (path, rpath) in rpath_plan {
            info!("Setting rpath in ELF file {} to {}", path.display(), rpath);
            if let Err(e) = oracle.set_rpath(&path, &rpath) {
                error!("Failed to set rpath in ELF file {}: {}", path.display(), e);
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(ExecuteError::RpathPhaseFailed { failures, total });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn copy_plan(&self) -> &BTreeMap<PathBuf, PathBuf> {
        &self.copy_plan
    }

    #[cfg(test)]
    pub(crate) fn strip_plan(&self) -> &BTreeSet<PathBuf> {
        &self.strip_plan
    }

    #[cfg(test)]
    pub(crate) fn rpath_plan(&self) -> &BTreeMap<PathBuf, String> {
        &self.rpath_plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::test_support::{lock_env, FakeOracle, RecordingRunner};
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_execute_performs_copies_and_empties_plans() {
        let _guard = lock_env();
        std::env::remove_var("NO_STRIP");
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "libx.so", "bytes");
        let dest = dir.path().join("out/libx.so");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.enqueue_rpath(dest.clone(), "$ORIGIN".to_string());
        operations.enqueue_strip(dest.clone());

        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default();
        operations.execute(&oracle, &runner).unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "bytes");
        assert_eq!(oracle.recorded_rpaths(), vec![(dest, "$ORIGIN".to_string())]);
        assert!(operations.copy_plan().is_empty());
        assert!(operations.strip_plan().is_empty());
        assert!(operations.rpath_plan().is_empty());
    }

    #[test]
    fn test_copy_failure_is_sticky_and_stops_before_strip() {
        let _guard = lock_env();
        let dir = TempDir::new().unwrap();
        let good_src = write_file(&dir, "good.so", "ok");
        let good_dest = dir.path().join("out/good.so");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(dir.path().join("missing.so"), dir.path().join("out/missing.so"));
        operations.enqueue_copy(good_src, good_dest.clone());
        operations.enqueue_strip(good_dest.clone());

        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default();
        let result = operations.execute(&oracle, &runner);

        assert!(matches!(
            result,
            Err(ExecuteError::CopyPhaseFailed {
                failures: 1,
                total: 2
            })
        ));
        // The good copy still went through before the phase reported failure.
        assert!(good_dest.is_file());
        // The strip phase never ran.
        assert!(runner.recorded_calls().is_empty());
    }

    #[test]
    fn test_strip_skipped_when_rpath_starts_with_dollar() {
        let _guard = lock_env();
        std::env::remove_var("NO_STRIP");
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "liby.so", "bytes");
        let dest = dir.path().join("out/liby.so");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.enqueue_strip(dest.clone());

        let oracle = FakeOracle::default();
        oracle.set_current_rpath(&dest, "$ORIGIN/../lib");
        let runner = RecordingRunner::default();
        operations.execute(&oracle, &runner).unwrap();

        assert!(runner.calls_to("strip").is_empty());
    }

    #[test]
    fn test_strip_invoked_for_plain_rpath() {
        let _guard = lock_env();
        std::env::remove_var("NO_STRIP");
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "libz.so", "bytes");
        let dest = dir.path().join("out/libz.so");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.enqueue_strip(dest.clone());

        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default();
        operations.execute(&oracle, &runner).unwrap();

        let strip_calls = runner.calls_to("strip");
        assert_eq!(strip_calls.len(), 1);
        assert_eq!(strip_calls[0][1], dest.to_string_lossy());
    }

    #[test]
    fn test_strip_known_limitation_is_tolerated() {
        let _guard = lock_env();
        std::env::remove_var("NO_STRIP");
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "liba.so", "bytes");
        let dest = dir.path().join("out/liba.so");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.enqueue_strip(dest.clone());
        operations.enqueue_rpath(dest.clone(), "$ORIGIN".to_string());

        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default().reply(
            "strip",
            1,
            "",
            "strip: thing: Not enough room for program headers, try linking with -N\n",
        );
        operations.execute(&oracle, &runner).unwrap();

        // The failure was tolerated and the rpath phase still ran.
        assert_eq!(oracle.recorded_rpaths().len(), 1);
    }

    #[test]
    fn test_strip_other_failure_stops_before_rpath() {
        let _guard = lock_env();
        std::env::remove_var("NO_STRIP");
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "libb.so", "bytes");
        let dest = dir.path().join("out/libb.so");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.enqueue_strip(dest.clone());
        operations.enqueue_rpath(dest, "$ORIGIN".to_string());

        let oracle = FakeOracle::default();
        let runner =
            RecordingRunner::default().reply("strip", 1, "", "strip: unable to copy file\n");
        let result = operations.execute(&oracle, &runner);

        assert!(matches!(
            result,
            Err(ExecuteError::StripPhaseFailed {
                failures: 1,
                total: 1
            })
        ));
        assert!(oracle.recorded_rpaths().is_empty());
    }

    #[test]
    fn test_no_strip_environment_variable() {
        let _guard = lock_env();
        std::env::set_var("NO_STRIP", "1");
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "libc_app.so", "bytes");
        let dest = dir.path().join("out/libc_app.so");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.enqueue_strip(dest.clone());
        operations.enqueue_rpath(dest.clone(), "$ORIGIN".to_string());

        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default();
        let result = operations.execute(&oracle, &runner);
        std::env::remove_var("NO_STRIP");
        result.unwrap();

        // No strip subprocess, empty strip plan, but copies and rpaths applied.
        assert!(runner.calls_to("strip").is_empty());
        assert!(operations.strip_plan().is_empty());
        assert!(dest.is_file());
        assert_eq!(oracle.recorded_rpaths().len(), 1);
    }

    #[test]
    fn test_exec_plan_sets_executable_bits() {
        use std::os::unix::fs::PermissionsExt;

        let _guard = lock_env();
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "app", "#!/bin/sh\n");
        fs::set_permissions(&src, fs::Permissions::from_mode(0o644)).unwrap();
        let dest = dir.path().join("usr/bin/app");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.mark_executable(dest.clone());

        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default();
        operations.execute(&oracle, &runner).unwrap();

        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_enqueue_copy_latest_destination_wins() {
        let mut operations = DeferredOperations::default();
        let src = PathBuf::from("/tmp/lib.so");
        operations.enqueue_copy(src.clone(), PathBuf::from("/bundle/usr/lib/lib.so"));
        operations.enqueue_copy(src.clone(), PathBuf::from("/bundle/opt/lib.so"));

        assert_eq!(operations.copy_plan().len(), 1);
        assert_eq!(
            operations.copy_plan().get(&src),
            Some(&PathBuf::from("/bundle/opt/lib.so"))
        );
    }

    #[test]
    fn test_reuse_after_execute() {
        let _guard = lock_env();
        let dir = TempDir::new().unwrap();
        let first = write_file(&dir, "first.so", "1");
        let second = write_file(&dir, "second.so", "2");

        let mut operations = DeferredOperations::default();
        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default();

        operations.enqueue_copy(first, dir.path().join("out/first.so"));
        operations.execute(&oracle, &runner).unwrap();

        operations.enqueue_copy(second, dir.path().join("out/second.so"));
        operations.execute(&oracle, &runner).unwrap();

        assert!(dir.path().join("out/first.so").is_file());
        assert!(dir.path().join("out/second.so").is_file());
    }

    #[test]
    fn test_strip_skips_unreadable_rpath_gracefully() {
        // A destination the oracle cannot read (e.g. a deployed script)
        // falls back to an empty rpath and is handed to strip.
        let _guard = lock_env();
        std::env::remove_var("NO_STRIP");
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "wrapper", "#!/bin/sh\n");
        let dest = dir.path().join("out/wrapper");

        let mut operations = DeferredOperations::default();
        operations.enqueue_copy(src, dest.clone());
        operations.enqueue_strip(dest);

        let oracle = FakeOracle::default();
        let runner = RecordingRunner::default();
        operations.execute(&oracle, &runner).unwrap();
        assert_eq!(runner.calls_to("strip").len(), 1);
    }
}
