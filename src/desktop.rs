// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Freedesktop desktop-entry files: parse, query, validate, and write.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

type Result<T> = std::result::Result<T, DesktopError>;

/// The section every desktop entry must carry.
pub const DESKTOP_ENTRY_SECTION: &str = "Desktop Entry";

/// Errors that can occur when reading or writing desktop files.
#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("Failed to read desktop file: {path:?}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write desktop file: {path:?}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed line {line_number} in desktop file {path:?}: {line}")]
    MalformedLine {
        path: PathBuf,
        line_number: usize,
        line: String,
    },
}

/// A desktop-entry file with section-keyed lookup.
///
/// Section and key order is preserved so saved files stay diffable against
/// their sources.
#[derive(Debug, Clone)]
pub struct DesktopFile {
    path: PathBuf,
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl DesktopFile {
    /// Create an empty desktop file that will be written to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sections: Vec::new(),
        }
    }

    /// Parse a desktop file from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is neither a
    /// section header, a key-value pair, a comment, nor blank.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| DesktopError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut sections: Vec<(String, Vec<(String, String)>)> = Vec::new();
        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push((name.to_string(), Vec::new()));
                continue;
            }
            let entry = line.split_once('=').map(|(key, value)| {
                (key.trim_end().to_string(), value.trim_start().to_string())
            });
            match (entry, sections.last_mut()) {
                (Some(entry), Some((_, entries))) => entries.push(entry),
                _ => {
                    return Err(DesktopError::MalformedLine {
                        path: path.to_path_buf(),
                        line_number: index + 1,
                        line: raw_line.to_string(),
                    })
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            sections,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a value by section and key.
    #[must_use]
    pub fn get_entry(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)?
            .1
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value.as_str())
    }

    /// Insert or update a value, creating the section if needed.
    pub fn set_entry(&mut self, section: &str, key: &str, value: &str) {
        let index = match self.sections.iter().position(|(name, _)| name == section) {
            Some(index) => index,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        let entries = &mut self.sections[index].1;
        match entries.iter_mut().find(|(entry_key, _)| entry_key == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => entries.push((key.to_string(), value.to_string())),
        }
    }

    /// Check the keys a bundle entry point needs: a `Desktop Entry` section
    /// with non-empty `Type`, `Name`, `Exec`, and `Icon`.
    #[must_use]
    pub fn validate(&self) -> bool {
        ["Type", "Name", "Exec", "Icon"].iter().all(|key| {
            self.get_entry(DESKTOP_ENTRY_SECTION, key)
                .is_some_and(|value| !value.is_empty())
        })
    }

    /// Fill in the minimal keys for an executable, refusing to overwrite.
    ///
    /// Returns false if any of the default keys was already present (the
    /// existing values are kept).
    pub fn add_default_keys(&mut self, executable_name: &str) -> bool {
        let defaults = [
            ("Type", "Application"),
            ("Name", executable_name),
            ("Exec", executable_name),
            ("Icon", executable_name),
            ("Categories", "Utility;"),
        ];
        let mut all_added = true;
        for (key, value) in defaults {
            if self.get_entry(DESKTOP_ENTRY_SECTION, key).is_some() {
                all_added = false;
            } else {
                self.set_entry(DESKTOP_ENTRY_SECTION, key, value);
            }
        }
        all_added
    }

    /// Write the desktop file to its path, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if a parent directory or the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let mut content = String::new();
        for (name, entries) in &self.sections {
            let _ = writeln!(content, "[{name}]");
            for (key, value) in entries {
                let _ = writeln!(content, "{key}={value}");
            }
            let _ = writeln!(content);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| DesktopError::WriteFailed {
                    path: self.path.clone(),
                    source: e,
                })?;
            }
        }
        fs::write(&self.path, content).map_err(|e| DesktopError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_desktop_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_and_get_entry() {
        let file = write_desktop_file(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name=My App\n\
             Exec=myapp --flag\n\
             Icon=myapp\n",
        );
        let desktop_file = DesktopFile::load(file.path()).unwrap();
        assert_eq!(
            desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Exec"),
            Some("myapp --flag")
        );
        assert_eq!(
            desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Name"),
            Some("My App")
        );
        assert_eq!(desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Missing"), None);
        assert_eq!(desktop_file.get_entry("Other Section", "Exec"), None);
    }

    #[test]
    fn test_load_skips_comments_and_blank_lines() {
        let file = write_desktop_file(
            "# a comment\n\
             \n\
             [Desktop Entry]\n\
             # another comment\n\
             Name=App\n",
        );
        let desktop_file = DesktopFile::load(file.path()).unwrap();
        assert_eq!(desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Name"), Some("App"));
    }

    #[test]
    fn test_load_malformed_line() {
        let file = write_desktop_file("[Desktop Entry]\nthis is not an entry\n");
        let result = DesktopFile::load(file.path());
        match result {
            Err(DesktopError::MalformedLine { line_number, .. }) => assert_eq!(line_number, 2),
            other => panic!("Expected MalformedLine, got {other:?}"),
        }
    }

    #[test]
    fn test_load_entry_outside_section() {
        let file = write_desktop_file("Name=App\n");
        assert!(matches!(
            DesktopFile::load(file.path()),
            Err(DesktopError::MalformedLine { line_number: 1, .. })
        ));
    }

    #[test]
    fn test_validate() {
        let complete = write_desktop_file(
            "[Desktop Entry]\nType=Application\nName=App\nExec=app\nIcon=app\n",
        );
        assert!(DesktopFile::load(complete.path()).unwrap().validate());

        let missing_icon =
            write_desktop_file("[Desktop Entry]\nType=Application\nName=App\nExec=app\n");
        assert!(!DesktopFile::load(missing_icon.path()).unwrap().validate());

        let empty_value = write_desktop_file(
            "[Desktop Entry]\nType=Application\nName=App\nExec=app\nIcon=\n",
        );
        assert!(!DesktopFile::load(empty_value.path()).unwrap().validate());
    }

    #[test]
    fn test_add_default_keys_fresh_file() {
        let dir = TempDir::new().unwrap();
        let mut desktop_file = DesktopFile::new(dir.path().join("tool.desktop"));
        assert!(desktop_file.add_default_keys("tool"));
        assert!(desktop_file.validate());
        assert_eq!(desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Exec"), Some("tool"));
        assert_eq!(
            desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Categories"),
            Some("Utility;")
        );
    }

    #[test]
    fn test_add_default_keys_keeps_existing_values() {
        let file = write_desktop_file("[Desktop Entry]\nName=Fancy Name\n");
        let mut desktop_file = DesktopFile::load(file.path()).unwrap();
        assert!(!desktop_file.add_default_keys("tool"));
        assert_eq!(
            desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Name"),
            Some("Fancy Name")
        );
        assert_eq!(desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Exec"), Some("tool"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("apps/saved.desktop");
        let mut desktop_file = DesktopFile::new(&path);
        desktop_file.add_default_keys("saved");
        desktop_file.save().unwrap();

        let reloaded = DesktopFile::load(&path).unwrap();
        assert_eq!(
            reloaded.get_entry(DESKTOP_ENTRY_SECTION, "Type"),
            Some("Application")
        );
        assert_eq!(reloaded.get_entry(DESKTOP_ENTRY_SECTION, "Exec"), Some("saved"));
    }

    #[test]
    fn test_set_entry_updates_in_place() {
        let mut desktop_file = DesktopFile::new("test.desktop");
        desktop_file.set_entry(DESKTOP_ENTRY_SECTION, "Name", "One");
        desktop_file.set_entry(DESKTOP_ENTRY_SECTION, "Name", "Two");
        assert_eq!(desktop_file.get_entry(DESKTOP_ENTRY_SECTION, "Name"), Some("Two"));
    }
}
