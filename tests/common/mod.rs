//! Shared helpers for integration tests

#![allow(dead_code)]

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dk_installer::app::InstallerConfig;
use tempfile::TempDir;

pub fn test_config(logs_root: &Path) -> InstallerConfig {
    InstallerConfig::default()
        .with_logs_root(logs_root)
        .with_poll_interval(Duration::from_millis(10))
        .with_ctrl_c(false)
}

/// Write a workflow definition into `dir` and return its path
pub fn write_definition(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("workflow.yml");
    std::fs::write(&path, content).unwrap();
    path
}

/// Names and contents of every entry of a session archive
pub fn read_archive(path: &Path) -> Vec<(String, String)> {
    let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entries = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        entries.push((entry.name().to_string(), content));
    }
    entries.sort();
    entries
}

pub fn archive_entry<'a>(entries: &'a [(String, String)], suffix: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|(name, _)| name.ends_with(suffix))
        .map(|(_, content)| content.as_str())
}
