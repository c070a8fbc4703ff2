// Proto directory loading and compilation

use anyhow::{Context, Result};
use prost_reflect::DescriptorPool;
use prost_types::FileDescriptorSet;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-file outcome of a load pass. Parse errors are reported, not fatal.
#[derive(Debug, Clone, Serialize)]
pub struct ProtoFileReport {
    pub file: String,
    pub status: ProtoFileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtoFileStatus {
    Loaded,
    Skipped,
}

/// Result of compiling every `.proto` under a directory.
pub struct LoadedSchemas {
    pub pool: DescriptorPool,
    pub reports: Vec<ProtoFileReport>,
}

/// Collect all `.proto` files from a directory, skipping dot-entries.
pub fn collect_proto_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if dir.is_dir() {
        let walker = walkdir::WalkDir::new(dir).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            !e.file_name().to_string_lossy().starts_with('.')
        });

        for entry in walker.flatten() {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|e| e == "proto")
            {
                files.push(entry.path().to_path_buf());
            }
        }
    }

    // Deterministic order so snapshots built from the same tree are equal
    files.sort();
    files
}

/// Compile every proto file under `proto_dir` into one descriptor pool.
///
/// Each file is compiled independently so one broken file cannot take down
/// the rest of the schema set; its report carries the compiler error.
/// Imports resolve against `proto_dir`, the extra `include_paths`, and
/// protox's bundled well-known types.
pub fn load(proto_dir: &Path, include_paths: &[PathBuf]) -> Result<LoadedSchemas> {
    let files = collect_proto_files(proto_dir);
    debug!("Compiling {} proto file(s) from {}", files.len(), proto_dir.display());

    let mut includes: Vec<PathBuf> = vec![proto_dir.to_path_buf()];
    includes.extend(include_paths.iter().cloned());

    let mut merged = FileDescriptorSet::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut reports = Vec::new();

    for file in &files {
        let display_name = relative_name(proto_dir, file);
        match protox::compile([file.as_path()], includes.iter().map(|p| p.as_path())) {
            Ok(set) => {
                for fd in set.file {
                    let name = fd.name().to_string();
                    if seen.insert(name) {
                        merged.file.push(fd);
                    }
                }
                reports.push(ProtoFileReport {
                    file: display_name,
                    status: ProtoFileStatus::Loaded,
                    error: None,
                });
            }
            Err(err) => {
                warn!("Skipping proto file {}: {}", display_name, err);
                reports.push(ProtoFileReport {
                    file: display_name,
                    status: ProtoFileStatus::Skipped,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    let pool = DescriptorPool::from_file_descriptor_set(merged)
        .context("failed to build descriptor pool from compiled protos")?;

    Ok(LoadedSchemas { pool, reports })
}

fn relative_name(base: &Path, file: &Path) -> String {
    file.strip_prefix(base)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/")
}
