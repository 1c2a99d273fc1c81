// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Grouping of coverage output files into pods. A pod is one meta-data
//! file plus every counter-data file whose name carries the same
//! meta-hash tag, so that runs of the same instrumented binary can be
//! aggregated together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use regex::Regex;

use crate::format::{COUNTER_FILE_PREFIX, META_FILE_PREFIX};

/// One meta-data file and the counter-data files that reference it.
/// Counter paths are sorted lexicographically.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Pod {
    pub meta_file: PathBuf,
    pub counter_data_files: Vec<PathBuf>,
}

/// Collect the coverage files in `dir` into pods. Files that are not
/// coverage-related are skipped, as are counter-data files with no
/// matching meta-data file.
pub fn collect_pods(dir: impl AsRef<Path>) -> Result<Vec<Pod>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading inputs from {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("reading inputs from {}", dir.display()))?;
        if entry.file_type().map_or(false, |t| t.is_dir()) {
            continue;
        }
        files.push(entry.path());
    }

    collect_pods_from_files(&files)
}

/// Partition an explicit file list into pods.
pub fn collect_pods_from_files(files: &[PathBuf]) -> Result<Vec<Pod>> {
    let meta_re = Regex::new(&format!(r"^{META_FILE_PREFIX}\.(\S+)$"))?;
    let counter_re = Regex::new(&format!(r"^{COUNTER_FILE_PREFIX}\.(\S+)\.(\d+)\.(\d+)$"))?;

    // First pass: one proto-pod per distinct meta-hash tag. Duplicate
    // meta files collapse to the first path encountered.
    let mut pods: BTreeMap<String, Pod> = BTreeMap::new();
    for path in files {
        let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(captures) = meta_re.captures(base) {
            let tag = &captures[1];
            if !pods.contains_key(tag) {
                pods.insert(
                    tag.to_owned(),
                    Pod {
                        meta_file: path.clone(),
                        counter_data_files: Vec::new(),
                    },
                );
            }
        }
    }

    // Second pass: attach counter files to their pods by tag.
    for path in files {
        let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(captures) = counter_re.captures(base) {
            let tag = &captures[1];
            match pods.get_mut(tag) {
                Some(pod) => pod.counter_data_files.push(path.clone()),
                None => warn!("skipping orphaned counter data file {}", path.display()),
            }
        }
    }

    let mut pods: Vec<Pod> = pods.into_values().collect();
    for pod in &mut pods {
        pod.counter_data_files.sort();
    }
    pods.sort_by(|a, b| a.meta_file.cmp(&b.meta_file));

    Ok(pods)
}
