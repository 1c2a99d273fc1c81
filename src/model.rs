// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The aggregate coverage model: what a caller gets back after a visit
//! over a set of pods. Maps are ordered so reports and diffs come out
//! deterministic.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::format::{CounterGranularity, CounterMode};
use crate::merge::Merger;

/// Coverage decoded from one or more pods, keyed by the hex form of
/// each pod's 16-byte meta hash.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CoverageData {
    pub pods: BTreeMap<String, PodData>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PodData {
    pub mode: CounterMode,
    pub granularity: CounterGranularity,
    pub packages: BTreeMap<u32, Package>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Package {
    pub id: u32,
    pub name: String,
    pub import_path: String,
    pub module_path: String,
    pub num_funcs: u32,
    pub funcs: BTreeMap<u32, Func>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Func {
    pub name: String,
    pub src_file: String,
    pub units: Vec<FuncUnit>,
}

/// One coverable unit with its merged execution count.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FuncUnit {
    pub st_line: u32,
    pub st_col: u32,
    pub en_line: u32,
    pub en_col: u32,
    pub nx_stmts: u32,
    pub count: u32,
}

/// Identity of a unit for diffing and merging.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct UnitKey {
    st_line: u32,
    en_line: u32,
    st_col: u32,
    en_col: u32,
    nx_stmts: u32,
}

impl From<&FuncUnit> for UnitKey {
    fn from(unit: &FuncUnit) -> Self {
        Self {
            st_line: unit.st_line,
            en_line: unit.en_line,
            st_col: unit.st_col,
            en_col: unit.en_col,
            nx_stmts: unit.nx_stmts,
        }
    }
}

impl CoverageData {
    pub fn new() -> Self {
        Self::default()
    }

    fn units(&self) -> impl Iterator<Item = &FuncUnit> {
        self.pods
            .values()
            .flat_map(|pod| pod.packages.values())
            .flat_map(|pkg| pkg.funcs.values())
            .flat_map(|func| func.units.iter())
    }

    /// Percentage of statements covered, over every pod and package.
    pub fn percent(&self) -> f64 {
        let mut total = 0u64;
        let mut covered = 0u64;
        for unit in self.units() {
            total += u64::from(unit.nx_stmts);
            if unit.count > 0 {
                covered += u64::from(unit.nx_stmts);
            }
        }

        if total == 0 {
            return 0.0;
        }
        covered as f64 / total as f64 * 100.0
    }

    /// Number of coverable units present in `other` but not in self.
    pub fn diff_lines(&self, other: &CoverageData) -> usize {
        let mut seen: BTreeSet<UnitKey> = self.units().map(UnitKey::from).collect();

        let mut fresh = 0;
        for unit in other.units() {
            if seen.insert(unit.into()) {
                fresh += 1;
            }
        }
        fresh
    }

    /// Fold `other` into self. Pods, packages, and functions absent on
    /// this side are adopted wholesale; functions present on both sides
    /// have their units merged under the pod's recorded counter mode.
    pub fn merge(&mut self, other: CoverageData) -> Result<()> {
        for (hash, pod) in other.pods {
            let cur_pod = match self.pods.entry(hash) {
                Entry::Vacant(entry) => {
                    entry.insert(pod);
                    continue;
                }
                Entry::Occupied(entry) => entry.into_mut(),
            };

            let mode = cur_pod.mode;
            let granularity = cur_pod.granularity;
            for (pkg_idx, pkg) in pod.packages {
                let cur_pkg = match cur_pod.packages.entry(pkg_idx) {
                    Entry::Vacant(entry) => {
                        entry.insert(pkg);
                        continue;
                    }
                    Entry::Occupied(entry) => entry.into_mut(),
                };

                for (func_idx, func) in pkg.funcs {
                    match cur_pkg.funcs.entry(func_idx) {
                        Entry::Vacant(entry) => {
                            entry.insert(func);
                        }
                        Entry::Occupied(entry) => {
                            merge_units(entry.into_mut(), &func, mode, granularity)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// Units pair up by identity key; a unit present on only one side
// merges against an implicit zero count on the other.
fn merge_units(
    cur: &mut Func,
    new: &Func,
    mode: CounterMode,
    granularity: CounterGranularity,
) -> Result<()> {
    let mut by_key: BTreeMap<UnitKey, (u32, u32)> = BTreeMap::new();
    for unit in &cur.units {
        by_key.insert(unit.into(), (unit.count, 0));
    }
    for unit in &new.units {
        by_key
            .entry(unit.into())
            .and_modify(|counts| counts.1 = unit.count)
            .or_insert((0, unit.count));
    }

    let mut cur_counts: Vec<u32> = by_key.values().map(|&(cur, _)| cur).collect();
    let new_counts: Vec<u32> = by_key.values().map(|&(_, new)| new).collect();

    let mut merger = Merger::new();
    merger.set_mode_and_granularity(mode, granularity)?;
    merger.merge_counters(&mut cur_counts, &new_counts)?;

    cur.units = by_key
        .keys()
        .zip(cur_counts)
        .map(|(key, count)| FuncUnit {
            st_line: key.st_line,
            st_col: key.st_col,
            en_line: key.en_line,
            en_col: key.en_col,
            nx_stmts: key.nx_stmts,
            count,
        })
        .collect();

    Ok(())
}
