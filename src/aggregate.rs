// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The standard visitor: decode a set of pods into a [`CoverageData`]
//! model, merging counters from every run of each binary.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;

use crate::arena::{CounterArena, CounterSlot};
use crate::counters::FuncPayload;
use crate::format::FuncDesc;
use crate::merge::Merger;
use crate::meta::{MetaFileReader, PackageDecoder};
use crate::model::{CoverageData, Func, FuncUnit, Package, PodData};
use crate::pods::Pod;
use crate::visit::{CovDataReader, CovDataVisitor};

/// Decode every pod in `dir` into an aggregate coverage model.
/// `patterns` limits which packages get per-function data; an empty
/// list selects all of them.
pub fn read_dir<S: AsRef<str>>(dir: impl AsRef<Path>, patterns: &[S]) -> Result<CoverageData> {
    let mut builder = CoverageBuilder::new();
    CovDataReader::from_dir(&mut builder, dir.as_ref(), patterns)?.visit()?;
    Ok(builder.into_data())
}

/// Decode a single meta-data buffer plus counter-data buffer, as
/// emitted by an instrumented process for its own coverage.
pub fn read_from_buffers<S: AsRef<str>>(
    meta: &[u8],
    counters: &[u8],
    patterns: &[S],
) -> Result<CoverageData> {
    let mut builder = CoverageBuilder::new();
    CovDataReader::from_buffers(&mut builder, meta, counters, patterns)?.visit()?;
    Ok(builder.into_data())
}

/// Visitor that accumulates decoded pods into [`CoverageData`]. Pods
/// decoded before a failure stay available, so a caller driving the
/// reader directly can keep partial results.
#[derive(Default)]
pub struct CoverageBuilder {
    // Counter vectors for the current pod are carved out of an arena
    // and die with it at the next begin_pod.
    arena: CounterArena,
    merger: Merger,

    /// Merged counters read so far, keyed by (package, function) index.
    mm: HashMap<(u32, u32), CounterSlot>,

    /// Function counts per package of the current meta file, used to
    /// drop counter records that refer outside the declared catalog.
    pkm: HashMap<u32, u32>,

    pod_hash: String,
    data: CoverageData,
}

impl CoverageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_data(self) -> CoverageData {
        self.data
    }

    pub fn data(&self) -> &CoverageData {
        &self.data
    }

    fn hex(hash: [u8; 16]) -> String {
        hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl CovDataVisitor for CoverageBuilder {
    fn begin_pod(&mut self, _pod: &Pod) {
        self.mm.clear();
        self.arena.reset();
    }

    fn visit_meta_data_file(&mut self, mfr: &mut MetaFileReader<'_>) -> Result<()> {
        let mode = mfr.counter_mode();
        let granularity = mfr.counter_granularity();

        // Mode and granularity are fixed for the whole session; a
        // clashing meta file fails before it touches the model.
        self.merger.set_mode_and_granularity(mode, granularity)?;

        let mut pod_data = PodData {
            mode,
            granularity,
            packages: BTreeMap::new(),
        };

        // Walk the package catalog up front: it pins down the legal
        // (package, function) pairs for counter records, and gives
        // every package a slot even if no counters mention it.
        self.pkm.clear();
        let num_packages =
            u32::try_from(mfr.num_packages()).context("package count overflows u32")?;
        let mut scratch = Vec::new();
        for pkg_idx in 0..num_packages {
            let decoder = mfr
                .package_decoder(pkg_idx, &mut scratch)
                .with_context(|| format!("reading package {pkg_idx} from meta-file"))?;
            let num_funcs = decoder.num_funcs();
            self.pkm.insert(pkg_idx, num_funcs);
            pod_data.packages.insert(
                pkg_idx,
                Package {
                    id: pkg_idx,
                    num_funcs,
                    ..Package::default()
                },
            );
        }

        self.pod_hash = Self::hex(mfr.file_hash());
        self.data.pods.insert(self.pod_hash.clone(), pod_data);
        Ok(())
    }

    fn visit_func_counter_data(&mut self, payload: &FuncPayload) -> Result<()> {
        // Records outside the meta catalog are dropped, not escalated;
        // they may come from a newer emitter.
        let Some(&num_funcs) = self.pkm.get(&payload.pkg_idx) else {
            return Ok(());
        };
        if payload.func_idx >= num_funcs {
            return Ok(());
        }

        let key = (payload.pkg_idx, payload.func_idx);
        let slot = match self.mm.get(&key).copied() {
            Some(slot) if slot.len() >= payload.counters.len() => slot,
            Some(slot) => {
                let grown = self.arena.grow(slot, payload.counters.len());
                self.mm.insert(key, grown);
                grown
            }
            None => {
                let slot = self.arena.alloc(payload.counters.len());
                self.mm.insert(key, slot);
                slot
            }
        };

        // The accumulator may be longer than this record if an earlier
        // file carried more counters; merge against the shared prefix.
        let dst = &mut self.arena.get_mut(&slot)[..payload.counters.len()];
        let overflowed = self.merger.merge_counters(dst, &payload.counters)?;
        if overflowed {
            warn!(
                "counter overflow merging data for package {} function {}",
                payload.pkg_idx, payload.func_idx
            );
        }

        Ok(())
    }

    fn begin_package(&mut self, decoder: &PackageDecoder<'_>, pkg_idx: u32) -> Result<()> {
        let Some(pod_data) = self.data.pods.get_mut(&self.pod_hash) else {
            return Ok(());
        };
        if let Some(package) = pod_data.packages.get_mut(&pkg_idx) {
            package.name = decoder.package_name()?.to_owned();
            package.import_path = decoder.package_path()?.to_owned();
            package.module_path = decoder.module_path()?.to_owned();
        }

        Ok(())
    }

    fn visit_func(&mut self, pkg_idx: u32, func_idx: u32, desc: &FuncDesc) -> Result<()> {
        let counters = self
            .mm
            .get(&(pkg_idx, func_idx))
            .map(|slot| self.arena.get(slot));

        let mut func = Func {
            name: desc.func_name.clone(),
            src_file: desc.src_file.clone(),
            units: Vec::with_capacity(desc.units.len()),
        };
        for (idx, unit) in desc.units.iter().enumerate() {
            let count = counters
                .and_then(|c| c.get(idx).copied())
                .unwrap_or_default();
            func.units.push(FuncUnit {
                st_line: unit.st_line,
                st_col: unit.st_col,
                en_line: unit.en_line,
                en_col: unit.en_col,
                nx_stmts: unit.nx_stmts,
                count,
            });
        }

        let Some(pod_data) = self.data.pods.get_mut(&self.pod_hash) else {
            return Ok(());
        };
        if let Some(package) = pod_data.packages.get_mut(&pkg_idx) {
            package.funcs.insert(func_idx, func);
        }

        Ok(())
    }
}
