// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured traversal of coverage data. A [`CovDataReader`] walks a
//! set of pods (or a single in-memory pair of buffers) and hands the
//! decoded pieces to a [`CovDataVisitor`], so one traversal engine can
//! serve merging, diffing, and export alike.
//!
//! The visit sequence per pod is fixed:
//!
//! ```text
//! begin_pod(p)
//! visit_meta_data_file(mfr)
//! for each counter data file c in p (lexicographic):
//!     for each function payload fp in c:
//!         visit_func_counter_data(fp)
//! for each package in mfr (file order):
//!     begin_package(decoder, pkg_idx)
//!     if the package matches the filter:
//!         for each function (ascending index):
//!             visit_func(pkg_idx, func_idx, desc)
//! ```

use std::io;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use crate::counters::{CounterDataReader, FuncPayload};
use crate::fileview::FileView;
use crate::format::FuncDesc;
use crate::meta::{MetaFileReader, PackageDecoder};
use crate::pattern::PackageFilter;
use crate::pods::{collect_pods, Pod};

/// Hooks invoked as the reader walks through coverage data. All hooks
/// default to doing nothing, so a visitor implements only what it
/// consumes.
pub trait CovDataVisitor {
    fn begin_pod(&mut self, pod: &Pod) {
        let _ = pod;
    }

    fn visit_meta_data_file(&mut self, mfr: &mut MetaFileReader<'_>) -> Result<()> {
        let _ = mfr;
        Ok(())
    }

    fn visit_func_counter_data(&mut self, payload: &FuncPayload) -> Result<()> {
        let _ = payload;
        Ok(())
    }

    fn begin_package(&mut self, decoder: &PackageDecoder<'_>, pkg_idx: u32) -> Result<()> {
        let _ = (decoder, pkg_idx);
        Ok(())
    }

    fn visit_func(&mut self, pkg_idx: u32, func_idx: u32, desc: &FuncDesc) -> Result<()> {
        let _ = (pkg_idx, func_idx, desc);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Source<'a> {
    Dir(&'a Path),
    Buffers { meta: &'a [u8], counters: &'a [u8] },
}

/// Drives a visitor over coverage data files.
pub struct CovDataReader<'a, V> {
    vis: &'a mut V,
    source: Source<'a>,
    filter: PackageFilter,
}

impl<'a, V: CovDataVisitor> CovDataReader<'a, V> {
    /// Reader over every pod found in `dir`. Packages whose import path
    /// matches none of `patterns` are skipped at the function level; an
    /// empty pattern list selects everything.
    pub fn from_dir<S: AsRef<str>>(vis: &'a mut V, dir: &'a Path, patterns: &[S]) -> Result<Self> {
        Ok(Self {
            vis,
            source: Source::Dir(dir),
            filter: PackageFilter::new(patterns)?,
        })
    }

    /// Reader over a single meta-data buffer and one counter-data
    /// buffer, as handed out by an instrumented process at runtime.
    pub fn from_buffers<S: AsRef<str>>(
        vis: &'a mut V,
        meta: &'a [u8],
        counters: &'a [u8],
        patterns: &[S],
    ) -> Result<Self> {
        Ok(Self {
            vis,
            source: Source::Buffers { meta, counters },
            filter: PackageFilter::new(patterns)?,
        })
    }

    pub fn visit(&mut self) -> Result<()> {
        match self.source {
            Source::Dir(dir) => {
                let pods = collect_pods(dir)?;
                for pod in &pods {
                    self.visit_pod(pod)?;
                }
                Ok(())
            }
            Source::Buffers { meta, counters } => self.visit_buffers(meta, counters),
        }
    }

    fn visit_pod(&mut self, pod: &Pod) -> Result<()> {
        self.vis.begin_pod(pod);

        let view = FileView::open(&pod.meta_file)?;
        let mut mfr = MetaFileReader::from_file(view)
            .with_context(|| format!("decoding meta-data file {}", pod.meta_file.display()))?;
        self.vis.visit_meta_data_file(&mut mfr)?;

        let meta_hash = mfr.file_hash();
        for cdf in &pod.counter_data_files {
            let cview = FileView::open(cdf)?;
            let mut cdr = CounterDataReader::new(cview)
                .with_context(|| format!("reading counter data file {}", cdf.display()))?;
            ensure!(
                cdr.meta_hash() == meta_hash,
                "counter data file {} does not match meta-data file hash",
                cdf.display()
            );
            self.visit_counter_stream(&mut cdr)
                .with_context(|| format!("reading counter data file {}", cdf.display()))?;
        }

        self.walk_packages(&mut mfr)
            .with_context(|| format!("reading meta-data file {}", pod.meta_file.display()))
    }

    fn visit_buffers(&mut self, meta: &'a [u8], counters: &'a [u8]) -> Result<()> {
        self.vis.begin_pod(&Pod::default());

        let mut mfr = MetaFileReader::from_bytes(meta).context("decoding meta-data buffer")?;
        self.vis.visit_meta_data_file(&mut mfr)?;

        let mut cdr = CounterDataReader::new(io::Cursor::new(counters))
            .context("reading counter data buffer")?;
        ensure!(
            cdr.meta_hash() == mfr.file_hash(),
            "counter data buffer does not match meta-data hash"
        );
        self.visit_counter_stream(&mut cdr)
            .context("reading counter data buffer")?;

        self.walk_packages(&mut mfr)
            .context("reading meta-data buffer")
    }

    fn visit_counter_stream<R: io::Read + io::Seek>(
        &mut self,
        cdr: &mut CounterDataReader<R>,
    ) -> Result<()> {
        let mut payload = FuncPayload::default();
        while cdr.next_func(&mut payload)? {
            self.vis.visit_func_counter_data(&payload)?;
        }
        Ok(())
    }

    // Packages come out in the dependency order the meta-data file
    // records; no re-sort.
    fn walk_packages(&mut self, mfr: &mut MetaFileReader<'_>) -> Result<()> {
        let num_packages =
            u32::try_from(mfr.num_packages()).context("package count overflows u32")?;

        let mut scratch = Vec::new();
        let mut desc = FuncDesc::default();
        for pkg_idx in 0..num_packages {
            let mut decoder = mfr
                .package_decoder(pkg_idx, &mut scratch)
                .with_context(|| format!("reading package {pkg_idx}"))?;

            self.vis.begin_package(&decoder, pkg_idx)?;
            if !self.filter.matches(decoder.package_path()?) {
                continue;
            }

            for func_idx in 0..decoder.num_funcs() {
                decoder
                    .read_func(func_idx, &mut desc)
                    .with_context(|| format!("reading function {func_idx} of package {pkg_idx}"))?;
                self.vis.visit_func(pkg_idx, func_idx, &desc)?;
            }
        }

        Ok(())
    }
}
