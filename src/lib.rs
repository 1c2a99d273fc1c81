// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Decoding and aggregation of code coverage data files.
//!
//! An instrumented program emits one meta-data file per build
//! (`covmeta.<hash>`, describing packages, functions, and their
//! coverable source units) and one counter-data file per run
//! (`covcounters.<hash>.<pid>.<nanos>`, carrying hit counts for those
//! units). This crate groups such files into pods, decodes both binary
//! formats, cross-validates counters against the meta catalog, merges
//! counts across runs, and returns a structured coverage model.
//!
//! Most callers want [`read_dir`] or [`read_from_buffers`]; custom
//! consumers can drive a [`visit::CovDataReader`] with their own
//! visitor.

mod arena;

pub mod aggregate;
pub mod counters;
pub mod cursor;
pub mod fileview;
pub mod format;
pub mod merge;
pub mod meta;
pub mod model;
pub mod pattern;
pub mod pods;
pub mod strtab;
pub mod visit;

pub use aggregate::{read_dir, read_from_buffers, CoverageBuilder};
pub use format::{CounterGranularity, CounterMode};
pub use model::CoverageData;
pub use pods::Pod;
