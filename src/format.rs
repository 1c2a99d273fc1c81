// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared definitions for the two coverage artifact formats: the
//! meta-data file written once per instrumented build, and the
//! counter-data files written once per run. Both formats are
//! little-endian throughout; variable-length integers use ULEB128.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Magic prefix of a meta-data file.
pub const COV_META_MAGIC: [u8; 4] = [0x00, 0x63, 0x76, 0x6d];

/// Magic prefix of a counter-data file. Distinct from the meta magic;
/// the two must never be confused.
pub const COV_COUNTER_MAGIC: [u8; 4] = [0x00, 0x63, 0x77, 0x6d];

/// Most recent meta-data file version this crate can decode.
pub const META_FILE_VERSION: u32 = 1;

/// Most recent counter-data file version this crate can decode.
pub const COUNTER_FILE_VERSION: u32 = 1;

/// Basename prefix of meta-data files: `covmeta.<hash>`.
pub const META_FILE_PREFIX: &str = "covmeta";

/// Basename prefix of counter-data files:
/// `covcounters.<hash>.<pid>.<unix-nanos>`.
pub const COUNTER_FILE_PREFIX: &str = "covcounters";

/// Size in bytes of the meta-data file header.
pub const META_FILE_HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 16 + 4 + 4 + 1 + 1 + 6;

/// Size in bytes of a per-package meta blob header.
pub const PKG_HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 16 + 1 + 3 + 4 + 4;

/// Size in bytes of the counter-data file header.
pub const COUNTER_FILE_HEADER_SIZE: usize = 4 + 4 + 16 + 1 + 1 + 6;

/// Size in bytes of a counter-data segment header.
pub const COUNTER_SEGMENT_HEADER_SIZE: usize = 8 + 4 + 4;

/// Size in bytes of the counter-data file footer.
pub const COUNTER_FILE_FOOTER_SIZE: usize = 4 + 4 + 4 + 4;

/// Arithmetic flavor of the counters in an instrumented program.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterMode {
    #[default]
    Invalid,
    /// Boolean union: a nonzero counter means "reached".
    Set,
    /// Saturating sum of execution counts.
    Count,
    /// Same read semantics as `Count`; updates were atomic at runtime.
    Atomic,
    /// Registration-only pseudo-mode; carries no counter semantics.
    RegOnly,
    /// Testmain pseudo-mode; carries no counter semantics.
    TestMain,
}

impl CounterMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Set,
            2 => Self::Count,
            3 => Self::Atomic,
            4 => Self::RegOnly,
            5 => Self::TestMain,
            _ => Self::Invalid,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Set => 1,
            Self::Count => 2,
            Self::Atomic => 3,
            Self::RegOnly => 4,
            Self::TestMain => 5,
        }
    }
}

impl fmt::Display for CounterMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Invalid => "<invalid>",
            Self::Set => "set",
            Self::Count => "count",
            Self::Atomic => "atomic",
            Self::RegOnly => "regonly",
            Self::TestMain => "testmain",
        };
        write!(f, "{name}")
    }
}

impl FromStr for CounterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "set" => Self::Set,
            "count" => Self::Count,
            "atomic" => Self::Atomic,
            "regonly" => Self::RegOnly,
            "testmain" => Self::TestMain,
            other => bail!("unknown counter mode {other:?}"),
        };
        Ok(mode)
    }
}

/// Whether one counter covers a basic block or a whole function.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterGranularity {
    #[default]
    Invalid,
    PerBlock,
    PerFunc,
}

impl CounterGranularity {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::PerBlock,
            2 => Self::PerFunc,
            _ => Self::Invalid,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::PerBlock => 1,
            Self::PerFunc => 2,
        }
    }
}

impl fmt::Display for CounterGranularity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Invalid => "<invalid>",
            Self::PerBlock => "perblock",
            Self::PerFunc => "perfunc",
        };
        write!(f, "{name}")
    }
}

/// On-disk encoding of function records in a counter-data file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CounterFlavor {
    /// All record fields stored as fixed-width u32.
    Raw,
    /// All record fields stored with ULEB128 encoding.
    Uleb128,
}

impl CounterFlavor {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Raw),
            2 => Some(Self::Uleb128),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Raw => 1,
            Self::Uleb128 => 2,
        }
    }
}

/// One contiguous source region tracked by a single counter slot.
///
/// A "simple" unit corresponds to straight-line code and has a zero
/// `parent`; an intraline unit nests within a simple unit and stores
/// 1 plus the index of its parent within the same function.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CoverableUnit {
    pub st_line: u32,
    pub st_col: u32,
    pub en_line: u32,
    pub en_col: u32,
    pub nx_stmts: u32,
    pub parent: u32,
}

/// Meta-data for a single instrumented function.
#[derive(Clone, Debug, Default)]
pub struct FuncDesc {
    pub func_name: String,
    pub src_file: String,
    pub units: Vec<CoverableUnit>,
    /// True if this is a function literal.
    pub is_literal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_roundtrip() {
        for value in 0..=6u8 {
            let mode = CounterMode::from_u8(value);
            if mode != CounterMode::Invalid {
                assert_eq!(mode.as_u8(), value);
            }
        }

        assert_eq!("count".parse::<CounterMode>().ok(), Some(CounterMode::Count));
        assert_eq!(CounterMode::Atomic.to_string(), "atomic");
        assert!("bogus".parse::<CounterMode>().is_err());
    }

    #[test]
    fn granularity_names() {
        assert_eq!(CounterGranularity::PerBlock.to_string(), "perblock");
        assert_eq!(CounterGranularity::PerFunc.to_string(), "perfunc");
        assert_eq!(CounterGranularity::from_u8(9), CounterGranularity::Invalid);
    }

    #[test]
    fn magics_are_distinct() {
        assert_ne!(COV_META_MAGIC, COV_COUNTER_MAGIC);
    }
}
