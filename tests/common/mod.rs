// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test-only encoders for meta-data and counter-data files, used to
//! build fixtures on disk; the library itself only ever reads them.

use std::path::{Path, PathBuf};

use covdata::format::{CounterFlavor, CounterGranularity, CounterMode, PKG_HEADER_SIZE};

pub fn uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn encode_strtab(entries: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    uleb(&mut out, entries.len() as u64);
    for e in entries {
        uleb(&mut out, e.len() as u64);
        out.extend_from_slice(e.as_bytes());
    }
    out
}

pub fn hex(hash: [u8; 16]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// One function for [`package_blob`]: name, source file, units as
/// (st_line, st_col, en_line, en_col, nx_stmts), literal flag.
pub struct FuncSpec<'s> {
    pub name: &'s str,
    pub src_file: &'s str,
    pub units: Vec<[u32; 5]>,
    pub is_literal: bool,
}

impl<'s> FuncSpec<'s> {
    pub fn new(name: &'s str, src_file: &'s str, units: Vec<[u32; 5]>) -> Self {
        Self {
            name,
            src_file,
            units,
            is_literal: false,
        }
    }
}

pub fn package_blob<'s>(
    name: &'s str,
    import_path: &'s str,
    module_path: &'s str,
    funcs: &[FuncSpec<'s>],
) -> Vec<u8> {
    let mut strings: Vec<&'s str> = vec![name, import_path, module_path];
    let intern = |strings: &mut Vec<&'s str>, s: &'s str| {
        if let Some(idx) = strings.iter().position(|&e| e == s) {
            idx as u64
        } else {
            strings.push(s);
            (strings.len() - 1) as u64
        }
    };

    let mut payloads: Vec<Vec<u8>> = Vec::new();
    let mut num_files = 0u32;
    for func in funcs {
        let fname_idx = intern(&mut strings, func.name);
        let before = strings.len();
        let file_idx = intern(&mut strings, func.src_file);
        if strings.len() > before {
            num_files += 1;
        }

        let mut payload = Vec::new();
        uleb(&mut payload, func.units.len() as u64);
        uleb(&mut payload, fname_idx);
        uleb(&mut payload, file_idx);
        for unit in &func.units {
            for field in unit {
                uleb(&mut payload, u64::from(*field));
            }
        }
        uleb(&mut payload, u64::from(func.is_literal));
        payloads.push(payload);
    }

    let strtab = encode_strtab(&strings);
    let payload_base = PKG_HEADER_SIZE + 4 * funcs.len() + strtab.len();

    let mut blob = Vec::new();
    blob.extend_from_slice(&0u32.to_le_bytes()); // length, patched below
    blob.extend_from_slice(&0u32.to_le_bytes());
    blob.extend_from_slice(&1u32.to_le_bytes());
    blob.extend_from_slice(&2u32.to_le_bytes());
    blob.extend_from_slice(&[0xab; 16]); // per-package hash
    blob.extend_from_slice(&[0; 4]);
    blob.extend_from_slice(&num_files.to_le_bytes());
    blob.extend_from_slice(&(funcs.len() as u32).to_le_bytes());

    let mut off = payload_base;
    for payload in &payloads {
        blob.extend_from_slice(&(off as u32).to_le_bytes());
        off += payload.len();
    }
    blob.extend_from_slice(&strtab);
    for payload in &payloads {
        blob.extend_from_slice(payload);
    }

    let total = blob.len() as u32;
    blob[0..4].copy_from_slice(&total.to_le_bytes());
    blob
}

pub fn meta_file(
    hash: [u8; 16],
    mode: CounterMode,
    granularity: CounterGranularity,
    blobs: &[Vec<u8>],
) -> Vec<u8> {
    let strtab = encode_strtab(&[]);
    let str_tab_offset = 56 + 16 * blobs.len() as u32;

    let mut out = Vec::new();
    out.extend_from_slice(&[0x00, 0x63, 0x76, 0x6d]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // total length, patched below
    out.extend_from_slice(&(blobs.len() as u64).to_le_bytes());
    out.extend_from_slice(&hash);
    out.extend_from_slice(&str_tab_offset.to_le_bytes());
    out.extend_from_slice(&(strtab.len() as u32).to_le_bytes());
    out.push(mode.as_u8());
    out.push(granularity.as_u8());
    out.extend_from_slice(&[0; 6]);

    let mut off = u64::from(str_tab_offset) + strtab.len() as u64;
    for blob in blobs {
        out.extend_from_slice(&off.to_le_bytes());
        off += blob.len() as u64;
    }
    for blob in blobs {
        out.extend_from_slice(&(blob.len() as u64).to_le_bytes());
    }
    out.extend_from_slice(&strtab);
    for blob in blobs {
        out.extend_from_slice(blob);
    }

    let total = out.len() as u64;
    out[8..16].copy_from_slice(&total.to_le_bytes());
    out
}

/// Counter records as (pkg_idx, func_idx, counters).
pub type Record = (u32, u32, Vec<u32>);

pub fn counter_file(hash: [u8; 16], flavor: CounterFlavor, records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[0x00, 0x63, 0x77, 0x6d]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&hash);
    out.push(flavor.as_u8());
    out.push(0); // little-endian
    out.extend_from_slice(&[0; 6]);

    // One segment with an empty string table and args table.
    let strtab = encode_strtab(&[]);
    let mut args = Vec::new();
    uleb(&mut args, 0);

    out.extend_from_slice(&(records.len() as u64).to_le_bytes());
    out.extend_from_slice(&(strtab.len() as u32).to_le_bytes());
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    out.extend_from_slice(&strtab);
    out.extend_from_slice(&args);
    while out.len() % 4 != 0 {
        out.push(0);
    }

    for (pkg_idx, func_idx, counters) in records {
        match flavor {
            CounterFlavor::Raw => {
                out.extend_from_slice(&(counters.len() as u32).to_le_bytes());
                out.extend_from_slice(&pkg_idx.to_le_bytes());
                out.extend_from_slice(&func_idx.to_le_bytes());
                for c in counters {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            CounterFlavor::Uleb128 => {
                uleb(&mut out, counters.len() as u64);
                uleb(&mut out, u64::from(*pkg_idx));
                uleb(&mut out, u64::from(*func_idx));
                for c in counters {
                    uleb(&mut out, u64::from(*c));
                }
            }
        }
    }

    out.extend_from_slice(&[0x00, 0x63, 0x77, 0x6d]);
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out
}

pub fn write_meta(dir: &Path, hash: [u8; 16], bytes: &[u8]) -> PathBuf {
    let path = dir.join(format!("covmeta.{}", hex(hash)));
    std::fs::write(&path, bytes).expect("writing meta-data fixture");
    path
}

pub fn write_counters(dir: &Path, hash: [u8; 16], pid: u32, nanos: u64, bytes: &[u8]) -> PathBuf {
    let path = dir.join(format!("covcounters.{}.{pid}.{nanos}", hex(hash)));
    std::fs::write(&path, bytes).expect("writing counter-data fixture");
    path
}

/// The example package from the format docs: `small` with three units
/// (2, 1, and 1 statements), `Medium` with one unit of 5 statements.
pub fn example_package() -> Vec<u8> {
    package_blob(
        "p",
        "example.com/p",
        "example.com",
        &[
            FuncSpec::new(
                "small",
                "p.go",
                vec![[6, 1, 8, 10, 2], [9, 3, 9, 12, 1], [11, 3, 11, 27, 1]],
            ),
            FuncSpec::new("Medium", "p.go", vec![[15, 1, 19, 14, 5]]),
        ],
    )
}
