// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Decoding of counter-data files. A counter-data file holds a header,
//! one or more segments (each one run of the instrumented binary), and
//! a footer with the segment count. Every segment carries its own
//! string table and an args table annotating where the counters came
//! from, then the per-function counter records in one of two flavors.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, ensure, Context, Result};

use crate::cursor::ByteCursor;
use crate::format::{
    CounterFlavor, COUNTER_FILE_FOOTER_SIZE, COUNTER_FILE_HEADER_SIZE, COUNTER_FILE_VERSION,
    COUNTER_SEGMENT_HEADER_SIZE, COV_COUNTER_MAGIC,
};
use crate::strtab::StringTable;

/// Decoded counter-data file header.
#[derive(Clone, Debug)]
pub struct CounterFileHeader {
    pub version: u32,
    pub meta_hash: [u8; 16],
    pub flavor: CounterFlavor,
    /// Surfaced from the header but not interpreted; counter files are
    /// decoded little-endian regardless.
    pub big_endian: bool,
}

#[derive(Clone, Copy, Debug, Default)]
struct SegmentHeader {
    fcn_entries: u64,
    str_tab_len: u32,
    args_len: u32,
}

/// Counter record for one function: which function it is, and the
/// counter value for each of its coverable units.
#[derive(Clone, Debug, Default)]
pub struct FuncPayload {
    pub pkg_idx: u32,
    pub func_idx: u32,
    pub counters: Vec<u32>,
}

/// One-pass streaming reader over a counter-data file.
pub struct CounterDataReader<R> {
    r: R,
    hdr: CounterFileHeader,
    num_segments: u32,
    shdr: SegmentHeader,
    args: BTreeMap<String, String>,
    seg_count: u32,
    fcn_count: u64,
}

impl<R: Read + Seek> CounterDataReader<R> {
    pub fn new(mut r: R) -> Result<Self> {
        let mut hdr_buf = [0u8; COUNTER_FILE_HEADER_SIZE];
        r.read_exact(&mut hdr_buf)
            .context("reading counter data file header")?;

        let mut cursor = ByteCursor::new(&hdr_buf, false);
        // Length checked by read.
        let magic: [u8; 4] = cursor.read(4)?.try_into().unwrap();
        if magic != COV_COUNTER_MAGIC {
            bail!("invalid counter data file magic string {magic:02x?}");
        }

        let version = cursor.read_u32()?;
        ensure!(
            version <= COUNTER_FILE_VERSION,
            "counter data file has unknown version {version} (expected at most {COUNTER_FILE_VERSION})"
        );

        let mut meta_hash = [0u8; 16];
        meta_hash.copy_from_slice(cursor.read(16)?);

        let flavor_byte = cursor.read_u8()?;
        let Some(flavor) = CounterFlavor::from_u8(flavor_byte) else {
            bail!("unknown counter flavor {flavor_byte}");
        };
        let big_endian = cursor.read_u8()? != 0;

        let hdr = CounterFileHeader {
            version,
            meta_hash,
            flavor,
            big_endian,
        };

        // The footer records how many segments to expect.
        let file_len = r.seek(SeekFrom::End(0)).context("finding file end")?;
        let min_len = (COUNTER_FILE_HEADER_SIZE + COUNTER_FILE_FOOTER_SIZE) as u64;
        ensure!(file_len >= min_len, "truncated counter data file");
        r.seek(SeekFrom::Start(file_len - COUNTER_FILE_FOOTER_SIZE as u64))
            .context("seeking to footer")?;
        let mut ftr_buf = [0u8; COUNTER_FILE_FOOTER_SIZE];
        r.read_exact(&mut ftr_buf)
            .context("reading counter data file footer")?;
        let mut cursor = ByteCursor::new(&ftr_buf, false);
        // Length checked by read.
        let ftr_magic: [u8; 4] = cursor.read(4)?.try_into().unwrap();
        if ftr_magic != COV_COUNTER_MAGIC {
            bail!("invalid counter data file footer magic string {ftr_magic:02x?}");
        }
        cursor.read(4)?;
        let num_segments = cursor.read_u32()?;

        r.seek(SeekFrom::Start(COUNTER_FILE_HEADER_SIZE as u64))
            .context("seeking past header")?;

        let mut cdr = Self {
            r,
            hdr,
            num_segments,
            shdr: SegmentHeader::default(),
            args: BTreeMap::new(),
            seg_count: 0,
            fcn_count: 0,
        };
        if cdr.num_segments > 0 {
            cdr.read_segment_preamble()
                .context("reading first segment")?;
            cdr.seg_count = 1;
        }

        Ok(cdr)
    }

    pub fn meta_hash(&self) -> [u8; 16] {
        self.hdr.meta_hash
    }

    pub fn flavor(&self) -> CounterFlavor {
        self.hdr.flavor
    }

    pub fn big_endian(&self) -> bool {
        self.hdr.big_endian
    }

    pub fn num_segments(&self) -> u32 {
        self.num_segments
    }

    /// Key/value annotations of the current segment, e.g. the os.Args
    /// of the run that produced it.
    pub fn args(&self) -> &BTreeMap<String, String> {
        &self.args
    }

    /// Reconstruct the recorded argv from `argc`/`argvN` annotations.
    /// Empty if the producing runtime recorded none.
    pub fn os_args(&self) -> Vec<String> {
        let Some(argc) = self.args.get("argc").and_then(|v| v.parse::<usize>().ok()) else {
            return Vec::new();
        };

        (0..argc)
            .filter_map(|i| self.args.get(&format!("argv{i}")).cloned())
            .collect()
    }

    /// Read the next function record into `payload`, advancing to the
    /// next segment as needed. Returns false once every segment is
    /// exhausted. The counter buffer is reused across calls.
    pub fn next_func(&mut self, payload: &mut FuncPayload) -> Result<bool> {
        loop {
            if self.fcn_count < self.shdr.fcn_entries {
                self.fcn_count += 1;
                self.read_func(payload)?;
                return Ok(true);
            }

            if self.seg_count >= self.num_segments {
                return Ok(false);
            }
            self.seg_count += 1;
            let segment = self.seg_count;
            self.read_segment_preamble()
                .with_context(|| format!("reading segment {segment}"))?;
        }
    }

    fn read_segment_preamble(&mut self) -> Result<()> {
        let mut buf = [0u8; COUNTER_SEGMENT_HEADER_SIZE];
        self.r
            .read_exact(&mut buf)
            .context("reading segment header")?;
        let mut cursor = ByteCursor::new(&buf, false);
        self.shdr = SegmentHeader {
            fcn_entries: cursor.read_u64()?,
            str_tab_len: cursor.read_u32()?,
            args_len: cursor.read_u32()?,
        };
        self.fcn_count = 0;

        let mut st_buf = vec![0u8; self.shdr.str_tab_len as usize];
        self.r
            .read_exact(&mut st_buf)
            .context("short read on segment string table")?;
        let mut st_cursor = ByteCursor::new(&st_buf, false);
        let strtab =
            StringTable::read(&mut st_cursor).context("decoding segment string table")?;

        let mut args_buf = vec![0u8; self.shdr.args_len as usize];
        self.r
            .read_exact(&mut args_buf)
            .context("short read on segment args table")?;
        let mut args_cursor = ByteCursor::new(&args_buf, false);
        let num_pairs = args_cursor
            .read_uleb128()
            .context("reading args pair count")?;
        self.args.clear();
        for _ in 0..num_pairs {
            let key_idx = args_cursor.read_uleb128_u32()?;
            let val_idx = args_cursor.read_uleb128_u32()?;
            let key = strtab.get(key_idx).context("args key")?.to_owned();
            let val = strtab.get(val_idx).context("args value")?.to_owned();
            self.args.insert(key, val);
        }

        // The preamble is padded out to a 4-byte boundary before the
        // function records begin.
        let pos = self.r.stream_position()?;
        let rem = pos % 4;
        if rem != 0 {
            self.r.seek(SeekFrom::Current((4 - rem) as i64))?;
        }

        Ok(())
    }

    fn read_func(&mut self, payload: &mut FuncPayload) -> Result<()> {
        let (num_counters, pkg_idx, func_idx) = match self.hdr.flavor {
            CounterFlavor::Raw => (
                self.read_u32().context("reading counter count")?,
                self.read_u32().context("reading package index")?,
                self.read_u32().context("reading function index")?,
            ),
            CounterFlavor::Uleb128 => (
                self.read_uleb128_u32().context("reading counter count")?,
                self.read_uleb128_u32().context("reading package index")?,
                self.read_uleb128_u32().context("reading function index")?,
            ),
        };

        payload.pkg_idx = pkg_idx;
        payload.func_idx = func_idx;
        payload.counters.clear();
        for _ in 0..num_counters {
            let counter = match self.hdr.flavor {
                CounterFlavor::Raw => self.read_u32(),
                CounterFlavor::Uleb128 => self.read_uleb128_u32(),
            };
            payload
                .counters
                .push(counter.context("reading counter values")?);
        }

        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.r
            .read_exact(&mut buf)
            .context("premature end of file")?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_uleb128(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        let mut buf = [0u8; 1];

        loop {
            self.r
                .read_exact(&mut buf)
                .context("truncated ULEB128 value")?;
            let byte = buf[0];
            if shift >= 64 {
                bail!("ULEB128 value overflows u64");
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        Ok(value)
    }

    fn read_uleb128_u32(&mut self) -> Result<u32> {
        let value = self.read_uleb128()?;
        u32::try_from(value).with_context(|| format!("value {value} overflows u32"))
    }
}
