// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Decoding of coverage meta-data files. A meta-data file carries a
//! file header, per-package offset and length tables, a short
//! file-level string table, and then one self-contained meta-data blob
//! per instrumented package. Each blob has its own string table and is
//! decoded lazily via [`PackageDecoder`].

use std::io::{self, Read, Seek, SeekFrom};

use anyhow::{bail, ensure, Context, Result};

use crate::cursor::ByteCursor;
use crate::fileview::FileView;
use crate::format::{
    CounterGranularity, CounterMode, CoverableUnit, FuncDesc, COV_META_MAGIC,
    META_FILE_HEADER_SIZE, META_FILE_VERSION, PKG_HEADER_SIZE,
};
use crate::strtab::StringTable;

/// Decoded meta-data file header.
#[derive(Clone, Debug)]
pub struct MetaFileHeader {
    pub version: u32,
    pub total_length: u64,
    pub entries: u64,
    pub file_hash: [u8; 16],
    pub str_tab_offset: u32,
    pub str_tab_length: u32,
    pub mode: CounterMode,
    pub granularity: CounterGranularity,
}

enum MetaBacking<'d> {
    /// An opened file, preferably mmap'd.
    File(FileView),
    /// A caller-supplied buffer; treated like a read-only view.
    Bytes(io::Cursor<&'d [u8]>),
}

impl MetaBacking<'_> {
    fn view(&self) -> Option<&[u8]> {
        match self {
            Self::File(view) => view.mapped(),
            Self::Bytes(cursor) => Some(cursor.get_ref()),
        }
    }
}

impl Read for MetaBacking<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(view) => view.read(buf),
            Self::Bytes(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for MetaBacking<'_> {
    fn seek(&mut self, seek: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(view) => view.seek(seek),
            Self::Bytes(cursor) => cursor.seek(seek),
        }
    }
}

/// Reader for one meta-data file. Parses the header eagerly and hands
/// out per-package decoders on demand.
pub struct MetaFileReader<'d> {
    backing: MetaBacking<'d>,
    hdr: MetaFileHeader,
    pkg_offsets: Vec<u64>,
    pkg_lengths: Vec<u64>,
    strtab: StringTable<'static>,
}

impl MetaFileReader<'static> {
    pub fn from_file(view: FileView) -> Result<Self> {
        Self::read(MetaBacking::File(view))
    }
}

impl<'d> MetaFileReader<'d> {
    pub fn from_bytes(data: &'d [u8]) -> Result<Self> {
        Self::read(MetaBacking::Bytes(io::Cursor::new(data)))
    }

    fn read(mut backing: MetaBacking<'d>) -> Result<Self> {
        let mut hdr_buf = [0u8; META_FILE_HEADER_SIZE];
        backing
            .read_exact(&mut hdr_buf)
            .context("reading meta-data file header")?;

        let mut cursor = ByteCursor::new(&hdr_buf, false);
        // Length checked by read.
        let magic: [u8; 4] = cursor.read(4)?.try_into().unwrap();
        if magic != COV_META_MAGIC {
            bail!("invalid meta-data file magic string {magic:02x?}");
        }

        let version = cursor.read_u32()?;
        ensure!(
            version <= META_FILE_VERSION,
            "meta-data file has unknown version {version} (expected at most {META_FILE_VERSION})"
        );

        let total_length = cursor.read_u64()?;
        let entries = cursor.read_u64()?;
        let mut file_hash = [0u8; 16];
        file_hash.copy_from_slice(cursor.read(16)?);
        let str_tab_offset = cursor.read_u32()?;
        let str_tab_length = cursor.read_u32()?;
        let mode = CounterMode::from_u8(cursor.read_u8()?);
        let granularity = CounterGranularity::from_u8(cursor.read_u8()?);

        let hdr = MetaFileHeader {
            version,
            total_length,
            entries,
            file_hash,
            str_tab_offset,
            str_tab_length,
            mode,
            granularity,
        };

        let count = usize::try_from(entries).context("package count overflows")?;
        let mut pkg_offsets = Vec::with_capacity(count);
        for idx in 0..count {
            let off = read_u64_le(&mut backing)
                .with_context(|| format!("reading offset of package {idx}"))?;
            ensure!(
                off <= total_length,
                "insane offset for package {idx}: {off} > total length {total_length}"
            );
            pkg_offsets.push(off);
        }
        let mut pkg_lengths = Vec::with_capacity(count);
        for idx in 0..count {
            let len = read_u64_le(&mut backing)
                .with_context(|| format!("reading length of package {idx}"))?;
            ensure!(
                len <= total_length,
                "insane length for package {idx}: {len} > total length {total_length}"
            );
            pkg_lengths.push(len);
        }

        backing
            .seek(SeekFrom::Start(u64::from(hdr.str_tab_offset)))
            .context("seeking to file-level string table")?;
        let mut st_buf = vec![0u8; hdr.str_tab_length as usize];
        backing
            .read_exact(&mut st_buf)
            .context("short read on string table")?;
        let mut st_cursor = ByteCursor::new(&st_buf, false);
        let strtab = StringTable::read(&mut st_cursor)
            .context("decoding file-level string table")?
            .into_owned();

        Ok(Self {
            backing,
            hdr,
            pkg_offsets,
            pkg_lengths,
            strtab,
        })
    }

    pub fn num_packages(&self) -> u64 {
        self.hdr.entries
    }

    pub fn counter_mode(&self) -> CounterMode {
        self.hdr.mode
    }

    pub fn counter_granularity(&self) -> CounterGranularity {
        self.hdr.granularity
    }

    /// Hash over all package meta-data blobs. Counter-data files refer
    /// to this hash, and it is encoded into the file name.
    pub fn file_hash(&self) -> [u8; 16] {
        self.hdr.file_hash
    }

    pub fn header(&self) -> &MetaFileHeader {
        &self.hdr
    }

    pub fn file_string_table(&self) -> &StringTable<'static> {
        &self.strtab
    }

    /// The raw meta-data blob for package `pk_idx`: a subslice of the
    /// file view when one is available (zero-copy), otherwise read into
    /// `scratch`.
    pub fn package_payload<'b>(
        &'b mut self,
        pk_idx: u32,
        scratch: &'b mut Vec<u8>,
    ) -> Result<&'b [u8]> {
        ensure!(
            u64::from(pk_idx) < self.hdr.entries,
            "illegal package index {pk_idx} (file has {} packages)",
            self.hdr.entries
        );
        let off = self.pkg_offsets[pk_idx as usize] as usize;
        let len = self.pkg_lengths[pk_idx as usize] as usize;

        if self.backing.view().is_some() {
            let view = self.backing.view().context("file view disappeared")?;
            let end = off
                .checked_add(len)
                .with_context(|| format!("package {pk_idx} extent overflows"))?;
            ensure!(
                end <= view.len(),
                "package {pk_idx} extent {off}+{len} exceeds file size {}",
                view.len()
            );
            return Ok(&view[off..end]);
        }

        scratch.clear();
        scratch.resize(len, 0);
        self.backing
            .seek(SeekFrom::Start(off as u64))
            .with_context(|| format!("seeking to package {pk_idx} payload"))?;
        self.backing
            .read_exact(scratch)
            .with_context(|| format!("reading package {pk_idx} payload"))?;
        Ok(&scratch[..])
    }

    /// Decoder for package `pk_idx`. The decoder borrows either the
    /// file view or `scratch`, whichever holds the payload.
    pub fn package_decoder<'b>(
        &'b mut self,
        pk_idx: u32,
        scratch: &'b mut Vec<u8>,
    ) -> Result<PackageDecoder<'b>> {
        let readonly = self.backing.view().is_some();
        let payload = self.package_payload(pk_idx, scratch)?;
        PackageDecoder::new(payload, readonly)
            .with_context(|| format!("decoding meta-data for package {pk_idx}"))
    }
}

fn read_u64_le(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).context("premature end of file")?;
    Ok(u64::from_le_bytes(buf))
}

/// Decoded header of a per-package meta blob.
#[derive(Clone, Debug)]
pub struct PackageHeader {
    pub length: u32,
    pub pkg_name: u32,
    pub pkg_path: u32,
    pub module_path: u32,
    pub meta_hash: [u8; 16],
    pub num_files: u32,
    pub num_funcs: u32,
}

/// Decoder for one package's self-contained meta-data blob.
pub struct PackageDecoder<'a> {
    cursor: ByteCursor<'a>,
    hdr: PackageHeader,
    strtab: StringTable<'a>,
}

impl<'a> PackageDecoder<'a> {
    pub fn new(payload: &'a [u8], readonly: bool) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload, readonly);

        let length = cursor.read_u32().context("reading package header")?;
        let pkg_name = cursor.read_u32()?;
        let pkg_path = cursor.read_u32()?;
        let module_path = cursor.read_u32()?;
        let mut meta_hash = [0u8; 16];
        meta_hash.copy_from_slice(cursor.read(16)?);
        cursor.read(4)?; // one unused byte plus padding
        let num_files = cursor.read_u32()?;
        let num_funcs = cursor.read_u32()?;

        let hdr = PackageHeader {
            length,
            pkg_name,
            pkg_path,
            module_path,
            meta_hash,
            num_files,
            num_funcs,
        };

        // The blob-local string table sits after the function offsets.
        let strtab_off = PKG_HEADER_SIZE
            .checked_add(4 * num_funcs as usize)
            .context("function offset table extent overflows")?;
        cursor
            .seek(strtab_off)
            .context("seeking to package string table")?;
        let strtab = StringTable::read(&mut cursor).context("decoding package string table")?;

        for (what, idx) in [
            ("package name", hdr.pkg_name),
            ("package path", hdr.pkg_path),
            ("module path", hdr.module_path),
        ] {
            ensure!(
                (idx as usize) < strtab.len(),
                "{what} string index {idx} out of range (table has {} entries)",
                strtab.len()
            );
        }

        Ok(Self {
            cursor,
            hdr,
            strtab,
        })
    }

    pub fn package_name(&self) -> Result<&str> {
        self.strtab.get(self.hdr.pkg_name)
    }

    pub fn package_path(&self) -> Result<&str> {
        self.strtab.get(self.hdr.pkg_path)
    }

    pub fn module_path(&self) -> Result<&str> {
        self.strtab.get(self.hdr.module_path)
    }

    pub fn num_files(&self) -> u32 {
        self.hdr.num_files
    }

    pub fn num_funcs(&self) -> u32 {
        self.hdr.num_funcs
    }

    pub fn meta_hash(&self) -> [u8; 16] {
        self.hdr.meta_hash
    }

    /// Decode the meta-data for function `fidx` into `dst`, reusing its
    /// unit buffer when it is large enough.
    pub fn read_func(&mut self, fidx: u32, dst: &mut FuncDesc) -> Result<()> {
        ensure!(
            fidx < self.hdr.num_funcs,
            "illegal function index {fidx} (package has {} functions)",
            self.hdr.num_funcs
        );

        let offset_loc = PKG_HEADER_SIZE + 4 * fidx as usize;
        self.cursor.seek(offset_loc)?;
        let func_off = self.cursor.read_u32()?;
        ensure!(
            func_off as usize >= offset_loc && func_off <= self.hdr.length,
            "malformed offset {func_off} for function {fidx}"
        );

        self.cursor.seek(func_off as usize)?;
        let num_units = self
            .cursor
            .read_uleb128_u32()
            .with_context(|| format!("reading unit count of function {fidx}"))?;
        let fname_idx = self.cursor.read_uleb128_u32()?;
        let file_idx = self.cursor.read_uleb128_u32()?;

        dst.func_name.clear();
        dst.func_name.push_str(self.strtab.get(fname_idx)?);
        dst.src_file.clear();
        dst.src_file.push_str(self.strtab.get(file_idx)?);

        dst.units.clear();
        dst.units.reserve(num_units as usize);
        for unit in 0..num_units {
            let st_line = self.cursor.read_uleb128_u32()?;
            let st_col = self.cursor.read_uleb128_u32()?;
            let en_line = self.cursor.read_uleb128_u32()?;
            let en_col = self.cursor.read_uleb128_u32()?;
            let nx_stmts = self
                .cursor
                .read_uleb128_u32()
                .with_context(|| format!("reading unit {unit} of function {fidx}"))?;
            dst.units.push(CoverableUnit {
                st_line,
                st_col,
                en_line,
                en_col,
                nx_stmts,
                parent: 0,
            });
        }

        let lit = self.cursor.read_uleb128()?;
        dst.is_literal = lit != 0;

        Ok(())
    }
}
