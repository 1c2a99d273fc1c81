// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Random-access decoding cursor over a byte buffer that may or may
//! not be backed by a read-only mmap'd region. Strings decoded from
//! read-only backing are handed out as borrowed views; strings decoded
//! from scratch buffers are detached copies, so the buffer can be
//! reused.

use std::borrow::Cow;

use anyhow::{bail, ensure, Context, Result};

pub struct ByteCursor<'a> {
    buf: &'a [u8],
    readonly: bool,
    off: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8], readonly: bool) -> Self {
        Self {
            buf,
            readonly,
            off: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.off
    }

    pub fn seek(&mut self, off: usize) -> Result<()> {
        ensure!(
            off <= self.buf.len(),
            "seek to offset {off} past end of buffer (len {})",
            self.buf.len()
        );
        self.off = off;
        Ok(())
    }

    pub fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(n)
            .with_context(|| format!("read of {n} bytes at offset {} overflows", self.off))?;
        ensure!(
            end <= self.buf.len(),
            "short read: {n} bytes at offset {} exceed buffer length {}",
            self.off,
            self.buf.len()
        );
        let bytes = &self.buf[self.off..end];
        self.off = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read(4)?;
        // Length checked by read.
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read(8)?;
        // Length checked by read.
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Decode one unsigned LEB128 value. Each byte contributes its low
    /// 7 bits, least significant group first; a clear high bit ends the
    /// value.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;

        loop {
            let byte = self.read_u8().context("truncated ULEB128 value")?;
            if shift >= 64 {
                bail!("ULEB128 value at offset {} overflows u64", self.off);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        Ok(value)
    }

    /// ULEB128 narrowed to u32; wider values are a format violation.
    pub fn read_uleb128_u32(&mut self) -> Result<u32> {
        let value = self.read_uleb128()?;
        u32::try_from(value).with_context(|| format!("value {value} overflows u32"))
    }

    pub fn read_string(&mut self, len: usize) -> Result<Cow<'a, str>> {
        let bytes = self.read(len)?;
        let s = std::str::from_utf8(bytes)
            .with_context(|| format!("string at offset {} is not valid UTF-8", self.off - len))?;
        if self.readonly {
            Ok(Cow::Borrowed(s))
        } else {
            Ok(Cow::Owned(s.to_owned()))
        }
    }
}
