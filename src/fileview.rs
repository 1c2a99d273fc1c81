// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Seekable reader over a coverage data file. Prefers a read-only
//! memory mapping of the whole file; if mapping fails (empty file,
//! exotic filesystem) it falls back to buffered stream reads. Callers
//! that can see the mapping get zero-copy access to file contents.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

pub struct FileView {
    inner: Inner,
}

enum Inner {
    Mapped { map: Mmap, pos: u64 },
    Buffered(BufReader<File>),
}

impl FileView {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::new(file)
    }

    pub fn new(file: File) -> Result<Self> {
        // The file was opened read-only and coverage files are not
        // rewritten in place, so mapping it shared is sound.
        let inner = match unsafe { Mmap::map(&file) } {
            Ok(map) => Inner::Mapped { map, pos: 0 },
            Err(_) => Inner::Buffered(BufReader::new(file)),
        };

        Ok(Self { inner })
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.inner, Inner::Mapped { .. })
    }

    /// The whole file as a read-only byte view, when mapped.
    pub fn mapped(&self) -> Option<&[u8]> {
        match &self.inner {
            Inner::Mapped { map, .. } => Some(map),
            Inner::Buffered(_) => None,
        }
    }
}

impl Read for FileView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Mapped { map, pos } => {
                // A position past the end reads as EOF.
                let off = usize::try_from(*pos).unwrap_or(usize::MAX).min(map.len());
                let amt = buf.len().min(map.len() - off);
                buf[..amt].copy_from_slice(&map[off..off + amt]);
                *pos += amt as u64;
                Ok(amt)
            }
            Inner::Buffered(reader) => reader.read(buf),
        }
    }
}

impl Seek for FileView {
    fn seek(&mut self, seek: SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            Inner::Mapped { map, pos } => {
                let base = match seek {
                    SeekFrom::Start(off) => {
                        *pos = off;
                        return Ok(off);
                    }
                    SeekFrom::Current(delta) => pos.checked_add_signed(delta),
                    SeekFrom::End(delta) => (map.len() as u64).checked_add_signed(delta),
                };
                let new = base.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
                })?;
                *pos = new;
                Ok(new)
            }
            // BufReader::seek discards its buffer and forwards to the
            // file, which keeps the stream position accurate.
            Inner::Buffered(reader) => reader.seek(seek),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use anyhow::Result;

    use super::FileView;

    fn fixture(content: &[u8]) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(content)?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn mapped_read_and_seek() -> Result<()> {
        let file = fixture(b"0123456789")?;
        let mut view = FileView::open(file.path())?;

        assert!(view.is_mapped());
        assert_eq!(view.mapped().map(<[u8]>::len), Some(10));

        let mut buf = [0u8; 4];
        view.read_exact(&mut buf)?;
        assert_eq!(&buf, b"0123");

        view.seek(SeekFrom::Start(6))?;
        view.read_exact(&mut buf)?;
        assert_eq!(&buf, b"6789");

        assert_eq!(view.seek(SeekFrom::End(-2))?, 8);
        assert_eq!(view.seek(SeekFrom::Current(1))?, 9);

        // Reads past the end drain to zero bytes.
        view.seek(SeekFrom::Start(100))?;
        assert_eq!(view.read(&mut buf)?, 0);

        Ok(())
    }

    #[test]
    fn empty_file_falls_back_to_buffered() -> Result<()> {
        let file = fixture(b"")?;
        let mut view = FileView::open(file.path())?;

        // mmap of a zero-length file fails on most platforms; either
        // way the view must still behave as an empty stream.
        let mut buf = [0u8; 1];
        assert_eq!(view.read(&mut buf)?, 0);

        Ok(())
    }
}
