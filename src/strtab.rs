// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! String table decoding. A table is a ULEB128 entry count followed by
//! that many (ULEB128 length, bytes) pairs, addressed by 0-based index.
//! Tables are never mutated after decode.

use std::borrow::Cow;

use anyhow::{Context, Result};

use crate::cursor::ByteCursor;

#[derive(Clone, Debug, Default)]
pub struct StringTable<'a> {
    entries: Vec<Cow<'a, str>>,
}

impl<'a> StringTable<'a> {
    pub fn read(cursor: &mut ByteCursor<'a>) -> Result<Self> {
        let count = cursor
            .read_uleb128()
            .context("reading string table entry count")?;
        let count = usize::try_from(count).context("string table entry count overflows")?;

        let mut entries = Vec::with_capacity(count);
        for idx in 0..count {
            let len = cursor
                .read_uleb128()
                .with_context(|| format!("reading length of string table entry {idx}"))?;
            let len = usize::try_from(len).context("string length overflows")?;
            let entry = cursor
                .read_string(len)
                .with_context(|| format!("reading string table entry {idx}"))?;
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: u32) -> Result<&str> {
        self.entries
            .get(idx as usize)
            .map(|entry| &**entry)
            .with_context(|| {
                format!(
                    "string table index {idx} out of range (table has {} entries)",
                    self.entries.len()
                )
            })
    }

    /// Detach every entry from the backing buffer.
    pub fn into_owned(self) -> StringTable<'static> {
        let entries = self
            .entries
            .into_iter()
            .map(|e| Cow::Owned(e.into_owned()))
            .collect();
        StringTable { entries }
    }
}

#[cfg(test)]
mod tests {
    use crate::cursor::ByteCursor;

    use super::StringTable;

    fn encode(entries: &[&str]) -> Vec<u8> {
        let mut out = vec![entries.len() as u8];
        for e in entries {
            out.push(e.len() as u8);
            out.extend_from_slice(e.as_bytes());
        }
        out
    }

    #[test]
    fn decode_and_get() {
        let data = encode(&["p.go", "small", "Medium", ""]);
        let mut cur = ByteCursor::new(&data, false);
        let table = StringTable::read(&mut cur).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.get(0).unwrap(), "p.go");
        assert_eq!(table.get(1).unwrap(), "small");
        assert_eq!(table.get(2).unwrap(), "Medium");
        assert_eq!(table.get(3).unwrap(), "");
        assert!(table.get(4).is_err());
    }

    #[test]
    fn empty_table() {
        let data = encode(&[]);
        let mut cur = ByteCursor::new(&data, false);
        let table = StringTable::read(&mut cur).unwrap();

        assert!(table.is_empty());
        assert!(table.get(0).is_err());
    }

    #[test]
    fn truncated_entry() {
        let mut data = encode(&["hello"]);
        data.truncate(4);
        let mut cur = ByteCursor::new(&data, false);
        assert!(StringTable::read(&mut cur).is_err());
    }
}
