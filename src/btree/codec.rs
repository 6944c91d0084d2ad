//! Page payload encoding.
//!
//! All integers are little-endian.
//!
//! ```text
//! Leaf: [count u32] { [klen u32][key] [vlen u32][value] } * count
//! Node: [count u32] { [klen u32][key] } * count  [child pos u64] * (count + 1)
//! ```
//!
//! The kind is not part of the payload; it travels in the position and in
//! the store's record header.

use crate::common::{Error, PageKind, PagePosition, Result};

/// Payload decoded from a store, before child references are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecodedPage {
    Leaf {
        keys: Vec<Vec<u8>>,
        values: Vec<Vec<u8>>,
    },
    Node {
        keys: Vec<Vec<u8>>,
        children: Vec<PagePosition>,
    },
}

pub(crate) fn encode_leaf(keys: &[Vec<u8>], values: &[Vec<u8>]) -> Vec<u8> {
    let size: usize = keys.iter().chain(values).map(|b| 4 + b.len()).sum();
    let mut buf = Vec::with_capacity(4 + size);
    put_u32(&mut buf, keys.len() as u32);
    for (key, value) in keys.iter().zip(values) {
        put_bytes(&mut buf, key);
        put_bytes(&mut buf, value);
    }
    buf
}

pub(crate) fn encode_node(keys: &[Vec<u8>], children: &[PagePosition]) -> Vec<u8> {
    let size: usize = keys.iter().map(|k| 4 + k.len()).sum::<usize>() + 8 * children.len();
    let mut buf = Vec::with_capacity(4 + size);
    put_u32(&mut buf, keys.len() as u32);
    for key in keys {
        put_bytes(&mut buf, key);
    }
    for child in children {
        buf.extend_from_slice(&child.0.to_le_bytes());
    }
    buf
}

/// Decode the payload stored at `pos`, using the kind bits of `pos`.
pub(crate) fn decode(pos: PagePosition, data: &[u8]) -> Result<DecodedPage> {
    let kind = pos.kind().ok_or(Error::UnsavedPage)?;
    let mut reader = Reader { pos, data, at: 0 };

    let count = reader.u32()? as usize;
    let page = match kind {
        PageKind::Leaf => {
            // Each entry needs at least its two length prefixes.
            reader.check_count(count, 8)?;
            let mut keys = Vec::with_capacity(count);
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                keys.push(reader.bytes()?);
                values.push(reader.bytes()?);
            }
            DecodedPage::Leaf { keys, values }
        }
        PageKind::Node => {
            reader.check_count(count, 4 + 8)?;
            let mut keys = Vec::with_capacity(count);
            for _ in 0..count {
                keys.push(reader.bytes()?);
            }
            let mut children = Vec::with_capacity(count + 1);
            for _ in 0..=count {
                let child = PagePosition(reader.u64()?);
                if !child.is_saved() {
                    return Err(reader.corrupted("child position has no kind".into()));
                }
                children.push(child);
            }
            DecodedPage::Node { keys, children }
        }
    };

    if reader.at != data.len() {
        return Err(reader.corrupted(format!("{} trailing bytes", data.len() - reader.at)));
    }
    Ok(page)
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    pos: PagePosition,
    data: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.at.checked_add(n).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let data = self.data;
                let slice = &data[self.at..end];
                self.at = end;
                Ok(slice)
            }
            None => Err(self.corrupted(format!("truncated payload at byte {}", self.at))),
        }
    }

    fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Reject counts that cannot fit in the remaining bytes before allocating.
    fn check_count(&self, count: usize, min_entry: usize) -> Result<()> {
        let remaining = self.data.len() - self.at;
        if count.saturating_mul(min_entry) > remaining {
            return Err(self.corrupted(format!("entry count {} exceeds payload", count)));
        }
        Ok(())
    }

    fn corrupted(&self, reason: String) -> Error {
        Error::Corrupted {
            pos: self.pos,
            reason,
        }
    }
}
