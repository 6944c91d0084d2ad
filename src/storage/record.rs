//! Page record header.
//!
//! Every page written to a store is prefixed with a [`RecordHeader`]:
//! - page kind code, cross-checked against the kind bits of the position
//! - CRC32 checksum for integrity
//! - payload length

use crate::common::config::RECORD_HEADER_SIZE;
use crate::common::PageKind;

/// Metadata stored in front of every page payload.
///
/// # Layout (9 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     kind (PageKind code)
/// 1       4     checksum (CRC32, little-endian)
/// 5       4     length (payload bytes, little-endian)
/// ```
///
/// # Checksum
/// CRC32 over the kind byte, the length field and the payload. The checksum
/// field itself is not hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Raw kind code as stored. May be invalid on a corrupted record.
    pub kind_code: u8,
    /// CRC32 checksum of the record.
    pub checksum: u32,
    /// Payload length in bytes.
    pub length: u32,
}

impl RecordHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = RECORD_HEADER_SIZE;

    /// Offset of each field within the header.
    pub const OFFSET_KIND: usize = 0;
    pub const OFFSET_CHECKSUM: usize = 1;
    pub const OFFSET_LENGTH: usize = 5;

    /// Build the header for a payload, computing its checksum.
    pub fn for_payload(kind: PageKind, payload: &[u8]) -> Self {
        let length = payload.len() as u32;
        Self {
            kind_code: kind.code(),
            checksum: Self::compute_checksum(kind.code(), length, payload),
            length,
        }
    }

    /// Decoded page kind, if the stored code is valid.
    #[inline]
    pub fn kind(&self) -> Option<PageKind> {
        PageKind::from_code(self.kind_code)
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < RecordHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for RecordHeader");

        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&data[Self::OFFSET_LENGTH..Self::OFFSET_LENGTH + 4]);

        Self {
            kind_code: data[Self::OFFSET_KIND],
            checksum: u32::from_le_bytes(checksum),
            length: u32::from_le_bytes(length),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < RecordHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for RecordHeader");

        data[Self::OFFSET_KIND] = self.kind_code;
        data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
        data[Self::OFFSET_LENGTH..Self::OFFSET_LENGTH + 4]
            .copy_from_slice(&self.length.to_le_bytes());
    }

    /// Compute the CRC32 checksum of a record.
    pub fn compute_checksum(kind_code: u8, length: u32, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind_code]);
        hasher.update(&length.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    /// Checksum the payload would need to match this header.
    pub fn actual_checksum(&self, payload: &[u8]) -> u32 {
        Self::compute_checksum(self.kind_code, self.length, payload)
    }

    /// Serialize header and payload into one record.
    pub fn encode_record(kind: PageKind, payload: &[u8]) -> Vec<u8> {
        let header = Self::for_payload(kind, payload);
        let mut record = vec![0u8; Self::SIZE + payload.len()];
        header.write_to(&mut record);
        record[Self::SIZE..].copy_from_slice(payload);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_byte_layout() {
        let header = RecordHeader {
            kind_code: PageKind::Node.code(),
            checksum: 0x04030201,
            length: 0x08070605,
        };

        let mut buffer = [0u8; RecordHeader::SIZE];
        header.write_to(&mut buffer);

        assert_eq!(buffer[0], 2); // PageKind::Node
        assert_eq!(buffer[1], 0x01); // checksum LSB
        assert_eq!(buffer[4], 0x04); // checksum MSB
        assert_eq!(buffer[5], 0x05); // length LSB
        assert_eq!(buffer[8], 0x08); // length MSB

        assert_eq!(RecordHeader::from_bytes(&buffer), header);
    }

    #[test]
    fn test_checksum_covers_kind_and_payload() {
        let leaf = RecordHeader::for_payload(PageKind::Leaf, b"abc");
        let node = RecordHeader::for_payload(PageKind::Node, b"abc");
        let other = RecordHeader::for_payload(PageKind::Leaf, b"abd");

        assert_ne!(leaf.checksum, node.checksum);
        assert_ne!(leaf.checksum, other.checksum);
        assert_eq!(leaf.actual_checksum(b"abc"), leaf.checksum);
        assert_ne!(leaf.actual_checksum(b"xyz"), leaf.checksum);
    }

    #[test]
    fn test_encode_record() {
        let record = RecordHeader::encode_record(PageKind::Leaf, b"payload");
        assert_eq!(record.len(), RecordHeader::SIZE + 7);

        let header = RecordHeader::from_bytes(&record);
        assert_eq!(header.kind(), Some(PageKind::Leaf));
        assert_eq!(header.length, 7);
        assert_eq!(&record[RecordHeader::SIZE..], b"payload");
    }

    #[test]
    fn test_invalid_kind_code() {
        let mut record = RecordHeader::encode_record(PageKind::Leaf, b"x");
        record[0] = 9;
        assert_eq!(RecordHeader::from_bytes(&record).kind(), None);
    }
}
