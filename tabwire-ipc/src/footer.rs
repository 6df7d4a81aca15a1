//! File footer.
//!
//! ```text
//! +----------------+----------------------------+-----+--------+------------+--------+
//! | ARROW1\0\0     | stream messages            | EOS | footer | footer_len | ARROW1 |
//! | 8 bytes        | schema, dictionaries, ...  |     | JSON   | i32 LE     | 6 bytes|
//! +----------------+----------------------------+-----+--------+------------+--------+
//! ```
//!
//! The footer repeats the schema and lists every dictionary and record
//! batch block by absolute offset, so a reader can seek straight to any
//! batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabwire_core::Schema;
use tabwire_protocol::{MetadataVersion, ProtocolError, FILE_MAGIC, FILE_MAGIC_PADDED};

/// Bytes after the footer: its length word and the trailing magic.
pub const TRAILER_SIZE: usize = 4 + FILE_MAGIC.len();

/// Smallest well-formed file: leading magic plus trailer.
pub const MIN_FILE_SIZE: usize = FILE_MAGIC_PADDED.len() + TRAILER_SIZE;

/// Position of one message inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Offset of the message prefix from the start of the file.
    pub offset: u64,
    /// Prefix, metadata and padding.
    pub metadata_length: u32,
    /// Body including padding.
    pub body_length: u64,
}

impl Block {
    /// One past the last byte of the block, or `None` if that overflows.
    pub fn end(&self) -> Option<u64> {
        self.offset
            .checked_add(self.metadata_length as u64)?
            .checked_add(self.body_length)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footer {
    pub version: i16,
    pub schema: Schema,
    #[serde(default)]
    pub dictionaries: Vec<Block>,
    #[serde(default)]
    pub record_batches: Vec<Block>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_metadata: BTreeMap<String, String>,
}

impl Footer {
    pub fn new(version: MetadataVersion, schema: Schema) -> Self {
        Self {
            version: version.ordinal(),
            schema,
            dictionaries: Vec::new(),
            record_batches: Vec::new(),
            custom_metadata: BTreeMap::new(),
        }
    }

    pub fn metadata_version(&self) -> Option<MetadataVersion> {
        MetadataVersion::from_ordinal(self.version)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let footer: Footer = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::InvalidFooter(e.to_string()))?;
        if !footer
            .metadata_version()
            .map(|v| v.is_supported())
            .unwrap_or(false)
        {
            return Err(ProtocolError::UnsupportedVersion(footer.version));
        }
        footer.schema.validate()?;
        Ok(footer)
    }

    /// Checks that every block ends before `limit`.
    pub fn check_blocks(&self, limit: u64) -> Result<(), ProtocolError> {
        let blocks = self.dictionaries.iter().chain(&self.record_batches);
        for block in blocks {
            let inside = block.offset >= FILE_MAGIC_PADDED.len() as u64
                && block.end().is_some_and(|end| end <= limit);
            if !inside {
                return Err(ProtocolError::InvalidFooter(format!(
                    "block at offset {} with length {} lies outside the message area (ends at {})",
                    block.offset,
                    (block.metadata_length as u64).saturating_add(block.body_length),
                    limit
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabwire_core::{DataType, Field};

    fn footer() -> Footer {
        let mut footer = Footer::new(
            MetadataVersion::V5,
            Schema::new(vec![Field::new("id", DataType::Int64, false)]),
        );
        footer.record_batches.push(Block {
            offset: 8,
            metadata_length: 136,
            body_length: 24,
        });
        footer
    }

    #[test]
    fn test_footer_roundtrip() {
        let footer = footer();
        let decoded = Footer::decode(&footer.encode().unwrap()).unwrap();
        assert_eq!(decoded, footer);
        assert_eq!(decoded.metadata_version(), Some(MetadataVersion::V5));
    }

    #[test]
    fn test_rejects_old_version() {
        let mut footer = footer();
        footer.version = MetadataVersion::V3.ordinal();
        let err = Footer::decode(&footer.encode().unwrap()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = Footer::decode(b"not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFooter(_)));
    }

    #[test]
    fn test_check_blocks() {
        let footer = footer();
        assert!(footer.check_blocks(168).is_ok());
        assert!(footer.check_blocks(160).is_err());
    }

    #[test]
    fn test_check_blocks_overflowing_offset() {
        let mut footer = footer();
        footer.record_batches[0].offset = u64::MAX - 4;
        assert_eq!(footer.record_batches[0].end(), None);
        let err = footer.check_blocks(168).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFooter(_)));
    }
}
