//! File protocol: a stream wrapped in magic bytes with a footer index.
//!
//! The reader locates everything from the end. By default the end is the
//! end of the source, but an explicit `footer_offset` lets a file sit in
//! front of unrelated trailing bytes:
//!
//! ```text
//! anchor = footer_offset or source length
//! trailing magic at anchor - 6
//! footer length at anchor - 10
//! footer at anchor - 10 - footer_length
//! ```
//!
//! All dictionaries are loaded when the file is opened, so record batches
//! can then be read in any order.

use crate::error::{BlockKind, IpcError, Location};
use crate::footer::{Block, Footer, MIN_FILE_SIZE, TRAILER_SIZE};
use crate::reader::{cursor, read_raw, RawRead, ReadMessage};
use crate::writer::{MessageSink, WriteStats, WriterCore};
use bytes::Bytes;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tabwire_core::{FrameConversion, FromTableOptions, RecordBatch, SchemaRef, Table};
use tabwire_protocol::{
    decode_record_batch, DictionaryMemo, Message, MessageHeader, MessageKind, MetadataVersion,
    ProtocolError, UsageError, WriteOptions, FILE_MAGIC, FILE_MAGIC_PADDED,
};
use tracing::debug;

/// Writes record batches as a random-access file.
#[derive(Debug)]
pub struct FileWriter<W: Write> {
    sink: MessageSink<W>,
    core: WriterCore,
    dictionaries: Vec<Block>,
    record_batches: Vec<Block>,
}

impl<W: Write> FileWriter<W> {
    pub fn new(sink: W, options: WriteOptions) -> Result<Self, IpcError> {
        Ok(Self {
            sink: MessageSink::new(sink, options),
            core: WriterCore::new(options, false)?,
            dictionaries: Vec::new(),
            record_batches: Vec::new(),
        })
    }

    /// Writer that has already written the leading magic and schema.
    pub fn try_new(
        sink: W,
        schema: impl Into<SchemaRef>,
        options: WriteOptions,
    ) -> Result<Self, IpcError> {
        let mut writer = Self::new(sink, options)?;
        writer.open(schema)?;
        Ok(writer)
    }

    pub fn open(&mut self, schema: impl Into<SchemaRef>) -> Result<(), IpcError> {
        let message = self.core.open(schema.into())?;
        self.sink.write_raw(&FILE_MAGIC_PADDED)?;
        self.sink.write_message(&message)?;
        Ok(())
    }

    /// Writes the dictionaries `batch` needs, then the batch. A dictionary
    /// may grow between batches but not be replaced.
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), IpcError> {
        for message in self.core.plan_batch(batch)? {
            let block = self.sink.write_message(&message)?;
            match message.kind() {
                MessageKind::DictionaryBatch => self.dictionaries.push(block),
                _ => self.record_batches.push(block),
            }
        }
        Ok(())
    }

    pub fn write_table(&mut self, table: &Table) -> Result<(), IpcError> {
        for batch in table.batches() {
            self.write_batch(batch)?;
        }
        Ok(())
    }

    /// Writes the end-of-stream marker, footer, footer length and trailing
    /// magic. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), IpcError> {
        if !self.core.close()? {
            return Ok(());
        }
        let schema = self
            .core
            .schema()
            .ok_or(IpcError::Usage(UsageError::NotOpen))?;
        self.sink.write_end_of_stream()?;

        let mut footer = Footer::new(self.core.options().metadata_version, schema.as_ref().clone());
        footer.dictionaries = std::mem::take(&mut self.dictionaries);
        footer.record_batches = std::mem::take(&mut self.record_batches);
        let encoded = footer.encode().map_err(IpcError::Encode)?;

        self.sink.write_raw(&encoded)?;
        self.sink.write_raw(&(encoded.len() as i32).to_le_bytes())?;
        self.sink.write_raw(&FILE_MAGIC)?;
        self.sink.flush()?;
        debug!(
            "Closed file: {} record batches, {} dictionary batches, {} bytes",
            footer.record_batches.len(),
            footer.dictionaries.len(),
            self.sink.position()
        );
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W, IpcError> {
        if self.core.schema().is_some() {
            self.close()?;
        }
        Ok(self.sink.into_inner())
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.core.schema()
    }

    pub fn options(&self) -> &WriteOptions {
        self.core.options()
    }

    pub fn stats(&self) -> WriteStats {
        self.sink.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

/// Random-access reader over a file.
#[derive(Debug)]
pub struct FileReader<R> {
    source: R,
    footer: Footer,
    schema: SchemaRef,
    memo: DictionaryMemo,
    next: usize,
}

fn read_at<R: Read + Seek>(
    source: &mut R,
    offset: u64,
    len: usize,
    location: Location,
) -> Result<Vec<u8>, IpcError> {
    source.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len);
    source.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(IpcError::decode(
            location,
            ProtocolError::Truncated {
                region: "file",
                expected: len,
                actual: buf.len(),
            },
        ));
    }
    Ok(buf)
}

impl<R: Read + Seek> FileReader<R> {
    /// Opens a file, reading its footer and every dictionary block.
    pub fn try_new(mut source: R, footer_offset: Option<u64>) -> Result<Self, IpcError> {
        let length = source.seek(SeekFrom::End(0))?;
        let anchor = match footer_offset {
            Some(offset) if offset > length => {
                return Err(IpcError::decode(
                    Location::Footer,
                    ProtocolError::InvalidFooter(format!(
                        "footer offset {} is past the end of the source ({} bytes)",
                        offset, length
                    )),
                ))
            }
            Some(offset) => offset,
            None => length,
        };

        let head_len = (anchor as usize).min(FILE_MAGIC_PADDED.len());
        let head = read_at(&mut source, 0, head_len, Location::FileHeader)?;
        if head[..] != FILE_MAGIC_PADDED[..] {
            return Err(IpcError::decode(
                Location::FileHeader,
                ProtocolError::InvalidMagic {
                    location: "file header",
                    found: head,
                },
            ));
        }
        if anchor < MIN_FILE_SIZE as u64 {
            return Err(IpcError::decode(
                Location::Footer,
                ProtocolError::Truncated {
                    region: "file",
                    expected: MIN_FILE_SIZE,
                    actual: anchor as usize,
                },
            ));
        }

        let trailer = read_at(
            &mut source,
            anchor - TRAILER_SIZE as u64,
            TRAILER_SIZE,
            Location::Footer,
        )?;
        if trailer[4..] != FILE_MAGIC[..] {
            return Err(IpcError::decode(
                Location::Footer,
                ProtocolError::InvalidMagic {
                    location: "file trailer",
                    found: trailer[4..].to_vec(),
                },
            ));
        }
        let footer_len = i32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let available = anchor - MIN_FILE_SIZE as u64;
        if footer_len <= 0 || footer_len as u64 > available {
            return Err(IpcError::decode(
                Location::Footer,
                ProtocolError::InvalidFooter(format!(
                    "footer length {} does not fit in {} bytes",
                    footer_len, available
                )),
            ));
        }
        let footer_start = anchor - TRAILER_SIZE as u64 - footer_len as u64;
        let raw = read_at(
            &mut source,
            footer_start,
            footer_len as usize,
            Location::Footer,
        )?;
        let footer = Footer::decode(&raw)
            .and_then(|footer| footer.check_blocks(footer_start).map(|_| footer))
            .map_err(|e| IpcError::decode(Location::Footer, e))?;

        let schema: SchemaRef = Arc::new(footer.schema.clone());
        let mut reader = Self {
            memo: DictionaryMemo::from_schema(&schema),
            source,
            footer,
            schema,
            next: 0,
        };
        reader.load_dictionaries()?;
        debug!(
            "Opened file: {} record batches, {} dictionary blocks, footer at {}",
            reader.num_record_batches(),
            reader.num_dictionaries(),
            footer_start
        );
        Ok(reader)
    }

    fn load_dictionaries(&mut self) -> Result<(), IpcError> {
        for index in 0..self.footer.dictionaries.len() {
            let location = Location::Block {
                kind: BlockKind::Dictionary,
                index,
            };
            let block = self.footer.dictionaries[index];
            let message = self.read_block(&block, location)?;
            match &message.header {
                MessageHeader::DictionaryBatch(header) => {
                    self.memo
                        .apply(header, &message.body)
                        .map_err(|e| IpcError::decode(location, e))?;
                }
                other => {
                    return Err(IpcError::decode(
                        location,
                        ProtocolError::UnexpectedMessageKind {
                            expected: MessageKind::DictionaryBatch,
                            actual: other.kind(),
                        },
                    ))
                }
            }
        }
        Ok(())
    }

    fn read_block(&mut self, block: &Block, location: Location) -> Result<Message, IpcError> {
        self.source.seek(SeekFrom::Start(block.offset))?;
        let read = match read_raw(&mut self.source, block.offset, location)? {
            RawRead::Message(read) => read,
            RawRead::EndOfStream(_) | RawRead::Eof => {
                return Err(IpcError::decode(
                    location,
                    ProtocolError::InvalidFooter(format!(
                        "no message at block offset {}",
                        block.offset
                    )),
                ))
            }
        };
        check_block(block, &read).map_err(|e| IpcError::decode(location, e))?;
        Ok(read.message)
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Metadata version recorded in the footer.
    pub fn version(&self) -> MetadataVersion {
        self.footer
            .metadata_version()
            .unwrap_or(MetadataVersion::V5)
    }

    pub fn num_record_batches(&self) -> usize {
        self.footer.record_batches.len()
    }

    pub fn num_dictionaries(&self) -> usize {
        self.footer.dictionaries.len()
    }

    pub fn dictionaries(&self) -> &DictionaryMemo {
        &self.memo
    }

    /// Reads record batch `index` directly from its block.
    pub fn get_batch(&mut self, index: usize) -> Result<RecordBatch, IpcError> {
        let location = Location::Block {
            kind: BlockKind::RecordBatch,
            index,
        };
        let count = self.num_record_batches();
        let block = *self.footer.record_batches.get(index).ok_or_else(|| {
            IpcError::decode(location, ProtocolError::IndexOutOfRange { index, count })
        })?;
        let message = self.read_block(&block, location)?;
        match &message.header {
            MessageHeader::RecordBatch(header) => {
                decode_record_batch(header, &message.body, &self.schema, &self.memo)
                    .map_err(|e| IpcError::decode(location, e))
            }
            other => Err(IpcError::decode(
                location,
                ProtocolError::UnexpectedMessageKind {
                    expected: MessageKind::RecordBatch,
                    actual: other.kind(),
                },
            )),
        }
    }

    /// Reads every record batch, in footer order, into a table.
    pub fn read_all(&mut self) -> Result<Table, IpcError> {
        let batches = (0..self.num_record_batches())
            .map(|i| self.get_batch(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table::try_new(self.schema.clone(), batches)?)
    }

    pub fn read_frame<F: FrameConversion>(&mut self, options: &FromTableOptions) -> Result<F, IpcError> {
        let table = self.read_all()?;
        Ok(F::from_table(&table, options)?)
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

fn check_block(block: &Block, read: &ReadMessage) -> Result<(), ProtocolError> {
    if read.lengths.metadata_length as u64 != block.metadata_length as u64
        || read.lengths.body_length as u64 != block.body_length
    {
        return Err(ProtocolError::InvalidFooter(format!(
            "block at offset {} lists {}+{} bytes but the message spans {}+{}",
            block.offset,
            block.metadata_length,
            block.body_length,
            read.lengths.metadata_length,
            read.lengths.body_length
        )));
    }
    Ok(())
}

impl FileReader<Cursor<Bytes>> {
    /// Reader over an in-memory file. Each block is copied once out of
    /// `bytes`; decoded buffers share that copy.
    pub fn from_bytes(bytes: impl Into<Bytes>, footer_offset: Option<u64>) -> Result<Self, IpcError> {
        Self::try_new(cursor(bytes), footer_offset)
    }
}

/// Iterates record batches in footer order.
impl<R: Read + Seek> Iterator for FileReader<R> {
    type Item = Result<RecordBatch, IpcError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.num_record_batches() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.get_batch(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabwire_core::{ArrayData, DataType, Field, IndexType, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(
                "tag",
                DataType::dictionary(7, IndexType::Int16, DataType::Utf8),
                true,
            ),
        ]))
    }

    fn batch(ids: &[i64], dictionary: &[&str]) -> RecordBatch {
        let values = Arc::new(ArrayData::from_strs(
            &dictionary.iter().map(|v| Some(*v)).collect::<Vec<_>>(),
        ));
        let keys: Vec<Option<i64>> = ids
            .iter()
            .map(|i| Some(*i % dictionary.len() as i64))
            .collect();
        RecordBatch::try_new(
            schema(),
            vec![
                ArrayData::from_values(ids),
                ArrayData::new_dictionary(7, IndexType::Int16, &keys, values).unwrap(),
            ],
        )
        .unwrap()
    }

    fn write_file(batches: &[RecordBatch]) -> Vec<u8> {
        let mut writer = FileWriter::try_new(Vec::new(), schema(), WriteOptions::default()).unwrap();
        for batch in batches {
            writer.write_batch(batch).unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn test_layout() {
        let buf = write_file(&[batch(&[1, 2, 3], &["a", "b"])]);
        assert_eq!(&buf[..8], b"ARROW1\0\0");
        assert_eq!(&buf[buf.len() - 6..], b"ARROW1");

        let reader = FileReader::from_bytes(buf, None).unwrap();
        assert_eq!(reader.num_record_batches(), 1);
        assert_eq!(reader.num_dictionaries(), 1);
        assert_eq!(reader.version(), MetadataVersion::V5);
        assert_eq!(reader.footer().record_batches[0].offset % 8, 0);
    }

    #[test]
    fn test_random_access_with_deltas() {
        let batches = vec![
            batch(&[1, 2], &["a", "b"]),
            batch(&[3, 4, 5], &["a", "b", "c"]),
            batch(&[6], &["a", "b", "c"]),
        ];
        let mut reader = FileReader::from_bytes(write_file(&batches), None).unwrap();
        assert_eq!(reader.num_dictionaries(), 2);

        // The delta was folded in at open, so every batch sees the full
        // dictionary.
        let last = reader.get_batch(2).unwrap();
        assert_eq!(last.column(1).unwrap().format_value(0), "a");
        let middle = reader.get_batch(1).unwrap();
        assert_eq!(middle.column(1).unwrap().format_value(2), "c");
        assert_eq!(middle.column(0), batches[1].column(0));

        let err = reader.get_batch(3).unwrap_err();
        assert_eq!(
            err.location(),
            Some(Location::Block {
                kind: BlockKind::RecordBatch,
                index: 3
            })
        );
        assert!(matches!(
            err,
            IpcError::Decode {
                source: ProtocolError::IndexOutOfRange { index: 3, count: 3 },
                ..
            }
        ));

        let collected: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(collected.len(), 3);
    }

    #[test]
    fn test_replacement_rejected() {
        let mut writer = FileWriter::try_new(Vec::new(), schema(), WriteOptions::default()).unwrap();
        writer.write_batch(&batch(&[1], &["a", "b"])).unwrap();
        let err = writer.write_batch(&batch(&[1], &["x", "y"])).unwrap_err();
        assert!(matches!(
            err,
            IpcError::Usage(UsageError::DictionaryReplacement { id: 7 })
        ));
    }

    fn two_dictionary_batch(a: &[&str], b: &[&str]) -> RecordBatch {
        let column = |id: i64, dictionary: &[&str]| {
            let values = Arc::new(ArrayData::from_strs(
                &dictionary.iter().map(|v| Some(*v)).collect::<Vec<_>>(),
            ));
            let last = dictionary.len() as i64 - 1;
            ArrayData::new_dictionary(id, IndexType::Int8, &[Some(last)], values).unwrap()
        };
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::dictionary(0, IndexType::Int8, DataType::Utf8), true),
            Field::new("b", DataType::dictionary(1, IndexType::Int8, DataType::Utf8), true),
        ]));
        RecordBatch::try_new(schema, vec![column(0, a), column(1, b)]).unwrap()
    }

    #[test]
    fn test_rejected_batch_leaves_dictionaries_unsent() {
        let first = two_dictionary_batch(&["x"], &["p"]);
        let mut writer =
            FileWriter::try_new(Vec::new(), first.schema().clone(), WriteOptions::default()).unwrap();
        writer.write_batch(&first).unwrap();

        // Column a extends its dictionary, column b replaces its own.
        let err = writer
            .write_batch(&two_dictionary_batch(&["x", "y"], &["q"]))
            .unwrap_err();
        assert!(matches!(
            err,
            IpcError::Usage(UsageError::DictionaryReplacement { id: 1 })
        ));

        let third = two_dictionary_batch(&["x", "y"], &["p"]);
        writer.write_batch(&third).unwrap();
        let mut reader = FileReader::from_bytes(writer.into_inner().unwrap(), None).unwrap();
        assert_eq!(reader.num_record_batches(), 2);
        assert_eq!(reader.num_dictionaries(), 3);
        let read = reader.get_batch(1).unwrap();
        assert_eq!(read.column(0).unwrap().format_value(0), "y");
        assert_eq!(read.column(1).unwrap().format_value(0), "p");
    }

    #[test]
    fn test_overflowing_block_offset() {
        let buf = write_file(&[batch(&[1], &["a"])]);
        let trailer_start = buf.len() - TRAILER_SIZE;
        let footer_len =
            i32::from_le_bytes(buf[trailer_start..trailer_start + 4].try_into().unwrap()) as usize;
        let footer_start = trailer_start - footer_len;
        let mut footer = Footer::decode(&buf[footer_start..trailer_start]).unwrap();
        footer.record_batches[0].offset = u64::MAX - 4;

        let encoded = footer.encode().unwrap();
        let mut corrupted = buf[..footer_start].to_vec();
        corrupted.extend_from_slice(&encoded);
        corrupted.extend_from_slice(&(encoded.len() as i32).to_le_bytes());
        corrupted.extend_from_slice(&FILE_MAGIC);

        let err = FileReader::from_bytes(corrupted, None).unwrap_err();
        assert_eq!(err.location(), Some(Location::Footer));
        assert!(matches!(
            err,
            IpcError::Decode {
                source: ProtocolError::InvalidFooter(_),
                ..
            }
        ));
    }

    #[test]
    fn test_bad_leading_magic() {
        let mut buf = write_file(&[batch(&[1], &["a"])]);
        buf[0] = b'X';
        let err = FileReader::from_bytes(buf, None).unwrap_err();
        assert_eq!(err.location(), Some(Location::FileHeader));
    }

    #[test]
    fn test_bad_trailing_magic() {
        let mut buf = write_file(&[batch(&[1], &["a"])]);
        let last = buf.len() - 1;
        buf[last] = b'!';
        let err = FileReader::from_bytes(buf, None).unwrap_err();
        assert_eq!(err.location(), Some(Location::Footer));
        assert!(matches!(
            err,
            IpcError::Decode {
                source: ProtocolError::InvalidMagic { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_footer_offset() {
        let file = write_file(&[batch(&[1, 2], &["a"])]);
        let end = file.len() as u64;
        let mut padded = file.clone();
        padded.extend_from_slice(b"trailing garbage that is not a file");

        assert!(FileReader::from_bytes(padded.clone(), None).is_err());
        let mut reader = FileReader::from_bytes(padded.clone(), Some(end)).unwrap();
        assert_eq!(reader.read_all().unwrap().num_rows(), 2);

        let err = FileReader::from_bytes(padded.clone(), Some(padded.len() as u64 + 1)).unwrap_err();
        assert_eq!(err.location(), Some(Location::Footer));
    }

    #[test]
    fn test_tiny_source() {
        let err = FileReader::from_bytes(Bytes::from_static(b"ARROW1\0\0ARROW1"), None).unwrap_err();
        assert!(err.is_decode());
        let err = FileReader::from_bytes(Bytes::from_static(b"ARR"), None).unwrap_err();
        assert_eq!(err.location(), Some(Location::FileHeader));
    }
}
