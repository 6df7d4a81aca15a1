use std::io::Cursor;
use std::sync::Arc;

use proptest::prelude::*;
use tabwire_core::{ArrayData, DataType, Field, RecordBatch, Schema, SchemaRef};
use tabwire_ipc::{FileReader, FileWriter, StreamReader, StreamWriter};
use tabwire_protocol::{FramingEpoch, MetadataVersion, WriteOptions};

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("n", DataType::Int64, true),
        Field::new("s", DataType::Utf8, true),
    ]))
}

fn batch(rows: &[(Option<i64>, Option<String>)]) -> RecordBatch {
    let ns: Vec<Option<i64>> = rows.iter().map(|(n, _)| *n).collect();
    let ss: Vec<Option<String>> = rows.iter().map(|(_, s)| s.clone()).collect();
    RecordBatch::try_new(
        schema(),
        vec![ArrayData::from_options(&ns), ArrayData::from_strs(&ss)],
    )
    .unwrap()
}

fn rows() -> impl Strategy<Value = Vec<(Option<i64>, Option<String>)>> {
    prop::collection::vec(
        (
            prop::option::of(any::<i64>()),
            prop::option::of("[a-z]{0,12}"),
        ),
        0..40,
    )
}

proptest! {
    #[test]
    fn prop_stream_and_file_preserve_batches(
        chunks in prop::collection::vec(rows(), 0..5),
        legacy: bool,
        v4: bool,
    ) {
        let version = if v4 { MetadataVersion::V4 } else { MetadataVersion::V5 };
        let options = WriteOptions::new()
            .with_legacy_framing(legacy)
            .with_metadata_version(version);
        let batches: Vec<RecordBatch> = chunks.iter().map(|c| batch(c)).collect();

        let mut stream = StreamWriter::try_new(Vec::new(), schema(), options).unwrap();
        let mut file = FileWriter::try_new(Vec::new(), schema(), options).unwrap();
        for b in &batches {
            stream.write_batch(b).unwrap();
            file.write_batch(b).unwrap();
        }

        let stream_bytes = stream.into_inner().unwrap();
        let mut reader = StreamReader::try_new(Cursor::new(&stream_bytes[..])).unwrap();
        let expected_epoch = if legacy { FramingEpoch::Legacy } else { FramingEpoch::Current };
        prop_assert_eq!(reader.epoch(), expected_epoch);
        let table = reader.read_all().unwrap();
        prop_assert_eq!(table.batches(), &batches[..]);

        let mut reader = FileReader::from_bytes(file.into_inner().unwrap(), None).unwrap();
        prop_assert_eq!(reader.version(), version);
        prop_assert_eq!(reader.num_record_batches(), batches.len());
        for (i, b) in batches.iter().enumerate() {
            prop_assert_eq!(&reader.get_batch(i).unwrap(), b);
        }
    }
}
