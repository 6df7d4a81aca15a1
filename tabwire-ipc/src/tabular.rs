//! Tabular round trip: frame to stream bytes and back.

use crate::error::IpcError;
use crate::stream::StreamReader;
use bytes::Bytes;
use tabwire_core::{FrameConversion, FromTableOptions, ToBatchOptions};
use tracing::debug;

/// Serializes `frame` as a single-batch stream with default write options.
///
/// `nthreads` bounds the per-column conversion (`None` uses the global
/// pool). `preserve_index` controls whether the frame's index is stored.
pub fn serialize_dataframe<F: FrameConversion>(
    frame: &F,
    nthreads: Option<usize>,
    preserve_index: Option<bool>,
) -> Result<Bytes, IpcError> {
    let batch = frame.to_record_batch(&ToBatchOptions {
        nthreads,
        preserve_index,
    })?;
    let mut writer = crate::new_stream(Vec::new(), batch.schema().clone(), None, None)?;
    writer.write_batch(&batch)?;
    let buf = writer.into_inner()?;
    debug!(
        "Serialized frame: {} rows, {} columns, {} bytes",
        batch.num_rows(),
        batch.num_columns(),
        buf.len()
    );
    Ok(Bytes::from(buf))
}

/// Reads a stream produced by [`serialize_dataframe`] back into a frame.
pub fn deserialize_dataframe<F: FrameConversion>(
    buf: impl Into<Bytes>,
    use_threads: bool,
) -> Result<F, IpcError> {
    let mut reader = StreamReader::from_bytes(buf)?;
    reader.read_frame(&FromTableOptions { use_threads })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabwire_core::{ArrayData, DataFrame, Index};

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            ("a".to_string(), ArrayData::from_values(&[1i64, 2, 3])),
            (
                "b".to_string(),
                ArrayData::from_strs(&[Some("x"), None, Some("z")]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let original = frame();
        let buf = serialize_dataframe(&original, None, None).unwrap();
        let restored: DataFrame = deserialize_dataframe(buf, true).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_roundtrip_sequential() {
        let original = frame();
        let buf = serialize_dataframe(&original, Some(1), None).unwrap();
        let restored: DataFrame = deserialize_dataframe(buf, false).unwrap();
        assert_eq!(restored.columns(), original.columns());
        assert_eq!(restored.index(), &Index::default_range(3));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = deserialize_dataframe::<DataFrame>(Bytes::from_static(b"nope"), true).unwrap_err();
        assert!(err.is_decode());
    }
}
