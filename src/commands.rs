//! Command execution.

use crate::{Commands, Container};
use bytes::Bytes;
use colored::Colorize;
use serde_json::{Map, Value};
use std::error::Error;
use std::fs;
use std::io::{BufWriter, Cursor};
use std::path::Path;
use tabwire_core::{RecordBatch, SchemaRef, Table};
use tabwire_ipc::{new_file, new_stream, FileReader, MessageReader, StreamReader};
use tabwire_protocol::{MetadataVersion, WriteOptions, FILE_MAGIC_PADDED};

type CmdResult<T> = Result<T, Box<dyn Error>>;

/// Executes a command and returns the formatted output.
pub fn execute(cmd: Commands) -> CmdResult<String> {
    match cmd {
        Commands::Inspect {
            input,
            footer_offset,
        } => inspect(&input, footer_offset),

        Commands::Cat {
            input,
            limit,
            json,
            footer_offset,
        } => {
            let table = read_table(&input, footer_offset)?;
            Ok(format_rows(&table, limit, json))
        }

        Commands::Convert {
            input,
            output,
            to,
            legacy_format,
            metadata_version,
            no_deltas,
        } => {
            let table = read_table(&input, None)?;
            let (use_legacy_format, options) = match (metadata_version, no_deltas) {
                (None, false) => (legacy_format.then_some(true), None),
                (version, _) => {
                    let version = match version {
                        Some(4) => MetadataVersion::V4,
                        _ => MetadataVersion::V5,
                    };
                    let options = WriteOptions::new()
                        .with_legacy_framing(legacy_format)
                        .with_metadata_version(version)
                        .with_dictionary_deltas(!no_deltas);
                    (None, Some(options))
                }
            };

            let sink = BufWriter::new(fs::File::create(&output)?);
            let schema = table.schema().clone();
            let stats = match to {
                Container::Stream => {
                    let mut writer = new_stream(sink, schema, use_legacy_format, options)?;
                    writer.write_table(&table)?;
                    writer.close()?;
                    writer.stats()
                }
                Container::File => {
                    let mut writer = new_file(sink, schema, use_legacy_format, options)?;
                    writer.write_table(&table)?;
                    writer.close()?;
                    writer.stats()
                }
            };
            Ok(format!(
                "{} {} rows in {} batches to {} ({} dictionary batches, {} bytes)",
                "Wrote".green(),
                table.num_rows(),
                stats.record_batches,
                output.display().to_string().cyan(),
                stats.dictionary_batches,
                stats.bytes_written
            ))
        }
    }
}

fn load(path: &Path) -> CmdResult<Bytes> {
    Ok(Bytes::from(fs::read(path)?))
}

fn is_file(bytes: &[u8]) -> bool {
    bytes.starts_with(&FILE_MAGIC_PADDED)
}

fn read_table(path: &Path, footer_offset: Option<u64>) -> CmdResult<Table> {
    let bytes = load(path)?;
    let table = if is_file(&bytes) {
        FileReader::from_bytes(bytes, footer_offset)?.read_all()?
    } else {
        StreamReader::from_bytes(bytes)?.read_all()?
    };
    Ok(table)
}

fn inspect(path: &Path, footer_offset: Option<u64>) -> CmdResult<String> {
    let bytes = load(path)?;
    if is_file(&bytes) {
        return inspect_file(bytes, footer_offset);
    }

    let mut lines = Vec::new();
    let mut reader = MessageReader::new(Cursor::new(bytes));
    while let Some(read) = reader.next_message()? {
        lines.push(format!(
            "{:>10}  {:<16} {:>8} {:>10}  {}",
            read.offset,
            read.message.kind().to_string(),
            read.lengths.metadata_length,
            read.lengths.body_length,
            read.message.version
        ));
    }
    let epoch = reader
        .epoch()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut output = format!(
        "{} ({} framing, {} messages, {} bytes)\n",
        "Stream".bold(),
        epoch.yellow(),
        lines.len(),
        reader.position()
    );
    output.push_str(
        &format!(
            "{:>10}  {:<16} {:>8} {:>10}  {}",
            "offset", "kind", "metadata", "body", "version"
        )
        .dimmed()
        .to_string(),
    );
    for line in lines {
        output.push('\n');
        output.push_str(&line);
    }
    Ok(output)
}

fn inspect_file(bytes: Bytes, footer_offset: Option<u64>) -> CmdResult<String> {
    let reader = FileReader::from_bytes(bytes, footer_offset)?;
    let footer = reader.footer();
    let mut output = format!(
        "{} ({}, {} record batches, {} dictionary blocks)\n{}\n",
        "File".bold(),
        reader.version().to_string().yellow(),
        footer.record_batches.len(),
        footer.dictionaries.len(),
        format_schema(reader.schema())
    );
    output.push_str(
        &format!(
            "{:<12} {:>5} {:>10} {:>8} {:>10}",
            "block", "index", "offset", "metadata", "body"
        )
        .dimmed()
        .to_string(),
    );
    let blocks = footer
        .dictionaries
        .iter()
        .enumerate()
        .map(|(i, b)| ("dictionary", i, b))
        .chain(
            footer
                .record_batches
                .iter()
                .enumerate()
                .map(|(i, b)| ("record_batch", i, b)),
        );
    for (kind, index, block) in blocks {
        output.push_str(&format!(
            "\n{:<12} {:>5} {:>10} {:>8} {:>10}",
            kind, index, block.offset, block.metadata_length, block.body_length
        ));
    }
    Ok(output)
}

fn format_schema(schema: &SchemaRef) -> String {
    schema
        .to_string()
        .lines()
        .map(|l| format!("  {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_rows(table: &Table, limit: Option<usize>, json: bool) -> String {
    let limit = limit.unwrap_or(usize::MAX);
    let mut lines = Vec::new();
    if !json {
        let header = table
            .schema()
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        lines.push(header.bold().to_string());
    }

    'batches: for batch in table.batches() {
        for row in 0..batch.num_rows() {
            if lines.len() - usize::from(!json) >= limit {
                break 'batches;
            }
            lines.push(if json {
                row_json(batch, row).to_string()
            } else {
                batch
                    .columns()
                    .iter()
                    .map(|c| c.format_value(row))
                    .collect::<Vec<_>>()
                    .join(" | ")
            });
        }
    }

    if lines.len() == usize::from(!json) {
        return "No rows".yellow().to_string();
    }
    lines.join("\n")
}

fn row_json(batch: &RecordBatch, row: usize) -> Value {
    let mut object = Map::new();
    for (field, column) in batch.schema().fields.iter().zip(batch.columns()) {
        let value = if column.is_null(row) {
            Value::Null
        } else {
            Value::String(column.format_value(row))
        };
        object.insert(field.name.clone(), value);
    }
    Value::Object(object)
}
