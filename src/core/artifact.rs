//! Parquet encoding of registration batches and artifact key naming.

use crate::domain::model::{EvType, RegistrationRecord};
use crate::utils::error::{EtlError, Result};
use arrow::array::{Array, ArrayRef, Int32Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

pub const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";
pub const STAGING_SUFFIX: &str = ".partial";

pub fn artifact_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("source_id", DataType::Utf8, true),
        Field::new("make", DataType::Utf8, false),
        Field::new("model", DataType::Utf8, false),
        Field::new("model_year", DataType::Int32, false),
        Field::new("ev_type", DataType::Utf8, false),
        Field::new("electric_range", DataType::Int32, false),
        Field::new("city", DataType::Utf8, false),
        Field::new("state", DataType::Utf8, false),
        Field::new(
            "extracted_at",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
    ]))
}

/// File-level metadata stored in the Parquet footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    pub extracted_at: DateTime<Utc>,
    pub source_url: String,
}

/// 序列化為 Snappy 壓縮的 Parquet（整批一次寫入記憶體）
pub fn encode_parquet(records: &[RegistrationRecord], metadata: &ArtifactMetadata) -> Result<Vec<u8>> {
    let schema = artifact_schema();
    let extracted_at_ms = metadata.extracted_at.timestamp_millis();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.source_id.as_deref())
                .collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.make.as_str()))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.model.as_str()))),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.model_year))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.ev_type.code()))),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.electric_range))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.city.as_str()))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.state.as_str()))),
        Arc::new(
            TimestampMillisecondArray::from(vec![extracted_at_ms; records.len()])
                .with_timezone("UTC"),
        ),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![
            KeyValue::new(
                "extracted_at".to_string(),
                metadata
                    .extracted_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            KeyValue::new("source_url".to_string(), metadata.source_url.clone()),
            KeyValue::new("record_count".to_string(), records.len().to_string()),
        ]))
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(properties))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(buffer)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| EtlError::ArtifactError {
            message: format!("column '{}' is missing or not utf8", name),
        })
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| EtlError::ArtifactError {
            message: format!("column '{}' is missing or not int32", name),
        })
}

/// Reads an artifact back into records, in file order.
pub fn decode_parquet(data: Bytes) -> Result<Vec<RegistrationRecord>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)?.build()?;
    let mut records = Vec::new();

    for batch in reader {
        let batch = batch?;
        let source_id = string_column(&batch, "source_id")?;
        let make = string_column(&batch, "make")?;
        let model = string_column(&batch, "model")?;
        let model_year = int_column(&batch, "model_year")?;
        let ev_types = string_column(&batch, "ev_type")?;
        let electric_range = int_column(&batch, "electric_range")?;
        let city = string_column(&batch, "city")?;
        let state = string_column(&batch, "state")?;

        for row in 0..batch.num_rows() {
            let raw_type = ev_types.value(row);
            let ev_type = EvType::parse(raw_type).ok_or_else(|| EtlError::ArtifactError {
                message: format!("row {} has unknown ev_type '{}'", row, raw_type),
            })?;

            records.push(RegistrationRecord {
                source_id: (!source_id.is_null(row)).then(|| source_id.value(row).to_string()),
                make: make.value(row).to_string(),
                model: model.value(row).to_string(),
                model_year: model_year.value(row),
                ev_type,
                electric_range: electric_range.value(row),
                city: city.value(row).to_string(),
                state: state.value(row).to_string(),
            });
        }
    }

    Ok(records)
}

/// Reads the footer's `extracted_at` entry, if present.
pub fn read_extracted_at(data: Bytes) -> Result<Option<DateTime<Utc>>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    let value = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|entries| entries.iter().find(|kv| kv.key == "extracted_at"))
        .and_then(|kv| kv.value.clone());

    Ok(value
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

/// Derives the append-only key for one run:
/// `raw/ev.parquet` → `raw/ev_20261016T101500123Z_1a2b3c4d.parquet`.
pub fn artifact_key(base_key: &str, extracted_at: DateTime<Utc>, run_id: &str) -> String {
    let (directory, file_name) = match base_key.rsplit_once('/') {
        Some((directory, file_name)) => (Some(directory), file_name),
        None => (None, base_key),
    };
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, extension),
        _ => (file_name, "parquet"),
    };

    let stamped = format!(
        "{}_{}_{}.{}",
        stem,
        extracted_at.format("%Y%m%dT%H%M%S%3fZ"),
        run_id,
        extension
    );

    match directory {
        Some(directory) => format!("{}/{}", directory, stamped),
        None => stamped,
    }
}

pub fn staging_key(final_key: &str, run_id: &str) -> String {
    format!("{}.{}{}", final_key, run_id, STAGING_SUFFIX)
}

pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
