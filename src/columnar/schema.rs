//! The fixed Arrow schema for event blobs, field-for-field with [`Event`]
//! (spec §3: "Columnar encoding ... matches the Event record field-for-field").

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;

use crate::errors::AppError;
use crate::schema::{Event, NUM_PCA_FEATURES};

/// Builds the Arrow schema once; every blob is written with this schema.
pub fn arrow_schema() -> Schema {
    let mut fields = vec![
        Field::new("event_id", DataType::Utf8, false),
        Field::new(
            "ts",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("user_id", DataType::Utf8, false),
        Field::new("amount", DataType::Float64, false),
        Field::new("currency", DataType::Utf8, false),
        Field::new("country", DataType::Utf8, false),
        Field::new("device_id", DataType::Utf8, false),
        Field::new("ip", DataType::Utf8, false),
        Field::new("merchant_id", DataType::Utf8, false),
    ];
    for i in 1..=NUM_PCA_FEATURES {
        fields.push(Field::new(format!("V{i}"), DataType::Float64, false));
    }
    fields.push(Field::new("amount_normalized", DataType::Float64, false));
    Schema::new(fields)
}

/// Converts a batch of validated events into one [`RecordBatch`] matching
/// [`arrow_schema`]. The writer rejects nothing here because every event
/// was already validated at the ingest HTTP boundary (spec §4.1: "The
/// writer rejects batches whose rows violate the schema" — satisfied by
/// construction, since [`Event`] cannot represent an invalid row).
pub fn build_record_batch(events: &[Event]) -> Result<RecordBatch, AppError> {
    let schema = Arc::new(arrow_schema());

    let event_id: ArrayRef = Arc::new(StringArray::from_iter_values(
        events.iter().map(|e| e.event_id.as_str()),
    ));
    let ts: ArrayRef = Arc::new(
        TimestampMicrosecondArray::from_iter_values(
            events.iter().map(|e| e.ts.timestamp_micros()),
        )
        .with_timezone("UTC"),
    );
    let user_id: ArrayRef = Arc::new(StringArray::from_iter_values(
        events.iter().map(|e| e.user_id.as_str()),
    ));
    let amount: ArrayRef = Arc::new(Float64Array::from_iter_values(
        events.iter().map(|e| e.amount),
    ));
    let currency: ArrayRef = Arc::new(StringArray::from_iter_values(
        events.iter().map(|e| e.currency.as_str()),
    ));
    let country: ArrayRef = Arc::new(StringArray::from_iter_values(
        events.iter().map(|e| e.country.as_str()),
    ));
    let device_id: ArrayRef = Arc::new(StringArray::from_iter_values(
        events.iter().map(|e| e.device_id.as_str()),
    ));
    let ip: ArrayRef = Arc::new(StringArray::from_iter_values(
        events.iter().map(|e| e.ip.as_str()),
    ));
    let merchant_id: ArrayRef = Arc::new(StringArray::from_iter_values(
        events.iter().map(|e| e.merchant_id.as_str()),
    ));

    let mut columns = vec![
        event_id,
        ts,
        user_id,
        amount,
        currency,
        country,
        device_id,
        ip,
        merchant_id,
    ];

    for i in 0..NUM_PCA_FEATURES {
        let column: ArrayRef = Arc::new(Float64Array::from_iter_values(
            events.iter().map(|e| e.v[i]),
        ));
        columns.push(column);
    }

    columns.push(Arc::new(Float64Array::from_iter_values(
        events.iter().map(|e| e.amount_normalized),
    )));

    RecordBatch::try_new(schema, columns)
        .map_err(|e| AppError::ColumnarWrite(format!("failed to build record batch: {e}")))
}
