use std::io::Write;

use clap::ValueEnum;
use jiff::Timestamp;
use jiff::tz::TimeZone;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::OutputError;
use crate::extract::Row;

pub const CSV_HEADER: [&str; 5] = ["date", "close", "open", "high", "low"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Csv,
    Json,
}

/// How the leading date cell is rendered.
#[derive(Debug, Clone)]
pub enum DateStyle {
    /// CSV keeps the provider's unix seconds; JSON renders them as RFC 3339 UTC
    Raw,
    /// Local ISO-8601 date and time in the given zone
    Iso(TimeZone),
}

/// One historical sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tick {
    pub date: String,
    pub close: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

impl Tick {
    fn from_row(index: usize, row: &[String], style: &DateStyle) -> Result<Self, OutputError> {
        if row.len() < CSV_HEADER.len() {
            return Err(OutputError::MalformedRow {
                row: index,
                cells: row.len(),
            });
        }
        let value = |column: usize| {
            row[column]
                .parse::<Decimal>()
                .map_err(|_| OutputError::InvalidValue {
                    row: index,
                    column: CSV_HEADER[column],
                    value: row[column].clone(),
                })
        };

        Ok(Tick {
            date: match style {
                DateStyle::Raw => epoch_to_rfc3339(index, &row[0])?,
                DateStyle::Iso(tz) => iso_date(index, &row[0], tz)?,
            },
            close: value(1)?,
            open: value(2)?,
            high: value(3)?,
            low: value(4)?,
        })
    }
}

fn timestamp(index: usize, value: &str) -> Result<Timestamp, OutputError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| Timestamp::from_second(secs).ok())
        .ok_or_else(|| OutputError::InvalidTimestamp {
            row: index,
            value: value.to_string(),
        })
}

fn epoch_to_rfc3339(index: usize, value: &str) -> Result<String, OutputError> {
    Ok(timestamp(index, value)?.to_string())
}

/// Render a Unix-seconds cell as a civil datetime in `tz`, e.g. `2020-01-31T09:00:00`.
pub fn iso_date(index: usize, value: &str, tz: &TimeZone) -> Result<String, OutputError> {
    Ok(timestamp(index, value)?
        .to_zoned(tz.clone())
        .datetime()
        .to_string())
}

/// Write rows as CSV under the fixed `date,close,open,high,low` header.
///
/// Rows keep every extracted cell, so a record may be wider than the header. Lines end in CRLF.
pub fn write_csv<W: Write>(out: W, rows: &[Row], style: &DateStyle) -> Result<(), OutputError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(out);
    writer.write_record(CSV_HEADER)?;

    for (index, row) in rows.iter().enumerate() {
        match (style, row.split_first()) {
            (DateStyle::Iso(tz), Some((first, rest))) => {
                let mut record = Vec::with_capacity(row.len());
                record.push(iso_date(index, first, tz)?);
                record.extend(rest.iter().cloned());
                writer.write_record(&record)?;
            }
            _ => writer.write_record(row)?,
        }
    }

    writer.flush()?;
    Ok(())
}

/// Write rows as a pretty-printed JSON array of ticks.
pub fn write_json<W: Write>(
    mut out: W,
    rows: &[Row],
    style: &DateStyle,
) -> Result<(), OutputError> {
    let ticks = rows
        .iter()
        .enumerate()
        .map(|(index, row)| Tick::from_row(index, row, style))
        .collect::<Result<Vec<_>, _>>()?;

    serde_json::to_writer_pretty(&mut out, &ticks)?;
    writeln!(out)?;
    Ok(())
}

pub fn write<W: Write>(
    out: W,
    format: Format,
    rows: &[Row],
    style: &DateStyle,
) -> Result<(), OutputError> {
    match format {
        Format::Csv => write_csv(out, rows, style),
        Format::Json => write_json(out, rows, style),
    }
}
