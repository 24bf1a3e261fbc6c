use std::path::Path;

use chrono::{NaiveDate, ParseError};
use csv::WriterBuilder;
use serde::Serialize;

use crate::data::PriceSeries;
use crate::error::Result;

/// Writes an aligned PriceSeries to CSV, one column per asset
pub fn write_to_csv(series: &PriceSeries, output_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(output_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(output_path)?;

    let mut header = vec!["date".to_string()];
    header.extend(series.assets().iter().cloned());
    wtr.write_record(&header)?;

    for (date, row) in series.dates().iter().zip(series.prices().rows()) {
        let mut record = vec![date.format("%Y-%m-%d").to_string()];
        record.extend(row.iter().map(|p| p.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes any serializable value as pretty JSON
pub fn write_json<T: Serialize>(value: &T, output_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(output_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(output_path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

pub fn parse_date(date_str: &str) -> std::result::Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
}
