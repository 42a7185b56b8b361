//! Rendering of parsed readings: the `data.js` payload and `data.csv`.

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::readings::Point;
use crate::error::CliError;

pub const SCRIPT_FILE_NAME: &str = "data.js";
pub const CSV_FILE_NAME: &str = "data.csv";
const SCRIPT_PREFIX: &str = "((win) => { win.LOG_DATA = ";
const SCRIPT_SUFFIX: &str = "; })(window.top);";
/// Key of the suite label in grouped records.
pub const SUITE_KEY: &str = "suite";

/// Points of one source, in log order.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceData {
    pub label: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// One record per suite label, with one value per source.
    #[default]
    Grouped,
    /// One record per extracted reading, charted or not.
    Flat,
}

impl FromStr for Format {
    type Err = CliError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "grouped" => Ok(Format::Grouped),
            "flat" => Ok(Format::Flat),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub source: String,
    pub label: String,
    pub suite: String,
    pub mobile: bool,
    pub time: i64,
    pub used: u64,
    pub total: u64,
    pub limit: u64,
    pub tests: Option<u64>,
    pub value: Option<i64>,
}

/// `{"suite": <label>, <source>: <value>, ...}` per suite label, in order of
/// first appearance. A label seen twice in one source keeps the last value.
/// Points without a charted value are left out.
pub fn grouped_records(data: &[SourceData]) -> Result<Vec<Value>, CliError> {
    if let Some(source) = data.iter().find(|source| source.label == SUITE_KEY) {
        return Err(CliError::ReservedSourceLabel(source.label.clone()));
    }
    let mut groups: Map<String, Value> = Map::new();
    for source in data {
        for point in &source.points {
            let Some(value) = point.value else {
                continue;
            };
            let group = groups.entry(point.reading.label.clone()).or_insert_with(|| {
                let mut record = Map::new();
                record.insert(SUITE_KEY.to_string(), Value::String(point.reading.label.clone()));
                Value::Object(record)
            });
            if let Value::Object(record) = group {
                record.insert(source.label.clone(), Value::from(value));
            }
        }
    }
    Ok(groups.into_iter().map(|(_, record)| record).collect())
}

pub fn flat_records(data: &[SourceData]) -> Vec<FlatRecord> {
    data.iter()
        .flat_map(|source| {
            source.points.iter().map(|point| FlatRecord {
                source: source.label.clone(),
                label: point.reading.label.clone(),
                suite: point.reading.suite.clone(),
                mobile: point.reading.mobile,
                time: point.reading.time,
                used: point.reading.used,
                total: point.reading.total,
                limit: point.reading.limit,
                tests: point.reading.tests,
                value: point.value,
            })
        })
        .collect()
}

/// Wraps the records in the script loaded by the chart viewer.
pub fn render_script<T: Serialize>(records: &T) -> Result<String> {
    let mut json = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
    records
        .serialize(&mut serializer)
        .context("failed to serialize memory data")?;
    let json = String::from_utf8(json).context("memory data is not valid UTF-8")?;
    Ok(format!("{}{}{}", SCRIPT_PREFIX, json, SCRIPT_SUFFIX))
}

/// Header `Suite,<source>...`, then one row per suite label. Sources without
/// a reading for that label leave the cell empty.
pub fn render_csv(data: &[SourceData]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec!["Suite".to_string()];
    header.extend(data.iter().map(|source| source.label.clone()));
    writer.write_record(&header)?;

    for record in grouped_records(data)? {
        let Value::Object(record) = record else {
            continue;
        };
        let mut row = vec![record.get(SUITE_KEY).and_then(Value::as_str).unwrap_or_default().to_string()];
        row.extend(data.iter().map(|source| {
            record
                .get(&source.label)
                .map(|value| value.to_string())
                .unwrap_or_default()
        }));
        writer.write_record(&row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush CSV data: {}", err.error()))?;
    String::from_utf8(bytes).context("CSV data is not valid UTF-8")
}

pub async fn write_outputs(output_dir: &Path, script: String, csv: Option<String>) -> Result<()> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    debug!("writing output files to folder: {}", output_dir.display());

    let script_dest = output_dir.join(SCRIPT_FILE_NAME);
    let write_script = async {
        tokio::fs::write(&script_dest, script)
            .await
            .with_context(|| format!("failed to write {}", script_dest.display()))
    };
    let write_csv = async {
        let Some(csv) = csv else {
            return Ok(());
        };
        let csv_dest = output_dir.join(CSV_FILE_NAME);
        info!("writing CSV data to: {}", csv_dest.display());
        tokio::fs::write(&csv_dest, csv)
            .await
            .with_context(|| format!("failed to write {}", csv_dest.display()))
    };
    tokio::try_join!(write_script, write_csv)?;
    Ok(())
}
