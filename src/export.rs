use crate::types::{AccidentReport, Location};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// One CSV line of a report export. Also the accepted import format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Severity")]
    pub severity: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Status")]
    pub status: String,
}

impl From<&AccidentReport> for ReportRow {
    fn from(report: &AccidentReport) -> Self {
        Self {
            id: report.id.clone(),
            timestamp: report.timestamp(),
            latitude: report.location.lat,
            longitude: report.location.lng,
            address: report.address().to_string(),
            kind: report.kind.to_string(),
            severity: report.severity.to_string(),
            description: report.description.clone(),
            status: report.status.to_string(),
        }
    }
}

impl TryFrom<ReportRow> for AccidentReport {
    type Error = anyhow::Error;

    fn try_from(row: ReportRow) -> Result<Self> {
        if row.id.trim().is_empty() {
            return Err(anyhow!("report ID is empty"));
        }
        let address = Some(row.address).filter(|a| !a.is_empty());
        let report = AccidentReport::new(
            row.id,
            row.kind.parse()?,
            row.severity.parse()?,
            row.description,
            Location {
                lat: row.latitude,
                lng: row.longitude,
                address,
            },
            row.timestamp,
        )
        .with_status(row.status.parse()?);
        Ok(report)
    }
}

/// Serializes reports to CSV, newest first.
pub fn reports_to_csv(reports: &[AccidentReport]) -> Result<String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    for report in newest_first(reports) {
        writer.serialize(ReportRow::from(report))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV writer: {}", e))?;
    String::from_utf8(bytes).context("CSV output was not UTF-8")
}

pub fn write_reports_csv(reports: &[AccidentReport], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create export file: {:?}", path))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    for report in newest_first(reports) {
        writer.serialize(ReportRow::from(report))?;
    }
    writer.flush()?;
    Ok(())
}

fn newest_first(reports: &[AccidentReport]) -> Vec<&AccidentReport> {
    let mut sorted: Vec<&AccidentReport> = reports.iter().collect();
    sorted.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
    sorted
}
