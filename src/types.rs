use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Incident urgency. Variant order is the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant::new("severity", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccidentType {
    #[serde(rename = "Vehicle Collision")]
    Collision,
    #[serde(rename = "Pedestrian Incident")]
    Pedestrian,
    Rollover,
    #[serde(rename = "Vehicle Breakdown")]
    Breakdown,
    #[serde(rename = "Road Obstruction")]
    Obstruction,
    Other,
}

impl AccidentType {
    pub const ALL: [AccidentType; 6] = [
        Self::Collision,
        Self::Pedestrian,
        Self::Rollover,
        Self::Breakdown,
        Self::Obstruction,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collision => "Vehicle Collision",
            Self::Pedestrian => "Pedestrian Incident",
            Self::Rollover => "Rollover",
            Self::Breakdown => "Vehicle Breakdown",
            Self::Obstruction => "Road Obstruction",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for AccidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccidentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant::new("accident type", s))
    }
}

/// Report lifecycle. Intended to move forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    Pending,
    Verified,
    Resolved,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 3] = [Self::Pending, Self::Verified, Self::Resolved];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Verified => "Verified",
            Self::Resolved => "Resolved",
        }
    }

    /// Next stage of the lifecycle; `Resolved` is terminal.
    pub fn advance(self) -> Self {
        match self {
            Self::Pending => Self::Verified,
            Self::Verified | Self::Resolved => Self::Resolved,
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant::new("status", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {field}: {value:?}")]
pub struct UnknownVariant {
    field: &'static str,
    value: String,
}

impl UnknownVariant {
    pub(crate) fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccidentReport {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AccidentType,
    pub severity: Severity,
    pub description: String,
    pub location: Location,
    timestamp: DateTime<Utc>,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl AccidentReport {
    pub fn new(
        id: impl Into<String>,
        kind: AccidentType,
        severity: Severity,
        description: impl Into<String>,
        location: Location,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            severity,
            description: description.into(),
            location,
            timestamp,
            status: ReportStatus::Pending,
            image_url: None,
        }
    }

    pub fn with_status(mut self, status: ReportStatus) -> Self {
        self.status = status;
        self
    }

    /// Creation instant. Fixed once the report exists.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn address(&self) -> &str {
        self.location.address.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HelpCenterKind {
    Hospital,
    Police,
    Fire,
}

impl HelpCenterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hospital => "Hospital",
            Self::Police => "Police",
            Self::Fire => "Fire",
        }
    }
}

impl FromStr for HelpCenterKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Hospital, Self::Police, Self::Fire]
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant::new("help center kind", s))
    }
}

/// Hospital, police station or fire station contact entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpCenter {
    pub id: String,
    pub name: String,
    /// Display string, not computed from coordinates.
    pub distance: String,
    pub contact: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "type")]
    pub kind: HelpCenterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipCategory {
    Rule,
    Tip,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyTip {
    pub title: String,
    pub content: String,
    pub category: TipCategory,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotline {
    pub label: String,
    pub number: String,
}
