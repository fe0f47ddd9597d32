use crate::config::AppConfig;
use crate::export::ReportRow;
use crate::types::{
    AccidentReport, AccidentType, HelpCenter, HelpCenterKind, Hotline, Location, ReportStatus,
    SafetyTip, Severity, TipCategory,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use csv::ReaderBuilder;
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Default map center: Coimbatore, Tamil Nadu.
pub const DEFAULT_CENTER: (f64, f64) = (11.0168, 76.9558);

/// Loads the report collection: a CSV export when `data.reports_csv` is set,
/// otherwise the built-in fixtures stamped relative to `now`.
pub fn load_reports(config: &AppConfig, now: DateTime<Utc>) -> Result<Vec<AccidentReport>> {
    let reports = match &config.data.reports_csv {
        Some(path) => load_reports_csv(path)?,
        None => mock_reports(now),
    };
    info!(count = reports.len(), "loaded accident reports");
    Ok(reports)
}

fn load_reports_csv(path: &Path) -> Result<Vec<AccidentReport>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open reports CSV: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);

    let mut reports = Vec::new();
    for (line, result) in rdr.deserialize::<ReportRow>().enumerate() {
        let row = result.with_context(|| format!("Malformed CSV row {}", line + 2))?;
        let report = AccidentReport::try_from(row)
            .with_context(|| format!("Invalid report on CSV row {}", line + 2))?;
        reports.push(report);
    }
    Ok(reports)
}

struct Fixture {
    id: &'static str,
    kind: AccidentType,
    severity: Severity,
    description: &'static str,
    lat: f64,
    lng: f64,
    address: &'static str,
    minutes_ago: i64,
    status: ReportStatus,
}

static REPORTS: &[Fixture] = &[
    // High risk zones
    Fixture {
        id: "1",
        kind: AccidentType::Collision,
        severity: Severity::High,
        description: "Multi-vehicle collision at busy junction during peak hours.",
        lat: 11.0168,
        lng: 76.9558,
        address: "Gandhipuram Central",
        minutes_ago: 30,
        status: ReportStatus::Verified,
    },
    Fixture {
        id: "2",
        kind: AccidentType::Pedestrian,
        severity: Severity::Critical,
        description: "Pedestrian hit at crosswalk near shopping complex.",
        lat: 11.0048,
        lng: 76.9618,
        address: "RS Puram Junction",
        minutes_ago: 45,
        status: ReportStatus::Pending,
    },
    Fixture {
        id: "3",
        kind: AccidentType::Collision,
        severity: Severity::High,
        description: "Two-wheeler collision with car at signal.",
        lat: 10.9925,
        lng: 76.9619,
        address: "Avinashi Road",
        minutes_ago: 60,
        status: ReportStatus::Verified,
    },
    Fixture {
        id: "4",
        kind: AccidentType::Rollover,
        severity: Severity::Critical,
        description: "Vehicle rollover on highway due to overspeeding.",
        lat: 11.0510,
        lng: 77.0229,
        address: "Sathy Road",
        minutes_ago: 90,
        status: ReportStatus::Verified,
    },
    // Medium risk zones
    Fixture {
        id: "5",
        kind: AccidentType::Breakdown,
        severity: Severity::Medium,
        description: "Vehicle breakdown blocking left lane.",
        lat: 11.0271,
        lng: 76.9635,
        address: "Trichy Road",
        minutes_ago: 20,
        status: ReportStatus::Resolved,
    },
    Fixture {
        id: "6",
        kind: AccidentType::Collision,
        severity: Severity::Medium,
        description: "Minor collision at roundabout.",
        lat: 10.9854,
        lng: 76.9558,
        address: "Peelamedu",
        minutes_ago: 120,
        status: ReportStatus::Verified,
    },
    Fixture {
        id: "7",
        kind: AccidentType::Obstruction,
        severity: Severity::Medium,
        description: "Fallen tree branch partially blocking road.",
        lat: 11.0412,
        lng: 76.9734,
        address: "Mettupalayam Road",
        minutes_ago: 150,
        status: ReportStatus::Verified,
    },
    // Low risk zones
    Fixture {
        id: "8",
        kind: AccidentType::Breakdown,
        severity: Severity::Low,
        description: "Parked vehicle with hazard lights on shoulder.",
        lat: 11.0089,
        lng: 76.9339,
        address: "Saibaba Colony",
        minutes_ago: 180,
        status: ReportStatus::Resolved,
    },
    Fixture {
        id: "9",
        kind: AccidentType::Other,
        severity: Severity::Low,
        description: "Minor fender bender, no injuries.",
        lat: 10.9965,
        lng: 76.9708,
        address: "Hopes College",
        minutes_ago: 200,
        status: ReportStatus::Resolved,
    },
    Fixture {
        id: "10",
        kind: AccidentType::Pedestrian,
        severity: Severity::Medium,
        description: "Near-miss incident at pedestrian crossing.",
        lat: 11.0321,
        lng: 76.9912,
        address: "Singanallur",
        minutes_ago: 240,
        status: ReportStatus::Verified,
    },
    Fixture {
        id: "11",
        kind: AccidentType::Collision,
        severity: Severity::High,
        description: "Head-on collision between bus and truck.",
        lat: 10.9634,
        lng: 76.9012,
        address: "Pollachi Road",
        minutes_ago: 15,
        status: ReportStatus::Pending,
    },
    Fixture {
        id: "12",
        kind: AccidentType::Breakdown,
        severity: Severity::Low,
        description: "Auto rickshaw breakdown on service road.",
        lat: 11.0145,
        lng: 77.0024,
        address: "Kalapatti",
        minutes_ago: 300,
        status: ReportStatus::Resolved,
    },
];

pub fn mock_reports(now: DateTime<Utc>) -> Vec<AccidentReport> {
    REPORTS
        .iter()
        .map(|f| {
            AccidentReport::new(
                f.id,
                f.kind,
                f.severity,
                f.description,
                Location {
                    lat: f.lat,
                    lng: f.lng,
                    address: Some(f.address.to_string()),
                },
                now - Duration::minutes(f.minutes_ago),
            )
            .with_status(f.status)
        })
        .collect()
}

pub fn mock_help_centers() -> Vec<HelpCenter> {
    let entry = |id: &str, name: &str, distance: &str, contact: &str, lat, lng, kind| HelpCenter {
        id: id.to_string(),
        name: name.to_string(),
        distance: distance.to_string(),
        contact: contact.to_string(),
        lat,
        lng,
        kind,
    };

    vec![
        entry("h1", "Coimbatore Medical College Hospital", "1.2 km", "0422-2530222", 11.0049, 76.9645, HelpCenterKind::Hospital),
        entry("h2", "PSG Hospitals", "2.5 km", "0422-2570170", 10.9965, 76.9708, HelpCenterKind::Hospital),
        entry("h3", "Kovai Medical Center", "3.1 km", "0422-4324000", 11.0271, 76.9635, HelpCenterKind::Hospital),
        entry("p1", "Gandhipuram Police Station", "0.8 km", "0422-2394100", 11.0183, 76.9674, HelpCenterKind::Police),
        entry("p2", "RS Puram Police Station", "1.5 km", "0422-2544100", 11.0048, 76.9518, HelpCenterKind::Police),
        entry("f1", "Coimbatore Fire Station", "1.0 km", "0422-2394444", 11.0125, 76.9589, HelpCenterKind::Fire),
    ]
}

pub fn safety_tips() -> Vec<SafetyTip> {
    let tip = |title: &str, content: &str, category, icon: &str| SafetyTip {
        title: title.to_string(),
        content: content.to_string(),
        category,
        icon: icon.to_string(),
    };

    vec![
        tip(
            "Wear Your Helmet",
            "Always wear a certified helmet while riding a two-wheeler. It reduces the risk of severe head injury by 70%.",
            TipCategory::Rule,
            "helmet",
        ),
        tip(
            "Don't Drink and Drive",
            "Alcohol impairs reaction time and judgment. Use a designated driver or taxi service.",
            TipCategory::Warning,
            "beer-off",
        ),
        tip(
            "Respect Speed Limits",
            "Speed limits are set for optimal safety. Higher speeds increase stopping distance and severity of impact.",
            TipCategory::Tip,
            "gauge",
        ),
    ]
}

pub fn hotlines() -> Vec<Hotline> {
    vec![
        Hotline {
            label: "Ambulance".to_string(),
            number: "108".to_string(),
        },
        Hotline {
            label: "Police".to_string(),
            number: "100".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn fixtures_have_unique_ids() {
        let reports = mock_reports(Utc::now());
        assert_eq!(reports.len(), 12);
        let ids: HashSet<_> = reports.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), reports.len());

        let centers = mock_help_centers();
        let ids: HashSet<_> = centers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn fixture_timestamps_are_relative_to_now() {
        let now = Utc::now();
        let reports = mock_reports(now);
        let newest = reports.iter().map(|r| r.timestamp()).max().unwrap();
        let oldest = reports.iter().map(|r| r.timestamp()).min().unwrap();
        assert_eq!(now - newest, Duration::minutes(15));
        assert_eq!(now - oldest, Duration::minutes(300));
    }

    #[test]
    fn loads_reports_from_csv_export() {
        let now = Utc::now();
        let original = mock_reports(now);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let csv = crate::export::reports_to_csv(&original).unwrap();
        file.write_all(csv.as_bytes()).unwrap();

        let mut config = AppConfig::default();
        config.data.reports_csv = Some(file.path().to_path_buf());

        let loaded = load_reports(&config, now).unwrap();
        assert_eq!(loaded.len(), original.len());
        assert_eq!(loaded[1].id, "2");
        assert_eq!(loaded[1].severity, Severity::Critical);
        assert_eq!(loaded[1].address(), "RS Puram Junction");
    }

    #[test]
    fn missing_csv_is_an_error() {
        let mut config = AppConfig::default();
        config.data.reports_csv = Some("/nonexistent/reports.csv".into());
        assert!(load_reports(&config, Utc::now()).is_err());
    }
}
