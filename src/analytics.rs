//! Dashboard statistics derived from a report collection.
//!
//! Everything here is recomputed on demand from the reports passed in; there
//! is no stored aggregate.

use crate::types::{AccidentReport, AccidentType, ReportStatus, Severity};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Reports at or above this severity that are not resolved count as alerts.
pub const ALERT_SEVERITY: Severity = Severity::High;

/// Zone cells are coordinates rounded to this many decimals (~1 km).
const ZONE_DECIMALS: i32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_reports: usize,
    pub today_reports: usize,
    pub week_reports: usize,
    pub active_alerts: usize,
    pub critical_reports: usize,
    pub resolved_reports: usize,
    /// Share of resolved reports in percent, 0 when there are no reports.
    pub resolution_rate: f64,
    pub severity_distribution: Vec<Bucket>,
    pub type_distribution: Vec<Bucket>,
    pub status_distribution: Vec<Bucket>,
}

pub fn dashboard_stats(reports: &[AccidentReport], now: DateTime<Utc>) -> DashboardStats {
    let today = now.date_naive();
    let week_ago = now - Duration::days(7);

    let resolved_reports = count(reports, |r| r.status == ReportStatus::Resolved);
    let resolution_rate = if reports.is_empty() {
        0.0
    } else {
        resolved_reports as f64 * 100.0 / reports.len() as f64
    };

    DashboardStats {
        total_reports: reports.len(),
        today_reports: count(reports, |r| r.timestamp().date_naive() == today),
        week_reports: count(reports, |r| r.timestamp() >= week_ago),
        active_alerts: count(reports, is_active_alert),
        critical_reports: count(reports, |r| r.severity == Severity::Critical),
        resolved_reports,
        resolution_rate,
        severity_distribution: Severity::ALL
            .iter()
            .map(|s| bucket(s.as_str(), count(reports, |r| r.severity == *s)))
            .collect(),
        type_distribution: AccidentType::ALL
            .iter()
            .map(|t| bucket(t.as_str(), count(reports, |r| r.kind == *t)))
            .collect(),
        status_distribution: ReportStatus::ALL
            .iter()
            .map(|s| bucket(s.as_str(), count(reports, |r| r.status == *s)))
            .collect(),
    }
}

pub fn is_active_alert(report: &AccidentReport) -> bool {
    report.severity >= ALERT_SEVERITY && report.status != ReportStatus::Resolved
}

fn count(reports: &[AccidentReport], pred: impl Fn(&AccidentReport) -> bool) -> usize {
    reports.iter().filter(|r| pred(r)).count()
}

fn bucket(name: &str, count: usize) -> Bucket {
    Bucket {
        name: name.to_string(),
        count,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub lat_zone: f64,
    pub lng_zone: f64,
    pub report_count: usize,
    pub avg_lat: f64,
    pub avg_lng: f64,
}

fn zone_key(lat: f64, lng: f64) -> (i64, i64) {
    let scale = 10f64.powi(ZONE_DECIMALS);
    ((lat * scale).round() as i64, (lng * scale).round() as i64)
}

/// Groups reports into ~1 km cells and keeps cells with at least
/// `min_reports` reports in the last `days` days, busiest first.
pub fn prone_zones(
    reports: &[AccidentReport],
    min_reports: usize,
    days: i64,
    now: DateTime<Utc>,
) -> Vec<Zone> {
    let since = now - Duration::days(days);
    zones(reports.iter().filter(|r| r.timestamp() >= since), min_reports)
}

/// Cells holding at least one active alert.
pub fn risk_zones(reports: &[AccidentReport]) -> Vec<Zone> {
    zones(reports.iter().filter(|r| is_active_alert(r)), 1)
}

fn zones<'a>(reports: impl Iterator<Item = &'a AccidentReport>, min_reports: usize) -> Vec<Zone> {
    let mut cells: HashMap<(i64, i64), Vec<&AccidentReport>> = HashMap::new();
    for report in reports {
        cells
            .entry(zone_key(report.location.lat, report.location.lng))
            .or_default()
            .push(report);
    }

    let scale = 10f64.powi(ZONE_DECIMALS);
    let mut zones: Vec<Zone> = cells
        .into_iter()
        .filter(|(_, members)| members.len() >= min_reports.max(1))
        .map(|((lat_key, lng_key), members)| {
            let n = members.len() as f64;
            Zone {
                lat_zone: lat_key as f64 / scale,
                lng_zone: lng_key as f64 / scale,
                report_count: members.len(),
                avg_lat: members.iter().map(|r| r.location.lat).sum::<f64>() / n,
                avg_lng: members.iter().map(|r| r.location.lng).sum::<f64>() / n,
            }
        })
        .collect();

    zones.sort_by(|a, b| {
        b.report_count
            .cmp(&a.report_count)
            .then(a.lat_zone.total_cmp(&b.lat_zone))
            .then(a.lng_zone.total_cmp(&b.lng_zone))
    });
    zones
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeSeverityCount {
    #[serde(rename = "type")]
    pub kind: AccidentType,
    pub severity: Severity,
    pub count: usize,
}

pub fn severity_by_type(reports: &[AccidentReport]) -> Vec<TypeSeverityCount> {
    AccidentType::ALL
        .iter()
        .flat_map(|kind| {
            Severity::ALL.iter().filter_map(move |severity| {
                let count = count(reports, |r| r.kind == *kind && r.severity == *severity);
                (count > 0).then_some(TypeSeverityCount {
                    kind: *kind,
                    severity: *severity,
                    count,
                })
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub label: String,
    pub count: usize,
}

/// Report counts over the last `days` days, per calendar day or per hour of
/// day. Only non-empty slots are listed, in chronological order.
pub fn timeline(
    reports: &[AccidentReport],
    period: Period,
    days: i64,
    now: DateTime<Utc>,
) -> Vec<TimelinePoint> {
    let since = now - Duration::days(days);
    let recent = reports.iter().filter(|r| r.timestamp() >= since);

    match period {
        Period::Daily => {
            let mut by_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
            for r in recent {
                *by_day.entry(r.timestamp().date_naive()).or_default() += 1;
            }
            by_day
                .into_iter()
                .map(|(day, count)| TimelinePoint {
                    label: day.format("%Y-%m-%d").to_string(),
                    count,
                })
                .collect()
        }
        Period::Hourly => hour_histogram(recent)
            .into_iter()
            .map(|(hour, count)| TimelinePoint {
                label: format!("{:02}:00", hour),
                count,
            })
            .collect(),
    }
}

fn hour_histogram<'a>(reports: impl Iterator<Item = &'a AccidentReport>) -> BTreeMap<u32, usize> {
    let mut by_hour = BTreeMap::new();
    for r in reports {
        *by_hour.entry(r.timestamp().hour()).or_default() += 1;
    }
    by_hour
}

/// The five busiest hours of day, busiest first.
pub fn peak_hours(reports: &[AccidentReport]) -> Vec<TimelinePoint> {
    let mut hours: Vec<(u32, usize)> = hour_histogram(reports.iter()).into_iter().collect();
    hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    hours
        .into_iter()
        .take(5)
        .map(|(hour, count)| TimelinePoint {
            label: format!("{:02}:00", hour),
            count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStats {
    pub month: String,
    pub total: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

/// Per-month totals for the last `months` calendar months (current included).
pub fn monthly_stats(
    reports: &[AccidentReport],
    months: u32,
    now: DateTime<Utc>,
) -> Vec<MonthlyStats> {
    let current = now.year() * 12 + now.month0() as i32;
    let first = current - months.saturating_sub(1) as i32;

    let mut by_month: BTreeMap<i32, MonthlyStats> = BTreeMap::new();
    for r in reports {
        let ts = r.timestamp();
        let index = ts.year() * 12 + ts.month0() as i32;
        if index < first || index > current {
            continue;
        }
        let entry = by_month.entry(index).or_insert_with(|| MonthlyStats {
            month: ts.format("%Y-%m").to_string(),
            total: 0,
            low: 0,
            medium: 0,
            high: 0,
            critical: 0,
        });
        entry.total += 1;
        match r.severity {
            Severity::Low => entry.low += 1,
            Severity::Medium => entry.medium += 1,
            Severity::High => entry.high += 1,
            Severity::Critical => entry.critical += 1,
        }
    }
    by_month.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_reports;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn fixture_dashboard() {
        let stats = dashboard_stats(&mock_reports(noon()), noon());
        assert_eq!(stats.total_reports, 12);
        assert_eq!(stats.today_reports, 12);
        assert_eq!(stats.week_reports, 12);
        assert_eq!(stats.critical_reports, 2);
        assert_eq!(stats.resolved_reports, 4);
        assert!((stats.resolution_rate - 33.333).abs() < 0.01);
        // Reports 1, 2, 3, 4 and 11.
        assert_eq!(stats.active_alerts, 5);

        let severity: Vec<usize> = stats.severity_distribution.iter().map(|b| b.count).collect();
        assert_eq!(severity, vec![3, 4, 3, 2]);
        assert_eq!(stats.type_distribution[0], bucket("Vehicle Collision", 4));
        assert_eq!(stats.type_distribution.iter().map(|b| b.count).sum::<usize>(), 12);
    }

    #[test]
    fn empty_collection() {
        let stats = dashboard_stats(&[], noon());
        assert_eq!(stats.total_reports, 0);
        assert_eq!(stats.resolution_rate, 0.0);
        assert!(prone_zones(&[], 1, 90, noon()).is_empty());
        assert!(peak_hours(&[]).is_empty());
    }

    #[test]
    fn today_excludes_yesterday() {
        let just_after_midnight = Utc.with_ymd_and_hms(2024, 6, 15, 0, 25, 0).unwrap();
        let stats = dashboard_stats(&mock_reports(just_after_midnight), just_after_midnight);
        // Only reports 11 (15m) and 5 (20m) fall on the same UTC day.
        assert_eq!(stats.today_reports, 2);
    }

    #[test]
    fn risk_zones_match_active_alerts() {
        let zones = risk_zones(&mock_reports(noon()));
        assert_eq!(zones.len(), 5);
        assert!(zones.iter().all(|z| z.report_count == 1));
    }

    #[test]
    fn prone_zones_group_nearby_reports() {
        let mut reports = mock_reports(noon());
        let mut twin = reports[0].clone();
        twin.id = "1b".to_string();
        twin.location.lat += 0.001;
        reports.push(twin);

        let zones = prone_zones(&reports, 2, 90, noon());
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].report_count, 2);
        assert_eq!(zones[0].lat_zone, 11.02);
        assert_eq!(zones[0].lng_zone, 76.96);
    }

    #[test]
    fn severity_by_type_skips_empty_pairs() {
        let pairs = severity_by_type(&mock_reports(noon()));
        assert!(pairs.iter().all(|p| p.count > 0));
        let collisions_high = pairs
            .iter()
            .find(|p| p.kind == AccidentType::Collision && p.severity == Severity::High)
            .unwrap();
        assert_eq!(collisions_high.count, 3);
    }

    #[test]
    fn hourly_timeline_and_peaks() {
        let reports = mock_reports(noon());
        let hourly = timeline(&reports, Period::Hourly, 1, noon());
        assert_eq!(hourly.iter().map(|p| p.count).sum::<usize>(), 12);
        assert_eq!(hourly.first().unwrap().label, "07:00");

        let daily = timeline(&reports, Period::Daily, 30, noon());
        assert_eq!(daily, vec![TimelinePoint { label: "2024-06-15".into(), count: 12 }]);

        let peaks = peak_hours(&reports);
        assert!(peaks.len() <= 5);
        assert!(peaks.windows(2).all(|w| w[0].count >= w[1].count));
    }

    #[test]
    fn monthly_window() {
        let mut reports = mock_reports(noon());
        let template = reports[0].clone();
        let old = AccidentReport::new(
            "old",
            template.kind,
            Severity::Low,
            template.description,
            template.location,
            Utc.with_ymd_and_hms(2023, 1, 10, 9, 0, 0).unwrap(),
        );
        reports.push(old);

        let months = monthly_stats(&reports, 12, noon());
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].month, "2024-06");
        assert_eq!(months[0].total, 12);
        assert_eq!(months[0].critical, 2);

        let two_years = monthly_stats(&reports, 24, noon());
        assert_eq!(two_years.len(), 2);
        assert_eq!(two_years[0].month, "2023-01");
    }
}
