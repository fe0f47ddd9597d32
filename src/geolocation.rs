use crate::types::{
    AccidentReport, AccidentType, HelpCenter, HelpCenterKind, ReportStatus, Severity,
};
use chrono::{DateTime, Utc};
use geo::{HaversineDistance, Point};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Serialize;
use thiserror::Error;

const KM_PER_DEGREE: f64 = 111.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    #[error("Latitude must be between -90 and 90")]
    Latitude,
    #[error("Longitude must be between -180 and 180")]
    Longitude,
    #[error("Invalid coordinate format")]
    Format,
}

pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), CoordinateError> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(CoordinateError::Format);
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(CoordinateError::Latitude);
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(CoordinateError::Longitude);
    }
    Ok(())
}

pub fn parse_coordinates(lat: &str, lng: &str) -> Result<(f64, f64), CoordinateError> {
    let lat: f64 = lat.trim().parse().map_err(|_| CoordinateError::Format)?;
    let lng: f64 = lng.trim().parse().map_err(|_| CoordinateError::Format)?;
    validate_coordinates(lat, lng)?;
    Ok((lat, lng))
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let a = Point::new(lng1, lat1);
    let b = Point::new(lng2, lat2);
    a.haversine_distance(&b) / 1000.0
}

pub fn is_within_radius(lat1: f64, lng1: f64, lat2: f64, lng2: f64, radius_km: f64) -> bool {
    haversine_km(lat1, lng1, lat2, lng2) <= radius_km
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Approximate box around a point; 111 km per degree, longitude scaled by
    /// the cosine of the latitude.
    pub fn around(lat: f64, lng: f64, radius_km: f64) -> Self {
        let lat_offset = radius_km / KM_PER_DEGREE;
        let lng_offset = radius_km / (KM_PER_DEGREE * lat.to_radians().cos());
        Self {
            min_lat: lat - lat_offset,
            max_lat: lat + lat_offset,
            min_lng: lng - lng_offset,
            max_lng: lng + lng_offset,
        }
    }

    /// True when the box runs past a pole or the antimeridian, where plain
    /// min/max comparisons no longer describe it.
    pub fn wraps(&self) -> bool {
        self.min_lat < -90.0 || self.max_lat > 90.0 || self.min_lng < -180.0 || self.max_lng > 180.0
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lng..=self.max_lng).contains(&lng)
    }

    fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{} meters", (km * 1000.0) as u32)
    } else {
        format!("{:.2} km", km)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radius {
    pub lat: f64,
    pub lng: f64,
    pub km: f64,
}

/// Conjunctive filter over a report collection. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub severity: Option<Severity>,
    pub kind: Option<AccidentType>,
    pub status: Option<ReportStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub near: Option<Radius>,
}

impl ReportFilter {
    pub fn matches(&self, report: &AccidentReport) -> bool {
        if self.severity.is_some_and(|s| s != report.severity) {
            return false;
        }
        if self.kind.is_some_and(|k| k != report.kind) {
            return false;
        }
        if self.status.is_some_and(|s| s != report.status) {
            return false;
        }
        if self.since.is_some_and(|t| report.timestamp() < t) {
            return false;
        }
        if self.until.is_some_and(|t| report.timestamp() > t) {
            return false;
        }
        if let Some(near) = self.near {
            let (lat, lng) = (report.location.lat, report.location.lng);
            // Cheap box test before the exact distance.
            let bbox = BoundingBox::around(near.lat, near.lng, near.km);
            if !bbox.wraps() && !bbox.contains(lat, lng) {
                return false;
            }
            if !is_within_radius(near.lat, near.lng, lat, lng, near.km) {
                return false;
            }
        }
        true
    }

    /// Matching reports, newest first, paginated.
    pub fn apply<'a>(
        &self,
        reports: &'a [AccidentReport],
        limit: usize,
        offset: usize,
    ) -> Vec<&'a AccidentReport> {
        let mut matched: Vec<&AccidentReport> =
            reports.iter().filter(|r| self.matches(r)).collect();
        matched.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        matched.into_iter().skip(offset).take(limit).collect()
    }
}

// Point entry for the help-center R-tree, [lng, lat] order.
struct CenterPoint {
    index: usize,
    position: [f64; 2],
}

impl RTreeObject for CenterPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for CenterPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyCenter {
    #[serde(flatten)]
    pub center: HelpCenter,
    pub distance_km: f64,
    pub distance_label: String,
}

/// Spatial index over help centers for nearest-first lookups.
pub struct HelpCenterIndex {
    centers: Vec<HelpCenter>,
    tree: RTree<CenterPoint>,
}

impl HelpCenterIndex {
    pub fn new(centers: Vec<HelpCenter>) -> Self {
        let points = centers
            .iter()
            .enumerate()
            .map(|(index, c)| CenterPoint {
                index,
                position: [c.lng, c.lat],
            })
            .collect();
        Self {
            centers,
            tree: RTree::bulk_load(points),
        }
    }

    pub fn centers(&self) -> &[HelpCenter] {
        &self.centers
    }

    /// Centers sorted by great-circle distance from the given point,
    /// optionally restricted by kind and radius.
    pub fn nearest(
        &self,
        lat: f64,
        lng: f64,
        kind: Option<HelpCenterKind>,
        radius_km: Option<f64>,
    ) -> Vec<NearbyCenter> {
        let candidates: Vec<&CenterPoint> = match radius_km.map(|km| BoundingBox::around(lat, lng, km)) {
            Some(bbox) if !bbox.wraps() => self
                .tree
                .locate_in_envelope_intersecting(&bbox.envelope())
                .collect(),
            Some(_) => self.tree.iter().collect(),
            None => self.tree.nearest_neighbor_iter(&[lng, lat]).collect(),
        };

        let mut nearby: Vec<NearbyCenter> = candidates
            .into_iter()
            .filter_map(|p| self.centers.get(p.index))
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .map(|c| {
                let km = haversine_km(lat, lng, c.lat, c.lng);
                NearbyCenter {
                    center: c.clone(),
                    distance_km: km,
                    distance_label: format_distance(km),
                }
            })
            .filter(|n| radius_km.map_or(true, |r| n.distance_km <= r))
            .collect();

        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby
    }
}
