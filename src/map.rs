//! Live incident map.
//!
//! [`MapSync`] keeps the markers on a map surface in one-to-one
//! correspondence with the report collection it was last given. The surface
//! is acquired lazily, exactly once per component; the marker layer on it is
//! thrown away and rebuilt every time a different collection comes in.

use crate::config::MapConfig;
use crate::types::AccidentReport;
use chrono::{DateTime, Utc};
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileLayer {
    pub url_template: String,
    pub subdomains: String,
    pub max_zoom: u8,
    pub attribution: String,
}

/// Initial viewport and background tiles of a map surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapView {
    pub center: [f64; 2],
    pub zoom: u8,
    pub tiles: TileLayer,
}

impl From<&MapConfig> for MapView {
    fn from(config: &MapConfig) -> Self {
        Self {
            center: [config.center_lat, config.center_lng],
            zoom: config.zoom,
            tiles: TileLayer {
                url_template: config.tile_url.clone(),
                subdomains: config.subdomains.clone(),
                max_zoom: config.max_zoom,
                attribution: config.attribution.clone(),
            },
        }
    }
}

impl Default for MapView {
    fn default() -> Self {
        Self::from(&MapConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarkerColor {
    Red,
    Yellow,
    Green,
}

impl MarkerColor {
    pub fn for_severity(severity: crate::types::Severity) -> Self {
        use crate::types::Severity::*;
        match severity {
            High | Critical => Self::Red,
            Medium => Self::Yellow,
            Low => Self::Green,
        }
    }

    pub fn hex(self) -> &'static str {
        match self {
            Self::Red => "#ef4444",
            Self::Yellow => "#eab308",
            Self::Green => "#10b981",
        }
    }

    pub fn rgb(self) -> [u8; 3] {
        match self {
            Self::Red => [0xef, 0x44, 0x44],
            Self::Yellow => [0xea, 0xb3, 0x08],
            Self::Green => [0x10, 0xb9, 0x81],
        }
    }
}

/// "Just now", "Nm ago", "Nh ago" or "Nd ago", all floored.
pub fn relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - timestamp).num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Popup {
    pub category: String,
    pub severity: String,
    pub description: String,
    pub address: String,
    pub status: String,
    pub time_ago: String,
}

impl Popup {
    pub fn for_report(report: &AccidentReport, now: DateTime<Utc>) -> Self {
        Self {
            category: report.kind.to_string(),
            severity: report.severity.to_string(),
            description: report.description.clone(),
            address: report.address().to_string(),
            status: report.status.to_string(),
            time_ago: relative_time(report.timestamp(), now),
        }
    }

    pub fn to_html(&self, color: MarkerColor) -> String {
        format!(
            concat!(
                "<div class=\"incident-popup\">",
                "<div class=\"incident-popup__header\">",
                "<span class=\"incident-popup__category\">{}</span>",
                "<span class=\"incident-popup__severity\" style=\"color: {}\">{}</span>",
                "</div>",
                "<p>{}</p>",
                "<div class=\"incident-popup__address\"><strong>{}</strong></div>",
                "<div class=\"incident-popup__footer\">",
                "<span>Status: <strong>{}</strong></span>",
                "<span class=\"incident-popup__time\">{}</span>",
                "</div>",
                "</div>"
            ),
            escape_html(&self.category),
            color.hex(),
            escape_html(&self.severity),
            escape_html(&self.description),
            escape_html(&self.address),
            escape_html(&self.status),
            escape_html(&self.time_ago),
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Everything a surface needs to draw one incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub report_id: String,
    pub lat: f64,
    pub lng: f64,
    pub color: MarkerColor,
    /// High and Critical incidents get an animated ring.
    pub pulse: bool,
    pub timestamp: DateTime<Utc>,
    pub popup: Popup,
}

impl Marker {
    pub fn for_report(report: &AccidentReport, now: DateTime<Utc>) -> Self {
        let color = MarkerColor::for_severity(report.severity);
        Self {
            report_id: report.id.clone(),
            lat: report.location.lat,
            lng: report.location.lng,
            color,
            pulse: color == MarkerColor::Red,
            timestamp: report.timestamp(),
            popup: Popup::for_report(report, now),
        }
    }
}

/// A map's marker layer.
pub trait MapSurface {
    type Handle: Copy + Eq + fmt::Debug;

    fn add_marker(&mut self, marker: Marker) -> Self::Handle;

    /// Returns false if the handle was not on the surface.
    fn remove_marker(&mut self, handle: Self::Handle) -> bool;

    fn marker_count(&self) -> usize;
}

pub type ActivateFn = Arc<dyn Fn(&AccidentReport) + Send + Sync>;
type AcquireFn<S> = Box<dyn FnOnce(&MapView) -> S + Send>;

pub struct MapSync<S: MapSurface> {
    view: MapView,
    acquire: Option<AcquireFn<S>>,
    surface: Option<S>,
    reports: Option<Arc<[AccidentReport]>>,
    // placed[i] is the marker for reports[i]
    placed: Vec<S::Handle>,
    on_activate: Option<ActivateFn>,
}

impl<S: MapSurface> MapSync<S> {
    pub fn new(view: MapView, acquire: impl FnOnce(&MapView) -> S + Send + 'static) -> Self {
        Self {
            view,
            acquire: Some(Box::new(acquire)),
            surface: None,
            reports: None,
            placed: Vec::new(),
            on_activate: None,
        }
    }

    pub fn view(&self) -> &MapView {
        &self.view
    }

    /// The surface, once the first update has acquired it.
    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn on_activate(&mut self, callback: impl Fn(&AccidentReport) + Send + Sync + 'static) {
        self.on_activate = Some(Arc::new(callback));
    }

    pub fn update(&mut self, reports: Arc<[AccidentReport]>) {
        self.update_at(reports, Utc::now());
    }

    /// Rebuilds the marker layer unless `reports` is the collection already
    /// shown. Identity is by pointer, not by content.
    pub fn update_at(&mut self, reports: Arc<[AccidentReport]>, now: DateTime<Utc>) {
        if self
            .reports
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &reports))
        {
            return;
        }
        self.rebuild(reports, now);
    }

    fn rebuild(&mut self, reports: Arc<[AccidentReport]>, now: DateTime<Utc>) {
        if self.surface.is_none() {
            if let Some(acquire) = self.acquire.take() {
                info!(center = ?self.view.center, zoom = self.view.zoom, "acquiring map surface");
                self.surface = Some(acquire(&self.view));
            }
        }
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        for handle in self.placed.drain(..) {
            surface.remove_marker(handle);
        }
        self.placed.extend(
            reports
                .iter()
                .map(|report| surface.add_marker(Marker::for_report(report, now))),
        );
        debug!(markers = self.placed.len(), "marker layer rebuilt");
        self.reports = Some(reports);
    }

    /// Report identity and handle of every marker currently placed.
    pub fn markers(&self) -> Vec<(&str, S::Handle)> {
        let Some(reports) = &self.reports else {
            return Vec::new();
        };
        reports
            .iter()
            .zip(&self.placed)
            .map(|(r, h)| (r.id.as_str(), *h))
            .collect()
    }

    /// Marker click. Invokes the activation callback with the marker's
    /// report and returns the report; `None` for a handle this component
    /// did not place.
    pub fn activate(&self, handle: S::Handle) -> Option<&AccidentReport> {
        let index = self.placed.iter().position(|h| *h == handle)?;
        let report = self.reports.as_ref()?.get(index)?;
        if let Some(callback) = &self.on_activate {
            callback(report);
        }
        Some(report)
    }

    /// Removes every marker this component placed. The surface stays.
    pub fn teardown(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            for handle in self.placed.drain(..) {
                surface.remove_marker(handle);
            }
        }
        self.placed.clear();
        self.reports = None;
    }
}

impl<S: MapSurface> Drop for MapSync<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MarkerId(pub u64);

/// In-memory surface. Exports its markers as GeoJSON for browser clients
/// and the tile renderer.
#[derive(Debug, Default)]
pub struct MarkerLayer {
    next_id: u64,
    markers: BTreeMap<MarkerId, Marker>,
}

impl MarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, &Marker)> {
        self.markers.iter().map(|(id, m)| (*id, m))
    }

    /// GeoJSON with the popup labels as they were when each marker was placed.
    pub fn to_geojson(&self) -> FeatureCollection {
        self.features(|marker| marker.popup.clone())
    }

    /// GeoJSON with relative-time labels computed against `now`. Markers and
    /// their handles are left as they are.
    pub fn to_geojson_at(&self, now: DateTime<Utc>) -> FeatureCollection {
        self.features(|marker| Popup {
            time_ago: relative_time(marker.timestamp, now),
            ..marker.popup.clone()
        })
    }

    fn features(&self, popup: impl Fn(&Marker) -> Popup) -> FeatureCollection {
        let features = self
            .iter()
            .map(|(id, marker)| {
                let popup = popup(marker);
                let mut properties = JsonObject::new();
                properties.insert("reportId".into(), marker.report_id.clone().into());
                properties.insert("color".into(), marker.color.hex().into());
                properties.insert("pulse".into(), marker.pulse.into());
                properties.insert("severity".into(), marker.popup.severity.clone().into());
                properties.insert("timeAgo".into(), popup.time_ago.clone().into());
                properties.insert("popup".into(), popup.to_html(marker.color).into());
                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::Point(vec![marker.lng, marker.lat]))),
                    id: Some(Id::Number(id.0.into())),
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

impl MapSurface for MarkerLayer {
    type Handle = MarkerId;

    fn add_marker(&mut self, marker: Marker) -> MarkerId {
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        self.markers.insert(id, marker);
        id
    }

    fn remove_marker(&mut self, handle: MarkerId) -> bool {
        self.markers.remove(&handle).is_some()
    }

    fn marker_count(&self) -> usize {
        self.markers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_reports;
    use crate::types::{AccidentType, Location, ReportStatus, Severity};
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn report(id: &str, severity: Severity) -> AccidentReport {
        AccidentReport::new(
            id,
            AccidentType::Other,
            severity,
            format!("report {id}"),
            Location {
                lat: 11.0,
                lng: 77.0,
                address: Some("Somewhere".into()),
            },
            now() - Duration::minutes(5),
        )
    }

    fn layer_sync() -> MapSync<MarkerLayer> {
        MapSync::new(MapView::default(), |_| MarkerLayer::new())
    }

    fn colors(layer: &MarkerLayer) -> Vec<(String, MarkerColor)> {
        layer.iter().map(|(_, m)| (m.report_id.clone(), m.color)).collect()
    }

    #[test]
    fn relative_time_labels() {
        let now = now();
        assert_eq!(relative_time(now - Duration::seconds(30), now), "Just now");
        assert_eq!(relative_time(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(relative_time(now - Duration::minutes(90), now), "1h ago");
        assert_eq!(relative_time(now - Duration::hours(50), now), "2d ago");
        assert_eq!(relative_time(now - Duration::minutes(59), now), "59m ago");
        assert_eq!(relative_time(now - Duration::hours(24), now), "1d ago");
        assert_eq!(relative_time(now + Duration::minutes(3), now), "Just now");
    }

    #[test]
    fn severity_color_tiers() {
        assert_eq!(MarkerColor::for_severity(Severity::Critical), MarkerColor::Red);
        assert_eq!(MarkerColor::for_severity(Severity::High), MarkerColor::Red);
        assert_eq!(MarkerColor::for_severity(Severity::Medium), MarkerColor::Yellow);
        assert_eq!(MarkerColor::for_severity(Severity::Low), MarkerColor::Green);
    }

    #[test]
    fn one_marker_per_report_with_tier_colors() {
        let reports: Arc<[AccidentReport]> = mock_reports(now()).into();
        let mut map = layer_sync();
        map.update_at(reports.clone(), now());

        let layer = map.surface().unwrap();
        assert_eq!(layer.marker_count(), reports.len());
        for (_, marker) in layer.iter() {
            let report = reports.iter().find(|r| r.id == marker.report_id).unwrap();
            let expected = match report.severity {
                Severity::High | Severity::Critical => MarkerColor::Red,
                Severity::Medium => MarkerColor::Yellow,
                Severity::Low => MarkerColor::Green,
            };
            assert_eq!(marker.color, expected, "report {}", report.id);
            assert_eq!(marker.pulse, expected == MarkerColor::Red);
            assert_eq!((marker.lat, marker.lng), (report.location.lat, report.location.lng));
        }
    }

    #[test]
    fn disjoint_replacement_leaves_no_stale_markers() {
        let mut map = layer_sync();
        let first: Arc<[AccidentReport]> =
            vec![report("a", Severity::Low), report("b", Severity::High)].into();
        let second: Arc<[AccidentReport]> = vec![
            report("x", Severity::Medium),
            report("y", Severity::Critical),
            report("z", Severity::Low),
        ]
        .into();

        map.update_at(first, now());
        map.update_at(second, now());

        let ids: HashSet<String> = colors(map.surface().unwrap()).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, HashSet::from(["x".into(), "y".into(), "z".into()]));
        assert_eq!(map.surface().unwrap().marker_count(), 3);
        assert_eq!(map.markers().len(), 3);
    }

    #[test]
    fn duplicate_reports_get_their_own_markers() {
        let mut map = layer_sync();
        let dup: Arc<[AccidentReport]> = vec![report("a", Severity::Low), report("a", Severity::Low)].into();
        map.update_at(dup, now());
        assert_eq!(map.surface().unwrap().marker_count(), 2);
    }

    #[test]
    fn empty_collection_clears_layer() {
        let mut map = layer_sync();
        map.update_at(vec![report("a", Severity::Low)].into(), now());
        map.update_at(Vec::new().into(), now());
        assert_eq!(map.surface().unwrap().marker_count(), 0);
        assert!(map.markers().is_empty());
    }

    #[test]
    fn surface_acquired_once() {
        let acquisitions = Arc::new(AtomicUsize::new(0));
        let counter = acquisitions.clone();
        let mut map = MapSync::new(MapView::default(), move |view: &MapView| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(view.center, [11.0168, 76.9558]);
            assert_eq!(view.zoom, 13);
            MarkerLayer::new()
        });
        assert!(map.surface().is_none());

        for _ in 0..3 {
            map.update_at(vec![report("a", Severity::Low)].into(), now());
        }
        assert_eq!(acquisitions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_collection_is_not_rebuilt() {
        let mut map = layer_sync();
        let reports: Arc<[AccidentReport]> = vec![report("a", Severity::Low)].into();
        map.update_at(reports.clone(), now());
        let before = map.markers()[0].1;

        map.update_at(reports.clone(), now());
        assert_eq!(map.markers()[0].1, before);

        // Equal content in a new allocation counts as a change.
        let copy: Arc<[AccidentReport]> = reports.to_vec().into();
        map.update_at(copy, now());
        assert_ne!(map.markers()[0].1, before);
        assert_eq!(map.surface().unwrap().marker_count(), 1);
    }

    #[test]
    fn geojson_labels_follow_export_time() {
        let mut map = layer_sync();
        map.update_at(vec![report("a", Severity::Low)].into(), now());
        let (handle, _) = map.markers()[0];

        let layer = map.surface().unwrap();
        let later = layer.to_geojson_at(now() + Duration::hours(2));
        let feature = &later.features[0];
        assert_eq!(feature.property("timeAgo").unwrap(), "2h ago");
        assert!(feature
            .property("popup")
            .and_then(|p| p.as_str())
            .unwrap()
            .contains("2h ago"));

        // Exporting leaves markers and their handles alone.
        assert_eq!(map.markers()[0].0, handle);
        assert_eq!(map.surface().unwrap().get(handle).unwrap().popup.time_ago, "5m ago");
        assert!(map.activate(handle).is_some());
    }

    #[test]
    fn activation_invokes_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut map = layer_sync();
        map.on_activate(move |r| sink.lock().unwrap().push(r.id.clone()));
        map.update_at(
            vec![report("a", Severity::Low), report("b", Severity::High)].into(),
            now(),
        );

        let (_, handle) = map.markers()[1];
        assert_eq!(map.activate(handle).map(|r| r.id.as_str()), Some("b"));
        assert_eq!(map.activate(MarkerId(999)), None);
        assert_eq!(*seen.lock().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn stale_handle_does_not_activate() {
        let mut map = layer_sync();
        map.update_at(vec![report("a", Severity::Low)].into(), now());
        let (_, old) = map.markers()[0];
        map.update_at(vec![report("b", Severity::Low)].into(), now());
        assert!(map.activate(old).is_none());
    }

    /// Surface whose marker layer outlives the component.
    #[derive(Clone, Default)]
    struct SharedLayer(Arc<Mutex<MarkerLayer>>);

    impl MapSurface for SharedLayer {
        type Handle = MarkerId;

        fn add_marker(&mut self, marker: Marker) -> MarkerId {
            self.0.lock().unwrap().add_marker(marker)
        }

        fn remove_marker(&mut self, handle: MarkerId) -> bool {
            self.0.lock().unwrap().remove_marker(handle)
        }

        fn marker_count(&self) -> usize {
            self.0.lock().unwrap().marker_count()
        }
    }

    #[test]
    fn drop_removes_own_markers_only() {
        let shared = SharedLayer::default();
        let foreign = shared.0.lock().unwrap().add_marker(Marker::for_report(&report("other", Severity::Low), now()));

        {
            let handle = shared.clone();
            let mut map = MapSync::new(MapView::default(), move |_| handle);
            map.update_at(mock_reports(now()).into(), now());
            assert_eq!(shared.marker_count(), 13);
        }

        assert_eq!(shared.marker_count(), 1);
        assert!(shared.0.lock().unwrap().get(foreign).is_some());
    }

    #[test]
    fn teardown_then_update_rebuilds() {
        let mut map = layer_sync();
        let reports: Arc<[AccidentReport]> = vec![report("a", Severity::Low)].into();
        map.update_at(reports.clone(), now());
        map.teardown();
        assert_eq!(map.surface().unwrap().marker_count(), 0);

        map.update_at(reports, now());
        assert_eq!(map.surface().unwrap().marker_count(), 1);
    }

    #[test]
    fn popup_summarizes_report() {
        let r = report("a", Severity::High).with_status(ReportStatus::Verified);
        let popup = Popup::for_report(&r, now());
        assert_eq!(popup.category, "Other");
        assert_eq!(popup.severity, "High");
        assert_eq!(popup.address, "Somewhere");
        assert_eq!(popup.status, "Verified");
        assert_eq!(popup.time_ago, "5m ago");

        let html = popup.to_html(MarkerColor::Red);
        assert!(html.contains("#ef4444"));
        assert!(html.contains("Status: <strong>Verified</strong>"));
    }

    #[test]
    fn popup_escapes_markup() {
        let mut r = report("a", Severity::Low);
        r.description = "<script>alert('x')</script>".into();
        let html = Popup::for_report(&r, now()).to_html(MarkerColor::Green);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn geojson_export() {
        let mut map = layer_sync();
        map.update_at(vec![report("a", Severity::Critical)].into(), now());

        let collection = map.surface().unwrap().to_geojson();
        assert_eq!(collection.features.len(), 1);
        let feature = &collection.features[0];
        assert_eq!(
            feature.geometry.as_ref().unwrap().value,
            Value::Point(vec![77.0, 11.0])
        );
        let props = feature.properties.as_ref().unwrap();
        assert_eq!(props["reportId"], "a");
        assert_eq!(props["color"], "#ef4444");
        assert_eq!(props["pulse"], true);
    }
}
