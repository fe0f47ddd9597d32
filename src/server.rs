use crate::advisory::{AdvisoryClient, Assessment};
use crate::analytics::{
    self, DashboardStats, MonthlyStats, Period, TimelinePoint, TypeSeverityCount, Zone,
};
use crate::config::AppConfig;
use crate::data;
use crate::export;
use crate::geolocation::{
    validate_coordinates, CoordinateError, HelpCenterIndex, Radius, ReportFilter,
};
use crate::map::{MapSync, MapView, MarkerId, MarkerLayer};
use crate::pages::{
    AdminView, EmergencyView, HomeView, ReportDraft, ReportForm, SafetyAssistant, SafetyView,
};
use crate::types::{
    AccidentReport, AccidentType, HelpCenter, HelpCenterKind, ReportStatus, SafetyTip, Severity,
    TipCategory, UnknownVariant,
};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

const DEFAULT_LIMIT: usize = 100;
const DEFAULT_RADIUS_KM: f64 = 5.0;
const DEFAULT_RECENT: usize = 10;
const DEFAULT_ZONE_MIN_REPORTS: usize = 3;
const DEFAULT_ZONE_DAYS: i64 = 90;
const DEFAULT_TIMELINE_DAYS: i64 = 30;
const DEFAULT_MONTHS: u32 = 12;
const MAX_DAYS: i64 = 3650;
const MAX_MONTHS: u32 = 120;

pub struct AppState {
    pub config: AppConfig,
    pub reports: Arc<[AccidentReport]>,
    pub help_centers: HelpCenterIndex,
    pub tips: Vec<SafetyTip>,
    pub advisory: AdvisoryClient,
    pub map: Mutex<MapSync<MarkerLayer>>,
}

impl AppState {
    pub fn new(config: AppConfig, reports: Vec<AccidentReport>, advisory: AdvisoryClient) -> Self {
        let reports: Arc<[AccidentReport]> = reports.into();

        let mut map = MapSync::new(MapView::from(&config.map), |_| MarkerLayer::new());
        map.on_activate(|report| {
            info!(id = %report.id, severity = %report.severity, "marker activated");
        });
        map.update(reports.clone());

        Self {
            config,
            reports,
            help_centers: HelpCenterIndex::new(data::mock_help_centers()),
            tips: data::safety_tips(),
            advisory,
            map: Mutex::new(map),
        }
    }

    fn map(&self) -> Result<MutexGuard<'_, MapSync<MarkerLayer>>, ApiError> {
        self.map
            .lock()
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("map state lock poisoned")))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CoordinateError> for ApiError {
    fn from(e: CoordinateError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<UnknownVariant> for ApiError {
    fn from(e: UnknownVariant) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::Internal(e) => {
                error!(error = ?e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let tile_service = ServeDir::new(&state.config.render.tile_dir);
    let static_service = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/api/map", get(map_handler))
        .route("/api/reports", get(list_reports).post(submit_report))
        .route("/api/reports/:id", get(get_report))
        .route("/api/markers", get(markers_handler))
        .route("/api/markers/:handle", get(activate_marker))
        .route("/api/help-centers", get(help_centers_handler))
        .route("/api/tips", get(tips_handler))
        .route("/api/pages/home", get(home_page))
        .route("/api/pages/emergency", get(emergency_page))
        .route("/api/pages/admin", get(admin_page))
        .route("/api/stats", get(stats_handler))
        .route("/api/analytics/zones", get(zones_handler))
        .route("/api/analytics/severity-by-type", get(severity_by_type_handler))
        .route("/api/analytics/timeline", get(timeline_handler))
        .route("/api/analytics/monthly", get(monthly_handler))
        .route("/api/analytics/peak-hours", get(peak_hours_handler))
        .route("/api/export.csv", get(export_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/advice", post(advice_handler))
        .nest_service("/tiles", tile_service)
        .fallback_service(static_service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, reports: Vec<AccidentReport>, advisory: AdvisoryClient) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = Arc::new(AppState::new(config, reports, advisory));
    info!(
        reports = state.reports.len(),
        advisory = state.advisory.is_available(),
        "application state ready"
    );
    let app = router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn map_handler(State(state): State<Arc<AppState>>) -> Result<Json<MapView>, ApiError> {
    Ok(Json(state.map()?.view().clone()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    severity: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<f64>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl ReportQuery {
    fn filter(&self) -> Result<ReportFilter, ApiError> {
        let near = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => {
                validate_coordinates(lat, lng)?;
                let km = self.radius.unwrap_or(DEFAULT_RADIUS_KM);
                if !(km.is_finite() && km > 0.0) {
                    return Err(ApiError::BadRequest("radius must be a positive number".into()));
                }
                Some(Radius { lat, lng, km })
            }
            (None, None) => None,
            _ => return Err(ApiError::BadRequest("lat and lng must be given together".into())),
        };

        Ok(ReportFilter {
            severity: self.severity.as_deref().map(str::parse::<Severity>).transpose()?,
            kind: self.kind.as_deref().map(str::parse::<AccidentType>).transpose()?,
            status: self
                .status
                .as_deref()
                .map(str::parse::<ReportStatus>)
                .transpose()?,
            since: self.since,
            until: self.until,
            near,
        })
    }

    fn select(&self, reports: &[AccidentReport]) -> Result<Vec<AccidentReport>, ApiError> {
        let filter = self.filter()?;
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = self.offset.unwrap_or(0);
        Ok(filter.apply(reports, limit, offset).into_iter().cloned().collect())
    }
}

async fn list_reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<AccidentReport>>, ApiError> {
    Ok(Json(query.select(&state.reports)?))
}

async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccidentReport>, ApiError> {
    state
        .reports
        .iter()
        .find(|r| r.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("report {} not found", id)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub report: ReportDraft,
}

/// Acknowledges a report. Submissions are not added to the shared collection.
async fn submit_report(Json(draft): Json<ReportDraft>) -> Result<(StatusCode, Json<SubmissionReceipt>), ApiError> {
    let report = ReportForm::from_draft(draft)
        .submit()
        .ok_or_else(|| ApiError::BadRequest("location is required".into()))?;
    let receipt = SubmissionReceipt {
        id: Uuid::new_v4(),
        received_at: Utc::now(),
        status: ReportStatus::Pending,
        report,
    };
    info!(id = %receipt.id, severity = %receipt.report.severity, "report acknowledged");
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Relative-time labels are computed per request; marker handles stay valid
/// across fetches.
async fn markers_handler(State(state): State<Arc<AppState>>) -> Result<Json<FeatureCollection>, ApiError> {
    let mut map = state.map()?;
    map.update(state.reports.clone());
    let now = Utc::now();
    let collection = map
        .surface()
        .map(|layer| layer.to_geojson_at(now))
        .unwrap_or_else(|| MarkerLayer::new().to_geojson());
    Ok(Json(collection))
}

async fn activate_marker(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<u64>,
) -> Result<Json<AccidentReport>, ApiError> {
    let map = state.map()?;
    map.activate(MarkerId(handle))
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("marker {} not found", handle)))
}

#[derive(Debug, Deserialize)]
pub struct HelpCenterQuery {
    kind: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<f64>,
}

async fn help_centers_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HelpCenterQuery>,
) -> Result<Json<Vec<HelpCenter>>, ApiError> {
    let kind = query.kind.as_deref().map(str::parse::<HelpCenterKind>).transpose()?;

    let centers = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => {
            validate_coordinates(lat, lng)?;
            state
                .help_centers
                .nearest(lat, lng, kind, query.radius)
                .into_iter()
                .map(|n| HelpCenter {
                    distance: n.distance_label,
                    ..n.center
                })
                .collect()
        }
        (None, None) => state
            .help_centers
            .centers()
            .iter()
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .cloned()
            .collect(),
        _ => return Err(ApiError::BadRequest("lat and lng must be given together".into())),
    };
    Ok(Json(centers))
}

#[derive(Debug, Deserialize)]
pub struct TipsQuery {
    category: Option<TipCategory>,
}

async fn tips_handler(State(state): State<Arc<AppState>>, Query(query): Query<TipsQuery>) -> Json<SafetyView> {
    Json(SafetyView::build(&state.tips, query.category))
}

async fn home_page(State(state): State<Arc<AppState>>) -> Json<HomeView> {
    Json(HomeView::build(&state.reports, Utc::now()))
}

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    lat: Option<f64>,
    lng: Option<f64>,
}

async fn emergency_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PositionQuery>,
) -> Result<Json<EmergencyView>, ApiError> {
    let user = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => {
            validate_coordinates(lat, lng)?;
            Some((lat, lng))
        }
        (None, None) => None,
        _ => return Err(ApiError::BadRequest("lat and lng must be given together".into())),
    };
    Ok(Json(EmergencyView::build(&state.help_centers, user)))
}

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    recent: Option<usize>,
}

async fn admin_page(State(state): State<Arc<AppState>>, Query(query): Query<AdminQuery>) -> Json<AdminView> {
    let recent = query.recent.unwrap_or(DEFAULT_RECENT);
    Json(AdminView::build(&state.reports, Utc::now(), recent))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<DashboardStats> {
    Json(analytics::dashboard_stats(&state.reports, Utc::now()))
}

fn check_days(days: i64) -> Result<i64, ApiError> {
    if (1..=MAX_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ApiError::BadRequest(format!("days must be between 1 and {}", MAX_DAYS)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ZonesQuery {
    min_accidents: Option<usize>,
    days: Option<i64>,
}

async fn zones_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ZonesQuery>,
) -> Result<Json<Vec<Zone>>, ApiError> {
    let days = check_days(query.days.unwrap_or(DEFAULT_ZONE_DAYS))?;
    let min_reports = query.min_accidents.unwrap_or(DEFAULT_ZONE_MIN_REPORTS);
    Ok(Json(analytics::prone_zones(&state.reports, min_reports, days, Utc::now())))
}

async fn severity_by_type_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TypeSeverityCount>> {
    Json(analytics::severity_by_type(&state.reports))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    period: Option<String>,
    days: Option<i64>,
}

async fn timeline_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<Vec<TimelinePoint>>, ApiError> {
    let period = match query.period.as_deref().unwrap_or("daily") {
        "daily" => Period::Daily,
        "hourly" => Period::Hourly,
        _ => return Err(ApiError::BadRequest("period must be daily or hourly".into())),
    };
    let days = check_days(query.days.unwrap_or(DEFAULT_TIMELINE_DAYS))?;
    Ok(Json(analytics::timeline(&state.reports, period, days, Utc::now())))
}

#[derive(Debug, Deserialize)]
pub struct MonthlyQuery {
    months: Option<u32>,
}

async fn monthly_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MonthlyQuery>,
) -> Result<Json<Vec<MonthlyStats>>, ApiError> {
    let months = query.months.unwrap_or(DEFAULT_MONTHS);
    if !(1..=MAX_MONTHS).contains(&months) {
        return Err(ApiError::BadRequest(format!("months must be between 1 and {}", MAX_MONTHS)));
    }
    Ok(Json(analytics::monthly_stats(&state.reports, months, Utc::now())))
}

async fn peak_hours_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TimelinePoint>> {
    Json(analytics::peak_hours(&state.reports))
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let reports = query.select(&state.reports)?;
    let body = export::reports_to_csv(&reports)?;
    let filename = format!("accident_reports_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename={}", filename)),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    description: String,
}

async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<Assessment>, ApiError> {
    if request.description.trim().is_empty() {
        return Err(ApiError::BadRequest("description is required".into()));
    }
    let mut form = ReportForm::new();
    form.description = request.description;
    let assessment = form
        .analyze(&state.advisory)
        .await
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("description is required".into()))?;
    Ok(Json(assessment))
}

#[derive(Debug, Deserialize)]
pub struct AdviceRequest {
    topic: String,
}

#[derive(Debug, Serialize)]
pub struct AdviceResponse {
    advice: String,
}

async fn advice_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdviceRequest>,
) -> Result<Json<AdviceResponse>, ApiError> {
    if request.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("topic is required".into()));
    }
    let mut assistant = SafetyAssistant::default();
    assistant.question = request.topic;
    let advice = assistant
        .ask(&state.advisory)
        .await
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("topic is required".into()))?;
    Ok(Json(AdviceResponse { advice }))
}
