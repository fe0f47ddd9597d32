//! Page state and view models.
//!
//! Each screen of the app is either a small state machine (the shell, the
//! report form, the safety assistant) or a serializable view model built
//! from the report and help-center collections.

use crate::advisory::{AdvisoryClient, Assessment};
use crate::analytics::{self, DashboardStats, Period, TimelinePoint, Zone};
use crate::data;
use crate::geolocation::HelpCenterIndex;
use crate::types::{AccidentReport, AccidentType, HelpCenter, Hotline, SafetyTip, Severity, TipCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageView {
    #[default]
    Home,
    Report,
    Map,
    Safety,
    Emergency,
    Admin,
}

impl PageView {
    pub const ALL: [PageView; 6] = [
        Self::Home,
        Self::Report,
        Self::Map,
        Self::Safety,
        Self::Emergency,
        Self::Admin,
    ];

    /// Navigation label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Home => "Home",
            Self::Report => "Report",
            Self::Map => "Live Map",
            Self::Safety => "Safety",
            Self::Emergency => "SOS",
            Self::Admin => "Admin",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Report => "report",
            Self::Map => "map",
            Self::Safety => "safety",
            Self::Emergency => "emergency",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for PageView {
    type Err = crate::types::UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.slug().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::types::UnknownVariant::new("page", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavItem {
    pub page: PageView,
    pub label: &'static str,
    pub active: bool,
}

/// Navigation state shared by every page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Shell {
    pub active_page: PageView,
    pub mobile_menu_open: bool,
}

impl Shell {
    pub fn navigate(&mut self, page: PageView) {
        self.active_page = page;
        self.mobile_menu_open = false;
    }

    pub fn toggle_mobile_menu(&mut self) {
        self.mobile_menu_open = !self.mobile_menu_open;
    }

    pub fn nav_items(&self) -> Vec<NavItem> {
        PageView::ALL
            .into_iter()
            .map(|page| NavItem {
                page,
                label: page.label(),
                active: page == self.active_page,
            })
            .collect()
    }
}

/// How long the submission confirmation stays up before the form clears.
pub const RESET_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FormPhase {
    #[default]
    Editing,
    Submitted,
}

/// What a submitted form hands over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub location: String,
    #[serde(rename = "type")]
    pub kind: AccidentType,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Assessment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportForm {
    pub location: String,
    pub kind: AccidentType,
    pub severity: Severity,
    pub description: String,
    analysis: Option<Assessment>,
    phase: FormPhase,
    analyzing: bool,
    // Bumped on every submit so a stale reset timer can tell it is stale.
    submission: u64,
}

impl Default for ReportForm {
    fn default() -> Self {
        Self {
            location: String::new(),
            kind: AccidentType::Collision,
            severity: Severity::Medium,
            description: String::new(),
            analysis: None,
            phase: FormPhase::Editing,
            analyzing: false,
            submission: 0,
        }
    }
}

impl ReportForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// A form filled in from a draft, e.g. one posted by a client.
    pub fn from_draft(draft: ReportDraft) -> Self {
        Self {
            location: draft.location,
            kind: draft.kind,
            severity: draft.severity,
            description: draft.description,
            analysis: draft.analysis,
            ..Self::default()
        }
    }

    pub fn analysis(&self) -> Option<&Assessment> {
        self.analysis.as_ref()
    }

    pub fn phase(&self) -> FormPhase {
        self.phase
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn can_analyze(&self) -> bool {
        !self.description.is_empty() && !self.analyzing
    }

    /// Marks an analysis as in flight and returns the text to analyze.
    pub fn begin_analysis(&mut self) -> Option<String> {
        if !self.can_analyze() {
            return None;
        }
        self.analyzing = true;
        Some(self.description.clone())
    }

    /// Stores the assessment. A severity the form knows is pre-selected.
    pub fn finish_analysis(&mut self, assessment: Assessment) {
        if let Some(severity) = assessment.suggested_severity() {
            self.severity = severity;
        }
        self.analysis = Some(assessment);
        self.analyzing = false;
    }

    pub async fn analyze(&mut self, client: &AdvisoryClient) -> Option<&Assessment> {
        let description = self.begin_analysis()?;
        let assessment = client.classify_incident(&description).await;
        self.finish_analysis(assessment);
        self.analysis.as_ref()
    }

    pub fn submit(&mut self) -> Option<ReportDraft> {
        if self.phase == FormPhase::Submitted || self.location.trim().is_empty() {
            return None;
        }
        self.phase = FormPhase::Submitted;
        self.submission += 1;
        info!(submission = self.submission, kind = %self.kind, severity = %self.severity, "report submitted");
        Some(ReportDraft {
            location: self.location.clone(),
            kind: self.kind,
            severity: self.severity,
            description: self.description.clone(),
            analysis: self.analysis.clone(),
        })
    }

    /// Dismisses the confirmation without clearing the fields.
    pub fn submit_another(&mut self) {
        self.phase = FormPhase::Editing;
    }

    pub fn reset(&mut self) {
        self.location.clear();
        self.description.clear();
        self.severity = Severity::Medium;
        self.analysis = None;
        self.phase = FormPhase::Editing;
    }
}

/// Clears the form [`RESET_DELAY`] after a submission. The task resolves to
/// whether it reset anything: a form that has since left that submission
/// is left untouched.
pub async fn schedule_reset(form: Arc<Mutex<ReportForm>>) -> JoinHandle<bool> {
    let submission = form.lock().await.submission;
    tokio::spawn(async move {
        tokio::time::sleep(RESET_DELAY).await;
        let mut form = form.lock().await;
        if form.phase == FormPhase::Submitted && form.submission == submission {
            form.reset();
            true
        } else {
            debug!(submission, "skipping stale form reset");
            false
        }
    })
}

/// Free-text safety question box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyAssistant {
    pub question: String,
    answer: Option<String>,
    asking: bool,
}

impl SafetyAssistant {
    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub fn is_asking(&self) -> bool {
        self.asking
    }

    pub fn can_ask(&self) -> bool {
        !self.question.is_empty() && !self.asking
    }

    pub async fn ask(&mut self, client: &AdvisoryClient) -> Option<&str> {
        if !self.can_ask() {
            return None;
        }
        self.asking = true;
        let answer = client.get_advice(&self.question).await;
        self.answer = Some(answer);
        self.asking = false;
        self.answer.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HomeView {
    pub today_reports: usize,
    pub active_alerts: usize,
    pub risk_zones: usize,
    pub zones: Vec<Zone>,
}

impl HomeView {
    pub fn build(reports: &[AccidentReport], now: DateTime<Utc>) -> Self {
        let stats = analytics::dashboard_stats(reports, now);
        let zones = analytics::risk_zones(reports);
        Self {
            today_reports: stats.today_reports,
            active_alerts: stats.active_alerts,
            risk_zones: zones.len(),
            zones,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyView {
    pub hotlines: Vec<Hotline>,
    pub help_centers: Vec<HelpCenter>,
}

impl EmergencyView {
    /// With a user position, centers come nearest first and their distance
    /// label is the computed one.
    pub fn build(index: &HelpCenterIndex, user: Option<(f64, f64)>) -> Self {
        let help_centers = match user {
            Some((lat, lng)) => index
                .nearest(lat, lng, None, None)
                .into_iter()
                .map(|n| HelpCenter {
                    distance: n.distance_label,
                    ..n.center
                })
                .collect(),
            None => index.centers().to_vec(),
        };
        Self {
            hotlines: data::hotlines(),
            help_centers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminView {
    pub stats: DashboardStats,
    pub trend: Vec<TimelinePoint>,
    pub recent_reports: Vec<AccidentReport>,
}

impl AdminView {
    pub fn build(reports: &[AccidentReport], now: DateTime<Utc>, recent: usize) -> Self {
        let mut sorted: Vec<&AccidentReport> = reports.iter().collect();
        sorted.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        Self {
            stats: analytics::dashboard_stats(reports, now),
            trend: analytics::timeline(reports, Period::Daily, 7, now),
            recent_reports: sorted.into_iter().take(recent).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyView {
    pub tips: Vec<SafetyTip>,
}

impl SafetyView {
    pub fn build(tips: &[SafetyTip], category: Option<TipCategory>) -> Self {
        Self {
            tips: tips
                .iter()
                .filter(|t| category.map_or(true, |c| t.category == c))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::tests::{client, Canned};
    use crate::data::{mock_help_centers, mock_reports, safety_tips};
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn filled() -> ReportForm {
        ReportForm {
            location: "Gandhipuram Flyover".into(),
            kind: AccidentType::Rollover,
            description: "Car flipped on the flyover".into(),
            ..ReportForm::default()
        }
    }

    #[test]
    fn navigation_closes_mobile_menu() {
        let mut shell = Shell::default();
        assert_eq!(shell.active_page, PageView::Home);

        shell.toggle_mobile_menu();
        assert!(shell.mobile_menu_open);
        shell.navigate(PageView::Emergency);
        assert_eq!(shell.active_page, PageView::Emergency);
        assert!(!shell.mobile_menu_open);

        let items = shell.nav_items();
        let labels: Vec<&str> = items.iter().map(|i| i.label).collect();
        assert_eq!(labels, ["Home", "Report", "Live Map", "Safety", "SOS", "Admin"]);
        assert_eq!(items.iter().filter(|i| i.active).count(), 1);
        assert!(items[4].active);
    }

    #[test]
    fn page_slugs_parse() {
        assert_eq!("admin".parse::<PageView>().unwrap(), PageView::Admin);
        assert_eq!("Map".parse::<PageView>().unwrap(), PageView::Map);
        assert!("settings".parse::<PageView>().is_err());
    }

    #[test]
    fn analysis_requires_description() {
        let mut form = ReportForm::new();
        assert_eq!(form.severity, Severity::Medium);
        assert!(!form.can_analyze());
        assert!(form.begin_analysis().is_none());

        // Any non-empty text can be sent, whitespace included.
        form.description = "   ".into();
        assert!(form.can_analyze());
    }

    #[test]
    fn draft_fills_form() {
        let draft = filled().submit().unwrap();
        let mut form = ReportForm::from_draft(draft.clone());
        assert_eq!(form.phase(), FormPhase::Editing);
        assert_eq!(form.location, "Gandhipuram Flyover");
        assert_eq!(form.submit(), Some(draft));
    }

    #[test]
    fn only_one_analysis_in_flight() {
        let mut form = filled();
        assert!(form.begin_analysis().is_some());
        assert!(form.is_analyzing());
        assert!(form.begin_analysis().is_none());

        form.finish_analysis(Assessment {
            severity: "High".into(),
            summary: "Single vehicle rollover.".into(),
        });
        assert!(!form.is_analyzing());
        assert_eq!(form.severity, Severity::High);
        assert!(form.can_analyze());
    }

    #[test]
    fn fallback_assessment_keeps_selected_severity() {
        let mut form = filled();
        form.severity = Severity::Low;
        form.begin_analysis();
        form.finish_analysis(Assessment::failed());
        assert_eq!(form.severity, Severity::Low);
        assert_eq!(form.analysis().unwrap().severity, "Unknown");
    }

    #[tokio::test]
    async fn analyze_through_client() {
        let canned = Canned::ok(r#"{"severity":"Critical","summary":"Vehicle overturned."}"#);
        let advisory = client(canned.clone());

        let mut form = filled();
        let assessment = form.analyze(&advisory).await.cloned().unwrap();
        assert_eq!(assessment.summary, "Vehicle overturned.");
        assert_eq!(form.severity, Severity::Critical);
        assert_eq!(canned.calls.load(Ordering::SeqCst), 1);

        let mut empty = ReportForm::new();
        assert!(empty.analyze(&advisory).await.is_none());
        assert_eq!(canned.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_requires_location() {
        let mut form = filled();
        form.location.clear();
        assert!(form.submit().is_none());
        assert_eq!(form.phase(), FormPhase::Editing);

        let mut form = filled();
        let draft = form.submit().unwrap();
        assert_eq!(draft.kind, AccidentType::Rollover);
        assert_eq!(form.phase(), FormPhase::Submitted);
        assert!(form.submit().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_form_resets_after_delay() {
        let form = Arc::new(Mutex::new(filled()));
        {
            let mut f = form.lock().await;
            f.begin_analysis();
            f.finish_analysis(Assessment::unavailable());
            assert!(f.submit().is_some());
        }

        let handle = schedule_reset(form.clone()).await;
        tokio::task::yield_now().await;
        tokio::time::advance(RESET_DELAY - Duration::from_millis(1)).await;
        assert_eq!(form.lock().await.phase(), FormPhase::Submitted);

        assert!(handle.await.unwrap());
        let f = form.lock().await;
        assert_eq!(f.phase(), FormPhase::Editing);
        assert!(f.description.is_empty());
        assert!(f.location.is_empty());
        assert!(f.analysis().is_none());
        assert_eq!(f.severity, Severity::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reset_leaves_new_input_alone() {
        let form = Arc::new(Mutex::new(filled()));
        form.lock().await.submit();
        let handle = schedule_reset(form.clone()).await;

        {
            let mut f = form.lock().await;
            f.submit_another();
            f.description = "Second incident".into();
        }

        assert!(!handle.await.unwrap());
        let f = form.lock().await;
        assert_eq!(f.description, "Second incident");
        assert_eq!(f.location, "Gandhipuram Flyover");
    }

    #[tokio::test]
    async fn assistant_asks_once_per_question() {
        let canned = Canned::ok("Pump the brakes and shift to a lower gear.");
        let advisory = client(canned.clone());

        let mut assistant = SafetyAssistant::default();
        assert!(!assistant.can_ask());
        assert!(assistant.ask(&advisory).await.is_none());
        assert_eq!(canned.calls.load(Ordering::SeqCst), 0);

        assistant.question = "What should I do if my brakes fail?".into();
        let answer = assistant.ask(&advisory).await.map(str::to_string);
        assert_eq!(answer.as_deref(), Some("Pump the brakes and shift to a lower gear."));
        assert!(!assistant.is_asking());
        assert_eq!(canned.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn assistant_without_credential() {
        let mut assistant = SafetyAssistant {
            question: "helmets".into(),
            ..Default::default()
        };
        let answer = assistant.ask(&AdvisoryClient::disabled()).await;
        assert_eq!(
            answer,
            Some("AI service unavailable. Please check official traffic rules.")
        );
    }

    #[test]
    fn home_view_counts() {
        let view = HomeView::build(&mock_reports(noon()), noon());
        assert_eq!(view.today_reports, 12);
        assert_eq!(view.active_alerts, 5);
        assert_eq!(view.risk_zones, 5);
        assert_eq!(view.zones.len(), 5);
    }

    #[test]
    fn emergency_view_sorts_by_user_position() {
        let index = HelpCenterIndex::new(mock_help_centers());

        let plain = EmergencyView::build(&index, None);
        assert_eq!(plain.hotlines.len(), 2);
        assert_eq!(plain.help_centers, mock_help_centers());

        let near = EmergencyView::build(&index, Some((11.0183, 76.9674)));
        assert_eq!(near.help_centers[0].id, "p1");
        assert_eq!(near.help_centers[0].distance, "0 meters");
        assert_eq!(near.help_centers.len(), 6);
    }

    #[test]
    fn admin_view_lists_newest_first() {
        let view = AdminView::build(&mock_reports(noon()), noon(), 3);
        let ids: Vec<&str> = view.recent_reports.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["11", "5", "1"]);
        assert_eq!(view.stats.total_reports, 12);
        assert_eq!(view.trend.iter().map(|p| p.count).sum::<usize>(), 12);
    }

    #[test]
    fn safety_view_filters_by_category() {
        let tips = safety_tips();
        assert_eq!(SafetyView::build(&tips, None).tips.len(), tips.len());
        let warnings = SafetyView::build(&tips, Some(TipCategory::Warning));
        assert!(warnings.tips.iter().all(|t| t.category == TipCategory::Warning));
    }
}
