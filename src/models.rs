use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw school event as fetched for one school and week.
#[derive(Debug, Clone, Serialize)]
pub struct RawEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
}

/// Raw communication (announcement or direct message) before filtering.
#[derive(Debug, Clone, Serialize)]
pub struct RawComm {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildProfile {
    pub child_id: Uuid,
    pub first_name: String,
    pub birthdate: Option<NaiveDate>,
    pub accommodations: Option<String>,
}

/// Everything `summarize` consumes. `today` is passed in so age derivation
/// stays a pure function of the input.
#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub today: NaiveDate,
    pub child: ChildProfile,
    pub school_events: Vec<RawEvent>,
    pub announcements: Vec<RawComm>,
    pub messages: Vec<RawComm>,
    pub family_anchors: Option<serde_json::Value>,
    pub scenario_pool: Option<Vec<Scenario>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisruptionKind {
    EarlyDismissal,
    LateStart,
    NoSchool,
    Conference,
    Testing,
}

#[derive(Debug, Clone, Serialize)]
pub struct Disruption {
    pub id: Uuid,
    pub kind: DisruptionKind,
    pub title: String,
    pub date: NaiveDate,
    pub impact_hint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommSource {
    Announcement,
    Message,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportantComm {
    pub source: CommSource,
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub importance_score: u8,
}

/// Reusable "tiny connection idea" template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildContext {
    pub child_id: Uuid,
    pub first_name: String,
    pub age_years: Option<i32>,
    pub accommodations: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchoolSignals {
    pub disruptions: Vec<Disruption>,
    pub events_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Communications {
    pub important: Vec<ImportantComm>,
    pub ignored_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFactors {
    pub disruptions: usize,
    pub important_comms: usize,
    pub events_in_week: usize,
}

/// Normalized, bounded view of one family's week. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub child_context: ChildContext,
    pub school_signals: SchoolSignals,
    pub communications: Communications,
    pub family_anchors: serde_json::Value,
    pub scenario_pool: Vec<Scenario>,
    pub load_score: u8,
    pub load_factors: LoadFactors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingToKnow {
    pub label: String,
    pub why: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TinyConnectionIdea {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// The five-part brief draft. Parsed from model output and re-checked by
/// `draft::validate_draft` before acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyBriefDraft {
    pub shape_of_the_week: String,
    #[serde(default)]
    pub school_things_to_know: Vec<ThingToKnow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moment_to_protect: Option<String>,
    pub gentle_heads_up: String,
    pub tiny_connection_idea: TinyConnectionIdea,
}

/// Draft plus provenance of how it was produced.
#[derive(Debug, Clone)]
pub struct GeneratedDraft {
    pub draft: WeeklyBriefDraft,
    pub used_fallback: bool,
    pub fallback_reason: Option<String>,
}

/// One (parent, child) pair eligible for a brief this week.
#[derive(Debug, Clone)]
pub struct FamilyRow {
    pub parent_user_id: Uuid,
    pub child_id: Uuid,
    pub first_name: String,
    pub birthdate: Option<NaiveDate>,
    pub accommodations: Option<String>,
    pub school_id: Uuid,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryFlags {
    pub has_history: bool,
    pub missed_last_week: bool,
}

#[derive(Debug, Clone)]
pub struct SavedBrief {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
}

/// Per-family outcome within one run. `saved_id` stays empty on dry runs and
/// on failures; `error` is set only when the family's pipeline threw.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyResult {
    pub parent_user_id: Uuid,
    pub child_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ux_state: Option<String>,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub generated: usize,
    pub results: Vec<FamilyResult>,
}
