use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::classify::{UxState, DEFAULT_BUSY_THRESHOLD};
use crate::draft;
use crate::llm::Completion;
use crate::models::{
    ChildProfile, FamilyResult, FamilyRow, HistoryFlags, RawComm, RawEvent, RunOutcome,
    SavedBrief, SummaryInput, WeeklyBriefDraft,
};
use crate::render;
use crate::summary::{resolve_week_range, summarize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Started,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "STARTED",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Tenant scope for one run: everything, one organization, or one school.
#[derive(Debug, Clone, Default)]
pub struct RunScope {
    pub organization_id: Option<Uuid>,
    pub school_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Any date inside the target week; defaults to today.
    pub week_of: Option<NaiveDate>,
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub trigger: String,
    pub scope: RunScope,
    pub created_by_user_id: Option<Uuid>,
    pub created_by_role: Option<String>,
}

/// Everything the store needs to upsert one brief, keyed by
/// (parent_user_id, child_id, week_start). Re-running a week overwrites
/// content fields, never identity.
#[derive(Debug, Clone)]
pub struct BriefRecord {
    pub parent_user_id: Uuid,
    pub child_id: Uuid,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub ux_state: UxState,
    pub load_score: u8,
    pub draft: WeeklyBriefDraft,
    pub content_html: String,
    pub content_text: String,
    pub raw_inputs: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

/// Persistence and directory collaborators for one run.
#[async_trait]
pub trait BriefStore: Send + Sync {
    async fn create_run(
        &self,
        week_start: NaiveDate,
        week_end: NaiveDate,
        options: &RunOptions,
    ) -> anyhow::Result<Uuid>;

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        generated_count: Option<usize>,
        error: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn eligible_families(
        &self,
        scope: &RunScope,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<FamilyRow>>;

    async fn school_events(
        &self,
        school_id: Uuid,
        week_start: NaiveDate,
        week_end: NaiveDate,
    ) -> anyhow::Result<Vec<RawEvent>>;

    async fn school_announcements(
        &self,
        school_id: Uuid,
        week_start: NaiveDate,
        week_end: NaiveDate,
    ) -> anyhow::Result<Vec<RawComm>>;

    async fn parent_messages(
        &self,
        parent_user_id: Uuid,
        week_start: NaiveDate,
        week_end: NaiveDate,
    ) -> anyhow::Result<Vec<RawComm>>;

    async fn family_history(
        &self,
        parent_user_id: Uuid,
        child_id: Uuid,
        prev_week_start: NaiveDate,
    ) -> anyhow::Result<HistoryFlags>;

    async fn upsert_brief(&self, record: &BriefRecord) -> anyhow::Result<SavedBrief>;

    async fn send_notification(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Generate briefs for every eligible family in the scoped week.
///
/// One family's failure never aborts the batch; it lands in that family's
/// result entry. Errors before or after the loop propagate, after the run
/// record is marked FAILED.
pub async fn run_weekly_briefs(
    store: &dyn BriefStore,
    llm: &dyn Completion,
    options: &RunOptions,
) -> anyhow::Result<RunOutcome> {
    let today = Utc::now().date_naive();
    let (week_start, week_end) = resolve_week_range(options.week_of.unwrap_or(today));

    let run_id = store
        .create_run(week_start, week_end, options)
        .await
        .context("failed to create run record")?;
    tracing::info!(
        %run_id, %week_start, %week_end,
        dry_run = options.dry_run, trigger = %options.trigger,
        "weekly brief run started"
    );

    match drive_families(store, llm, options, week_start, week_end, today).await {
        Ok(results) => {
            store
                .finish_run(run_id, RunStatus::Succeeded, Some(results.len()), None)
                .await
                .context("failed to close run record")?;
            let generated = results.iter().filter(|r| r.error.is_none()).count();
            tracing::info!(%run_id, generated, total = results.len(), "weekly brief run finished");
            Ok(RunOutcome {
                run_id,
                week_start,
                week_end,
                generated,
                results,
            })
        }
        Err(e) => {
            let message = format!("{e:#}");
            if let Err(mark_err) = store
                .finish_run(run_id, RunStatus::Failed, None, Some(&message))
                .await
            {
                tracing::warn!(%run_id, error = %mark_err, "could not mark run as failed");
            }
            Err(e)
        }
    }
}

async fn drive_families(
    store: &dyn BriefStore,
    llm: &dyn Completion,
    options: &RunOptions,
    week_start: NaiveDate,
    week_end: NaiveDate,
    today: NaiveDate,
) -> anyhow::Result<Vec<FamilyResult>> {
    let families = store
        .eligible_families(&options.scope, options.limit)
        .await
        .context("failed to fetch eligible families")?;

    // School events are shared by siblings and classmates; cache them for
    // the duration of this run only.
    let mut events_cache: HashMap<Uuid, Vec<RawEvent>> = HashMap::new();
    let mut results = Vec::with_capacity(families.len());

    for family in families {
        let parent_user_id = family.parent_user_id;
        let child_id = family.child_id;
        match process_family(
            store,
            llm,
            &family,
            week_start,
            week_end,
            today,
            options.dry_run,
            &mut events_cache,
        )
        .await
        {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::warn!(
                    %parent_user_id, %child_id, error = %e,
                    "family brief generation failed"
                );
                results.push(FamilyResult {
                    parent_user_id,
                    child_id,
                    saved_id: None,
                    ux_state: None,
                    used_fallback: false,
                    error: Some(format!("{e:#}")),
                });
            }
        }
    }

    Ok(results)
}

#[allow(clippy::too_many_arguments)]
async fn process_family(
    store: &dyn BriefStore,
    llm: &dyn Completion,
    family: &FamilyRow,
    week_start: NaiveDate,
    week_end: NaiveDate,
    today: NaiveDate,
    dry_run: bool,
    events_cache: &mut HashMap<Uuid, Vec<RawEvent>>,
) -> anyhow::Result<FamilyResult> {
    let events = match events_cache.get(&family.school_id) {
        Some(events) => events.clone(),
        None => {
            let events = store
                .school_events(family.school_id, week_start, week_end)
                .await?;
            events_cache.insert(family.school_id, events.clone());
            events
        }
    };
    let announcements = store
        .school_announcements(family.school_id, week_start, week_end)
        .await?;
    let messages = store
        .parent_messages(family.parent_user_id, week_start, week_end)
        .await?;

    let summary = summarize(SummaryInput {
        week_start,
        week_end,
        today,
        child: ChildProfile {
            child_id: family.child_id,
            first_name: family.first_name.clone(),
            birthdate: family.birthdate,
            accommodations: family.accommodations.clone(),
        },
        school_events: events,
        announcements,
        messages,
        family_anchors: None,
        scenario_pool: None,
    });

    let history = store
        .family_history(family.parent_user_id, family.child_id, week_start - Duration::days(7))
        .await?;
    let ux_state = UxState::classify(history, summary.load_score, DEFAULT_BUSY_THRESHOLD);

    let label = render::week_label(week_start, week_end);
    let generated = draft::generate(&label, ux_state, &summary, llm).await;
    let content_html = render::render_html(&label, &generated.draft);
    let content_text = render::render_text(&label, &generated.draft);

    if dry_run {
        return Ok(FamilyResult {
            parent_user_id: family.parent_user_id,
            child_id: family.child_id,
            saved_id: None,
            ux_state: Some(ux_state.as_str().to_string()),
            used_fallback: generated.used_fallback,
            error: None,
        });
    }

    let raw_inputs = serde_json::json!({
        "summary": summary,
        "provenance": {
            "used_fallback": generated.used_fallback,
            "fallback_reason": generated.fallback_reason,
        },
    });
    let record = BriefRecord {
        parent_user_id: family.parent_user_id,
        child_id: family.child_id,
        week_start,
        week_end,
        ux_state,
        load_score: summary.load_score,
        draft: generated.draft,
        content_html,
        content_text: content_text.clone(),
        raw_inputs,
        generated_at: Utc::now(),
    };
    let saved = store.upsert_brief(&record).await?;
    tracing::debug!(
        brief_id = %saved.id, generated_at = %saved.generated_at,
        "brief saved"
    );

    let metadata = serde_json::json!({
        "brief_id": saved.id,
        "week_start": week_start,
    });
    if let Err(e) = store
        .send_notification(
            family.parent_user_id,
            "Your weekly family brief is ready",
            &content_text,
            metadata,
        )
        .await
    {
        tracing::warn!(
            parent_user_id = %family.parent_user_id, error = %e,
            "brief-ready notification failed"
        );
    }

    Ok(FamilyResult {
        parent_user_id: family.parent_user_id,
        child_id: family.child_id,
        saved_id: Some(saved.id),
        ux_state: Some(ux_state.as_str().to_string()),
        used_fallback: generated.used_fallback,
        error: None,
    })
}
