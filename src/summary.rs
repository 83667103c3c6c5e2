use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::models::{
    ChildContext, CommSource, Communications, Disruption, DisruptionKind, ImportantComm,
    LoadFactors, RawComm, Scenario, SchoolSignals, SummaryInput, WeeklySummary,
};

/// Ordered disruption rules; the first matching kind wins.
const DISRUPTION_RULES: &[(DisruptionKind, &[&str])] = &[
    (
        DisruptionKind::EarlyDismissal,
        &["early dismissal", "half-day", "half day"],
    ),
    (DisruptionKind::LateStart, &["late start", "delayed start"]),
    (
        DisruptionKind::NoSchool,
        &["no school", "school closed", "closure", "closed"],
    ),
    (DisruptionKind::Conference, &["conference"]),
    (DisruptionKind::Testing, &["testing", "exam", "assessment"]),
];

const DISALLOWED_TOPICS: &[&str] = &["grade", "graded", "score", "homework", "worksheet"];

const NEWSLETTER_HINTS: &[&str] = &[
    "newsletter",
    "weekly update",
    "this week at",
    "principal's note",
    "news and notes",
    "flyer",
];

const SAFETY_TERMS: &[&str] = &["safety", "lockdown", "emergency"];

const URGENT_TERMS: &[&str] = &["urgent", "required", "permission slip"];

const DEADLINE_TERMS: &[&str] = &["deadline", "rsvp", "sign up", "signup"];

const MAX_IMPORTANT_COMMS: usize = 10;
const COMM_TITLE_MAX: usize = 120;
const COMM_BODY_MAX: usize = 500;

/// Event count at or above which the week earns one extra load point.
const BUSY_EVENTS_THRESHOLD: usize = 8;

pub fn impact_hint(kind: DisruptionKind) -> &'static str {
    match kind {
        DisruptionKind::EarlyDismissal => {
            "The school day ends earlier than usual, so the afternoon routine shifts."
        }
        DisruptionKind::LateStart => {
            "The school day starts later than usual, so the morning has extra slack."
        }
        DisruptionKind::NoSchool => "No school this day, so the usual weekday rhythm pauses.",
        DisruptionKind::Conference => {
            "Conference time usually brings a schedule change and a chance to hear from teachers."
        }
        DisruptionKind::Testing => "A testing day can leave kids a little more drained than usual.",
    }
}

/// Monday-aligned week containing `date`: (preceding-or-same Monday, following Sunday).
pub fn resolve_week_range(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    (monday, monday + Duration::days(6))
}

pub fn classify_disruption(text: &str) -> Option<DisruptionKind> {
    let haystack = text.to_lowercase();
    for (kind, patterns) in DISRUPTION_RULES {
        if patterns.iter().any(|p| haystack.contains(p)) {
            return Some(*kind);
        }
    }
    None
}

/// Whole calendar years between `birthdate` and `today`; `None` when the
/// birthdate is missing or in the future.
pub fn age_years(birthdate: Option<NaiveDate>, today: NaiveDate) -> Option<i32> {
    let bd = birthdate?;
    let mut years = today.year() - bd.year();
    if (today.month(), today.day()) < (bd.month(), bd.day()) {
        years -= 1;
    }
    if years < 0 {
        return None;
    }
    Some(years)
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

enum CommOutcome {
    Ignored,
    Kept(u8),
}

/// First matching rule wins; a communication lands in exactly one bucket.
fn triage_communication(title: &str, body: &str) -> CommOutcome {
    let text = format!("{} {}", title, body).trim().to_lowercase();
    if text.is_empty() {
        return CommOutcome::Ignored;
    }
    if DISALLOWED_TOPICS.iter().any(|t| text.contains(t)) {
        return CommOutcome::Ignored;
    }
    if NEWSLETTER_HINTS.iter().any(|t| text.contains(t)) {
        return CommOutcome::Ignored;
    }

    let score = if SAFETY_TERMS.iter().any(|t| text.contains(t)) {
        3
    } else if URGENT_TERMS.iter().any(|t| text.contains(t))
        || classify_disruption(&text).is_some()
        || DEADLINE_TERMS.iter().any(|t| text.contains(t))
    {
        2
    } else {
        1
    };

    if score <= 1 {
        CommOutcome::Ignored
    } else {
        CommOutcome::Kept(score)
    }
}

pub fn load_score(disruptions: usize, important_comms: usize, events_in_week: usize) -> u8 {
    let bonus = if events_in_week >= BUSY_EVENTS_THRESHOLD { 1 } else { 0 };
    let raw = 3 * disruptions as i64 + important_comms as i64 + bonus;
    raw.clamp(0, 10) as u8
}

pub fn default_scenario_pool() -> Vec<Scenario> {
    vec![
        Scenario {
            id: "car-ride-question".to_string(),
            title: "One question in the car".to_string(),
            description: "On a ride this week, ask which part of the day felt longest and just listen.".to_string(),
            script: Some("What part of today felt the longest?".to_string()),
            duration_minutes: Some(5),
        },
        Scenario {
            id: "snack-sit".to_string(),
            title: "Sit for the snack".to_string(),
            description: "Sit down together for an after-school snack with no agenda.".to_string(),
            script: None,
            duration_minutes: Some(10),
        },
        Scenario {
            id: "bedtime-highlight".to_string(),
            title: "Bedtime highlight".to_string(),
            description: "At lights-out, trade one small good moment from the day.".to_string(),
            script: Some("What was one tiny good thing today?".to_string()),
            duration_minutes: Some(5),
        },
        Scenario {
            id: "walk-around-block".to_string(),
            title: "Walk around the block".to_string(),
            description: "Take a short walk together, phones left at home.".to_string(),
            script: None,
            duration_minutes: Some(15),
        },
    ]
}

pub fn default_family_anchors() -> serde_json::Value {
    serde_json::json!({
        "routines": [],
        "notes": "No routine context provided for this family."
    })
}

/// Normalize one family's raw week into a bounded `WeeklySummary`.
/// Pure: no I/O, no clock reads.
pub fn summarize(input: SummaryInput) -> WeeklySummary {
    let range_start = Utc.from_utc_datetime(&input.week_start.and_time(chrono::NaiveTime::MIN));
    // The upper bound is week_end at midnight, exclusive: a Sunday-dated
    // week_end admits events through Saturday night only.
    let range_end = Utc.from_utc_datetime(&input.week_end.and_time(chrono::NaiveTime::MIN));

    let mut disruptions = Vec::new();
    let mut events_count = 0usize;
    for event in &input.school_events {
        if event.starts_at < range_start || event.starts_at >= range_end {
            continue;
        }
        events_count += 1;
        let text = format!(
            "{} {}",
            event.title,
            event.description.as_deref().unwrap_or("")
        );
        if let Some(kind) = classify_disruption(&text) {
            disruptions.push(Disruption {
                id: event.id,
                kind,
                title: event.title.clone(),
                date: event.starts_at.date_naive(),
                impact_hint: impact_hint(kind).to_string(),
            });
        }
    }

    let mut important = Vec::new();
    let mut ignored_count = 0usize;
    let mut triage = |source: CommSource, comms: &[RawComm]| {
        for comm in comms {
            match triage_communication(&comm.title, &comm.body) {
                CommOutcome::Ignored => ignored_count += 1,
                CommOutcome::Kept(score) => important.push(ImportantComm {
                    source,
                    id: comm.id,
                    title: truncate_with_ellipsis(&comm.title, COMM_TITLE_MAX),
                    body: truncate_with_ellipsis(&comm.body, COMM_BODY_MAX),
                    created_at: comm.created_at,
                    importance_score: score,
                }),
            }
        }
    };
    triage(CommSource::Announcement, &input.announcements);
    triage(CommSource::Message, &input.messages);

    // Stable sort keeps insertion order (announcements first) on ties.
    important.sort_by(|a, b| b.importance_score.cmp(&a.importance_score));
    important.truncate(MAX_IMPORTANT_COMMS);

    let factors = LoadFactors {
        disruptions: disruptions.len(),
        important_comms: important.len(),
        events_in_week: events_count,
    };
    let score = load_score(factors.disruptions, factors.important_comms, factors.events_in_week);

    WeeklySummary {
        week_start: input.week_start,
        week_end: input.week_end,
        child_context: ChildContext {
            child_id: input.child.child_id,
            first_name: input.child.first_name,
            age_years: age_years(input.child.birthdate, input.today),
            accommodations: input.child.accommodations,
        },
        school_signals: SchoolSignals {
            disruptions,
            events_count,
        },
        communications: Communications {
            important,
            ignored_count,
        },
        family_anchors: input.family_anchors.unwrap_or_else(default_family_anchors),
        scenario_pool: input.scenario_pool.unwrap_or_else(default_scenario_pool),
        load_score: score,
        load_factors: factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChildProfile;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid timestamp")
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn event(title: &str, starts_at: &str) -> crate::models::RawEvent {
        crate::models::RawEvent {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            starts_at: ts(starts_at),
        }
    }

    fn comm(title: &str, body: &str) -> RawComm {
        RawComm {
            id: Uuid::new_v4(),
            title: title.to_string(),
            body: body.to_string(),
            created_at: ts("2025-01-14T12:00:00Z"),
        }
    }

    fn base_input() -> SummaryInput {
        SummaryInput {
            week_start: date("2025-01-13"),
            week_end: date("2025-01-19"),
            today: date("2025-01-13"),
            child: ChildProfile {
                child_id: Uuid::new_v4(),
                first_name: "Maya".to_string(),
                birthdate: Some(date("2016-03-20")),
                accommodations: None,
            },
            school_events: Vec::new(),
            announcements: Vec::new(),
            messages: Vec::new(),
            family_anchors: None,
            scenario_pool: None,
        }
    }

    #[test]
    fn week_range_aligns_to_monday() {
        // 2025-01-15 is a Wednesday.
        let (start, end) = resolve_week_range(date("2025-01-15"));
        assert_eq!(start, date("2025-01-13"));
        assert_eq!(end, date("2025-01-19"));

        let (start, end) = resolve_week_range(date("2025-01-13"));
        assert_eq!(start, date("2025-01-13"));
        assert_eq!(end, date("2025-01-19"));
    }

    #[test]
    fn early_dismissal_week_scenario() {
        let mut input = base_input();
        input
            .school_events
            .push(event("Early dismissal", "2025-01-14T09:00:00Z"));
        input
            .announcements
            .push(comm("Field trip", "Permission slip required by Friday"));

        let summary = summarize(input);
        assert_eq!(summary.school_signals.disruptions.len(), 1);
        assert_eq!(
            summary.school_signals.disruptions[0].kind,
            DisruptionKind::EarlyDismissal
        );
        assert_eq!(summary.communications.important.len(), 1);
        assert_eq!(summary.communications.important[0].importance_score, 2);
        assert_eq!(summary.load_score, 4);
    }

    #[test]
    fn event_at_week_end_midnight_is_excluded() {
        let mut input = base_input();
        input
            .school_events
            .push(event("No school", "2025-01-19T00:00:00Z"));

        let summary = summarize(input);
        assert!(summary.school_signals.disruptions.is_empty());
        assert_eq!(summary.school_signals.events_count, 0);
    }

    #[test]
    fn unmatched_event_counts_without_classifying() {
        let mut input = base_input();
        input
            .school_events
            .push(event("Spirit day", "2025-01-15T09:00:00Z"));

        let summary = summarize(input);
        assert!(summary.school_signals.disruptions.is_empty());
        assert_eq!(summary.school_signals.events_count, 1);
    }

    #[test]
    fn disallowed_topic_beats_urgency() {
        let mut input = base_input();
        input
            .announcements
            .push(comm("Homework reminder", "Urgent: packet due tomorrow"));

        let summary = summarize(input);
        assert!(summary.communications.important.is_empty());
        assert_eq!(summary.communications.ignored_count, 1);
    }

    #[test]
    fn newsletter_and_low_importance_are_ignored() {
        let mut input = base_input();
        input
            .announcements
            .push(comm("This week at Lincoln Elementary", "Lots going on!"));
        input.announcements.push(comm("Bake sale", "Cookies on Friday"));
        input.announcements.push(comm("", ""));

        let summary = summarize(input);
        assert!(summary.communications.important.is_empty());
        assert_eq!(summary.communications.ignored_count, 3);
    }

    #[test]
    fn safety_terms_outrank_urgent_terms() {
        let mut input = base_input();
        input
            .announcements
            .push(comm("Lockdown drill", "A practice drill happens Tuesday"));
        input
            .messages
            .push(comm("RSVP", "Please rsvp for the picnic"));

        let summary = summarize(input);
        assert_eq!(summary.communications.important.len(), 2);
        assert_eq!(summary.communications.important[0].importance_score, 3);
        assert_eq!(
            summary.communications.important[0].source,
            CommSource::Announcement
        );
        assert_eq!(summary.communications.important[1].importance_score, 2);
    }

    #[test]
    fn important_comms_cap_at_ten() {
        let mut input = base_input();
        for i in 0..14 {
            input
                .announcements
                .push(comm(&format!("Notice {i}"), "Urgent action needed"));
        }

        let summary = summarize(input);
        assert_eq!(summary.communications.important.len(), 10);
    }

    #[test]
    fn long_titles_and_bodies_are_truncated() {
        let mut input = base_input();
        input
            .announcements
            .push(comm(&"t".repeat(200), &format!("urgent {}", "b".repeat(600))));

        let summary = summarize(input);
        let kept = &summary.communications.important[0];
        assert_eq!(kept.title.chars().count(), 120);
        assert!(kept.title.ends_with('…'));
        assert_eq!(kept.body.chars().count(), 500);
    }

    #[test]
    fn load_score_follows_formula_and_clamps() {
        assert_eq!(load_score(0, 0, 0), 0);
        assert_eq!(load_score(1, 1, 0), 4);
        assert_eq!(load_score(1, 1, 8), 5);
        assert_eq!(load_score(1, 1, 7), 4);
        assert_eq!(load_score(4, 9, 20), 10);
    }

    #[test]
    fn age_uses_calendar_subtraction() {
        assert_eq!(
            age_years(Some(date("2016-03-20")), date("2025-01-13")),
            Some(8)
        );
        assert_eq!(
            age_years(Some(date("2016-03-20")), date("2025-03-20")),
            Some(9)
        );
        assert_eq!(age_years(None, date("2025-01-13")), None);
        assert_eq!(age_years(Some(date("2030-01-01")), date("2025-01-13")), None);
    }

    #[test]
    fn defaults_fill_missing_anchors_and_pool() {
        let summary = summarize(base_input());
        assert!(summary.scenario_pool.len() >= 4);
        assert!(summary.family_anchors.is_object());
    }
}
