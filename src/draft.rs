use crate::classify::UxState;
use crate::llm::Completion;
use crate::models::{
    GeneratedDraft, ThingToKnow, TinyConnectionIdea, WeeklyBriefDraft, WeeklySummary,
};

pub const SHAPE_MAX: usize = 240;
pub const THING_LABEL_MAX: usize = 140;
pub const THING_WHY_MAX: usize = 240;
pub const MOMENT_MAX: usize = 320;
pub const HEADS_UP_MAX: usize = 360;
pub const IDEA_TITLE_MAX: usize = 120;
pub const IDEA_DESCRIPTION_MAX: usize = 240;
pub const MAX_THINGS_TO_KNOW: usize = 3;

/// Directive language the brief must never use, checked as case-insensitive
/// substrings.
const BANNED_PHRASES: &[&str] = &[
    "don't forget",
    "remember to",
    "make sure",
    "you should",
    "you must",
    "you need to",
    "be sure to",
];

/// Load score at or above which the fallback picks its quieter opening.
const FALLBACK_BUSY_THRESHOLD: u8 = 6;

const SYSTEM_PROMPT: &str = "You write a short weekly brief for a parent about their child's week at school. \
Your tone is warm, calm, and non-directive. You never tell the parent what to do, \
never imply they are behind, and never use guilt or pressure. You describe, you \
don't instruct. You respond with JSON only, no prose around it.";

fn build_user_prompt(week_label: &str, ux_state: UxState, summary: &WeeklySummary) -> String {
    let context = serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Write the weekly family brief for {week_label}.\n\
         \n\
         Tone for this family: {tone}\n\
         \n\
         Respond with a single JSON object, nothing else, with exactly these fields:\n\
         - \"shape_of_the_week\": one sentence, at most {shape} characters.\n\
         - \"school_things_to_know\": array of 0 to {things} objects, each with\n\
           \"label\" (at most {label} characters) and \"why\" (at most {why} characters).\n\
         - \"moment_to_protect\": optional string, at most {moment} characters.\n\
         - \"gentle_heads_up\": string, at most {heads} characters.\n\
         - \"tiny_connection_idea\": object with \"title\" (at most {idea_title} characters),\n\
           \"description\" (at most {idea_desc} characters), and optional \"script\".\n\
         \n\
         Never use directive phrases such as \"remember to\", \"make sure\", or \"you should\".\n\
         \n\
         This week's context:\n{context}",
        tone = ux_state.tone_hint(),
        shape = SHAPE_MAX,
        things = MAX_THINGS_TO_KNOW,
        label = THING_LABEL_MAX,
        why = THING_WHY_MAX,
        moment = MOMENT_MAX,
        heads = HEADS_UP_MAX,
        idea_title = IDEA_TITLE_MAX,
        idea_desc = IDEA_DESCRIPTION_MAX,
    )
}

/// Models often wrap JSON in Markdown fences; unwrap before parsing.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end_matches('`').trim()
}

fn banned_phrase_in(text: &str) -> Option<&'static str> {
    let haystack = text.to_lowercase();
    BANNED_PHRASES.iter().copied().find(|p| haystack.contains(p))
}

fn check_field(violations: &mut Vec<String>, field: &str, text: &str, max: usize, required: bool) {
    if text.trim().is_empty() {
        if required {
            violations.push(format!("{field} must not be empty"));
        }
        return;
    }
    if text.chars().count() > max {
        violations.push(format!("{field} exceeds {max} characters"));
    }
    if let Some(phrase) = banned_phrase_in(text) {
        violations.push(format!("{field} contains the banned phrase \"{phrase}\""));
    }
}

/// Collect every violation, not just the first; the retry prompt lists all of
/// them back to the model.
pub fn validate_draft(draft: &WeeklyBriefDraft) -> Vec<String> {
    let mut violations = Vec::new();

    check_field(
        &mut violations,
        "shape_of_the_week",
        &draft.shape_of_the_week,
        SHAPE_MAX,
        true,
    );

    if draft.school_things_to_know.len() > MAX_THINGS_TO_KNOW {
        violations.push(format!(
            "school_things_to_know has more than {MAX_THINGS_TO_KNOW} items"
        ));
    }
    for (i, thing) in draft.school_things_to_know.iter().enumerate() {
        check_field(
            &mut violations,
            &format!("school_things_to_know[{i}].label"),
            &thing.label,
            THING_LABEL_MAX,
            true,
        );
        check_field(
            &mut violations,
            &format!("school_things_to_know[{i}].why"),
            &thing.why,
            THING_WHY_MAX,
            true,
        );
    }

    if let Some(moment) = &draft.moment_to_protect {
        check_field(&mut violations, "moment_to_protect", moment, MOMENT_MAX, false);
    }

    check_field(
        &mut violations,
        "gentle_heads_up",
        &draft.gentle_heads_up,
        HEADS_UP_MAX,
        true,
    );

    check_field(
        &mut violations,
        "tiny_connection_idea.title",
        &draft.tiny_connection_idea.title,
        IDEA_TITLE_MAX,
        true,
    );
    check_field(
        &mut violations,
        "tiny_connection_idea.description",
        &draft.tiny_connection_idea.description,
        IDEA_DESCRIPTION_MAX,
        true,
    );
    if let Some(script) = &draft.tiny_connection_idea.script {
        if let Some(phrase) = banned_phrase_in(script) {
            violations.push(format!(
                "tiny_connection_idea.script contains the banned phrase \"{phrase}\""
            ));
        }
    }

    violations
}

/// Parse then validate; the error is the full violation list so the retry
/// prompt can enumerate it.
fn parse_and_validate(raw: &str) -> Result<WeeklyBriefDraft, Vec<String>> {
    let draft: WeeklyBriefDraft = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| vec![format!("response was not valid JSON: {e}")])?;
    let violations = validate_draft(&draft);
    if violations.is_empty() {
        Ok(draft)
    } else {
        Err(violations)
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Deterministic draft built entirely from the summary. Always passes
/// validation.
pub fn fallback_draft(summary: &WeeklySummary) -> WeeklyBriefDraft {
    let shape = if summary.load_score >= FALLBACK_BUSY_THRESHOLD {
        "This week looks fuller than usual, so this brief is kept small on purpose."
    } else {
        "This week looks fairly steady, with a familiar rhythm at school."
    };

    let mut things: Vec<ThingToKnow> = summary
        .school_signals
        .disruptions
        .iter()
        .take(2)
        .map(|d| ThingToKnow {
            label: clip(&d.title, THING_LABEL_MAX),
            why: clip(&d.impact_hint, THING_WHY_MAX),
        })
        .collect();
    if things.len() < MAX_THINGS_TO_KNOW {
        if let Some(comm) = summary.communications.important.first() {
            things.push(ThingToKnow {
                label: clip(&comm.title, THING_LABEL_MAX),
                why: "The school flagged this one as worth a glance when there's a quiet moment."
                    .to_string(),
            });
        }
    }

    let idea = summary
        .scenario_pool
        .first()
        .cloned()
        .unwrap_or_else(|| crate::summary::default_scenario_pool().remove(0));

    WeeklyBriefDraft {
        shape_of_the_week: shape.to_string(),
        school_things_to_know: things,
        moment_to_protect: Some(
            "If one calm pocket of time shows up this week, it can simply stay unhurried."
                .to_string(),
        ),
        gentle_heads_up:
            "Nothing here needs action right now; this is just a picture of the week ahead."
                .to_string(),
        tiny_connection_idea: TinyConnectionIdea {
            title: clip(&idea.title, IDEA_TITLE_MAX),
            description: clip(&idea.description, IDEA_DESCRIPTION_MAX),
            script: idea.script,
        },
    }
}

/// Produce a validated draft for one family. Never fails: completion errors
/// and invalid model output (after one retry) both resolve to the
/// deterministic fallback, with the reason recorded in provenance.
pub async fn generate(
    week_label: &str,
    ux_state: UxState,
    summary: &WeeklySummary,
    llm: &dyn Completion,
) -> GeneratedDraft {
    let user_prompt = build_user_prompt(week_label, ux_state, summary);

    let raw = match llm.complete(SYSTEM_PROMPT, &user_prompt).await {
        Ok(raw) => raw,
        Err(e) => return fall_back(summary, e.to_string()),
    };

    let violations = match parse_and_validate(&raw) {
        Ok(draft) => {
            return GeneratedDraft {
                draft,
                used_fallback: false,
                fallback_reason: None,
            }
        }
        Err(violations) => violations,
    };

    tracing::debug!(count = violations.len(), "draft failed validation, retrying once");
    let bullets: String = violations.iter().map(|v| format!("- {v}\n")).collect();
    let retry_prompt = format!(
        "{user_prompt}\n\nYour previous response had these problems:\n{bullets}\
         Respond again with corrected JSON only."
    );

    let raw = match llm.complete(SYSTEM_PROMPT, &retry_prompt).await {
        Ok(raw) => raw,
        Err(e) => return fall_back(summary, e.to_string()),
    };

    match parse_and_validate(&raw) {
        Ok(draft) => GeneratedDraft {
            draft,
            used_fallback: false,
            fallback_reason: None,
        },
        Err(violations) => fall_back(summary, violations.join("; ")),
    }
}

fn fall_back(summary: &WeeklySummary, reason: String) -> GeneratedDraft {
    tracing::debug!(reason = %reason, "using deterministic fallback draft");
    GeneratedDraft {
        draft: fallback_draft(summary),
        used_fallback: true,
        fallback_reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionError;
    use crate::models::{ChildProfile, RawComm, RawEvent, SummaryInput};
    use crate::summary::summarize;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Plays back scripted responses, one per call.
    struct ScriptedLlm {
        responses: Mutex<Vec<Result<String, ()>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<String, ()>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl Completion for ScriptedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, CompletionError> {
            *self.calls.lock().expect("lock") += 1;
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                return Err(CompletionError::Network("no scripted response".to_string()));
            }
            responses
                .remove(0)
                .map_err(|_| CompletionError::Network("connection reset".to_string()))
        }
    }

    fn sample_summary() -> crate::models::WeeklySummary {
        summarize(SummaryInput {
            week_start: "2025-01-13".parse().expect("date"),
            week_end: "2025-01-19".parse().expect("date"),
            today: "2025-01-13".parse().expect("date"),
            child: ChildProfile {
                child_id: Uuid::new_v4(),
                first_name: "Maya".to_string(),
                birthdate: None,
                accommodations: None,
            },
            school_events: vec![RawEvent {
                id: Uuid::new_v4(),
                title: "Early dismissal".to_string(),
                description: None,
                starts_at: "2025-01-14T09:00:00Z".parse().expect("timestamp"),
            }],
            announcements: vec![RawComm {
                id: Uuid::new_v4(),
                title: "Field trip".to_string(),
                body: "Permission slip required by Friday".to_string(),
                created_at: "2025-01-13T08:00:00Z".parse().expect("timestamp"),
            }],
            messages: Vec::new(),
            family_anchors: None,
            scenario_pool: None,
        })
    }

    fn valid_draft_json() -> String {
        serde_json::json!({
            "shape_of_the_week": "A steady week with one shorter school day midweek.",
            "school_things_to_know": [
                {"label": "Early dismissal Tuesday", "why": "The afternoon routine shifts a bit earlier."}
            ],
            "moment_to_protect": "Tuesday afternoon opens up a little earlier than usual.",
            "gentle_heads_up": "A field trip form is circulating; it can wait for a quiet moment.",
            "tiny_connection_idea": {
                "title": "One question in the car",
                "description": "Ask which part of the day felt longest and just listen."
            }
        })
        .to_string()
    }

    #[test]
    fn valid_draft_passes_and_revalidates() {
        let draft: WeeklyBriefDraft =
            serde_json::from_str(&valid_draft_json()).expect("parse draft");
        assert!(validate_draft(&draft).is_empty());
        assert!(validate_draft(&draft).is_empty());
    }

    #[test]
    fn all_violations_are_collected() {
        let draft = WeeklyBriefDraft {
            shape_of_the_week: format!("Make sure {}", "x".repeat(250)),
            school_things_to_know: vec![ThingToKnow {
                label: String::new(),
                why: "fine".to_string(),
            }],
            moment_to_protect: None,
            gentle_heads_up: String::new(),
            tiny_connection_idea: TinyConnectionIdea {
                title: "ok".to_string(),
                description: "You should do this".to_string(),
                script: None,
            },
        };

        let violations = validate_draft(&draft);
        assert!(violations.len() >= 4);
        assert!(violations.iter().any(|v| v.contains("banned phrase")));
        assert!(violations.iter().any(|v| v.contains("exceeds 240")));
        assert!(violations.iter().any(|v| v.contains("must not be empty")));
    }

    #[test]
    fn banned_phrase_match_is_case_insensitive() {
        assert!(banned_phrase_in("REMEMBER TO sign the form").is_some());
        assert!(banned_phrase_in("a gentle note about the week").is_none());
    }

    #[test]
    fn code_fences_are_stripped_before_parsing() {
        let fenced = format!("```json\n{}\n```", valid_draft_json());
        assert!(parse_and_validate(&fenced).is_ok());
    }

    #[test]
    fn fallback_draft_is_always_valid() {
        let summary = sample_summary();
        let draft = fallback_draft(&summary);
        assert!(validate_draft(&draft).is_empty());
        // One disruption plus the top communication.
        assert_eq!(draft.school_things_to_know.len(), 2);
        assert_eq!(draft.school_things_to_know[0].label, "Early dismissal");
    }

    #[tokio::test]
    async fn completion_failure_on_both_calls_still_yields_a_draft() {
        let llm = ScriptedLlm::new(vec![Err(()), Err(())]);
        let summary = sample_summary();
        let generated = generate("Jan 13 – Jan 19, 2025", UxState::B, &summary, &llm).await;

        assert!(generated.used_fallback);
        assert!(generated
            .fallback_reason
            .as_deref()
            .is_some_and(|r| r.contains("connection reset")));
        assert!(validate_draft(&generated.draft).is_empty());
        // A thrown completion call goes straight to fallback, no retry.
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn invalid_then_valid_response_uses_the_retry() {
        let llm = ScriptedLlm::new(vec![
            Ok("not json at all".to_string()),
            Ok(valid_draft_json()),
        ]);
        let summary = sample_summary();
        let generated = generate("Jan 13 – Jan 19, 2025", UxState::B, &summary, &llm).await;

        assert!(!generated.used_fallback);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn invalid_retry_falls_back_with_violations_as_reason() {
        let banned = serde_json::json!({
            "shape_of_the_week": "Make sure to check the backpack.",
            "school_things_to_know": [],
            "gentle_heads_up": "All quiet.",
            "tiny_connection_idea": {"title": "Walk", "description": "A short walk together."}
        })
        .to_string();
        let llm = ScriptedLlm::new(vec![Ok(banned.clone()), Ok(banned)]);
        let summary = sample_summary();
        let generated = generate("Jan 13 – Jan 19, 2025", UxState::C, &summary, &llm).await;

        assert!(generated.used_fallback);
        assert!(generated
            .fallback_reason
            .as_deref()
            .is_some_and(|r| r.contains("banned phrase")));
        assert_eq!(llm.call_count(), 2);
    }
}
