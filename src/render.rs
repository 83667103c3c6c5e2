use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::WeeklyBriefDraft;

const TEXT_SUMMARY_MAX: usize = 240;

const EMPTY_THINGS_SENTENCE: &str = "Nothing stands out on the school calendar this week.";
const DEFAULT_MOMENT_SENTENCE: &str = "Any small pocket of calm this week counts.";
const FOOTER_DISCLAIMER: &str = "This brief is generated from your school's calendar and \
announcements. It can miss things; your own read on the week comes first.";

/// Human label for the week, e.g. "Jan 13 – Jan 19, 2025".
pub fn week_label(week_start: NaiveDate, week_end: NaiveDate) -> String {
    format!(
        "{} – {}",
        week_start.format("%b %-d"),
        week_end.format("%b %-d, %Y")
    )
}

/// Escape text destined for HTML. Every interpolated value goes through this;
/// draft fields may carry model output verbatim.
pub fn escape_html(text: &str) -> String {
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

pub fn render_html(week_label: &str, draft: &WeeklyBriefDraft) -> String {
    let mut html = String::new();

    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html><body>");
    let _ = writeln!(html, "<div class=\"weekly-brief\">");
    let _ = writeln!(html, "  <h1>Your family brief</h1>");
    let _ = writeln!(
        html,
        "  <p class=\"week-range\">{}</p>",
        escape_html(week_label)
    );

    let _ = writeln!(html, "  <section class=\"shape\">");
    let _ = writeln!(html, "    <h2>The shape of the week</h2>");
    let _ = writeln!(html, "    <p>{}</p>", escape_html(&draft.shape_of_the_week));
    let _ = writeln!(html, "  </section>");

    let _ = writeln!(html, "  <section class=\"things\">");
    let _ = writeln!(html, "    <h2>School things to know</h2>");
    if draft.school_things_to_know.is_empty() {
        let _ = writeln!(html, "    <p>{EMPTY_THINGS_SENTENCE}</p>");
    } else {
        let _ = writeln!(html, "    <ul>");
        for thing in &draft.school_things_to_know {
            let _ = writeln!(
                html,
                "      <li><strong>{}</strong>: {}</li>",
                escape_html(&thing.label),
                escape_html(&thing.why)
            );
        }
        let _ = writeln!(html, "    </ul>");
    }
    let _ = writeln!(html, "  </section>");

    let _ = writeln!(html, "  <section class=\"moment\">");
    let _ = writeln!(html, "    <h2>A moment to protect</h2>");
    let moment = draft
        .moment_to_protect
        .as_deref()
        .unwrap_or(DEFAULT_MOMENT_SENTENCE);
    let _ = writeln!(html, "    <p>{}</p>", escape_html(moment));
    let _ = writeln!(html, "  </section>");

    let _ = writeln!(html, "  <section class=\"heads-up\">");
    let _ = writeln!(html, "    <h2>Gentle heads-up</h2>");
    let _ = writeln!(html, "    <p>{}</p>", escape_html(&draft.gentle_heads_up));
    let _ = writeln!(html, "  </section>");

    let _ = writeln!(html, "  <section class=\"idea\">");
    let _ = writeln!(html, "    <h2>Tiny connection idea</h2>");
    let _ = writeln!(
        html,
        "    <p><strong>{}</strong> {}</p>",
        escape_html(&draft.tiny_connection_idea.title),
        escape_html(&draft.tiny_connection_idea.description)
    );
    if let Some(script) = &draft.tiny_connection_idea.script {
        let _ = writeln!(
            html,
            "    <blockquote>\u{201c}{}\u{201d}</blockquote>",
            escape_html(script)
        );
    }
    let _ = writeln!(html, "  </section>");

    let _ = writeln!(html, "  <footer><p>{FOOTER_DISCLAIMER}</p></footer>");
    let _ = writeln!(html, "</div>");
    let _ = writeln!(html, "</body></html>");

    html
}

/// Single-line preview: the shape sentence plus the first thing-to-know
/// label, capped at 240 characters.
pub fn render_text(week_label: &str, draft: &WeeklyBriefDraft) -> String {
    let mut line = format!("{}: {}", week_label, draft.shape_of_the_week);
    if let Some(thing) = draft.school_things_to_know.first() {
        let _ = write!(line, " Also: {}.", thing.label);
    }
    let line = line.replace('\n', " ");
    if line.chars().count() <= TEXT_SUMMARY_MAX {
        return line;
    }
    let mut out: String = line.chars().take(TEXT_SUMMARY_MAX - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ThingToKnow, TinyConnectionIdea};

    fn sample_draft() -> WeeklyBriefDraft {
        WeeklyBriefDraft {
            shape_of_the_week: "A steady week with one shorter day.".to_string(),
            school_things_to_know: vec![ThingToKnow {
                label: "Early dismissal Tuesday".to_string(),
                why: "The afternoon shifts earlier.".to_string(),
            }],
            moment_to_protect: None,
            gentle_heads_up: "All quiet otherwise.".to_string(),
            tiny_connection_idea: TinyConnectionIdea {
                title: "One question in the car".to_string(),
                description: "Ask which part of the day felt longest.".to_string(),
                script: Some("What part of today felt the longest?".to_string()),
            },
        }
    }

    #[test]
    fn interpolated_text_is_escaped() {
        let mut draft = sample_draft();
        draft.shape_of_the_week = "<script>alert('x')</script> & more".to_string();
        let html = render_html("Jan 13 – Jan 19, 2025", &draft);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&amp; more"));
    }

    #[test]
    fn sections_render_with_defaults() {
        let mut draft = sample_draft();
        draft.school_things_to_know.clear();
        let html = render_html("Jan 13 – Jan 19, 2025", &draft);
        assert!(html.contains(EMPTY_THINGS_SENTENCE));
        assert!(html.contains(DEFAULT_MOMENT_SENTENCE));
        assert!(html.contains("Gentle heads-up"));
        assert!(html.contains(FOOTER_DISCLAIMER));
    }

    #[test]
    fn script_is_quoted_when_present() {
        let html = render_html("Jan 13 – Jan 19, 2025", &sample_draft());
        assert!(html.contains("<blockquote>\u{201c}What part of today felt the longest?\u{201d}</blockquote>"));
    }

    #[test]
    fn text_summary_combines_shape_and_first_thing() {
        let text = render_text("Jan 13 – Jan 19, 2025", &sample_draft());
        assert!(text.contains("A steady week"));
        assert!(text.contains("Early dismissal Tuesday"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn text_summary_is_capped_with_ellipsis() {
        let mut draft = sample_draft();
        draft.shape_of_the_week = "w".repeat(300);
        let text = render_text("Jan 13 – Jan 19, 2025", &draft);
        assert_eq!(text.chars().count(), 240);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn week_label_formats_range() {
        let start: NaiveDate = "2025-01-13".parse().expect("date");
        let end: NaiveDate = "2025-01-19".parse().expect("date");
        assert_eq!(week_label(start, end), "Jan 13 – Jan 19, 2025");
    }
}
