use serde::Serialize;

use crate::models::HistoryFlags;

/// Load score at or above which a week reads as "busy".
pub const DEFAULT_BUSY_THRESHOLD: u8 = 6;

/// Presentation state for one family's brief. Advisory context for the
/// generator; it never changes validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UxState {
    /// First brief for this family.
    A,
    /// Normal week.
    B,
    /// Busy week; keep content minimal and reassuring.
    C,
    /// Re-entry after a missed week; never mention the miss.
    D,
}

impl UxState {
    pub fn classify(history: HistoryFlags, load_score: u8, busy_threshold: u8) -> Self {
        if !history.has_history {
            UxState::A
        } else if history.missed_last_week {
            UxState::D
        } else if load_score >= busy_threshold {
            UxState::C
        } else {
            UxState::B
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UxState::A => "A",
            UxState::B => "B",
            UxState::C => "C",
            UxState::D => "D",
        }
    }

    pub fn tone_hint(&self) -> &'static str {
        match self {
            UxState::A => "This is the family's first brief. Keep it light and general.",
            UxState::B => "A steady, ordinary week. Keep the tone even.",
            UxState::C => {
                "A heavy week. Keep content minimal and extra reassuring; less is more."
            }
            UxState::D => {
                "The family is coming back after a gap. Be welcoming and do not mention the gap."
            }
        }
    }
}
