//! Response quality signals.
//!
//! Streaks count *consecutive* qualifying turns: one good turn resets
//! its counter to zero. The monitor itself is stateless; the counters
//! live on the session so they ride along with the call.

use crate::session::{Session, Speaker, Turn};

/// Quality flags for a single counterparty turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnQuality {
    /// Word count at or below the terseness limit.
    pub is_terse: bool,
    /// Transcription confidence below the threshold. Turns without a
    /// confidence score never count as low-confidence.
    pub is_low_confidence: bool,
}

/// Thresholds for the quality signals.
#[derive(Debug, Clone, Copy)]
pub struct QualityMonitor {
    /// Responses with at most this many words count as terse.
    pub terse_word_limit: usize,
    /// Confidence scores below this count as unreliable audio.
    pub min_confidence: f32,
}

impl Default for QualityMonitor {
    fn default() -> Self {
        Self {
            terse_word_limit: 2,
            min_confidence: 0.7,
        }
    }
}

impl QualityMonitor {
    /// Pure assessment of one turn.
    pub fn assess(&self, turn: &Turn) -> TurnQuality {
        let word_count = turn.text.split_whitespace().count();
        TurnQuality {
            is_terse: word_count <= self.terse_word_limit,
            is_low_confidence: turn
                .confidence
                .is_some_and(|c| c < self.min_confidence),
        }
    }

    /// Assesses the latest counterparty turn and updates the session's
    /// streak counters. Agent turns are ignored.
    pub fn observe(&self, session: &mut Session, turn: &Turn) -> TurnQuality {
        let quality = self.assess(turn);
        if turn.speaker != Speaker::Counterparty {
            return quality;
        }
        if quality.is_terse {
            session.terse_streak += 1;
        } else {
            session.terse_streak = 0;
        }
        if quality.is_low_confidence {
            session.clarification_streak += 1;
        } else {
            session.clarification_streak = 0;
        }
        quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Scenario, Session, Subject};

    fn session() -> Session {
        Session::new(
            "q-1".into(),
            Scenario::CheckIn,
            Subject {
                driver_name: "Dana".into(),
                load_number: "L-42".into(),
                phone_number: None,
            },
        )
    }

    fn turn(text: &str, confidence: Option<f32>) -> Turn {
        Turn {
            speaker: Speaker::Counterparty,
            text: text.into(),
            confidence,
            offset_ms: 0,
        }
    }

    #[test]
    fn terse_streak_counts_consecutive_short_turns() {
        let monitor = QualityMonitor::default();
        let mut s = session();
        for text in ["yeah", "fine", "ok"] {
            monitor.observe(&mut s, &turn(text, Some(0.95)));
        }
        assert_eq!(s.terse_streak, 3);
    }

    #[test]
    fn terse_streak_resets_on_a_substantive_turn() {
        let monitor = QualityMonitor::default();
        let mut s = session();
        monitor.observe(&mut s, &turn("yeah", None));
        monitor.observe(&mut s, &turn("ok", None));
        monitor.observe(&mut s, &turn("I'm about two hours out of Phoenix", None));
        assert_eq!(s.terse_streak, 0);
    }

    #[test]
    fn low_confidence_streak_tracks_and_resets() {
        let monitor = QualityMonitor::default();
        let mut s = session();
        monitor.observe(&mut s, &turn("something garbled", Some(0.4)));
        monitor.observe(&mut s, &turn("still garbled here", Some(0.5)));
        assert_eq!(s.clarification_streak, 2);
        monitor.observe(&mut s, &turn("can you hear me now", Some(0.9)));
        assert_eq!(s.clarification_streak, 0);
    }

    #[test]
    fn missing_confidence_is_not_low_confidence() {
        let monitor = QualityMonitor::default();
        let q = monitor.assess(&turn("hello there dispatch", None));
        assert!(!q.is_low_confidence);
    }

    #[test]
    fn agent_turns_do_not_move_streaks() {
        let monitor = QualityMonitor::default();
        let mut s = session();
        monitor.observe(&mut s, &turn("yeah", None));
        let agent = Turn {
            speaker: Speaker::Agent,
            text: "ok".into(),
            confidence: None,
            offset_ms: 0,
        };
        monitor.observe(&mut s, &agent);
        assert_eq!(s.terse_streak, 1);
    }
}
