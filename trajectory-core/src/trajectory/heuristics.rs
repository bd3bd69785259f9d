//! Tier 1: deterministic heuristics over the seeker's recent messages.
//!
//! Three checks run in a fixed order and the first match wins:
//!
//! 1. keyword repetition (`drift`)
//! 2. no progress (`stall`), only with a full window
//! 3. disengagement (`drift`)
//!
//! Only seeker messages are considered. Agent and provider turns are ignored.

use crate::types::{IndicatorDetail, IndicatorType, Message};
use std::collections::HashMap;

/// Below this many seeker messages the heuristics stay silent.
pub const MIN_SEEKER_MESSAGES: usize = 3;
/// Number of most recent seeker messages the checks look at.
pub const WINDOW_SIZE: usize = 5;
/// The no-progress check needs a full window.
pub const STALL_MIN_MESSAGES: usize = 5;

const MIN_TOKEN_CHARS: usize = 3;
const REPEAT_MIN_COUNT: usize = 3;
const REPEAT_MIN_KEYWORDS: usize = 2;
const REPEAT_TOP_N: usize = 3;
const STALL_MAX_ACTION_RATIO: f64 = 0.4;
const DISENGAGED_MAX_AVG_CHARS: f64 = 50.0;

/// Common function words and conversational fillers that never count as themes.
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "are", "was", "were", "with", "this", "that", "have", "has",
    "had", "from", "they", "them", "their", "there", "then", "than", "what", "when", "where",
    "which", "who", "whom", "why", "how", "not", "you", "your", "our", "can", "could", "would",
    "should", "been", "being", "into", "about", "just", "really", "very", "like", "also", "some",
    "any", "all", "its", "she", "him", "her", "his", "out", "get", "got", "too", "yeah", "dont",
    "know", "these", "those", "because", "again",
];

/// Words that signal the seeker is moving toward a concrete action.
pub const ACTION_WORDS: &[&str] = &[
    "will", "going", "plan", "start", "begin", "try", "attempt", "commit", "decide", "choose",
    "change", "do", "make", "create", "build",
];

/// Word lists the heuristics read from.
///
/// Passed explicitly so a provider or locale can supply its own lists.
#[derive(Debug, Clone, Copy)]
pub struct Vocabulary<'a> {
    pub stop_words: &'a [&'a str],
    pub action_words: &'a [&'a str],
}

impl Vocabulary<'static> {
    /// English defaults.
    pub const DEFAULT: Vocabulary<'static> = Vocabulary {
        stop_words: STOP_WORDS,
        action_words: ACTION_WORDS,
    };
}

impl Default for Vocabulary<'static> {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which heuristic produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicCheck {
    KeywordRepetition,
    NoProgress,
    Disengagement,
}

impl HeuristicCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeuristicCheck::KeywordRepetition => "keyword_repetition",
            HeuristicCheck::NoProgress => "no_progress",
            HeuristicCheck::Disengagement => "disengagement",
        }
    }
}

/// A positive Tier 1 result.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicFinding {
    pub check: HeuristicCheck,
    pub indicator_type: IndicatorType,
    pub detail: IndicatorDetail,
}

/// Run all checks in order and return the first finding.
pub fn evaluate(messages: &[Message], vocabulary: &Vocabulary<'_>) -> Option<HeuristicFinding> {
    let window = seeker_window(messages);
    if window.len() < MIN_SEEKER_MESSAGES {
        tracing::debug!(
            seeker_messages = window.len(),
            "Too few seeker messages for heuristics"
        );
        return None;
    }

    check_repetition(&window, vocabulary)
        .or_else(|| check_no_progress(&window, vocabulary))
        .or_else(|| check_disengagement(&window))
}

/// The most recent seeker messages, oldest first.
pub fn seeker_window(messages: &[Message]) -> Vec<&str> {
    let seeker: Vec<&str> = messages
        .iter()
        .filter(|m| m.is_seeker())
        .map(|m| m.content.as_str())
        .collect();
    let start = seeker.len().saturating_sub(WINDOW_SIZE);
    seeker[start..].to_vec()
}

/// Lowercase, strip punctuation, split on whitespace, drop short and stop words.
pub fn tokenize(text: &str, vocabulary: &Vocabulary<'_>) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !vocabulary.stop_words.contains(token))
        .map(str::to_string)
        .collect()
}

/// Tokens seen at least `REPEAT_MIN_COUNT` times, most frequent first.
///
/// Equal counts keep the order in which the tokens first appeared.
pub fn repeated_keywords(window: &[&str], vocabulary: &Vocabulary<'_>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for text in window {
        for token in tokenize(text, vocabulary) {
            match positions.get(&token) {
                Some(&idx) => counts[idx].1 += 1,
                None => {
                    positions.insert(token.clone(), counts.len());
                    counts.push((token, 1));
                }
            }
        }
    }

    let mut repeated: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= REPEAT_MIN_COUNT)
        .collect();
    // sort_by is stable
    repeated.sort_by(|a, b| b.1.cmp(&a.1));
    repeated.truncate(REPEAT_TOP_N);
    repeated
}

/// Keyword repetition: two or more themes recurring across the window.
pub fn check_repetition(window: &[&str], vocabulary: &Vocabulary<'_>) -> Option<HeuristicFinding> {
    let repeated = repeated_keywords(window, vocabulary);
    if repeated.len() < REPEAT_MIN_KEYWORDS {
        return None;
    }

    let keywords: Vec<String> = repeated.into_iter().map(|(token, _)| token).collect();
    let joined = keywords.join(", ");

    Some(HeuristicFinding {
        check: HeuristicCheck::KeywordRepetition,
        indicator_type: IndicatorType::Drift,
        detail: IndicatorDetail {
            message: format!(
                "The conversation keeps circling back to the same themes: {}.",
                joined
            ),
            pattern: HeuristicCheck::KeywordRepetition.as_str().to_string(),
            reason: format!("Repeated keywords across recent messages: {}", joined),
            keywords,
            ..Default::default()
        },
    })
}

/// No progress: few of the last messages mention any concrete action.
pub fn check_no_progress(
    window: &[&str],
    vocabulary: &Vocabulary<'_>,
) -> Option<HeuristicFinding> {
    if window.len() < STALL_MIN_MESSAGES {
        return None;
    }

    let total = window.len();
    let with_action = window
        .iter()
        .filter(|text| {
            let lower = text.to_lowercase();
            vocabulary.action_words.iter().any(|w| lower.contains(w))
        })
        .count();

    let ratio = with_action as f64 / total as f64;
    if ratio >= STALL_MAX_ACTION_RATIO {
        return None;
    }

    Some(HeuristicFinding {
        check: HeuristicCheck::NoProgress,
        indicator_type: IndicatorType::Stall,
        detail: IndicatorDetail {
            message: "The conversation is active, but no concrete next steps are emerging."
                .to_string(),
            pattern: HeuristicCheck::NoProgress.as_str().to_string(),
            reason: format!(
                "Only {} of {} recent messages mention an action",
                with_action, total
            ),
            action_messages: Some(with_action),
            total_messages: Some(total),
            ..Default::default()
        },
    })
}

/// Disengagement: consistently short replies.
pub fn check_disengagement(window: &[&str]) -> Option<HeuristicFinding> {
    if window.len() < MIN_SEEKER_MESSAGES {
        return None;
    }

    let total_chars: usize = window.iter().map(|text| text.chars().count()).sum();
    let avg_length = total_chars as f64 / window.len() as f64;
    if avg_length >= DISENGAGED_MAX_AVG_CHARS {
        return None;
    }

    Some(HeuristicFinding {
        check: HeuristicCheck::Disengagement,
        indicator_type: IndicatorType::Drift,
        detail: IndicatorDetail {
            message: "Recent replies have become short; the seeker may be disengaging."
                .to_string(),
            pattern: HeuristicCheck::Disengagement.as_str().to_string(),
            reason: format!("Average message length is {:.1} characters", avg_length),
            total_messages: Some(window.len()),
            avg_length: Some(avg_length),
            ..Default::default()
        },
    })
}
