//! Tier 2: rule-guided classification through a language model.
//!
//! The model sees the message window and the provider's rules, and answers
//! with one of `drift|leap|stall|steady` plus an optional rule index. Any
//! trouble on the way (transport error, timeout, malformed reply) degrades to
//! [`RuleOutcome::ServiceUnavailable`], never to a caller-visible error.

use super::client::LlmClient;
use crate::types::{IndicatorDetail, IndicatorType, Message, TrajectoryRule};
use serde::Deserialize;

pub const SYSTEM_PROMPT: &str =
    "You are a progress analyst for coaching conversations. Respond only with valid JSON.";

const FALLBACK_PATTERN: &str = "llm_classification";
const FALLBACK_REASON: &str = "No reason provided";

/// A rule copied out of the set that was sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRule {
    pub index: usize,
    pub rule: TrajectoryRule,
}

/// A positive Tier 2 result.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub indicator_type: IndicatorType,
    pub rule: Option<IndexedRule>,
    pub reason: String,
}

impl RuleMatch {
    /// Build the persisted detail, preferring the matched rule's wording.
    pub fn detail(&self) -> IndicatorDetail {
        match &self.rule {
            Some(indexed) => IndicatorDetail {
                rule_index: Some(indexed.index),
                message: indexed.rule.message.clone(),
                pattern: indexed.rule.pattern.clone(),
                reason: self.reason.clone(),
                stage: Some(indexed.rule.stage.clone()),
                ..Default::default()
            },
            None => IndicatorDetail {
                rule_index: None,
                message: fallback_message(self.indicator_type).to_string(),
                pattern: FALLBACK_PATTERN.to_string(),
                reason: self.reason.clone(),
                ..Default::default()
            },
        }
    }
}

/// What the rule tier concluded.
///
/// `NoMatch` and `ServiceUnavailable` look the same to callers (`matched: false`)
/// but are kept apart so degraded service can be told from a quiet conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Matched(RuleMatch),
    NoMatch,
    ServiceUnavailable(String),
}

#[derive(Debug, Deserialize)]
struct RuleResponse {
    indicator_type: Option<String>,
    #[serde(default)]
    matched_rule_index: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// Ask the model to classify `messages` against `rules`.
pub fn classify_with_rules(
    client: &dyn LlmClient,
    messages: &[Message],
    rules: &[TrajectoryRule],
) -> RuleOutcome {
    let prompt = build_prompt(messages, rules);

    match client.complete(SYSTEM_PROMPT, &prompt) {
        Ok(raw) => interpret_response(&raw, rules),
        Err(e) => {
            tracing::warn!(error = %e, "Rule classification call failed");
            RuleOutcome::ServiceUnavailable(e.to_string())
        }
    }
}

/// Build the classification prompt.
///
/// Messages carry role and content only; rules carry their index so the
/// model can point back at one.
pub fn build_prompt(messages: &[Message], rules: &[TrajectoryRule]) -> String {
    let mut conversation = String::new();
    for msg in messages {
        conversation.push_str(&format!(
            "{}: {}\n",
            msg.role.as_str(),
            msg.content.replace('\n', " ")
        ));
    }

    let mut rule_lines = String::new();
    for (index, rule) in rules.iter().enumerate() {
        rule_lines.push_str(&format!(
            "[{}] stage: {} | indicator: {} | pattern: {} | message: {}\n",
            index,
            rule.stage,
            rule.indicator_type.as_str(),
            rule.pattern,
            rule.message
        ));
    }

    format!(
        "Classify the seeker's recent direction in this coaching conversation against the provider's trajectory rules.\n\n\
         Indicator meanings:\n\
         - drift: the seeker repeats or ruminates within the same stage and shows no new behavior\n\
         - leap: the seeker jumps to advanced outcomes before foundational ones are in place\n\
         - stall: the conversation stays active but there is no cognitive or behavioral change over several turns\n\
         - steady: normal incremental movement; use this when nothing above applies\n\n\
         Trajectory rules:\n{rule_lines}\n\
         Conversation (oldest first):\n{conversation}\n\
         Respond with a JSON object and nothing else:\n\
         {{\"indicator_type\": \"drift|leap|stall|steady\", \"matched_rule_index\": <rule number or null>, \"reason\": \"<one short sentence>\"}}"
    )
}

/// Turn the model's raw reply into an outcome.
pub fn interpret_response(raw: &str, rules: &[TrajectoryRule]) -> RuleOutcome {
    let body = strip_code_fence(raw);
    let response: RuleResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "Rule classification response was not valid JSON");
            return RuleOutcome::ServiceUnavailable(format!("malformed response: {e}"));
        }
    };

    let Some(raw_type) = response.indicator_type else {
        tracing::debug!("Rule classification returned no indicator_type");
        return RuleOutcome::NoMatch;
    };
    let indicator_type = match raw_type.parse::<IndicatorType>() {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Rule classification returned an unknown indicator");
            return RuleOutcome::NoMatch;
        }
    };
    if !indicator_type.is_positive() {
        return RuleOutcome::NoMatch;
    }

    let rule = response
        .matched_rule_index
        .as_ref()
        .and_then(rule_index)
        .and_then(|index| {
            rules.get(index).map(|rule| IndexedRule {
                index,
                rule: rule.clone(),
            })
        });

    let reason = response
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_REASON.to_string());

    RuleOutcome::Matched(RuleMatch {
        indicator_type,
        rule,
        reason,
    })
}

/// Accept `2`, `2.0` or `"2"`; anything else is treated as absent.
fn rule_index(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize).or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as usize)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`), with or without a newline after it
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let rest = rest.trim();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn fallback_message(indicator_type: IndicatorType) -> &'static str {
    match indicator_type {
        IndicatorType::Drift => {
            "The seeker seems to be circling the same ground without trying anything new."
        }
        IndicatorType::Leap => {
            "The seeker is reaching for advanced outcomes before the groundwork is in place."
        }
        IndicatorType::Stall => "The conversation is active, but nothing seems to be shifting.",
        IndicatorType::Steady => "The seeker is moving forward at a steady pace.",
    }
}
