//! Core domain types for trajectory analysis
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Provider** | A coach or therapist who owns a set of trajectory rules |
//! | **Seeker** | The client being coached; only their messages feed the heuristics |
//! | **Agent** | The AI that mediates the chat session |
//! | **Session** | One coaching conversation, identified by an opaque string |
//! | **Trajectory rule** | A provider-authored description of a known progress signature |
//! | **Progress indicator** | The persisted output of one classification pass |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Messages
// ============================================

/// Who spoke a message in a coaching session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    /// The client being coached
    Seeker,
    /// The AI mediating the conversation
    Agent,
    /// The human coach/therapist
    Provider,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerRole::Seeker => "seeker",
            SpeakerRole::Agent => "agent",
            SpeakerRole::Provider => "provider",
        }
    }
}

impl std::str::FromStr for SpeakerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seeker" => Ok(SpeakerRole::Seeker),
            "agent" => Ok(SpeakerRole::Agent),
            "provider" => Ok(SpeakerRole::Provider),
            _ => Err(format!("unknown speaker role: {}", s)),
        }
    }
}

impl std::fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One utterance in a session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: SpeakerRole,
    pub content: String,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: SpeakerRole, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at,
        }
    }

    pub fn is_seeker(&self) -> bool {
        self.role == SpeakerRole::Seeker
    }
}

// ============================================
// Indicators and rules
// ============================================

/// Direction of a seeker's progress.
///
/// `Steady` is the "no finding" sentinel: it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    /// Rumination within the same stage, no new behaviour
    Drift,
    /// Jumping to advanced outcomes before foundational ones
    Leap,
    /// Active conversation without cognitive or behavioural change
    Stall,
    /// Normal incremental movement
    Steady,
}

impl IndicatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::Drift => "drift",
            IndicatorType::Leap => "leap",
            IndicatorType::Stall => "stall",
            IndicatorType::Steady => "steady",
        }
    }

    /// Whether this kind is an actionable finding.
    pub fn is_positive(&self) -> bool {
        !matches!(self, IndicatorType::Steady)
    }
}

impl std::str::FromStr for IndicatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drift" => Ok(IndicatorType::Drift),
            "leap" => Ok(IndicatorType::Leap),
            "stall" => Ok(IndicatorType::Stall),
            "steady" => Ok(IndicatorType::Steady),
            _ => Err(format!("unknown indicator type: {}", s)),
        }
    }
}

impl std::fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A provider-authored pattern describing a known progress signature.
///
/// `pattern` is a free-text description read by the language model, not a regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryRule {
    pub stage: String,
    #[serde(alias = "indicatorType")]
    pub indicator_type: IndicatorType,
    pub pattern: String,
    pub message: String,
}

/// Detail payload attached to a progress indicator.
///
/// Heuristic findings leave `rule_index` empty and fill the auxiliary field
/// belonging to their check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDetail {
    /// Index of the matched rule in the set that was classified against
    #[serde(default)]
    pub rule_index: Option<usize>,
    /// Human-facing message for the provider/seeker
    pub message: String,
    /// Matched rule pattern, heuristic check name, or generic fallback
    pub pattern: String,
    /// Machine-facing explanation
    pub reason: String,
    /// Stage of the matched rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Repeated keywords, most frequent first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Messages that mentioned a concrete action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_messages: Option<usize>,
    /// Messages considered by the check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_messages: Option<usize>,
    /// Average seeker message length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_length: Option<f64>,
}

/// The output artifact of one classification pass.
///
/// `id` is `None` when the indicator was computed but could not be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressIndicator {
    pub id: Option<i64>,
    pub session_id: String,
    #[serde(rename = "type")]
    pub indicator_type: IndicatorType,
    pub detail: IndicatorDetail,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Inbound call contract
// ============================================

/// Request body sent by the chat handler after each seeker message.
///
/// Every field is optional at the serde level so that a missing argument
/// surfaces as a descriptive validation error rather than a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default, alias = "recent_messages")]
    pub recent_messages: Option<Vec<Message>>,
    #[serde(default, alias = "trajectory_rules")]
    pub trajectory_rules: Option<Vec<TrajectoryRule>>,
}

/// Response body of the inbound call contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub indicator: Option<ProgressIndicator>,
    pub matched: bool,
}
