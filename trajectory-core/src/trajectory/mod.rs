//! Trajectory classification
//!
//! Decides whether a seeker is progressing steadily, drifting, stalling or
//! leaping ahead, and records a positive finding as a progress indicator.
//!
//! ## Flow
//!
//! ```text
//!   recent messages + provider rules
//!                │
//!                ▼
//!   ┌────────────────────────┐  finding   ┌──────────────────────┐
//!   │ Tier 1: heuristics     │──────────▶│ persist one indicator │
//!   └──────────┬─────────────┘            └──────────────────────┘
//!              │ nothing                             ▲
//!              ▼                                     │ Matched
//!   ┌────────────────────────┐                       │
//!   │ Tier 2: LLM vs rules   │───────────────────────┘
//!   └────────────────────────┘  (only with an LLM client and ≥1 rule)
//! ```
//!
//! Tier 1 always pre-empts Tier 2. A pass stores zero or one indicator.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trajectory_core::trajectory::TrajectoryClassifier;
//! use trajectory_core::{Config, Database};
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let classifier = TrajectoryClassifier::new(&db);
//! let result = classifier.classify("session-1", &[], &[]);
//! assert!(!result.matched());
//! ```

pub mod client;
pub mod heuristics;
pub mod rules;

pub use client::{create_client, LlmClient};
pub use heuristics::{HeuristicCheck, HeuristicFinding, Vocabulary};
pub use rules::{IndexedRule, RuleMatch, RuleOutcome};

use crate::db::NewIndicator;
use crate::error::{Error, Result};
use crate::types::{
    AnalyzeRequest, AnalyzeResponse, IndicatorDetail, IndicatorType, Message, ProgressIndicator,
    TrajectoryRule,
};
use chrono::Utc;

/// Where positive indicators are written.
pub trait IndicatorStore: Send + Sync {
    fn insert_indicator(&self, new: &NewIndicator<'_>) -> Result<ProgressIndicator>;
}

/// Why the rule tier did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No LLM client configured
    NoClient,
    /// The provider has no rules
    NoRules,
}

/// Which tier decided the outcome of a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Heuristic(HeuristicCheck),
    Rules(RuleOutcome),
    RulesSkipped(SkipReason),
}

/// Result of one classification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub indicator: Option<ProgressIndicator>,
    pub detection: Detection,
    /// False when an indicator was computed but the insert failed
    pub persisted: bool,
}

impl Classification {
    pub fn matched(&self) -> bool {
        self.indicator.is_some()
    }

    fn none(detection: Detection) -> Self {
        Self {
            indicator: None,
            detection,
            persisted: false,
        }
    }

    pub fn into_response(self) -> AnalyzeResponse {
        let matched = self.matched();
        AnalyzeResponse {
            indicator: self.indicator,
            matched,
        }
    }
}

/// A validated classification request.
#[derive(Debug, Clone)]
pub struct ClassifyInput {
    pub session_id: String,
    pub recent_messages: Vec<Message>,
    pub trajectory_rules: Vec<TrajectoryRule>,
}

impl TryFrom<AnalyzeRequest> for ClassifyInput {
    type Error = Error;

    fn try_from(request: AnalyzeRequest) -> Result<Self> {
        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::InvalidInput("sessionId is required".to_string()))?;
        let recent_messages = request
            .recent_messages
            .ok_or_else(|| Error::InvalidInput("recentMessages is required".to_string()))?;
        let trajectory_rules = request
            .trajectory_rules
            .ok_or_else(|| Error::InvalidInput("trajectoryRules is required".to_string()))?;

        Ok(Self {
            session_id,
            recent_messages,
            trajectory_rules,
        })
    }
}

/// Two-tier trajectory classifier.
///
/// Holds no state between calls; everything it needs is passed in.
pub struct TrajectoryClassifier<'a> {
    store: &'a dyn IndicatorStore,
    llm: Option<&'a dyn LlmClient>,
    vocabulary: Vocabulary<'a>,
}

impl<'a> TrajectoryClassifier<'a> {
    /// Heuristics only, English vocabulary.
    pub fn new(store: &'a dyn IndicatorStore) -> Self {
        Self {
            store,
            llm: None,
            vocabulary: Vocabulary::DEFAULT,
        }
    }

    /// Enable the rule tier.
    pub fn with_llm(mut self, client: &'a dyn LlmClient) -> Self {
        self.llm = Some(client);
        self
    }

    /// Replace the heuristic word lists.
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary<'a>) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Validate an inbound request and classify it.
    pub fn analyze(&self, request: AnalyzeRequest) -> Result<Classification> {
        let input = ClassifyInput::try_from(request)?;
        Ok(self.classify(
            &input.session_id,
            &input.recent_messages,
            &input.trajectory_rules,
        ))
    }

    /// Run one classification pass.
    ///
    /// Never fails: LLM and storage problems are logged and degrade to
    /// "no match" or an unpersisted indicator respectively.
    pub fn classify(
        &self,
        session_id: &str,
        messages: &[Message],
        rules: &[TrajectoryRule],
    ) -> Classification {
        tracing::debug!(
            session_id,
            messages = messages.len(),
            rules = rules.len(),
            "Classifying trajectory"
        );

        if let Some(finding) = heuristics::evaluate(messages, &self.vocabulary) {
            tracing::info!(
                session_id,
                check = finding.check.as_str(),
                indicator_type = finding.indicator_type.as_str(),
                "Heuristic trajectory finding"
            );
            return self.record(
                session_id,
                finding.indicator_type,
                finding.detail,
                Detection::Heuristic(finding.check),
            );
        }

        let Some(client) = self.llm else {
            return Classification::none(Detection::RulesSkipped(SkipReason::NoClient));
        };
        if rules.is_empty() {
            return Classification::none(Detection::RulesSkipped(SkipReason::NoRules));
        }

        match rules::classify_with_rules(client, messages, rules) {
            RuleOutcome::Matched(matched) => {
                tracing::info!(
                    session_id,
                    indicator_type = matched.indicator_type.as_str(),
                    rule_index = ?matched.rule.as_ref().map(|r| r.index),
                    "Rule trajectory finding"
                );
                let detail = matched.detail();
                let indicator_type = matched.indicator_type;
                self.record(
                    session_id,
                    indicator_type,
                    detail,
                    Detection::Rules(RuleOutcome::Matched(matched)),
                )
            }
            outcome @ RuleOutcome::NoMatch => Classification::none(Detection::Rules(outcome)),
            outcome @ RuleOutcome::ServiceUnavailable(_) => {
                tracing::warn!(session_id, "Rule tier unavailable, reporting no match");
                Classification::none(Detection::Rules(outcome))
            }
        }
    }

    fn record(
        &self,
        session_id: &str,
        indicator_type: IndicatorType,
        detail: IndicatorDetail,
        detection: Detection,
    ) -> Classification {
        let new = NewIndicator {
            session_id,
            indicator_type,
            detail: &detail,
        };

        let (indicator, persisted) = match self.store.insert_indicator(&new) {
            Ok(stored) => (stored, true),
            Err(e) => {
                tracing::error!(
                    session_id,
                    error = %e,
                    "Failed to persist progress indicator"
                );
                let unsaved = ProgressIndicator {
                    id: None,
                    session_id: session_id.to_string(),
                    indicator_type,
                    detail,
                    created_at: Utc::now(),
                };
                (unsaved, false)
            }
        };

        Classification {
            indicator: Some(indicator),
            detection,
            persisted,
        }
    }
}
