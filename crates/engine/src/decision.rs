//! Decision adapter: turns a snapshot plus trigger reasons into a
//! normalised [`Decision`] via a pluggable decision maker.
//!
//! The external model is best-effort. Transport failures, timeouts,
//! malformed JSON, unknown actions and non-finite numbers all degrade to
//! HOLD; nothing on this path is allowed to throw into the event loop.

use crate::event_engine::Reason;
use crate::prompt::build_prompt;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use spot_bot_core::types::{Action, Decision, EntrySpec, EntryType};
use spot_bot_features::FeatureSnapshot;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("decision HTTP error: {0}")]
    Http(String),

    #[error("decision response parse error: {0}")]
    Parse(String),

    #[error("decision response carried no text")]
    Empty,
}

/// Hard limits echoed to the decision maker so it sizes within policy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Constraints {
    pub max_trade_risk_pct: f64,
    pub default_size_pct: f64,
    pub min_notional: f64,
}

pub struct DecisionRequest<'a> {
    pub snapshot: &'a FeatureSnapshot,
    pub reasons: &'a [Reason],
    pub constraints: Constraints,
    pub dry_run: bool,
}

/// The external judgement call, abstracted so tests can swap in canned
/// output.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AdapterError>;
}

pub struct DecisionAdapter {
    maker: Arc<dyn DecisionMaker>,
}

impl DecisionAdapter {
    #[must_use]
    pub fn new(maker: Arc<dyn DecisionMaker>) -> Self {
        Self { maker }
    }

    /// Produces a decision. Infallible: every failure mode maps to HOLD.
    pub async fn decide(&self, request: &DecisionRequest<'_>) -> Decision {
        if request.reasons.is_empty() {
            return Decision::hold("No triggers");
        }
        let prompt = build_prompt(request);
        match self.maker.complete(&prompt).await {
            Ok(raw) => normalize_decision(&raw),
            Err(e) => {
                tracing::warn!(error = %e, "decision maker unavailable, holding");
                Decision::hold(format!("decision maker unavailable: {e}"))
            }
        }
    }
}

/// Normalises raw model output into a [`Decision`].
///
/// Strips code fences, parses strict JSON, whitelists the action, coerces
/// numerics to finite values and validates the entry/followups shapes.
#[must_use]
pub fn normalize_decision(raw: &str) -> Decision {
    let stripped = strip_code_fences(raw);
    let value: Value = match serde_json::from_str(stripped) {
        Ok(value) => value,
        Err(e) => return Decision::hold(format!("unparseable decision: {e}")),
    };

    let Some(action) = value
        .get("action")
        .and_then(Value::as_str)
        .and_then(Action::parse)
    else {
        return Decision::hold("unsupported action");
    };

    Decision {
        action,
        size_pct: finite_number(value.get("size_pct")),
        entry: parse_entry(value.get("entry")),
        stop_atr: finite_number(value.get("stop_atr")),
        tp_atr: finite_number(value.get("tp_atr")),
        followups: string_list(value.get("followups")),
        comment: value
            .get("comment")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line itself (possibly "```json").
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn finite_number(value: Option<&Value>) -> Option<f64> {
    value?.as_f64().filter(|n| n.is_finite())
}

fn parse_entry(value: Option<&Value>) -> Option<EntrySpec> {
    let entry = value?.as_object()?;
    let entry_type = match entry.get("type").and_then(Value::as_str) {
        Some("market") => EntryType::Market,
        Some("limit") => EntryType::Limit,
        _ => return None,
    };
    Some(EntrySpec {
        entry_type,
        offset_bps: finite_number(entry.get("offset_bps")),
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Mock decision maker
// =============================================================================

/// Canned decision maker for tests and offline runs.
pub struct MockDecisionMaker {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
}

impl MockDecisionMaker {
    /// Always answers with `response`.
    #[must_use]
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: response.into(),
        }
    }

    /// Answers from the queue, then falls back to HOLD.
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: r#"{"action":"HOLD","comment":"mock exhausted"}"#.to_string(),
        }
    }
}

#[async_trait]
impl DecisionMaker for MockDecisionMaker {
    async fn complete(&self, _prompt: &str) -> Result<String, AdapterError> {
        let mut responses = self.responses.lock().await;
        Ok(responses.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Normalisation Tests ====================

    #[test]
    fn valid_decision_passes_through() {
        let raw = r#"{"action":"OPEN_LONG","size_pct":25,"entry":{"type":"limit","offset_bps":-5},"stop_atr":1.2,"tp_atr":2.5,"followups":["trail stop"],"comment":"confluence"}"#;
        let decision = normalize_decision(raw);
        assert_eq!(decision.action, Action::OpenLong);
        assert_eq!(decision.size_pct, Some(25.0));
        let entry = decision.entry.unwrap();
        assert_eq!(entry.entry_type, EntryType::Limit);
        assert_eq!(entry.offset_bps, Some(-5.0));
        assert_eq!(decision.followups, vec!["trail stop".to_string()]);
    }

    #[test]
    fn code_fences_are_stripped() {
        let raw = "```json\n{\"action\":\"TRIM\",\"size_pct\":50}\n```";
        let decision = normalize_decision(raw);
        assert_eq!(decision.action, Action::Trim);
        assert_eq!(decision.size_pct, Some(50.0));

        let raw = "```\n{\"action\":\"HOLD\"}\n```";
        assert_eq!(normalize_decision(raw).action, Action::Hold);
    }

    #[test]
    fn junk_becomes_hold() {
        let decision = normalize_decision("the market looks great, buy!");
        assert_eq!(decision.action, Action::Hold);
        assert!(decision.comment.contains("unparseable"));
    }

    #[test]
    fn unknown_action_becomes_hold() {
        let decision = normalize_decision(r#"{"action":"SHORT_EVERYTHING"}"#);
        assert_eq!(decision.action, Action::Hold);
        assert_eq!(decision.comment, "unsupported action");
    }

    #[test]
    fn missing_action_becomes_hold() {
        let decision = normalize_decision(r#"{"size_pct":25}"#);
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn non_finite_numbers_are_dropped() {
        let decision = normalize_decision(r#"{"action":"OPEN_LONG","size_pct":"lots"}"#);
        assert_eq!(decision.size_pct, None);

        let decision = normalize_decision(r#"{"action":"OPEN_LONG","stop_atr":null}"#);
        assert_eq!(decision.stop_atr, None);
    }

    #[test]
    fn invalid_entry_type_is_dropped() {
        let decision = normalize_decision(r#"{"action":"OPEN_LONG","entry":{"type":"stop"}}"#);
        assert!(decision.entry.is_none());
    }

    #[test]
    fn followups_must_be_a_string_list() {
        let decision = normalize_decision(r#"{"action":"HOLD","followups":"not a list"}"#);
        assert!(decision.followups.is_empty());

        let decision = normalize_decision(r#"{"action":"HOLD","followups":["a",2,"b"]}"#);
        assert_eq!(decision.followups, vec!["a".to_string(), "b".to_string()]);
    }

    // ==================== Adapter Tests ====================

    use spot_bot_features::{
        Confluence, HtfAnchors, LiquidityFlags, OrderbookFeatures, PositionSummary, Regime,
        RiskSummary,
    };
    use std::collections::BTreeMap;

    fn snapshot() -> FeatureSnapshot {
        FeatureSnapshot {
            pair: "DOGE/USD".to_string(),
            ts_unix_ms: 0,
            timeframes: BTreeMap::new(),
            htf_anchors: HtfAnchors::default(),
            orderbook: OrderbookFeatures::default(),
            confluence: Confluence::default(),
            liquidity: LiquidityFlags::default(),
            regime: Regime::default(),
            position: PositionSummary::default(),
            risk: RiskSummary::default(),
        }
    }

    fn constraints() -> Constraints {
        Constraints {
            max_trade_risk_pct: 0.75,
            default_size_pct: 25.0,
            min_notional: 20.0,
        }
    }

    #[tokio::test]
    async fn empty_reasons_short_circuit_without_calling_out() {
        struct Panicking;
        #[async_trait]
        impl DecisionMaker for Panicking {
            async fn complete(&self, _prompt: &str) -> Result<String, AdapterError> {
                panic!("must not be called");
            }
        }

        let adapter = DecisionAdapter::new(Arc::new(Panicking));
        let snap = snapshot();
        let request = DecisionRequest {
            snapshot: &snap,
            reasons: &[],
            constraints: constraints(),
            dry_run: true,
        };
        let decision = adapter.decide(&request).await;
        assert_eq!(decision.action, Action::Hold);
        assert_eq!(decision.comment, "No triggers");
    }

    #[tokio::test]
    async fn maker_failure_degrades_to_hold() {
        struct Failing;
        #[async_trait]
        impl DecisionMaker for Failing {
            async fn complete(&self, _prompt: &str) -> Result<String, AdapterError> {
                Err(AdapterError::Http("503".to_string()))
            }
        }

        let adapter = DecisionAdapter::new(Arc::new(Failing));
        let snap = snapshot();
        let reasons = [Reason::Startup];
        let request = DecisionRequest {
            snapshot: &snap,
            reasons: &reasons,
            constraints: constraints(),
            dry_run: true,
        };
        let decision = adapter.decide(&request).await;
        assert_eq!(decision.action, Action::Hold);
        assert!(decision.comment.contains("unavailable"));
    }

    #[tokio::test]
    async fn mock_maker_drives_the_adapter() {
        let maker = MockDecisionMaker::with_response(
            r#"{"action":"OPEN_LONG","size_pct":25,"comment":"go"}"#,
        );
        let adapter = DecisionAdapter::new(Arc::new(maker));
        let snap = snapshot();
        let reasons = [Reason::Startup];
        let request = DecisionRequest {
            snapshot: &snap,
            reasons: &reasons,
            constraints: constraints(),
            dry_run: true,
        };
        let decision = adapter.decide(&request).await;
        assert_eq!(decision.action, Action::OpenLong);
        assert_eq!(decision.comment, "go");
    }
}
