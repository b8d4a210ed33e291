//! Prompt composition for the decision maker.

use crate::decision::DecisionRequest;
use serde_json::json;

const INSTRUCTIONS: &str = "\
You are the trade-decision module of a spot trading bot on Kraken. \
You receive a feature snapshot, the reasons this evaluation was triggered, \
and hard risk constraints. Long-only spot: no shorting, no leverage.

Reply with ONE strict JSON object and nothing else:
{
  \"action\": \"HOLD|OPEN_LONG|ADD|TRIM|CLOSE_PARTIAL|CLOSE_ALL|MOVE_STOP|SET_TP|PAUSE\",
  \"size_pct\": number|null,
  \"entry\": {\"type\": \"market|limit\", \"offset_bps\": number}|null,
  \"stop_atr\": number|null,
  \"tp_atr\": number|null,
  \"followups\": [string],
  \"comment\": string
}

Prefer HOLD when the evidence is thin. Respect the constraints: never size \
beyond max_trade_risk_pct and keep orders above min_notional.";

/// Builds the full prompt: fixed instructions followed by the serialised
/// request payload.
#[must_use]
pub fn build_prompt(request: &DecisionRequest<'_>) -> String {
    let reasons: Vec<String> = request.reasons.iter().map(ToString::to_string).collect();
    let payload = json!({
        "pair": request.snapshot.pair,
        "reasons": reasons,
        "features": request.snapshot,
        "constraints": request.constraints,
        "dry_run": request.dry_run,
    });
    format!("{INSTRUCTIONS}\n\n{payload}")
}
