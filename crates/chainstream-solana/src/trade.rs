//! Pump.fun trade events and per-block selection for one mint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainstream_core::error::{DecodeError, StreamError};
use chainstream_core::registry::{DecodedMessage, TypeRegistry};
use chainstream_core::types::ForwardData;

/// Field of the module output holding the block's trades.
pub const TRADE_LIST_FIELD: &str = "tradeEventList";

/// One bonding-curve trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    /// Mint address of the traded token.
    pub mint: String,
    /// SOL side of the trade, in lamports.
    pub sol_amount: u64,
    /// Token side of the trade, in base units.
    pub token_amount: u64,
    #[serde(default)]
    pub is_buy: bool,
    #[serde(default)]
    pub user: String,
}

impl TradeEvent {
    /// SOL paid per token unit. A zero token amount has no price and is an
    /// error rather than NaN or infinity.
    pub fn price(&self) -> Result<f64, DecodeError> {
        if self.token_amount == 0 {
            return Err(DecodeError::ZeroTokenAmount {
                mint: self.mint.clone(),
            });
        }
        Ok(self.sol_amount as f64 / self.token_amount as f64)
    }
}

/// Pull every trade out of a decoded module output, in delivery order.
pub fn extract_trades(message: &DecodedMessage) -> Result<Vec<TradeEvent>, DecodeError> {
    let list = message
        .field(TRADE_LIST_FIELD)
        .ok_or_else(|| DecodeError::MissingField {
            field: TRADE_LIST_FIELD.into(),
        })?;
    let items = list.as_array().ok_or_else(|| DecodeError::TypeMismatch {
        field: TRADE_LIST_FIELD.into(),
        expected: "list".into(),
        got: kind(list).into(),
    })?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| trade_from_value(item, &format!("{TRADE_LIST_FIELD}[{i}]")))
        .collect()
}

/// The authoritative trade for `mint` in one block: the last match in
/// delivery order. Matching is exact and case-sensitive.
pub fn last_trade_for(trades: Vec<TradeEvent>, mint: &str) -> Option<TradeEvent> {
    trades.into_iter().filter(|t| t.mint == mint).last()
}

/// Decode a forward block and select the monitored mint's trade, if any.
///
/// A block with no module output carries no trades.
pub fn block_trade(
    data: &ForwardData,
    registry: &TypeRegistry,
    mint: &str,
) -> Result<Option<TradeEvent>, StreamError> {
    let Some(payload) = data.payload() else {
        return Ok(None);
    };
    let message = registry.decode(payload)?;
    let trades = extract_trades(&message)?;
    let total = trades.len();
    let trade = last_trade_for(trades, mint);
    tracing::trace!(block = data.block_number(), total, matched = trade.is_some(), "trades decoded");
    Ok(trade)
}

fn trade_from_value(value: &Value, path: &str) -> Result<TradeEvent, DecodeError> {
    let obj = value.as_object().ok_or_else(|| DecodeError::TypeMismatch {
        field: path.into(),
        expected: "object".into(),
        got: kind(value).into(),
    })?;
    let field = |name: &str| {
        obj.get(name).ok_or_else(|| DecodeError::MissingField {
            field: format!("{path}.{name}"),
        })
    };

    let mint = field("mint")?;
    let mint = mint.as_str().ok_or_else(|| DecodeError::TypeMismatch {
        field: format!("{path}.mint"),
        expected: "string".into(),
        got: kind(mint).into(),
    })?;

    Ok(TradeEvent {
        mint: mint.to_string(),
        sol_amount: amount(field("solAmount")?, &format!("{path}.solAmount"))?,
        token_amount: amount(field("tokenAmount")?, &format!("{path}.tokenAmount"))?,
        is_buy: obj.get("isBuy").and_then(Value::as_bool).unwrap_or(false),
        user: obj
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Amounts arrive as JSON numbers or, for 64-bit values, decimal strings.
fn amount(value: &Value, path: &str) -> Result<u64, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::TypeMismatch {
        field: path.into(),
        expected: "uint64".into(),
        got: kind(value).into(),
    })
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
