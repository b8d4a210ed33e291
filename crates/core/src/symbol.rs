//! Pair symbol normalisation.
//!
//! User input arrives in many shapes (`DOGEUSD`, `DOGE/USD`, `doge-usd`);
//! Kraken wants a slashed form on WebSocket and a flat form on REST.

use anyhow::{bail, Result};

/// Known quote suffixes, longest first so `USDT`/`ZUSD` win over `USD`.
const QUOTE_SUFFIXES: &[&str] = &[
    "USDT", "USDC", "ZUSD", "ZEUR", "ZGBP", "ZCAD", "ZCHF", "ZJPY", "ZAUD", "ZNZD", "DAI", "EUR",
    "USD", "GBP", "CAD", "CHF", "JPY", "AUD", "NZD", "BTC", "XBT", "ETH", "SOL", "DOT", "ADA",
    "TRY", "MXN",
];

/// A canonicalised trading pair.
///
/// `ws_pair` is the slashed WebSocket form (`DOGE/USD`); `rest_pair` is the
/// flat REST form (`DOGEUSD`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolPair {
    pub ws_pair: String,
    pub rest_pair: String,
}

impl SymbolPair {
    /// Canonicalises arbitrary user input into both wire forms.
    ///
    /// Uppercases, maps `: - space` separators to `/`, collapses repeated
    /// separators, and, when no separator is present, splits at the longest
    /// known quote suffix.
    ///
    /// # Errors
    ///
    /// Fails when the input is empty, has more than one separator, or carries
    /// no separator and no recognisable quote suffix.
    pub fn parse(input: &str) -> Result<Self> {
        let upper: String = input
            .trim()
            .to_uppercase()
            .chars()
            .map(|c| match c {
                ':' | '-' | ' ' => '/',
                other => other,
            })
            .collect();

        let mut collapsed = String::with_capacity(upper.len());
        let mut last_was_sep = false;
        for c in upper.chars() {
            if c == '/' {
                if !last_was_sep {
                    collapsed.push(c);
                }
                last_was_sep = true;
            } else {
                collapsed.push(c);
                last_was_sep = false;
            }
        }
        let collapsed = collapsed.trim_matches('/').to_string();
        if collapsed.is_empty() {
            bail!("empty pair symbol");
        }

        let (base, quote) = if let Some((base, quote)) = collapsed.split_once('/') {
            if quote.contains('/') {
                bail!("malformed pair symbol: {input}");
            }
            (base.to_string(), quote.to_string())
        } else {
            match split_at_quote_suffix(&collapsed) {
                Some(parts) => parts,
                None => bail!("cannot determine quote currency in: {input}"),
            }
        };
        if base.is_empty() || quote.is_empty() {
            bail!("malformed pair symbol: {input}");
        }

        Ok(Self {
            ws_pair: format!("{base}/{quote}"),
            rest_pair: format!("{base}{quote}"),
        })
    }

    /// Base asset code.
    #[must_use]
    pub fn base(&self) -> &str {
        self.ws_pair.split('/').next().unwrap_or("")
    }

    /// Quote asset code.
    #[must_use]
    pub fn quote(&self) -> &str {
        self.ws_pair.split('/').nth(1).unwrap_or("")
    }
}

impl std::fmt::Display for SymbolPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.ws_pair)
    }
}

fn split_at_quote_suffix(flat: &str) -> Option<(String, String)> {
    for suffix in QUOTE_SUFFIXES {
        if flat.len() > suffix.len() {
            if let Some(base) = flat.strip_suffix(suffix) {
                return Some((base.to_string(), (*suffix).to_string()));
            }
        }
    }
    None
}
