use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An allowed conversion direction between two coins, with its exchange
/// rate expressed as the amount of `to_coin` per unit of `from_coin`.
///
/// At most one pair may exist per ordered (from, to) — the store enforces
/// this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinPair {
    pub from_coin: String,
    pub to_coin: String,
    pub exchange_rate: Decimal,
}

impl CoinPair {
    pub fn new(from: impl Into<String>, to: impl Into<String>, exchange_rate: Decimal) -> Self {
        Self {
            from_coin: from.into().to_uppercase(),
            to_coin: to.into().to_uppercase(),
            exchange_rate,
        }
    }
}

impl std::fmt::Display for CoinPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} ({} {} per {})",
            self.from_coin, self.to_coin, self.exchange_rate, self.to_coin, self.from_coin
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn pair_symbols_uppercased() {
        let pair = CoinPair::new("ltc", "ltcp", Decimal::ONE);
        assert_eq!(pair.from_coin, "LTC");
        assert_eq!(pair.to_coin, "LTCP");
    }

    #[test]
    fn display_includes_rate() {
        let pair = CoinPair::new("LTC", "LTCP", Decimal::from_str("0.5").unwrap());
        assert_eq!(pair.to_string(), "LTC -> LTCP (0.5 LTCP per LTC)");
    }
}
