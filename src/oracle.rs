/// Price Oracle Module
///
/// USD price lookups for tokens. Adapters treat a missing price as `0`
/// unless the price is needed to compute the balance itself.
use std::collections::HashMap;

pub trait PriceOracle: Send + Sync {
    /// USD price of `token`, or None if unknown
    fn usd_price(&self, token: &str) -> Option<f64>;
}

/// Prices configured up front (CLI / environment)
#[derive(Debug, Clone, Default)]
pub struct FixedPriceOracle {
    prices: HashMap<String, f64>,
}

impl FixedPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, token: &str, price: f64) -> Self {
        self.prices.insert(token.to_lowercase(), price);
        self
    }
}

impl PriceOracle for FixedPriceOracle {
    fn usd_price(&self, token: &str) -> Option<f64> {
        self.prices.get(&token.to_lowercase()).copied().filter(|price| price.is_finite())
    }
}
