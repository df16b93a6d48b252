/// Emit Module
///
/// Maps one block's aggregated balances onto the normalized output rows.
use num_traits::Signed;
use std::collections::HashMap;

use super::transform::Balances;
use crate::models::{BlockRef, OutputRow};
use crate::oracle::PriceOracle;

pub struct BlockRowEmitter<'a> {
    oracle: &'a dyn PriceOracle,
    /// token address (lowercase) -> symbol
    symbols: HashMap<String, String>,
}

impl<'a> BlockRowEmitter<'a> {
    pub fn new(oracle: &'a dyn PriceOracle) -> Self {
        Self { oracle, symbols: HashMap::new() }
    }

    pub fn with_symbol(mut self, token: &str, symbol: &str) -> Self {
        self.add_symbol(token, symbol);
        self
    }

    /// Register token metadata learned from subgraph records
    pub fn add_symbol(&mut self, token: &str, symbol: &str) {
        self.symbols.insert(token.to_lowercase(), symbol.to_string());
    }

    /// One row per positive position. Unknown symbols become "", unknown prices 0.
    pub fn emit(&self, block: &BlockRef, balances: Balances) -> Vec<OutputRow> {
        balances
            .into_iter()
            .filter(|(_, amount)| amount.is_positive())
            .map(|(key, amount)| OutputRow {
                block_number: block.number,
                timestamp: block.timestamp,
                token_symbol: self.symbols.get(&key.token).cloned().unwrap_or_default(),
                usd_price: self.oracle.usd_price(&key.token).unwrap_or(0.0),
                user_address: key.user,
                token_address: key.token,
                token_balance: amount,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionKey, TokenAmount};
    use crate::oracle::FixedPriceOracle;

    #[test]
    fn test_emit_maps_block_and_defaults() {
        let oracle = FixedPriceOracle::new();
        let emitter = BlockRowEmitter::new(&oracle);
        let mut balances = Balances::new();
        balances.set(PositionKey::new("0xABC", "0xToken"), TokenAmount::from(1234));

        let rows = emitter.emit(&BlockRef::new(100, 1700000000), balances);

        assert_eq!(
            rows,
            vec![OutputRow {
                block_number: 100,
                timestamp: 1700000000,
                user_address: "0xabc".to_string(),
                token_address: "0xtoken".to_string(),
                token_balance: TokenAmount::from(1234),
                token_symbol: String::new(),
                usd_price: 0.0,
            }]
        );
    }

    #[test]
    fn test_emit_uses_metadata_and_drops_empty_positions() {
        let oracle = FixedPriceOracle::new().with_price("0xt", 2.5);
        let emitter = BlockRowEmitter::new(&oracle).with_symbol("0xT", "TKN");
        let mut balances = Balances::new();
        balances.set(PositionKey::new("0x1", "0xt"), TokenAmount::from(5));
        balances.set(PositionKey::new("0x2", "0xt"), TokenAmount::from(0));
        balances.set(PositionKey::new("0x3", "0xt"), TokenAmount::from(-3));

        let rows = emitter.emit(&BlockRef::new(1, 2), balances);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_address, "0x1");
        assert_eq!(rows[0].token_symbol, "TKN");
        assert_eq!(rows[0].usd_price, 2.5);
    }
}
