/// Kelp Adapter
///
/// agETH holders as of the block, read straight from the `userBalances` entity.
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{amount_from_string, Adapter};
use crate::error::FetchResult;
use crate::etl::emit::BlockRowEmitter;
use crate::etl::extract::{CollectionQuery, ExhaustivePager, GraphQlPageFetcher, Keyed};
use crate::etl::transform::Balances;
use crate::graphql::GraphQlTransport;
use crate::models::{BlockRef, OutputRow, PositionKey, TokenAmount};
use crate::oracle::PriceOracle;

pub const ENDPOINT: &str = "https://api.studio.thegraph.com/query/70817/ageth-lp/version/latest";

pub const AGETH: &str = "0xe1b4d34e8754600962cd944b535180bd758e6c2e";

const USER_BALANCES: CollectionQuery =
    CollectionQuery { collection: "userBalances", selection: "balance", filter: "balance_gt: \"0\"", at_block: true };

/// Entity id is the holder address
#[derive(Debug, Deserialize)]
struct UserBalance {
    id: String,
    #[serde(deserialize_with = "amount_from_string")]
    balance: TokenAmount,
}

impl Keyed for UserBalance {
    fn id(&self) -> &str {
        &self.id
    }
}

pub struct KelpAdapter {
    transport: Arc<dyn GraphQlTransport>,
    oracle: Arc<dyn PriceOracle>,
    pager: ExhaustivePager,
}

impl KelpAdapter {
    pub fn new(transport: Arc<dyn GraphQlTransport>, oracle: Arc<dyn PriceOracle>, page_size: usize) -> Self {
        Self { transport, oracle, pager: ExhaustivePager::by_id(page_size) }
    }
}

#[async_trait]
impl Adapter for KelpAdapter {
    fn name(&self) -> &'static str {
        "kelp"
    }

    async fn rows_for_block(&self, block: &BlockRef) -> FetchResult<Vec<OutputRow>> {
        let holders: Vec<UserBalance> = self
            .pager
            .fetch_all(&GraphQlPageFetcher::new(&*self.transport, USER_BALANCES, block.number))
            .await?;

        tracing::debug!("Block {}: {} agETH holders", block.number, holders.len());

        let mut balances = Balances::new();
        for holder in holders {
            balances.set(PositionKey::new(&holder.id, AGETH), holder.balance);
        }

        let emitter = BlockRowEmitter::new(&*self.oracle).with_symbol(AGETH, "agETH");
        Ok(emitter.emit(block, balances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::subgraph;
    use crate::etl::extract::CURSOR_START;
    use crate::oracle::FixedPriceOracle;
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_holders_paged_by_id() {
        let holders: Vec<_> = (1..=5)
            .map(|i| json!({ "id": format!("0x{:040x}", i), "balance": format!("{}000000000000000000", i) }))
            .collect();
        let transport = Arc::new(subgraph(HashMap::from([("userBalances", holders)])));
        let oracle = Arc::new(FixedPriceOracle::new().with_price(AGETH, 3000.0));
        let kelp = KelpAdapter::new(transport.clone(), oracle, 2);

        let rows = kelp.rows_for_block(&BlockRef::new(42, 1700000000)).await.unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4].token_balance, "5000000000000000000".parse::<TokenAmount>().unwrap());
        assert!(rows.iter().all(|r| r.token_symbol == "agETH" && r.usd_price == 3000.0 && r.block_number == 42));

        let cursors: Vec<String> =
            transport.calls().iter().map(|(_, vars)| vars["lastId"].as_str().unwrap().to_string()).collect();
        assert_eq!(cursors, vec![CURSOR_START.to_string(), format!("0x{:040x}", 2), format!("0x{:040x}", 4)]);
    }

    #[tokio::test]
    async fn test_missing_data_fails_block() {
        let transport = Arc::new(subgraph(HashMap::new()));
        let kelp = KelpAdapter::new(transport, Arc::new(FixedPriceOracle::new()), 1000);

        let err = kelp.rows_for_block(&BlockRef::new(1, 1)).await.unwrap_err();
        assert!(err.is_missing_data());
    }
}
