/// Connext Adapter
///
/// LP balances from hourly account snapshots. The newest snapshot at or before
/// the block wins for each (account, token).
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{amount_from_string, u64_from_string, Adapter};
use crate::error::FetchResult;
use crate::etl::emit::BlockRowEmitter;
use crate::etl::extract::{CollectionQuery, ExhaustivePager, GraphQlPageFetcher, Keyed};
use crate::etl::transform::{Balances, LatestState, Versioned};
use crate::graphql::GraphQlTransport;
use crate::models::{BlockRef, OutputRow, PositionKey, TokenAmount};
use crate::oracle::PriceOracle;

const LP_ACCOUNT_BALANCES: CollectionQuery = CollectionQuery {
    collection: "lpAccountBalanceHourlies",
    selection: "amount
    modified
    block
    account {
      id
    }
    token {
      id
      symbol
    }",
    filter: "block_lte: $block",
    at_block: false,
};

#[derive(Debug, Deserialize)]
struct EntityRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LpToken {
    id: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct LpAccountBalance {
    id: String,
    #[serde(deserialize_with = "amount_from_string")]
    amount: TokenAmount,
    #[serde(deserialize_with = "u64_from_string")]
    modified: u64,
    #[serde(deserialize_with = "u64_from_string")]
    block: u64,
    account: EntityRef,
    token: LpToken,
}

impl Keyed for LpAccountBalance {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Versioned for LpAccountBalance {
    type Version = (u64, u64);

    fn version(&self) -> (u64, u64) {
        (self.block, self.modified)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub struct ConnextAdapter {
    transport: Arc<dyn GraphQlTransport>,
    oracle: Arc<dyn PriceOracle>,
    pager: ExhaustivePager,
}

impl ConnextAdapter {
    pub fn new(transport: Arc<dyn GraphQlTransport>, oracle: Arc<dyn PriceOracle>, page_size: usize) -> Self {
        Self { transport, oracle, pager: ExhaustivePager::by_id(page_size) }
    }
}

#[async_trait]
impl Adapter for ConnextAdapter {
    fn name(&self) -> &'static str {
        "connext"
    }

    async fn rows_for_block(&self, block: &BlockRef) -> FetchResult<Vec<OutputRow>> {
        let snapshots: Vec<LpAccountBalance> = self
            .pager
            .fetch_all(&GraphQlPageFetcher::new(&*self.transport, LP_ACCOUNT_BALANCES, block.number))
            .await?;

        let mut latest = LatestState::new();
        for snapshot in snapshots {
            latest.offer(PositionKey::new(&snapshot.account.id, &snapshot.token.id), snapshot);
        }

        let mut emitter = BlockRowEmitter::new(&*self.oracle);
        let mut balances = Balances::new();
        for snapshot in latest.into_winners() {
            emitter.add_symbol(&snapshot.token.id, &snapshot.token.symbol);
            balances.set(PositionKey::new(&snapshot.account.id, &snapshot.token.id), snapshot.amount);
        }

        Ok(emitter.emit(block, balances))
    }
}
