/// LogX Adapter
///
/// LLP balances are rebuilt from the full add/remove liquidity history up to the
/// block, then converted into USDC units using the LLP price.
use async_trait::async_trait;
use num_bigint::BigInt;
use serde::Deserialize;
use std::sync::Arc;

use super::{amount_from_string, Adapter};
use crate::error::{FetchError, FetchResult};
use crate::etl::emit::BlockRowEmitter;
use crate::etl::extract::{CollectionQuery, ExhaustivePager, GraphQlPageFetcher, Keyed};
use crate::etl::transform::{sum_deltas, BalanceEvent};
use crate::graphql::GraphQlTransport;
use crate::models::{BlockRef, OutputRow, PositionKey, TokenAmount};
use crate::oracle::PriceOracle;

pub const ENDPOINT: &str =
    "https://api.goldsky.com/api/public/project_clxspa1gpqpvl01w65jr93p57/subgraphs/LlpManager-linea/1.0.2/gn";

/// Balances are reported in this token
pub const USDC: &str = "0x176211869ca2b568f2a7d4ee941e073a821ee1ff";

/// Oracle key for the LLP price
pub const LLP: &str = "llp";

const ADD_LIQUIDITIES: CollectionQuery = CollectionQuery {
    collection: "addLiquidities",
    selection: "account\n    mintAmount",
    filter: "block_number_lte: $block",
    at_block: false,
};

const REMOVE_LIQUIDITIES: CollectionQuery = CollectionQuery {
    collection: "removeLiquidities",
    selection: "account\n    llpAmount",
    filter: "block_number_lte: $block",
    at_block: false,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddLiquidity {
    id: String,
    account: String,
    #[serde(deserialize_with = "amount_from_string")]
    mint_amount: TokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveLiquidity {
    id: String,
    account: String,
    #[serde(deserialize_with = "amount_from_string")]
    llp_amount: TokenAmount,
}

impl Keyed for AddLiquidity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Keyed for RemoveLiquidity {
    fn id(&self) -> &str {
        &self.id
    }
}

/// LLP price with 6 decimals, truncated
fn price_in_micros(price: f64) -> BigInt {
    BigInt::from((price * 1e6).floor() as u128)
}

/// `llp * price_micros / 1e18`: 18-decimal LLP into 6-decimal USDC
fn llp_to_usdc(llp: &TokenAmount, price_micros: &BigInt) -> TokenAmount {
    llp * price_micros / BigInt::from(10u64.pow(18))
}

pub struct LogxAdapter {
    transport: Arc<dyn GraphQlTransport>,
    oracle: Arc<dyn PriceOracle>,
    pager: ExhaustivePager,
}

impl LogxAdapter {
    pub fn new(transport: Arc<dyn GraphQlTransport>, oracle: Arc<dyn PriceOracle>, page_size: usize) -> Self {
        Self { transport, oracle, pager: ExhaustivePager::by_offset(page_size) }
    }
}

#[async_trait]
impl Adapter for LogxAdapter {
    fn name(&self) -> &'static str {
        "logx"
    }

    async fn rows_for_block(&self, block: &BlockRef) -> FetchResult<Vec<OutputRow>> {
        let price = self
            .oracle
            .usd_price(LLP)
            .filter(|price| *price >= 0.0)
            .ok_or_else(|| FetchError::PriceUnavailable(LLP.to_string()))?;

        let adds: Vec<AddLiquidity> = self
            .pager
            .fetch_all(&GraphQlPageFetcher::new(&*self.transport, ADD_LIQUIDITIES, block.number).missing_data_as_empty())
            .await?;
        let removes: Vec<RemoveLiquidity> = self
            .pager
            .fetch_all(
                &GraphQlPageFetcher::new(&*self.transport, REMOVE_LIQUIDITIES, block.number).missing_data_as_empty(),
            )
            .await?;

        tracing::debug!("Block {}: {} adds, {} removes", block.number, adds.len(), removes.len());

        let events = adds
            .into_iter()
            .map(|add| BalanceEvent::add(&add.account, LLP, add.mint_amount))
            .chain(removes.into_iter().map(|remove| BalanceEvent::remove(&remove.account, LLP, remove.llp_amount)));
        let llp_balances = sum_deltas(events);
        tracing::debug!("Block {}: {} LLP holders", block.number, llp_balances.len());

        let price_micros = price_in_micros(price);
        let usdc_balances = llp_balances
            .remap(|key, llp| (PositionKey::new(&key.user, USDC), llp_to_usdc(&llp, &price_micros)));

        let emitter = BlockRowEmitter::new(&*self.oracle).with_symbol(USDC, "USDC");
        Ok(emitter.emit(block, usdc_balances))
    }
}
