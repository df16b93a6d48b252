/// QiDao Adapter
///
/// Vault collateral per owner. Six event collections are read at the block and
/// the most recent event touching each owner decides that owner's vault state.
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{amount_from_string, u64_from_string, Adapter};
use crate::error::FetchResult;
use crate::etl::emit::BlockRowEmitter;
use crate::etl::extract::{CollectionQuery, GraphQlPageFetcher, WorklistPager};
use crate::etl::transform::{Balances, LatestState, Versioned};
use crate::graphql::GraphQlTransport;
use crate::models::{BlockRef, OutputRow, PositionKey, TokenAmount};
use crate::oracle::PriceOracle;

pub const ENDPOINT: &str =
    "https://api.goldsky.com/api/public/project_clz8u0ol7j9rs01vc1vbe5nvd/subgraphs/qidao-linea/1.6/gn";

const VAULT_EVENT_SELECTION: &str = "blockNumber
    vaultInfo {
      id
      owner
      collateralAmount
      collateral {
        id
        symbol
      }
    }";

const BOUGHT_SELECTION: &str = "blockNumber
    riskyVault {
      id
      owner
      collateralAmount
      collateral {
        id
        symbol
      }
    }
    newVault {
      id
      owner
      collateralAmount
      collateral {
        id
        symbol
      }
    }";

const fn vault_events(collection: &'static str) -> CollectionQuery {
    CollectionQuery { collection, selection: VAULT_EVENT_SELECTION, filter: "", at_block: true }
}

const VAULT_EVENT_QUERIES: [CollectionQuery; 5] = [
    vault_events("borrowTokens"),
    vault_events("payBackTokens"),
    vault_events("liquidateVaults"),
    vault_events("depositCollaterals"),
    vault_events("withdrawCollaterals"),
];

const BOUGHT_RISKY_DEBT_VAULTS: CollectionQuery =
    CollectionQuery { collection: "boughtRiskyDebtVaults", selection: BOUGHT_SELECTION, filter: "", at_block: true };

#[derive(Debug, Clone, Deserialize)]
struct Collateral {
    id: String,
    symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Vault {
    id: String,
    owner: String,
    #[serde(deserialize_with = "amount_from_string")]
    collateral_amount: TokenAmount,
    collateral: Collateral,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultEvent {
    id: String,
    #[serde(deserialize_with = "u64_from_string")]
    block_number: u64,
    vault_info: Vault,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoughtRiskyDebtVault {
    id: String,
    #[serde(deserialize_with = "u64_from_string")]
    block_number: u64,
    risky_vault: Vault,
    new_vault: Vault,
}

/// Any event that leaves one or more vaults in a known state.
///
/// A bought risky vault touches two owners (seller and buyer), so it carries both vaults.
#[derive(Debug, Clone)]
struct VaultUpdate {
    id: String,
    block_number: u64,
    vaults: Vec<Vault>,
}

impl Versioned for VaultUpdate {
    type Version = u64;

    fn version(&self) -> u64 {
        self.block_number
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl From<VaultEvent> for VaultUpdate {
    fn from(event: VaultEvent) -> Self {
        Self { id: event.id, block_number: event.block_number, vaults: vec![event.vault_info] }
    }
}

impl From<BoughtRiskyDebtVault> for VaultUpdate {
    fn from(event: BoughtRiskyDebtVault) -> Self {
        Self { id: event.id, block_number: event.block_number, vaults: vec![event.new_vault, event.risky_vault] }
    }
}

/// Latest update per lowercase owner decides which vaults count.
///
/// Winners are replayed oldest first into one state per vault id, so a vault
/// named by two winning updates keeps its newest state. Distinct vaults held
/// by the same owner in the same collateral are summed.
fn latest_vault_balances(updates: Vec<VaultUpdate>, emitter: &mut BlockRowEmitter<'_>) -> Balances {
    let mut latest = LatestState::new();
    for update in updates {
        let mut owners: Vec<String> = update.vaults.iter().map(|v| v.owner.to_lowercase()).collect();
        owners.sort();
        owners.dedup();
        for owner in owners {
            latest.offer(owner, update.clone());
        }
    }

    let mut vaults: BTreeMap<String, Vault> = BTreeMap::new();
    for update in latest.into_winners() {
        for vault in update.vaults {
            vaults.insert(vault.id.clone(), vault);
        }
    }

    let mut balances = Balances::new();
    for vault in vaults.into_values() {
        emitter.add_symbol(&vault.collateral.id, &vault.collateral.symbol);
        balances.add(PositionKey::new(&vault.owner, &vault.collateral.id), &vault.collateral_amount);
    }
    balances
}

pub struct QidaoAdapter {
    transport: Arc<dyn GraphQlTransport>,
    oracle: Arc<dyn PriceOracle>,
    pager: WorklistPager,
}

impl QidaoAdapter {
    pub fn new(transport: Arc<dyn GraphQlTransport>, oracle: Arc<dyn PriceOracle>, page_size: usize) -> Self {
        Self { transport, oracle, pager: WorklistPager::new(page_size) }
    }

    async fn fetch_updates(&self, block: &BlockRef) -> FetchResult<Vec<VaultUpdate>> {
        let queries: Vec<CollectionQuery> =
            VAULT_EVENT_QUERIES.iter().copied().chain(std::iter::once(BOUGHT_RISKY_DEBT_VAULTS)).collect();
        let fetchers: Vec<GraphQlPageFetcher<'_, Value>> =
            queries.iter().map(|query| GraphQlPageFetcher::new(&*self.transport, *query, block.number)).collect();

        let pages = self.pager.fetch_all(&fetchers).await?;

        let mut updates = Vec::new();
        for (query, records) in queries.iter().zip(pages) {
            if *query == BOUGHT_RISKY_DEBT_VAULTS {
                let bought: Vec<BoughtRiskyDebtVault> = query.decode_records(records)?;
                updates.extend(bought.into_iter().map(VaultUpdate::from));
            } else {
                let events: Vec<VaultEvent> = query.decode_records(records)?;
                updates.extend(events.into_iter().map(VaultUpdate::from));
            }
        }

        Ok(updates)
    }
}

#[async_trait]
impl Adapter for QidaoAdapter {
    fn name(&self) -> &'static str {
        "qidao"
    }

    async fn rows_for_block(&self, block: &BlockRef) -> FetchResult<Vec<OutputRow>> {
        let updates = match self.fetch_updates(block).await {
            Ok(updates) => updates,
            Err(e) if e.is_missing_data() => {
                tracing::error!("No data found for block {}: {}", block.number, e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        tracing::debug!("Block {}: {} vault updates", block.number, updates.len());

        let mut emitter = BlockRowEmitter::new(&*self.oracle);
        let balances = latest_vault_balances(updates, &mut emitter);
        Ok(emitter.emit(block, balances))
    }
}
