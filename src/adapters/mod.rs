/// Adapters Module
///
/// One adapter per protocol. Each knows which subgraph collections to page
/// through, which aggregation policy applies, and how positions map onto
/// output rows. Everything else (paging, aggregation, emitting) is shared.
pub mod connext;
pub mod kelp;
pub mod logx;
pub mod qidao;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;

use crate::error::FetchResult;
use crate::graphql::GraphQlTransport;
use crate::models::{BlockRef, OutputRow, TokenAmount};
use crate::oracle::PriceOracle;

/// Produces the output rows for a single block
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn rows_for_block(&self, block: &BlockRef) -> FetchResult<Vec<OutputRow>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AdapterKind {
    /// LogX LLP liquidity (add/remove deltas)
    Logx,
    /// QiDao vault collateral (latest vault state)
    Qidao,
    /// Kelp agETH holders
    Kelp,
    /// Connext LP balances
    Connext,
}

impl AdapterKind {
    /// Endpoint used when neither `--endpoint` nor `SUBGRAPH_URL` is set
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Self::Logx => Some(logx::ENDPOINT),
            Self::Qidao => Some(qidao::ENDPOINT),
            Self::Kelp => Some(kelp::ENDPOINT),
            Self::Connext => None,
        }
    }

    /// Retries on HTTP 429 unless overridden on the command line
    pub fn default_rate_limit_retries(&self) -> u32 {
        match self {
            Self::Logx => 5,
            Self::Qidao | Self::Kelp | Self::Connext => 0,
        }
    }

    pub fn build(
        &self,
        transport: Arc<dyn GraphQlTransport>,
        oracle: Arc<dyn PriceOracle>,
        page_size: usize,
    ) -> Box<dyn Adapter> {
        match self {
            Self::Logx => Box::new(logx::LogxAdapter::new(transport, oracle, page_size)),
            Self::Qidao => Box::new(qidao::QidaoAdapter::new(transport, oracle, page_size)),
            Self::Kelp => Box::new(kelp::KelpAdapter::new(transport, oracle, page_size)),
            Self::Connext => Box::new(connext::ConnextAdapter::new(transport, oracle, page_size)),
        }
    }
}

/// Subgraphs encode BigInt fields as JSON strings
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

pub(crate) fn u64_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub(crate) fn amount_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TokenAmount, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(TokenAmount::from(n)),
        NumberOrString::Text(s) => {
            s.trim().parse().map_err(|_| serde::de::Error::custom(format!("invalid token amount `{}`", s)))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{json, Value};
    use std::collections::HashMap;

    use crate::error::FetchResult;
    use crate::graphql::testing::FakeTransport;

    /// Fake subgraph that serves each collection with `id_gt`/`skip` paging applied.
    ///
    /// Records must already be sorted by id.
    pub fn subgraph(collections: HashMap<&'static str, Vec<Value>>) -> FakeTransport {
        FakeTransport::new(move |query, variables| -> FetchResult<Value> {
            let mut data = serde_json::Map::new();
            for (name, records) in &collections {
                if !query.contains(&format!("{}(", name)) {
                    continue;
                }
                let first = variables["first"].as_u64().unwrap_or(1000) as usize;
                let page: Vec<Value> = match (variables.get("lastId"), variables.get("skip")) {
                    (Some(last), _) => {
                        let last = last.as_str().unwrap_or_default();
                        records.iter().filter(|r| r["id"].as_str().unwrap_or_default() > last).take(first).cloned().collect()
                    }
                    (None, Some(skip)) => {
                        records.iter().skip(skip.as_u64().unwrap_or(0) as usize).take(first).cloned().collect()
                    }
                    (None, None) => records.iter().take(first).cloned().collect(),
                };
                data.insert(name.to_string(), json!(page));
            }
            Ok(Value::Object(data))
        })
    }
}
