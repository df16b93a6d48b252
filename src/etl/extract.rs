/// Extract Module
///
/// Handles paging through subgraph collections until they are exhausted.
/// Two cursor flavours are supported: `id_gt` cursors (stable, preferred) and
/// numeric `skip` offsets (best-effort snapshot, used by older subgraphs).
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::error::{FetchError, FetchResult};
use crate::graphql::GraphQlTransport;

/// "From the beginning" for id cursors
pub const CURSOR_START: &str = "0x0000000000000000000000000000000000000000";

/// Maximum records the subgraphs hand out per request
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Where the next page starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Records whose `id` is strictly greater than this value
    After(String),
    /// Skip this many records
    Skip(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    IdCursor,
    Offset,
}

impl PaginationMode {
    pub fn start(&self) -> Cursor {
        match self {
            Self::IdCursor => Cursor::After(CURSOR_START.to_string()),
            Self::Offset => Cursor::Skip(0),
        }
    }
}

/// Records that carry the opaque, lexicographically ordered `id` used as a cursor
pub trait Keyed {
    fn id(&self) -> &str;
}

impl Keyed for Value {
    fn id(&self) -> &str {
        self.get("id").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Issues one page request
#[async_trait]
pub trait PageFetcher: Send + Sync {
    type Record: Keyed + Send;

    async fn fetch(&self, cursor: &Cursor, page_size: usize) -> FetchResult<Vec<Self::Record>>;
}

/// Cursor for the page after `page`, or None once the collection is exhausted.
///
/// A short page ends the walk. So does an id cursor that fails to move forward,
/// which would otherwise re-request the same page forever.
fn next_cursor<R: Keyed>(cursor: &Cursor, page: &[R], page_size: usize) -> Option<Cursor> {
    let last = page.last()?;
    if page.len() < page_size {
        return None;
    }

    match cursor {
        Cursor::After(previous) => {
            let id = last.id();
            if id <= previous.as_str() {
                tracing::warn!("Cursor did not advance past {} (last id {:?}), stopping", previous, id);
                return None;
            }
            Some(Cursor::After(id.to_string()))
        }
        Cursor::Skip(skip) => Some(Cursor::Skip(skip + page.len())),
    }
}

/// Drives a PageFetcher until a page comes back short of full size
#[derive(Debug, Clone, Copy)]
pub struct ExhaustivePager {
    page_size: usize,
    mode: PaginationMode,
}

impl ExhaustivePager {
    pub fn by_id(page_size: usize) -> Self {
        Self { page_size, mode: PaginationMode::IdCursor }
    }

    pub fn by_offset(page_size: usize) -> Self {
        Self { page_size, mode: PaginationMode::Offset }
    }

    /// Fetch every record, in page order
    pub async fn fetch_all<F: PageFetcher>(&self, fetcher: &F) -> FetchResult<Vec<F::Record>> {
        let mut cursor = self.mode.start();
        let mut records = Vec::new();
        let mut requests = 0;

        loop {
            let page = fetcher.fetch(&cursor, self.page_size).await?;
            requests += 1;

            let next = next_cursor(&cursor, &page, self.page_size);
            records.extend(page);

            match next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        tracing::debug!("Fetched {} records in {} requests", records.len(), requests);
        Ok(records)
    }
}

/// Pages several independent collections through one worklist.
///
/// Each entry is "collection i still has data after cursor c". Only saturated
/// collections are re-queued, so a deep collection never forces the shallow
/// ones to be re-fetched.
#[derive(Debug, Clone, Copy)]
pub struct WorklistPager {
    page_size: usize,
}

impl WorklistPager {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Returns one record list per fetcher, in the same order as `fetchers`
    pub async fn fetch_all<F: PageFetcher>(&self, fetchers: &[F]) -> FetchResult<Vec<Vec<F::Record>>> {
        let mut results: Vec<Vec<F::Record>> = fetchers.iter().map(|_| Vec::new()).collect();
        let mut worklist: VecDeque<(usize, Cursor)> =
            (0..fetchers.len()).map(|index| (index, PaginationMode::IdCursor.start())).collect();

        while let Some((index, cursor)) = worklist.pop_front() {
            let page = fetchers[index].fetch(&cursor, self.page_size).await?;

            if let Some(next) = next_cursor(&cursor, &page, self.page_size) {
                worklist.push_back((index, next));
            }
            results[index].extend(page);
        }

        Ok(results)
    }
}

/// One subgraph collection and the fields we need from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionQuery {
    pub collection: &'static str,
    /// Field selection, `id` excluded (always requested)
    pub selection: &'static str,
    /// Extra `where` entries, may reference `$block`
    pub filter: &'static str,
    /// Query the entity state as of `$block` (time-travel query)
    pub at_block: bool,
}

impl CollectionQuery {
    fn uses_block(&self) -> bool {
        self.at_block || self.filter.contains("$block")
    }

    /// GraphQL document for one page starting at `cursor`
    pub fn render(&self, cursor: &Cursor) -> String {
        let mut params = vec!["$first: Int!"];
        let mut args = vec!["first: $first".to_string()];
        let mut filters = Vec::new();

        match cursor {
            Cursor::After(_) => {
                params.push("$lastId: ID!");
                filters.push("id_gt: $lastId");
            }
            Cursor::Skip(_) => {
                params.push("$skip: Int!");
                args.push("skip: $skip".to_string());
            }
        }
        if self.uses_block() {
            params.push("$block: Int!");
        }

        args.push("orderBy: id".to_string());
        args.push("orderDirection: asc".to_string());
        if !self.filter.is_empty() {
            filters.push(self.filter);
        }
        if !filters.is_empty() {
            args.push(format!("where: {{ {} }}", filters.join(", ")));
        }
        if self.at_block {
            args.push("block: { number: $block }".to_string());
        }

        format!(
            "query Page({}) {{\n  {}(\n    {}\n  ) {{\n    id\n    {}\n  }}\n}}",
            params.join(", "),
            self.collection,
            args.join("\n    "),
            self.selection
        )
    }

    pub fn variables(&self, cursor: &Cursor, page_size: usize, block: u64) -> Value {
        let mut variables = json!({ "first": page_size });
        match cursor {
            Cursor::After(id) => variables["lastId"] = json!(id),
            Cursor::Skip(skip) => variables["skip"] = json!(skip),
        }
        if self.uses_block() {
            variables["block"] = json!(block);
        }
        variables
    }

    /// Pull this collection's records out of a `data` object
    pub fn decode<T: DeserializeOwned>(&self, mut data: Value) -> FetchResult<Vec<T>> {
        match data.get_mut(self.collection).map(Value::take) {
            Some(Value::Null) | None => Err(FetchError::MissingData { collection: self.collection.to_string() }),
            Some(records) => self.decode_value(records),
        }
    }

    /// Type raw records previously fetched as JSON
    pub fn decode_records<T: DeserializeOwned>(&self, records: Vec<Value>) -> FetchResult<Vec<T>> {
        self.decode_value(Value::Array(records))
    }

    fn decode_value<T: DeserializeOwned>(&self, records: Value) -> FetchResult<Vec<T>> {
        serde_json::from_value(records)
            .map_err(|source| FetchError::Decode { collection: self.collection.to_string(), source })
    }
}

/// PageFetcher over one GraphQL collection at a fixed block
pub struct GraphQlPageFetcher<'a, T> {
    transport: &'a dyn GraphQlTransport,
    query: CollectionQuery,
    block: u64,
    missing_data_as_empty: bool,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T> GraphQlPageFetcher<'a, T> {
    pub fn new(transport: &'a dyn GraphQlTransport, query: CollectionQuery, block: u64) -> Self {
        Self { transport, query, block, missing_data_as_empty: false, _record: PhantomData }
    }

    /// Treat a response without `data` as an empty page instead of an error
    pub fn missing_data_as_empty(mut self) -> Self {
        self.missing_data_as_empty = true;
        self
    }
}

#[async_trait]
impl<'a, T> PageFetcher for GraphQlPageFetcher<'a, T>
where
    T: DeserializeOwned + Keyed + Send + 'static,
{
    type Record = T;

    async fn fetch(&self, cursor: &Cursor, page_size: usize) -> FetchResult<Vec<T>> {
        let document = self.query.render(cursor);
        let variables = self.query.variables(cursor, page_size, self.block);

        let result = match self.transport.request(&document, variables).await {
            Ok(data) => self.query.decode(data),
            Err(e) => Err(e),
        };

        match result {
            Err(e) if e.is_missing_data() && self.missing_data_as_empty => {
                tracing::warn!(
                    "No data for {} at block {} ({:?}), treating page as empty",
                    self.query.collection,
                    self.block,
                    cursor
                );
                Ok(Vec::new())
            }
            other => other,
        }
    }
}
