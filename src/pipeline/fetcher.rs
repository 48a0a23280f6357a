//! Fetch layer: runs a query function under a scoped session.
//!
//! Three access patterns share one mechanism:
//! - `fetch`: one call, all rows materialised.
//! - `stream`: rows produced lazily under one session.
//! - `batched_stream`: a long identifier list is split into chunks, the
//!   query runs once per chunk and every chunk reuses the same session.
//!
//! Sessions commit when a stream is exhausted, roll back when the query
//! fails, and roll back and release when a stream is dropped early.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;

use crate::db::repository::QueryError;
use crate::db::{with_session, ConnectionProvider, Session};
use crate::models::{QueryParams, Row};

/// A row-producing query. Must not open or close connections itself.
pub type QueryFn =
    Arc<dyn Fn(&Connection, &QueryParams) -> Result<Vec<Row>, QueryError> + Send + Sync>;

/// Applied to every row before it is handed out.
pub type RowTransform = Arc<dyn Fn(Row) -> Row + Send + Sync>;

pub fn query_fn<F>(f: F) -> QueryFn
where
    F: Fn(&Connection, &QueryParams) -> Result<Vec<Row>, QueryError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
pub struct Fetcher {
    name: String,
    provider: Arc<dyn ConnectionProvider>,
    query: QueryFn,
    defaults: QueryParams,
    transform: Option<RowTransform>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("name", &self.name)
            .field("defaults", &self.defaults.keys().collect::<Vec<_>>())
            .field("transform", &self.transform.is_some())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(name: impl Into<String>, provider: Arc<dyn ConnectionProvider>, query: QueryFn) -> Self {
        Self {
            name: name.into(),
            provider,
            query,
            defaults: QueryParams::new(),
            transform: None,
        }
    }

    /// Copy with extra pre-bound parameters. Call-time overrides still win.
    pub fn with_defaults(&self, more: QueryParams) -> Self {
        let mut clone = self.clone();
        clone.defaults.extend(more);
        clone
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Row) -> Row + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn merged(&self, overrides: &QueryParams) -> QueryParams {
        let mut params = self.defaults.clone();
        params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }

    /// Run the query once and collect every row.
    pub fn fetch(&self, overrides: &QueryParams) -> Result<Vec<Row>, QueryError> {
        let params = self.merged(overrides);
        let rows = with_session(self.provider.as_ref(), |session: &Session| {
            (self.query)(session.connection(), &params)
        })?;
        Ok(match &self.transform {
            Some(transform) => rows.into_iter().map(|r| transform(r)).collect(),
            None => rows,
        })
    }

    /// Lazily stream rows under one session, without chunking.
    pub fn stream(&self, overrides: &QueryParams) -> RowStream {
        let params = self.merged(overrides);
        self.stream_chunks(VecDeque::from([Chunk { params, items: 0 }]), 0)
    }

    /// Stream rows, splitting `list_param` into chunks of `max_items`.
    ///
    /// Falls back to `stream` when the parameter is missing, not a list, empty,
    /// no longer than `max_items`, or when `max_items` is zero. Repeated
    /// identifiers are dropped before chunking (first occurrence kept), so a
    /// repeat landing in another chunk cannot yield its rows twice.
    pub fn batched_stream(&self, overrides: &QueryParams, list_param: &str, max_items: usize) -> RowStream {
        let params = self.merged(overrides);
        let items = match params.get(list_param) {
            Some(Value::Array(items)) if max_items > 0 && items.len() > max_items => unique(items),
            _ => return self.stream(overrides),
        };

        let total = items.len();
        let chunks = items
            .chunks(max_items)
            .map(|chunk| {
                let mut chunk_params = params.clone();
                chunk_params.insert(list_param.to_string(), Value::Array(chunk.to_vec()));
                Chunk {
                    params: chunk_params,
                    items: chunk.len(),
                }
            })
            .collect::<VecDeque<_>>();

        tracing::debug!(
            fetcher = %self.name,
            total,
            chunks = chunks.len(),
            max_items,
            "Batched fetch planned"
        );
        self.stream_chunks(chunks, total)
    }

    fn stream_chunks(&self, pending: VecDeque<Chunk>, total_items: usize) -> RowStream {
        RowStream {
            name: self.name.clone(),
            provider: Arc::clone(&self.provider),
            query: Arc::clone(&self.query),
            transform: self.transform.clone(),
            pending,
            buffer: Vec::new().into_iter(),
            session: None,
            done: false,
            total_items,
            fetched_items: 0,
        }
    }
}

fn unique(items: &[Value]) -> Vec<Value> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.to_string()))
        .cloned()
        .collect()
}

struct Chunk {
    params: QueryParams,
    /// Identifiers in this chunk; zero when unchunked.
    items: usize,
}

/// Lazy row sequence over one session.
///
/// The session is opened on the first `next()` and held until the stream is
/// exhausted (commit), fails (rollback) or is dropped (rollback).
pub struct RowStream {
    name: String,
    provider: Arc<dyn ConnectionProvider>,
    query: QueryFn,
    transform: Option<RowTransform>,
    pending: VecDeque<Chunk>,
    buffer: std::vec::IntoIter<Row>,
    session: Option<Session>,
    done: bool,
    total_items: usize,
    fetched_items: usize,
}

impl RowStream {
    /// Whether a session is currently held.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn fail(&mut self) {
        self.done = true;
        self.pending.clear();
        if let Some(session) = self.session.take() {
            if let Err(e) = session.rollback() {
                tracing::warn!(fetcher = %self.name, error = %e, "Rollback after failed fetch failed");
            }
        }
    }

    fn finish(&mut self) -> Result<(), QueryError> {
        self.done = true;
        if let Some(session) = self.session.take() {
            session.commit()?;
        }
        Ok(())
    }

    fn run_next_chunk(&mut self, chunk: Chunk) -> Result<(), QueryError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.provider.session()?,
        };
        let result = (self.query)(session.connection(), &chunk.params);
        self.session = Some(session);
        let rows = result?;

        if chunk.items > 0 {
            self.fetched_items += chunk.items;
            tracing::debug!(
                fetcher = %self.name,
                fetched = self.fetched_items,
                total = self.total_items,
                rows = rows.len(),
                "Chunk fetched"
            );
        }
        self.buffer = rows.into_iter();
        Ok(())
    }
}

impl Iterator for RowStream {
    type Item = Result<Row, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.next() {
                return Some(Ok(match &self.transform {
                    Some(transform) => transform(row),
                    None => row,
                }));
            }
            if self.done {
                return None;
            }
            let Some(chunk) = self.pending.pop_front() else {
                return match self.finish() {
                    Ok(()) => None,
                    Err(e) => Some(Err(e)),
                };
            };
            if let Err(e) = self.run_next_chunk(chunk) {
                self.fail();
                return Some(Err(e));
            }
        }
    }
}
