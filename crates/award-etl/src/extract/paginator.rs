//! Page-number pagination over the source API
//!
//! Responses look like `{"results": [...], "_meta": {...}}`. Some endpoints
//! use `data` instead of `results`, and a bare array is accepted as a
//! single unpaginated page.

use crate::{context::RawRecord, error::ApiError};
use futures::{stream, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

/// Keys that may hold the results array, in priority order
pub const RESULT_KEYS: [&str; 2] = ["results", "data"];

pub const META_KEY: &str = "_meta";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub result_count: Option<u64>,
    #[serde(default)]
    pub has_more_results: Option<bool>,
}

impl PaginationMeta {
    /// Explicit flag first, then the page count
    pub fn more_remaining(&self, page: u32) -> bool {
        match (self.has_more_results, self.page_count) {
            (Some(flag), _) => flag,
            (None, Some(count)) => page < count,
            (None, None) => false,
        }
    }
}

/// One fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: u32,
    pub records: Vec<RawRecord>,
    pub meta: Option<PaginationMeta>,
}

/// Split a response body into its records and pagination metadata
pub fn split_response(body: &Value) -> (Vec<RawRecord>, Option<PaginationMeta>) {
    let (items, meta) = match body {
        Value::Array(items) => (Some(items), None),
        Value::Object(map) => (
            RESULT_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array)),
            map.get(META_KEY)
                .and_then(|m| serde_json::from_value::<PaginationMeta>(m.clone()).ok()),
        ),
        _ => (None, None),
    };

    let items = items.map(Vec::as_slice).unwrap_or_default();
    let records: Vec<RawRecord> = items
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect();

    if records.len() != items.len() {
        warn!(
            skipped = items.len() - records.len(),
            "Ignoring non-object entries in results array"
        );
    }

    (records, meta)
}

/// Drives a fetch function from page 1 until the source reports no more pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page_size: u32,
    max_pages: Option<u32>,
}

impl Paginator {
    pub fn new(page_size: u32, max_pages: Option<u32>) -> Self {
        Self {
            page_size: page_size.max(1),
            max_pages,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Lazily fetch pages starting at page 1
    ///
    /// `fetch` receives `(page, page_size)`. The stream ends after the last
    /// page, after `max_pages`, after an empty page, or right after yielding
    /// an error. Each call starts over from page 1.
    pub fn pages<'a, F, Fut>(&self, fetch: F) -> impl Stream<Item = Result<Page, ApiError>> + 'a
    where
        F: FnMut(u32, u32) -> Fut + 'a,
        Fut: Future<Output = Result<Value, ApiError>> + 'a,
    {
        let Paginator {
            page_size,
            max_pages,
        } = *self;

        stream::unfold(Some((1u32, fetch)), move |state| async move {
            let (number, mut fetch) = state?;
            if max_pages.is_some_and(|max| number > max) {
                debug!(?max_pages, "Page cap reached");
                return None;
            }

            let body = match fetch(number, page_size).await {
                Ok(body) => body,
                Err(e) => return Some((Err(e), None)),
            };

            let (records, meta) = split_response(&body);
            let more = match &meta {
                Some(meta) => !records.is_empty() && meta.more_remaining(number),
                None => {
                    if records.len() >= page_size as usize {
                        warn!(
                            page = number,
                            records = records.len(),
                            "Full page without pagination metadata; treating it as the last page"
                        );
                    }
                    false
                },
            };

            debug!(page = number, records = records.len(), more, "Fetched page");
            let next = more.then_some((number + 1, fetch));
            Some((
                Ok(Page {
                    number,
                    records,
                    meta,
                }),
                next,
            ))
        })
    }

    /// Fetch every page and concatenate the records
    ///
    /// Any fetch error is returned as-is and records from earlier pages are
    /// discarded.
    pub async fn fetch_all<F, Fut>(&self, fetch: F) -> Result<Vec<RawRecord>, ApiError>
    where
        F: FnMut(u32, u32) -> Fut,
        Fut: Future<Output = Result<Value, ApiError>>,
    {
        self.pages(fetch)
            .try_fold(Vec::new(), |mut all, page| async move {
                all.extend(page.records);
                Ok(all)
            })
            .await
    }
}
