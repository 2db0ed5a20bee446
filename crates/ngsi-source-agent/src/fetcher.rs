//! Paginated initial snapshot.

use ngsi_source_adapter_ngsi::{ClientError, ContextBroker, EntityQuery};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Highest page index requested. Entities past page 100 are not fetched.
pub const MAX_PAGE_INDEX: u32 = 100;

/// How page results are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitPolicy {
    /// Emit every page as it arrives
    Unbuffered,
    /// Emit all pages once, after the last one
    Buffered,
}

impl EmitPolicy {
    /// Policy for the buffering flag.
    #[must_use]
    pub fn from_buffering(buffering: bool) -> Self {
        if buffering {
            Self::Buffered
        } else {
            Self::Unbuffered
        }
    }
}

/// How a snapshot fetch ended.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Every page was retrieved (up to the page cap)
    Completed {
        /// Page requests issued
        pages: u32,
        /// Entities retrieved
        entities: usize,
    },
    /// The token was cancelled; nothing was emitted after that point
    Cancelled {
        /// Page requests issued
        pages: u32,
    },
    /// A page request failed and the chain stopped
    Failed {
        /// Page requests issued
        pages: u32,
        /// The failure
        error: ClientError,
    },
}

/// Whether another page follows `page` for a listing of `total` entities.
#[must_use]
pub fn has_next_page(page: u32, page_size: u32, total: u64) -> bool {
    page < MAX_PAGE_INDEX && (u64::from(page) + 1) * u64::from(page_size) < total
}

/// Retrieve the entities matching `query`, page by page.
///
/// `emit` receives one batch per page (unbuffered) or a single batch with
/// every page in order (buffered). The token is checked before each request
/// and again when its response arrives; a response that arrives after
/// cancellation is discarded.
pub async fn fetch_snapshot<F>(
    broker: &dyn ContextBroker,
    query: &EntityQuery,
    policy: EmitPolicy,
    cancel: &CancellationToken,
    mut emit: F,
) -> FetchOutcome
where
    F: FnMut(Vec<Value>) + Send,
{
    let mut buffer = Vec::new();
    let mut entities = 0;
    let mut page = 0;

    loop {
        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled { pages: page };
        }

        let result = broker.list_entities(&query.page(page)).await;

        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled { pages: page + 1 };
        }

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(page, error = %error, "Error retrieving initial values");
                return FetchOutcome::Failed {
                    pages: page + 1,
                    error,
                };
            }
        };

        tracing::debug!(
            page,
            results = response.results.len(),
            count = ?response.count,
            "Retrieved entity page"
        );

        entities += response.results.len();
        match policy {
            EmitPolicy::Unbuffered => emit(response.results),
            EmitPolicy::Buffered => buffer.extend(response.results),
        }

        if !has_next_page(page, query.limit, response.count.unwrap_or(0)) {
            break;
        }
        page += 1;
    }

    if policy == EmitPolicy::Buffered {
        emit(buffer);
    }

    FetchOutcome::Completed {
        pages: page + 1,
        entities,
    }
}
