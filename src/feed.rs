//! Change-feed cursor.
//!
//! A [`ChangeFeedCursor`] drains a collection's change log page by page. The
//! first read resolves the start position (`Beginning`, `Now`, or `AtTime`);
//! every page carries a continuation token that the cursor passes back verbatim
//! on the next read, and that callers may persist to resume a fresh cursor
//! later.
//!
//! Change feeds are logically infinite: after draining all historical changes
//! the cursor stays open, [`has_more`](ChangeFeedCursor::has_more) keeps
//! reporting `true`, and reads yield caught-up (empty, `up_to_date`) pages until
//! the caller stops polling or closes the cursor. Caught-up is a transient
//! per-read observation, not a terminal state -- new writes move the cursor back
//! to draining.
//!
//! Cursors carry mutable position state and are not thread-safe; reads take
//! `&mut self`, so the borrow checker enforces the one-caller rule.

use std::sync::Arc;

use crate::cancel::{CancelToken, run_cancellable};
use crate::error::Error;
use crate::store::{DocumentStore, FeedPosition};
use crate::types::{ChangeRecord, CollectionPath, ContinuationToken, FeedStart};

/// One page of change-feed results.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    /// Change records in log order. Empty on a caught-up page.
    pub records: Vec<ChangeRecord>,
    /// Resume point after this page. Always present, including on caught-up
    /// pages, so polling can continue from the same position.
    pub continuation: ContinuationToken,
    /// `true` when no new changes existed past the read position -- the
    /// caught-up signal, distinct from end-of-feed (which does not exist).
    pub up_to_date: bool,
}

/// Observable cursor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Constructed; no page read yet.
    Open,
    /// The last page carried historical records.
    Draining,
    /// The last page was up to date. Transient: a subsequent read may drain
    /// again if new changes appeared.
    CaughtUp,
    /// Explicitly closed; all further reads fail with [`Error::CursorClosed`].
    Closed,
}

/// Pull-based cursor over a collection's change feed.
pub struct ChangeFeedCursor {
    store: Arc<dyn DocumentStore>,
    path: CollectionPath,
    position: FeedPosition,
    page_size_hint: u32,
    state: CursorState,
}

impl ChangeFeedCursor {
    /// Open a cursor at a start position. `Now` resolves to the head of the
    /// change log at the time of the first page read, not at construction.
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        path: CollectionPath,
        start: FeedStart,
        page_size_hint: u32,
    ) -> ChangeFeedCursor {
        ChangeFeedCursor {
            store,
            path,
            position: FeedPosition::Start(start),
            page_size_hint,
            state: CursorState::Open,
        }
    }

    /// Open a cursor resuming from a previously returned continuation token.
    pub(crate) fn resume(
        store: Arc<dyn DocumentStore>,
        path: CollectionPath,
        token: ContinuationToken,
        page_size_hint: u32,
    ) -> ChangeFeedCursor {
        ChangeFeedCursor {
            store,
            path,
            position: FeedPosition::Token(token),
            page_size_hint,
            state: CursorState::Open,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether a next read is expected to return at least an up-to-date page,
    /// i.e. the cursor has not been explicitly closed. The feed itself never
    /// ends, so this stays `true` until [`close`](ChangeFeedCursor::close).
    pub fn has_more(&self) -> bool {
        self.state != CursorState::Closed
    }

    /// The resume token from the last page read, or `None` before the first
    /// read. May be persisted and passed to a resuming cursor.
    pub fn continuation(&self) -> Option<&ContinuationToken> {
        match &self.position {
            FeedPosition::Token(token) => Some(token),
            FeedPosition::Start(_) => None,
        }
    }

    /// Read the next page, suspending until the store responds.
    ///
    /// On success the cursor advances to the page's continuation token and its
    /// state reflects the page: draining for a page with records, caught-up for
    /// an up-to-date page. On cancellation or failure the position is unchanged,
    /// as if the read had not been issued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CursorClosed`] after [`close`](ChangeFeedCursor::close),
    /// [`Error::Cancelled`] when the token fires first, and backend errors
    /// unchanged in kind.
    pub async fn read_next(&mut self, cancel: Option<&CancelToken>) -> Result<FeedPage, Error> {
        if self.state == CursorState::Closed {
            return Err(Error::CursorClosed);
        }

        let page = run_cancellable(
            "change_feed.read_next",
            cancel,
            self.store
                .read_feed_page(&self.path, &self.position, self.page_size_hint),
        )
        .await?;

        tracing::debug!(
            collection = %self.path,
            records = page.records.len(),
            up_to_date = page.up_to_date,
            "change-feed page read"
        );

        self.position = FeedPosition::Token(page.continuation.clone());
        self.state = if page.up_to_date {
            CursorState::CaughtUp
        } else {
            CursorState::Draining
        };
        Ok(page)
    }

    /// Close the cursor. All further reads fail with [`Error::CursorClosed`].
    /// Idempotent.
    pub fn close(&mut self) {
        self.state = CursorState::Closed;
    }
}
