//! Debounced user search.
//!
//! Keystrokes update the query and restart a quiet period; one request is
//! issued once input settles. Every request carries a sequence number and
//! only the latest issued one may deliver results, so a slow response for
//! an old query never overwrites a newer one.

use std::time::{Duration, Instant};

/// Default quiet period before a search is issued.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// A search to run against the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub seq: u64,
    pub query: String,
    /// 1-based page number.
    pub page: u32,
}

#[derive(Debug)]
pub struct SearchDebouncer {
    quiet: Duration,
    query: String,
    deadline: Option<Instant>,
    seq: u64,
    issued: Option<SearchRequest>,
    /// The issued request has not reported back yet.
    in_flight: bool,
    /// Last page of the current query that loaded successfully.
    loaded_page: u32,
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl SearchDebouncer {
    #[must_use]
    pub const fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            query: String::new(),
            deadline: None,
            seq: 0,
            issued: None,
            in_flight: false,
            loaded_page: 0,
        }
    }

    /// The latest input.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Record new input at `now`.
    ///
    /// Supersedes any in-flight request. Returns `true` when the query is
    /// blank, meaning results should be cleared and nothing will be issued.
    pub fn input(&mut self, query: impl Into<String>, now: Instant) -> bool {
        self.query = query.into();
        self.issued = None;
        self.in_flight = false;
        self.loaded_page = 0;
        if self.query.trim().is_empty() {
            self.deadline = None;
            return true;
        }
        self.deadline = Some(now + self.quiet);
        false
    }

    /// Issue the search once the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<SearchRequest> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        Some(self.issue(self.query.trim().to_string(), 1))
    }

    /// Request the page after the last one that loaded.
    ///
    /// Returns `None` while a page is still loading, so pages arrive in
    /// order and none is skipped. After a failed page the same page is
    /// requested again.
    pub fn load_more(&mut self) -> Option<SearchRequest> {
        if self.in_flight || self.loaded_page == 0 {
            return None;
        }
        let query = self.issued.as_ref()?.query.clone();
        Some(self.issue(query, self.loaded_page + 1))
    }

    /// Whether results for `seq` are still wanted.
    #[must_use]
    pub fn accept(&self, seq: u64) -> bool {
        self.issued.as_ref().is_some_and(|r| r.seq == seq)
    }

    /// Record the completion of request `seq`.
    ///
    /// Returns `false` for superseded requests, whose results must be
    /// dropped.
    pub fn finish(&mut self, seq: u64, succeeded: bool) -> bool {
        let Some(issued) = self.issued.as_ref().filter(|r| r.seq == seq) else {
            return false;
        };
        if succeeded {
            self.loaded_page = issued.page;
        }
        self.in_flight = false;
        true
    }

    /// Whether the latest issued request is still loading.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.in_flight
    }

    /// When the pending search will be due.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn issue(&mut self, query: String, page: u32) -> SearchRequest {
        self.seq += 1;
        let request = SearchRequest {
            seq: self.seq,
            query,
            page,
        };
        self.issued = Some(request.clone());
        self.in_flight = true;
        request
    }
}
