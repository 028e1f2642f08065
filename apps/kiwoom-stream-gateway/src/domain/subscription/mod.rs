//! Upstream Registration State
//!
//! Pure bookkeeping for which wire codes the upstream session should be
//! streaming. Every code lives in at most one of four sets:
//!
//! - `pending`: requested while no session was logged in
//! - `batch`: requested while logged in, waiting for the debounce to fire
//! - `in_flight`: carried by a registration message queued for the socket
//! - `registered`: carried by a registration message written to the socket
//!
//! A code joins `registered` only after the socket write of its message
//! succeeded. A failed write, or a session that ends while the message is
//! still queued, moves codes back to `pending` so the next login
//! re-registers them.
//!
//! The upstream exposes no per-symbol removal in this gateway, so codes
//! never leave the state once requested.

use std::collections::BTreeSet;

use serde::Serialize;

/// Upstream wire code (`005930_AL`).
pub type WireCode = String;

// =============================================================================
// Refresh Mode
// =============================================================================

/// How a registration message relates to earlier registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Each message adds to what the session already streams (`refresh: "1"`).
    #[default]
    Additive,
    /// Each message replaces the session's list (`refresh: "0"`), so every
    /// message carries the complete set.
    Replace,
}

impl RefreshMode {
    /// Wire flag for the registration message.
    #[must_use]
    pub const fn wire_flag(self) -> &'static str {
        match self {
            Self::Additive => "1",
            Self::Replace => "0",
        }
    }

    /// Parse `additive` / `replace` (case-insensitive).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "additive" | "1" => Some(Self::Additive),
            "replace" | "0" => Some(Self::Replace),
            _ => None,
        }
    }
}

// =============================================================================
// Request Outcome
// =============================================================================

/// Result of recording a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Queued for the next login.
    Pending,
    /// Added to the debounce batch.
    Batched,
    /// Already pending, batched or registered.
    Known,
}

// =============================================================================
// Subscription State
// =============================================================================

/// Four-set registration state.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    pending: BTreeSet<WireCode>,
    batch: BTreeSet<WireCode>,
    in_flight: BTreeSet<WireCode>,
    registered: BTreeSet<WireCode>,
}

impl SubscriptionState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `code`.
    pub fn request(&mut self, code: &str, logged_in: bool) -> RequestOutcome {
        if self.contains(code) {
            return RequestOutcome::Known;
        }
        if logged_in {
            self.batch.insert(code.to_string());
            RequestOutcome::Batched
        } else {
            self.pending.insert(code.to_string());
            RequestOutcome::Pending
        }
    }

    /// Whether `code` is tracked in any set.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.pending.contains(code)
            || self.batch.contains(code)
            || self.in_flight.contains(code)
            || self.registered.contains(code)
    }

    /// Drain the debounce batch.
    pub fn take_batch(&mut self) -> BTreeSet<WireCode> {
        std::mem::take(&mut self.batch)
    }

    /// Every tracked code, for the post-login registration.
    #[must_use]
    pub fn all_codes(&self) -> BTreeSet<WireCode> {
        self.pending
            .iter()
            .chain(&self.batch)
            .chain(&self.in_flight)
            .chain(&self.registered)
            .cloned()
            .collect()
    }

    /// Codes a registration message must carry for `codes` under `mode`.
    #[must_use]
    pub fn message_codes(&self, codes: &BTreeSet<WireCode>, mode: RefreshMode) -> BTreeSet<WireCode> {
        match mode {
            RefreshMode::Additive => codes.clone(),
            RefreshMode::Replace => self.registered.union(codes).cloned().collect(),
        }
    }

    /// A message carrying `codes` was queued for the socket.
    ///
    /// Codes already registered stay registered; the rest wait in
    /// `in_flight` until [`Self::confirm`] or [`Self::requeue`].
    pub fn mark_queued(&mut self, codes: &BTreeSet<WireCode>) {
        for code in codes {
            self.pending.remove(code);
            self.batch.remove(code);
            if !self.registered.contains(code) {
                self.in_flight.insert(code.clone());
            }
        }
    }

    /// The message carrying `codes` was written to the socket.
    pub fn confirm(&mut self, codes: &BTreeSet<WireCode>) {
        for code in codes {
            if self.in_flight.remove(code) {
                self.registered.insert(code.clone());
            }
        }
    }

    /// Return `codes` to `pending` after a failed send.
    pub fn requeue(&mut self, codes: &BTreeSet<WireCode>) {
        for code in codes {
            self.registered.remove(code);
            self.batch.remove(code);
            self.in_flight.remove(code);
            self.pending.insert(code.clone());
        }
    }

    /// Session lost: batched and unwritten codes wait for the next login.
    /// Registered codes stay registered and are re-sent by the post-login
    /// registration.
    pub fn session_lost(&mut self) {
        let batch = std::mem::take(&mut self.batch);
        let in_flight = std::mem::take(&mut self.in_flight);
        self.pending.extend(batch);
        self.pending.extend(in_flight);
    }

    /// Pending codes.
    #[must_use]
    pub const fn pending(&self) -> &BTreeSet<WireCode> {
        &self.pending
    }

    /// Batched codes.
    #[must_use]
    pub const fn batch(&self) -> &BTreeSet<WireCode> {
        &self.batch
    }

    /// Codes queued for the socket but not yet written.
    #[must_use]
    pub const fn in_flight(&self) -> &BTreeSet<WireCode> {
        &self.in_flight
    }

    /// Registered codes.
    #[must_use]
    pub const fn registered(&self) -> &BTreeSet<WireCode> {
        &self.registered
    }

    /// Snapshot counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            pending: self.pending.len(),
            batched: self.batch.len(),
            in_flight: self.in_flight.len(),
            registered: self.registered.len(),
        }
    }
}

/// Set sizes of a [`SubscriptionState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Codes waiting for login.
    pub pending: usize,
    /// Codes waiting for the debounce.
    pub batched: usize,
    /// Codes queued for the socket writer.
    pub in_flight: usize,
    /// Codes written to the socket in a registration message.
    pub registered: usize,
}
