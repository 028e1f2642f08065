//! Subscription Registry
//!
//! Tracks which symbols the upstream session should stream and turns
//! requests into `REG` frames.
//!
//! - Before login, requests only land in `pending`; no frame is sent.
//! - After login, requests join a batch and (re)arm a debounce timer. When
//!   the quiet window elapses with no new request, one frame covers the
//!   whole batch. A watchlist load of N symbols becomes a single frame and
//!   stays under the upstream's per-call item ceiling.
//! - On login, [`SubscriptionRegistry::attach`] sends one frame for every
//!   tracked symbol (pending, batched and already registered).
//! - Symbols count as registered only once the socket writer confirms the
//!   frame was written. A frame that cannot be queued, fails to write, or is
//!   still queued when the session ends puts its symbols back into `pending`.
//!
//! The debounce timer is a single spawned task that is aborted and replaced
//! on every re-arm.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::registration_frame;
use crate::application::ports::RegistrationPort;
use crate::domain::streaming::Symbol;
use crate::domain::subscription::{RequestOutcome, SubscriptionState, SubscriptionStats, WireCode};
use crate::infrastructure::config::RegistrationSettings;
use crate::infrastructure::metrics;

/// A `REG` frame queued for the socket, with the codes it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationFrame {
    /// Serialized frame.
    pub text: String,
    /// Wire codes carried by the frame.
    pub codes: BTreeSet<WireCode>,
}

/// Sender half of the upstream socket writer queue.
pub type FrameSender = mpsc::UnboundedSender<RegistrationFrame>;

struct RegistryInner {
    state: SubscriptionState,
    outbound: Option<FrameSender>,
    debounce: Option<JoinHandle<()>>,
}

impl RegistryInner {
    fn cancel_debounce(&mut self) {
        if let Some(task) = self.debounce.take() {
            task.abort();
        }
    }
}

/// Shared registration state for the upstream session.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    settings: Arc<RegistrationSettings>,
    inner: Arc<Mutex<RegistryInner>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(settings: RegistrationSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            inner: Arc::new(Mutex::new(RegistryInner {
                state: SubscriptionState::new(),
                outbound: None,
                debounce: None,
            })),
        }
    }

    /// Record interest in `symbol`.
    ///
    /// Idempotent. While logged in, every call re-arms the debounce timer.
    /// Must be called within a Tokio runtime.
    pub fn request(&self, symbol: &Symbol) -> RequestOutcome {
        let code = symbol.wire_code();
        let mut inner = self.inner.lock();
        let logged_in = inner.outbound.is_some();
        let outcome = inner.state.request(&code, logged_in);

        match outcome {
            RequestOutcome::Pending => {
                tracing::info!(code = %code, "Symbol queued until login");
            }
            RequestOutcome::Batched => {
                tracing::debug!(code = %code, "Symbol added to registration batch");
            }
            RequestOutcome::Known => {
                tracing::debug!(code = %code, "Symbol already tracked");
            }
        }

        if logged_in {
            self.arm_debounce(&mut inner);
        }
        outcome
    }

    /// Accepted and logged; registrations are never withdrawn upstream.
    pub fn unsubscribe(&self, symbol: &Symbol) {
        tracing::info!(%symbol, "Unsubscribe ignored; upstream registration kept");
    }

    /// Session logged in: route frames to `outbound` and register every
    /// tracked symbol in one frame.
    ///
    /// Returns the number of symbols carried by that frame.
    pub fn attach(&self, outbound: FrameSender) -> usize {
        let mut inner = self.inner.lock();
        inner.outbound = Some(outbound);
        inner.cancel_debounce();

        let codes = inner.state.all_codes();
        if codes.is_empty() {
            return 0;
        }
        tracing::info!(count = codes.len(), "Registering tracked symbols after login");
        if self.send_locked(&mut inner, &codes) {
            codes.len()
        } else {
            0
        }
    }

    /// The socket writer wrote the frame carrying `codes`.
    pub fn confirm(&self, codes: &BTreeSet<WireCode>) {
        self.inner.lock().state.confirm(codes);
        metrics::record_registration_sent(codes.len());
        tracing::info!(count = codes.len(), codes = ?codes, "Registration sent");
    }

    /// The socket writer failed to write the frame carrying `codes`.
    pub fn requeue(&self, codes: &BTreeSet<WireCode>) {
        self.inner.lock().state.requeue(codes);
        tracing::warn!(count = codes.len(), "Registration write failed; symbols requeued");
    }

    /// Session lost: stop sending and park the batch and unwritten frames
    /// in `pending`.
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.outbound = None;
        inner.cancel_debounce();
        inner.state.session_lost();
    }

    /// Send the current batch now.
    ///
    /// Returns the number of symbols carried, or `0` when nothing was sent.
    pub fn flush_batch(&self) -> usize {
        let mut inner = self.inner.lock();
        let batch = inner.state.take_batch();
        if batch.is_empty() {
            return 0;
        }
        if inner.outbound.is_none() {
            inner.state.requeue(&batch);
            return 0;
        }

        let codes = inner.state.message_codes(&batch, self.settings.refresh);
        if self.send_locked(&mut inner, &codes) {
            codes.len()
        } else {
            0
        }
    }

    /// Whether a logged-in session is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.lock().outbound.is_some()
    }

    /// Registered wire codes.
    #[must_use]
    pub fn registered(&self) -> BTreeSet<WireCode> {
        self.inner.lock().state.registered().clone()
    }

    /// Pending wire codes.
    #[must_use]
    pub fn pending(&self) -> BTreeSet<WireCode> {
        self.inner.lock().state.pending().clone()
    }

    /// Set sizes.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.inner.lock().state.stats()
    }

    fn arm_debounce(&self, inner: &mut RegistryInner) {
        inner.cancel_debounce();
        let registry = self.clone();
        let quiet = self.settings.debounce;
        inner.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            registry.flush_batch();
        }));
    }

    fn send_locked(&self, inner: &mut RegistryInner, codes: &BTreeSet<WireCode>) -> bool {
        let frame = RegistrationFrame {
            text: registration_frame(
                &self.settings.group,
                self.settings.refresh,
                codes,
                &self.settings.channels,
            ),
            codes: codes.clone(),
        };

        let sent = inner
            .outbound
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok());

        if sent {
            inner.state.mark_queued(codes);
            tracing::debug!(count = codes.len(), "Registration queued for socket");
        } else {
            inner.outbound = None;
            inner.state.requeue(codes);
            tracing::warn!(count = codes.len(), "Registration send failed; symbols requeued");
        }
        sent
    }
}

impl RegistrationPort for SubscriptionRegistry {
    fn request(&self, symbol: &Symbol) {
        Self::request(self, symbol);
    }
}
