//! Activation poller: confirm an asynchronous backend transition by polling.
//!
//! Adding a client kicks off a broker login on the backend. The add call
//! returns before the login finishes, so the panel re-lists clients on a
//! fixed interval until the new client's session reaches the expected
//! status or the attempt budget runs out. Running out is advisory: the login
//! may still complete after the window closes.
//!
//! State machine, published on a `watch` channel:
//!
//! ```text
//!   Idle → Polling{1} → Polling{2} → … ─┬→ Succeeded
//!                                       ├→ TimedOut
//!                                       └→ Cancelled
//! ```
//!
//! Cancellation is cooperative: the token is checked before each attempt
//! and raced against the inter-attempt sleep, so no request is issued once
//! it fires. At most one loop runs per record key; starting another poll for
//! the same key supersedes (cancels) the earlier one.

use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::error::PanelError;
use crate::model::{Activatable, RecordKey, SessionStatus};
use crate::remote::ListApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Fixed delay between attempts (no backoff).
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&PollConfig> for PollSettings {
    fn from(c: &PollConfig) -> Self {
        Self {
            interval: c.interval(),
            max_attempts: c.max_attempts,
        }
    }
}

/// Record to watch and the status that ends the poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub key: RecordKey,
    pub expected: SessionStatus,
}

impl PollTarget {
    pub fn active(key: RecordKey) -> Self {
        Self {
            key,
            expected: SessionStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling { attempt: u32 },
    Succeeded { attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Idle | PollState::Polling { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<R> {
    /// The record reached the expected status.
    Activated { record: R, attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl<R> PollOutcome<R> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Activated { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }

    fn state(&self) -> PollState {
        match self {
            PollOutcome::Activated { attempts, .. } => PollState::Succeeded { attempts: *attempts },
            PollOutcome::TimedOut { attempts } => PollState::TimedOut { attempts: *attempts },
            PollOutcome::Cancelled { attempts } => PollState::Cancelled { attempts: *attempts },
        }
    }

    /// Advisory error for a timed-out poll.
    pub fn timeout_warning(&self, target: &PollTarget) -> Option<PanelError> {
        match self {
            PollOutcome::TimedOut { attempts } => Some(PanelError::PollTimeout {
                key: target.key.clone(),
                expected: target.expected,
                attempts: *attempts,
            }),
            _ => None,
        }
    }
}

/// Poll `api` until the target record reaches its expected status.
///
/// Never sleeps after the final attempt, so the loop is bounded by
/// `max_attempts * interval` plus request time.
pub async fn poll_until<R, A>(
    api: &A,
    target: &PollTarget,
    settings: PollSettings,
    cancel: &CancellationToken,
    state: &watch::Sender<PollState>,
) -> PollOutcome<R>
where
    R: Activatable,
    A: ListApi<R> + ?Sized,
{
    let finish = |outcome: PollOutcome<R>| {
        state.send_replace(outcome.state());
        outcome
    };

    let mut attempts = 0;
    for attempt in 1..=settings.max_attempts {
        if cancel.is_cancelled() {
            debug!(key = %target.key, attempts = attempts, "poll cancelled");
            return finish(PollOutcome::Cancelled { attempts });
        }

        attempts = attempt;
        state.send_replace(PollState::Polling { attempt });

        match api.list().await {
            Ok(records) => match records.into_iter().find(|r| r.key() == target.key) {
                Some(record) if record.session_status() == target.expected => {
                    info!(key = %target.key, status = %target.expected, attempts = attempt, "record activated");
                    return finish(PollOutcome::Activated { record, attempts });
                }
                Some(record) => {
                    debug!(key = %target.key, status = %record.session_status(), attempt = attempt, "not yet active");
                }
                None => {
                    debug!(key = %target.key, attempt = attempt, "record not listed yet");
                }
            },
            Err(e) => {
                warn!(key = %target.key, error = %e, attempt = attempt, "poll request failed");
            }
        }

        if attempt < settings.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %target.key, attempts = attempts, "poll cancelled while waiting");
                    return finish(PollOutcome::Cancelled { attempts });
                }
                _ = tokio::time::sleep(settings.interval) => {}
            }
        }
    }

    warn!(
        key = %target.key,
        expected = %target.expected,
        attempts = attempts,
        "poll budget exhausted; backend may still be processing"
    );
    finish(PollOutcome::TimedOut { attempts })
}

/// Per-key guard ensuring at most one poll loop per record.
#[derive(Clone, Default)]
pub struct PollRegistry {
    active: Arc<DashMap<RecordKey, (u64, CancellationToken)>>,
    generation: Arc<AtomicU64>,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, cancelling any poll already running for it. The returned
    /// token fires when either `parent` or a later claim cancels it.
    pub fn register(&self, key: &RecordKey, parent: &CancellationToken) -> PollGuard {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        if let Some((_, previous)) = self.active.insert(key.clone(), (generation, token.clone())) {
            info!(key = %key, "superseding running poll");
            previous.cancel();
        }
        PollGuard {
            registry: self.clone(),
            key: key.clone(),
            generation,
            token,
        }
    }

    pub fn is_polling(&self, key: &RecordKey) -> bool {
        self.active.contains_key(key)
    }

    /// Cancel the poll running for `key`, if any.
    pub fn cancel(&self, key: &RecordKey) -> bool {
        match self.active.get(key) {
            Some(entry) => {
                entry.value().1.cancel();
                true
            }
            None => false,
        }
    }
}

/// Releases the registry slot on drop, unless a newer poll took it over.
pub struct PollGuard {
    registry: PollRegistry,
    key: RecordKey,
    generation: u64,
    token: CancellationToken,
}

impl PollGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        let generation = self.generation;
        self.registry
            .active
            .remove_if(&self.key, |_, (g, _)| *g == generation);
    }
}

/// Handle to a spawned poll.
pub struct PollHandle<R> {
    cancel: CancellationToken,
    state: watch::Receiver<PollState>,
    task: JoinHandle<PollOutcome<R>>,
}

impl<R> PollHandle<R> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    pub async fn wait(self) -> PollOutcome<R> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "poll task ended abnormally");
                let attempts = match *self.state.borrow() {
                    PollState::Polling { attempt } => attempt,
                    _ => 0,
                };
                PollOutcome::Cancelled { attempts }
            }
        }
    }
}

/// Polls one collection for activation of its records.
pub struct ActivationPoller<R, A: ?Sized> {
    api: Arc<A>,
    registry: PollRegistry,
    settings: PollSettings,
    _record: PhantomData<fn() -> R>,
}

impl<R, A> ActivationPoller<R, A>
where
    R: Activatable,
    A: ListApi<R> + ?Sized + 'static,
{
    pub fn new(api: Arc<A>, settings: PollSettings) -> Self {
        Self {
            api,
            registry: PollRegistry::new(),
            settings,
            _record: PhantomData,
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    pub fn registry(&self) -> &PollRegistry {
        &self.registry
    }

    /// Poll inline until done. `cancel` stops the loop early.
    pub async fn poll(&self, target: &PollTarget, cancel: &CancellationToken) -> PollOutcome<R> {
        let guard = self.registry.register(&target.key, cancel);
        let (state, _rx) = watch::channel(PollState::Idle);
        poll_until(&*self.api, target, self.settings, guard.token(), &state).await
    }

    /// Poll on a background task.
    pub fn spawn(&self, target: PollTarget) -> PollHandle<R> {
        let cancel = CancellationToken::new();
        let guard = self.registry.register(&target.key, &cancel);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let api = Arc::clone(&self.api);
        let settings = self.settings;

        let task = tokio::spawn(async move {
            let token = guard.token().clone();
            let outcome = poll_until(&*api, &target, settings, &token, &state_tx).await;
            drop(guard);
            outcome
        });

        PollHandle {
            cancel,
            state: state_rx,
            task,
        }
    }
}
