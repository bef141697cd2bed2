//! Remote-first, fallback-second access to a resource collection.
//!
//! Reads go to the backend and refresh the local snapshot on success; when
//! the backend is unreachable the snapshot is served instead. Writes are
//! validated, sent to the backend, and followed by a re-list (write
//! responses don't echo the stored record). When a write can't reach the
//! backend it is applied to the snapshot so the panel keeps working offline.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::FallbackCache;
use crate::error::PanelError;
use crate::model::{Client, CopySetup, RecordKey, Resource};
use crate::poller::{ActivationPoller, PollOutcome, PollTarget};
use crate::remote::{CopySetupApi, ListApi, RemoteError, ResourceApi};
use crate::storage::LocalStorage;
use crate::validate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Remote,
    Fallback,
}

/// A collection plus where it came from.
#[derive(Debug)]
pub struct Loaded<R> {
    pub records: Vec<R>,
    pub source: DataSource,
    /// Why the fallback was used, if it was.
    pub warning: Option<PanelError>,
}

#[derive(Debug)]
pub enum MutationOutcome<R> {
    /// The backend accepted the write; `Loaded` is the follow-up listing.
    Remote(Loaded<R>),
    /// The backend was unreachable; the write was applied to the snapshot.
    Offline { records: Vec<R>, error: RemoteError },
}

impl<R> MutationOutcome<R> {
    pub fn records(&self) -> &[R] {
        match self {
            MutationOutcome::Remote(loaded) => &loaded.records,
            MutationOutcome::Offline { records, .. } => records,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, MutationOutcome::Offline { .. })
    }
}

pub struct ResourceSync<R, A: ?Sized> {
    api: Arc<A>,
    cache: FallbackCache<R>,
    empty_list_uses_fallback: bool,
}

impl<R, A> ResourceSync<R, A>
where
    R: Resource,
    A: ListApi<R> + ?Sized,
{
    pub fn new(api: Arc<A>, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            api,
            cache: FallbackCache::new(storage),
            empty_list_uses_fallback: false,
        }
    }

    /// Serve the snapshot when the backend answers with an empty list but
    /// the snapshot has records.
    pub fn empty_list_uses_fallback(mut self, enabled: bool) -> Self {
        self.empty_list_uses_fallback = enabled;
        self
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn cache(&self) -> &FallbackCache<R> {
        &self.cache
    }

    pub async fn load(&self) -> Loaded<R> {
        match self.api.list().await {
            Ok(records) if records.is_empty() && self.empty_list_uses_fallback => {
                let cached = self.cache.read();
                if !cached.is_empty() {
                    info!(kind = %R::KIND, cached = cached.len(), "remote list empty, serving snapshot");
                }
                Loaded {
                    source: if cached.is_empty() {
                        DataSource::Remote
                    } else {
                        DataSource::Fallback
                    },
                    records: cached,
                    warning: None,
                }
            }
            Ok(records) => {
                self.cache.write(&records);
                Loaded {
                    records,
                    source: DataSource::Remote,
                    warning: None,
                }
            }
            Err(e) => {
                warn!(kind = %R::KIND, error = %e, "remote list failed, serving snapshot");
                Loaded {
                    records: self.cache.read(),
                    source: DataSource::Fallback,
                    warning: Some(PanelError::RemoteUnavailable(e)),
                }
            }
        }
    }
}

impl<R, A> ResourceSync<R, A>
where
    R: Resource,
    A: ResourceApi<R> + ?Sized,
{
    pub async fn create(&self, record: R) -> Result<MutationOutcome<R>, PanelError> {
        record.validate()?;
        match self.api.create(&record).await {
            Ok(()) => Ok(MutationOutcome::Remote(self.load().await)),
            Err(e) => {
                warn!(kind = %R::KIND, key = %record.key(), error = %e, "remote create failed, storing locally");
                self.cache.insert_local(record);
                Ok(MutationOutcome::Offline {
                    records: self.cache.read(),
                    error: e,
                })
            }
        }
    }

    pub async fn update(&self, key: &RecordKey, record: R) -> Result<MutationOutcome<R>, PanelError> {
        record.validate()?;
        match self.api.update(key, &record).await {
            Ok(()) => Ok(MutationOutcome::Remote(self.load().await)),
            Err(e) => {
                warn!(kind = %R::KIND, key = %key, error = %e, "remote update failed, updating locally");
                self.cache.upsert_local(key, record);
                Ok(MutationOutcome::Offline {
                    records: self.cache.read(),
                    error: e,
                })
            }
        }
    }

    pub async fn delete(&self, keys: &[RecordKey]) -> Result<MutationOutcome<R>, PanelError> {
        if keys.is_empty() {
            return Err(ValidationError::EmptySelection("record").into());
        }
        match self.api.delete(keys).await {
            Ok(()) => Ok(MutationOutcome::Remote(self.load().await)),
            Err(e) => {
                warn!(kind = %R::KIND, count = keys.len(), error = %e, "remote delete failed, deleting locally");
                self.cache.remove_local(keys);
                Ok(MutationOutcome::Offline {
                    records: self.cache.read(),
                    error: e,
                })
            }
        }
    }
}

/// Result of adding a client and waiting for its broker login.
#[derive(Debug)]
pub enum SessionOutcome {
    Active(Client),
    /// Login not confirmed in time; carries the advisory `PollTimeout`.
    Pending(PanelError),
    Cancelled,
    /// Backend unreachable; the client was stored locally and no login ran.
    Offline(RemoteError),
}

impl<A> ResourceSync<Client, A>
where
    A: ResourceApi<Client> + ?Sized + 'static,
{
    /// Create a client, then poll until its broker session is active.
    pub async fn add_and_await_session(
        &self,
        client: Client,
        poller: &ActivationPoller<Client, A>,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, PanelError> {
        let target = PollTarget::active(client.key());
        match self.create(client).await? {
            MutationOutcome::Offline { error, .. } => Ok(SessionOutcome::Offline(error)),
            MutationOutcome::Remote(_) => {
                let outcome = poller.poll(&target, cancel).await;
                let session = match outcome {
                    PollOutcome::Activated { record, .. } => SessionOutcome::Active(record),
                    PollOutcome::Cancelled { .. } => SessionOutcome::Cancelled,
                    timed_out @ PollOutcome::TimedOut { .. } => match timed_out.timeout_warning(&target) {
                        Some(warning) => SessionOutcome::Pending(warning),
                        None => SessionOutcome::Cancelled,
                    },
                };
                // Refresh the snapshot with the post-login state.
                self.load().await;
                Ok(session)
            }
        }
    }
}

impl<A> ResourceSync<CopySetup, A>
where
    A: CopySetupApi + ?Sized,
{
    pub async fn set_enabled(&self, key: &RecordKey, enabled: bool) -> MutationOutcome<CopySetup> {
        match self.api.set_enabled(key, enabled).await {
            Ok(()) => MutationOutcome::Remote(self.load().await),
            Err(e) => {
                warn!(key = %key, enabled = enabled, error = %e, "remote toggle failed, updating locally");
                if let Some(mut setup) = self.cache.read().into_iter().find(|s| &s.key() == key) {
                    setup.enabled = enabled;
                    self.cache.upsert_local(key, setup);
                }
                MutationOutcome::Offline {
                    records: self.cache.read(),
                    error: e,
                }
            }
        }
    }
}
