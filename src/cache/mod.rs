//! Local fallback cache: the last known-good copy of a resource collection.
//!
//! Reads never fail (a missing or malformed snapshot is an empty
//! collection) and writes are best effort (storage errors are logged and
//! dropped). The snapshot has no version or expiry; every write replaces it
//! wholesale.
//!
//! Records created while the backend is unreachable get a locally minted
//! id (max numeric id + 1). These ids are not reconciled with the backend
//! once it is reachable again, so a later remote create can collide with
//! them.

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::model::{dedupe_by_key, RecordKey, Resource};
use crate::storage::LocalStorage;

pub struct FallbackCache<R> {
    storage: Arc<dyn LocalStorage>,
    key: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for FallbackCache<R> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            key: self.key.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Resource> FallbackCache<R> {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            storage,
            key: R::KIND.cache_key(),
            _record: PhantomData,
        }
    }

    /// Current snapshot; empty when absent or unreadable.
    pub fn read(&self) -> Vec<R> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(kind = %R::KIND, error = %e, "fallback snapshot unreadable");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<R>>(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(kind = %R::KIND, error = %e, "fallback snapshot malformed, treating as empty");
                Vec::new()
            }
        }
    }

    /// Replace the snapshot.
    pub fn write(&self, records: &[R]) {
        let json = match serde_json::to_string(records) {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = %R::KIND, error = %e, "failed to serialize fallback snapshot");
                return;
            }
        };
        match self.storage.set(&self.key, &json) {
            Ok(()) => debug!(kind = %R::KIND, records = records.len(), "fallback snapshot written"),
            Err(e) => warn!(kind = %R::KIND, error = %e, "failed to persist fallback snapshot"),
        }
    }

    /// Add a record created offline, minting an id if it needs one.
    /// A record whose key is already present replaces it.
    pub fn insert_local(&self, mut record: R) -> R {
        let mut records = self.read();
        if record.needs_id() {
            let next = records
                .iter()
                .filter_map(|r| r.numeric_id())
                .max()
                .map_or(1, |max| max + 1);
            record.assign_id(next);
        }
        records.push(record.clone());
        let records = dedupe_by_key(records);
        self.write(&records);
        debug!(kind = %R::KIND, key = %record.key(), "record created offline");
        record
    }

    /// Replace the record stored under `key`, or append when absent.
    pub fn upsert_local(&self, key: &RecordKey, record: R) {
        let mut records = self.read();
        match records.iter().position(|r| &r.key() == key) {
            Some(i) => records[i] = record,
            None => records.push(record),
        }
        let records = dedupe_by_key(records);
        self.write(&records);
        debug!(kind = %R::KIND, key = %key, "record updated offline");
    }

    /// Drop every record whose key is in `keys`. Returns how many were removed.
    pub fn remove_local(&self, keys: &[RecordKey]) -> usize {
        let mut records = self.read();
        let before = records.len();
        records.retain(|r| !keys.contains(&r.key()));
        let removed = before - records.len();
        self.write(&records);
        debug!(kind = %R::KIND, removed = removed, "records deleted offline");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Broker, Client, CopySetup, Group, ResourceKind};
    use crate::storage::MemoryStorage;
    use rust_decimal::Decimal;

    fn group(name: &str) -> Group {
        Group::new(name, Decimal::ONE, vec!["U1".into()])
    }

    fn cache<R: Resource>(storage: &Arc<MemoryStorage>) -> FallbackCache<R> {
        FallbackCache::new(Arc::clone(storage) as Arc<dyn LocalStorage>)
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let storage = Arc::new(MemoryStorage::new());
        let groups: FallbackCache<Group> = cache(&storage);

        let mut a = group("alpha");
        a.id = Some("4".into());
        let b = Group::new("beta", Decimal::new(25, 1), vec!["U2".into(), "U3".into()]);
        let snapshot = vec![a, b];

        groups.write(&snapshot);
        assert_eq!(groups.read(), snapshot);
    }

    #[test]
    fn test_high_precision_decimals_survive_roundtrip() {
        use std::str::FromStr;

        let storage = Arc::new(MemoryStorage::new());
        let capital = Decimal::from_str("12345678901234567.89").unwrap();
        let fine = Decimal::from_str("1.000000000000000001").unwrap();

        let clients: FallbackCache<Client> = cache(&storage);
        let mut rich = Client::new(Broker::Dhan, "U1").with_credential("access_token", "t");
        rich.capital = Some(capital);
        clients.write(&[rich.clone()]);
        assert_eq!(clients.read(), vec![rich]);
        let raw = storage.get(&ResourceKind::Clients.cache_key()).unwrap().unwrap();
        assert!(raw.contains("12345678901234567.89"));

        let groups: FallbackCache<Group> = cache(&storage);
        let g = Group::new("Fine", fine, vec!["U1".into()]);
        groups.write(&[g.clone()]);
        assert_eq!(groups.read(), vec![g]);

        let setups: FallbackCache<CopySetup> = cache(&storage);
        let mut s = CopySetup::new("Mirror", "U1", vec!["U2".into()]);
        s.multipliers.insert("U2".into(), fine);
        setups.write(&[s.clone()]);
        assert_eq!(setups.read(), vec![s]);
    }

    #[test]
    fn test_rewriting_read_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let clients: FallbackCache<Client> = cache(&storage);
        clients.write(&[Client::new(Broker::Dhan, "U1").with_credential("access_token", "t")]);

        let before = storage.get(&ResourceKind::Clients.cache_key()).unwrap();
        clients.write(&clients.read());
        let after = storage.get(&ResourceKind::Clients.cache_key()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_or_malformed_snapshot_reads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let groups: FallbackCache<Group> = cache(&storage);
        assert!(groups.read().is_empty());

        let key = ResourceKind::Groups.cache_key();
        storage.set(&key, "{not json").unwrap();
        assert!(groups.read().is_empty());

        storage.set(&key, r#"{"groups": []}"#).unwrap();
        assert!(groups.read().is_empty());

        storage.set(&key, r#"[{"bogus": true}]"#).unwrap();
        assert!(groups.read().is_empty());
    }

    #[test]
    fn test_insert_local_mints_max_plus_one() {
        let storage = Arc::new(MemoryStorage::new());
        let groups: FallbackCache<Group> = cache(&storage);

        let first = groups.insert_local(group("alpha"));
        assert_eq!(first.id.as_deref(), Some("1"));

        let mut imported = group("imported");
        imported.id = Some("7".into());
        groups.write(&[first.clone(), imported]);

        let next = groups.insert_local(group("beta"));
        assert_eq!(next.id.as_deref(), Some("8"));
        assert_eq!(groups.read().len(), 3);
    }

    #[test]
    fn test_insert_local_keeps_existing_id() {
        let storage = Arc::new(MemoryStorage::new());
        let setups: FallbackCache<CopySetup> = cache(&storage);
        let mut s = CopySetup::new("Mirror", "U1", vec!["U2".into()]);
        s.setup_id = Some("mirror_1".into());

        let stored = setups.insert_local(s.clone());
        assert_eq!(stored, s);
    }

    #[test]
    fn test_upsert_local_replaces_by_key() {
        let storage = Arc::new(MemoryStorage::new());
        let groups: FallbackCache<Group> = cache(&storage);
        let stored = groups.insert_local(group("alpha"));

        let mut edited = stored.clone();
        edited.multiplier = Decimal::from(3);
        groups.upsert_local(&stored.key(), edited.clone());

        assert_eq!(groups.read(), vec![edited]);
    }

    #[test]
    fn test_remove_local_counts() {
        let storage = Arc::new(MemoryStorage::new());
        let clients: FallbackCache<Client> = cache(&storage);
        clients.write(&[
            Client::new(Broker::Dhan, "U1"),
            Client::new(Broker::Dhan, "U2"),
            Client::new(Broker::Motilal, "M1"),
        ]);

        let removed = clients.remove_local(&["dhan::U1".into(), "motilal::M1".into(), "dhan::nope".into()]);
        assert_eq!(removed, 2);
        let left = clients.read();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].userid, "U2");
    }
}
