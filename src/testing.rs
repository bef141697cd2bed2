//! In-memory remote collection used by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::model::{dedupe_by_key, CopySetup, RecordKey, Resource};
use crate::remote::{CopySetupApi, ListApi, RemoteError, ResourceApi};

type ListHook = Box<dyn Fn(u32) + Send + Sync>;

pub(crate) struct FakeRemote<R> {
    records: Mutex<Vec<R>>,
    script: Mutex<VecDeque<Vec<R>>>,
    offline: AtomicBool,
    list_calls: AtomicU32,
    write_calls: AtomicU32,
    on_list: Mutex<Option<ListHook>>,
}

impl<R: Resource> FakeRemote<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records: Mutex::new(records),
            script: Mutex::new(VecDeque::new()),
            offline: AtomicBool::new(false),
            list_calls: AtomicU32::new(0),
            write_calls: AtomicU32::new(0),
            on_list: Mutex::new(None),
        }
    }

    /// Successive `list()` responses. The last one repeats.
    pub fn script(&self, responses: Vec<Vec<R>>) {
        *self.script.lock().unwrap() = responses.into();
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Called with the 1-based call number on every `list()`.
    pub fn on_list(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
        *self.on_list.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> u32 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<R> {
        self.records.lock().unwrap().clone()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                body: "offline".to_string(),
            });
        }
        Ok(())
    }

    fn write(&self) -> Result<(), RemoteError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()
    }
}

#[async_trait]
impl<R: Resource> ListApi<R> for FakeRemote<R> {
    async fn list(&self) -> Result<Vec<R>, RemoteError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self.on_list.lock().unwrap().as_ref() {
            hook(call);
        }
        self.check_online()?;

        let mut script = self.script.lock().unwrap();
        let scripted = match script.len() {
            0 => None,
            1 => script.front().cloned(),
            _ => script.pop_front(),
        };
        Ok(scripted.unwrap_or_else(|| self.records()))
    }
}

#[async_trait]
impl<R: Resource> ResourceApi<R> for FakeRemote<R> {
    async fn create(&self, record: &R) -> Result<(), RemoteError> {
        self.write()?;
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        *records = dedupe_by_key(std::mem::take(&mut *records));
        Ok(())
    }

    async fn update(&self, key: &RecordKey, record: &R) -> Result<(), RemoteError> {
        self.write()?;
        let mut records = self.records.lock().unwrap();
        if let Some(r) = records.iter_mut().find(|r| &r.key() == key) {
            *r = record.clone();
        }
        Ok(())
    }

    async fn delete(&self, keys: &[RecordKey]) -> Result<(), RemoteError> {
        self.write()?;
        self.records
            .lock()
            .unwrap()
            .retain(|r| !keys.contains(&r.key()));
        Ok(())
    }
}

#[async_trait]
impl CopySetupApi for FakeRemote<CopySetup> {
    async fn set_enabled(&self, key: &RecordKey, enabled: bool) -> Result<(), RemoteError> {
        self.write()?;
        if let Some(s) = self
            .records
            .lock()
            .unwrap()
            .iter_mut()
            .find(|s| &s.key() == key)
        {
            s.enabled = enabled;
        }
        Ok(())
    }
}
