//! Test doubles for the storage, submit and connectivity collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::connectivity::ConnectivityProbe;
use crate::error::{Error, Result};
use crate::models::{CachedRecord, RecordId, ReportPayload};
use crate::store::{KeyValueStore, MemoryKeyValueStore};
use crate::sync::{SubmitClient, SubmitError, SubmitReceipt, SubmitResult};

pub fn payload(meter: &str) -> ReportPayload {
    ReportPayload::from_value(json!({
        "meterNumber": meter,
        "classification": "leak",
        "photos": ["file:///sdcard/DCIM/1.jpg"],
    }))
    .unwrap()
}

/// Memory store whose reads and writes can be made to fail on demand.
#[derive(Default)]
pub struct FailingKeyValueStore {
    inner: MemoryKeyValueStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FailingKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Database("simulated read failure".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Database("disk full".to_string()));
        }
        self.inner.set(key, value).await
    }
}

/// Scriptable submit client that records every call.
#[derive(Default)]
pub struct FakeSubmitClient {
    reference: Option<String>,
    delay: Option<Duration>,
    failing: Mutex<Option<String>>,
    failing_meters: Mutex<HashSet<String>>,
    submitted: Mutex<Vec<RecordId>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeSubmitClient {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let client = Self::default();
        client.set_failing(Some(message));
        client
    }

    /// Every success returns this reference instead of `REF-<n>`.
    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, message: Option<&str>) {
        *self.failing.lock() = message.map(str::to_string);
    }

    /// Reject records whose payload has this `meterNumber`.
    pub fn fail_meter(&self, meter: &str) {
        self.failing_meters.lock().insert(meter.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_meters.lock().clear();
        self.set_failing(None);
    }

    pub fn calls(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn submitted(&self) -> Vec<RecordId> {
        self.submitted.lock().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn decide(&self, record: &CachedRecord, call: usize) -> SubmitResult<SubmitReceipt> {
        if let Some(message) = self.failing.lock().clone() {
            return Err(SubmitError::Api(message));
        }

        let meter = record
            .payload
            .get("meterNumber")
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        if self.failing_meters.lock().contains(meter) {
            return Err(SubmitError::Api(format!("meter {meter} rejected (422)")));
        }

        Ok(SubmitReceipt::new(
            self.reference
                .clone()
                .unwrap_or_else(|| format!("REF-{call}")),
        ))
    }
}

#[async_trait]
impl SubmitClient for FakeSubmitClient {
    async fn submit(&self, record: &CachedRecord) -> SubmitResult<SubmitReceipt> {
        let call = {
            let mut submitted = self.submitted.lock();
            submitted.push(record.id);
            submitted.len()
        };
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.decide(record, call);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Connectivity probe toggled by the test.
#[derive(Default)]
pub struct FakeProbe {
    online: AtomicBool,
    checks: AtomicUsize,
}

impl FakeProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for FakeProbe {
    async fn is_online(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}
