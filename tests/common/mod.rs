//! Common Test Infrastructure
//!
//! Provides shared utilities for upload tests:
//! - A scripted in-memory object store
//! - A reporter that records every event
//! - Source file and configuration helpers

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tenacious_uploadr::config::UploadConfig;
use tenacious_uploadr::s3::{CompletedPart, ObjectMetadata, ObjectStore, StoreError};
use tenacious_uploadr::upload::{Reporter, UploadEvent};

pub const MIB: u64 = 1024 * 1024;

pub const TEST_BUCKET: &str = "test-bucket";
pub const TEST_KEY: &str = "big/object.bin";
pub const TEST_UPLOAD_ID: &str = "upload-1";

/// What the next CompleteMultipartUpload does
#[derive(Debug, Clone)]
pub enum CompleteStep {
    Succeed,
    /// Reject without merging
    Fail(StoreError),
    /// Merge server side, then report the error anyway
    MergeThenFail(StoreError),
}

/// Scripted behaviour and call log shared by every handle of one store
#[derive(Default)]
pub struct FakeState {
    create_failures: Mutex<VecDeque<StoreError>>,
    part_failures: Mutex<HashMap<u32, VecDeque<StoreError>>>,
    part_delay: Mutex<Option<Duration>>,
    listing: Mutex<Option<Vec<u32>>>,
    complete_script: Mutex<VecDeque<CompleteStep>>,
    head_script: Mutex<VecDeque<Result<ObjectMetadata, StoreError>>>,

    uploaded: Mutex<BTreeMap<u32, Bytes>>,
    object: Mutex<Option<Bytes>>,
    completed_parts: Mutex<Vec<CompletedPart>>,

    pub create_calls: AtomicU32,
    part_calls: Mutex<HashMap<u32, u32>>,
    pub list_calls: AtomicU32,
    pub complete_calls: AtomicU32,
    pub head_calls: AtomicU32,
    timeouts: Mutex<Vec<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// In-memory [`ObjectStore`] driven by scripts
#[derive(Clone)]
pub struct FakeStore {
    state: Arc<FakeState>,
    timeout: Option<Duration>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FakeState::default()),
            timeout: None,
        }
    }

    pub fn state(&self) -> &FakeState {
        &self.state
    }

    pub fn fail_create(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.state.create_failures.lock().extend(errors);
    }

    /// Queue failures returned by the next uploads of `part_number`
    pub fn fail_part(&self, part_number: u32, errors: impl IntoIterator<Item = StoreError>) {
        self.state
            .part_failures
            .lock()
            .entry(part_number)
            .or_default()
            .extend(errors);
    }

    pub fn delay_parts(&self, delay: Duration) {
        *self.state.part_delay.lock() = Some(delay);
    }

    /// Report this listing instead of the parts actually stored
    pub fn override_listing(&self, part_numbers: Vec<u32>) {
        *self.state.listing.lock() = Some(part_numbers);
    }

    pub fn script_complete(&self, steps: impl IntoIterator<Item = CompleteStep>) {
        self.state.complete_script.lock().extend(steps);
    }

    pub fn script_head(
        &self,
        results: impl IntoIterator<Item = Result<ObjectMetadata, StoreError>>,
    ) {
        self.state.head_script.lock().extend(results);
    }

    pub fn part_calls(&self, part_number: u32) -> u32 {
        self.state
            .part_calls
            .lock()
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    pub fn complete_calls(&self) -> u32 {
        self.state.complete_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u32 {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Timeouts of every handle created through `with_timeout`, in order
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.timeouts.lock().clone()
    }

    pub fn uploaded_lengths(&self) -> Vec<(u32, u64)> {
        self.state
            .uploaded
            .lock()
            .iter()
            .map(|(n, body)| (*n, body.len() as u64))
            .collect()
    }

    pub fn object(&self) -> Option<Bytes> {
        self.state.object.lock().clone()
    }

    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.state.completed_parts.lock().clone()
    }

    pub fn handle_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn merge(&self, parts: &[CompletedPart]) {
        let uploaded = self.state.uploaded.lock();
        let mut object = Vec::new();
        for part in parts {
            if let Some(body) = uploaded.get(&part.part_number) {
                object.extend_from_slice(body);
            }
        }
        *self.state.object.lock() = Some(Bytes::from(object));
        *self.state.completed_parts.lock() = parts.to_vec();
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn create_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
    ) -> Result<String, StoreError> {
        self.state.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.create_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(TEST_UPLOAD_ID.to_string())
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        assert_eq!(upload_id, TEST_UPLOAD_ID);
        *self.state.part_calls.lock().entry(part_number).or_default() += 1;

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.state.part_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .state
            .part_failures
            .lock()
            .get_mut(&part_number)
            .and_then(VecDeque::pop_front);

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        match failure {
            Some(err) => Err(err),
            None => {
                self.state.uploaded.lock().insert(part_number, body);
                Ok(format!("\"etag-{}\"", part_number))
            }
        }
    }

    async fn list_parts(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
    ) -> Result<Vec<u32>, StoreError> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(listing) = self.state.listing.lock().clone() {
            return Ok(listing);
        }
        Ok(self.state.uploaded.lock().keys().copied().collect())
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        self.state.complete_calls.fetch_add(1, Ordering::SeqCst);
        assert!(
            parts.windows(2).all(|w| w[0].part_number < w[1].part_number),
            "parts must be strictly ascending"
        );

        let step = self
            .state
            .complete_script
            .lock()
            .pop_front()
            .unwrap_or(CompleteStep::Succeed);

        match step {
            CompleteStep::Succeed => {
                self.merge(parts);
                Ok(())
            }
            CompleteStep::Fail(err) => Err(err),
            CompleteStep::MergeThenFail(err) => {
                self.merge(parts);
                Err(err)
            }
        }
    }

    async fn head_object(&self, _bucket: &str, _key: &str) -> Result<ObjectMetadata, StoreError> {
        self.state.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.state.head_script.lock().pop_front() {
            return result;
        }
        match self.state.object.lock().as_ref() {
            Some(object) => Ok(ObjectMetadata {
                size: Some(object.len() as u64),
                etag: Some("\"merged\"".to_string()),
            }),
            None => Err(StoreError::from_status(404, Some("NotFound"), "no such key")),
        }
    }

    fn with_timeout(&self, timeout: Duration) -> Arc<dyn ObjectStore> {
        self.state.timeouts.lock().push(timeout);
        Arc::new(FakeStore {
            state: Arc::clone(&self.state),
            timeout: Some(timeout),
        })
    }
}

/// Records every event it is handed
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<UploadEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<UploadEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&UploadEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Backoff waits scheduled for one part
    pub fn part_retries(&self, part_number: u32) -> usize {
        self.count(|e| {
            matches!(
                e,
                UploadEvent::RetryScheduled { part_number: Some(n), .. } if *n == part_number
            )
        })
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: UploadEvent) {
        self.events.lock().push(event);
    }
}

/// Temp file of `size` bytes with a repeating, position dependent pattern
pub fn patterned_file(size: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    let block: Vec<u8> = (0..=250u8).collect();
    let mut written = 0u64;
    while written < size {
        let n = (size - written).min(block.len() as u64) as usize;
        file.write_all(&block[..n]).expect("write temp file");
        written += n as u64;
    }
    file.flush().expect("flush temp file");
    file
}

/// Sparse temp file of `size` zero bytes
pub fn sparse_file(size: u64) -> NamedTempFile {
    let file = NamedTempFile::new().expect("create temp file");
    file.as_file().set_len(size).expect("size temp file");
    file
}

pub fn upload_config(file: &Path, part_size: u64) -> UploadConfig {
    UploadConfig {
        bucket: TEST_BUCKET.to_string(),
        key: TEST_KEY.to_string(),
        file: file.to_path_buf(),
        part_size,
        max_retries: 5,
        concurrency: 4,
    }
}

pub fn gateway_timeout() -> StoreError {
    StoreError::GatewayTimeout("HTTP 524 from proxy".into())
}

pub fn read_timeout() -> StoreError {
    StoreError::Timeout("read timeout".into())
}

pub fn insufficient_storage() -> StoreError {
    StoreError::InsufficientStorage("HTTP 507".into())
}

pub fn no_such_upload() -> StoreError {
    StoreError::NoSuchUpload("The specified upload does not exist".into())
}

pub fn head_size(size: u64) -> Result<ObjectMetadata, StoreError> {
    Ok(ObjectMetadata {
        size: Some(size),
        etag: None,
    })
}
