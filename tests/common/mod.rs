#![allow(dead_code)]

use async_trait::async_trait;
use slotcast_lib::error::{CoordinatorError, Result};
use slotcast_lib::media::{CaptureDevice, MediaHandle, PermissionState};
use slotcast_lib::peer::transport::{LinkState, PeerTransport, TransportEvents, TransportFactory};
use slotcast_lib::peer::types::{ChatState, IceCandidate, SessionDescription};
use slotcast_lib::projection::{ChannelStatus, Projection};
use slotcast_lib::signaling::SignalingApi;
use slotcast_lib::{Collaborators, CoordinatorConfig, SlotStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Общий журнал вызовов всех фейков, в порядке появления
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn last_position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().rposition(|e| e == entry)
    }
}

pub fn candidate(line: &str) -> IceCandidate {
    IceCandidate {
        candidate: line.to_string(),
        sdp_mline_index: Some(0),
        sdp_mid: Some("0".to_string()),
    }
}

// ========== SIGNALING ==========

#[derive(Default)]
pub struct FakeSignaling {
    pub log: CallLog,
    pub fail_offer: AtomicBool,
    pub fail_answer: AtomicBool,
    pub fail_state: AtomicBool,
    pub state: Mutex<ChatState>,
    pub remote: Mutex<HashMap<String, VecDeque<Vec<IceCandidate>>>>,
    pub posted: Mutex<Vec<IceCandidate>>,
}

impl FakeSignaling {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn queue_remote(&self, slot: &str, batch: Vec<IceCandidate>) {
        self.remote
            .lock()
            .unwrap()
            .entry(slot.to_string())
            .or_default()
            .push_back(batch);
    }

    pub fn set_state(&self, state: ChatState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl SignalingApi for FakeSignaling {
    async fn fetch_state(&self) -> Result<ChatState> {
        self.log.push("fetch_state");
        if self.fail_state.load(Ordering::SeqCst) {
            return Err(CoordinatorError::SignalingUnavailable("503".into()));
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn request_offer(&self, slot: &str) -> Result<SessionDescription> {
        self.log.push(format!("request_offer:{slot}"));
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(CoordinatorError::SignalingUnavailable("500".into()));
        }
        Ok(SessionDescription::offer(format!("v=0 offer for {slot}")))
    }

    async fn post_answer(&self, slot: &str, _answer: &SessionDescription) -> Result<()> {
        self.log.push(format!("post_answer:{slot}"));
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(CoordinatorError::SignalingUnavailable(
                "No peer connection found".into(),
            ));
        }
        Ok(())
    }

    async fn post_local_candidate(&self, slot: &str, candidate: &IceCandidate) -> Result<()> {
        self.log.push(format!("post_candidate:{slot}"));
        self.posted.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn poll_remote_candidates(&self, slot: &str) -> Result<Vec<IceCandidate>> {
        self.log.push(format!("poll:{slot}"));
        let batch = self
            .remote
            .lock()
            .unwrap()
            .get_mut(slot)
            .and_then(|q| q.pop_front())
            .unwrap_or_default();
        Ok(batch)
    }

    async fn request_close(&self, slot: &str) -> Result<()> {
        self.log.push(format!("request_close:{slot}"));
        Ok(())
    }
}

// ========== CAPTURE ==========

pub struct FakeCapture {
    pub log: CallLog,
    pub permission: Mutex<PermissionState>,
}

impl FakeCapture {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            permission: Mutex::new(PermissionState::Granted),
        }
    }

    pub fn deny(&self) {
        *self.permission.lock().unwrap() = PermissionState::Denied;
    }
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn acquire(&self) -> Result<MediaHandle> {
        self.log.push("acquire");
        Ok(MediaHandle::new(Vec::new()))
    }

    async fn release(&self, _handle: MediaHandle) {
        self.log.push("release");
    }
}

// ========== TRANSPORT ==========

pub struct FakeTransport {
    pub events: TransportEvents,
    log: CallLog,
    fail_apply: bool,
    fail_answer: bool,
    pub remote: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicBool,
}

impl FakeTransport {
    /// Имитирует колбэк транспорта
    pub fn emit(&self, state: LinkState) {
        self.events.state_changed(state);
    }

    pub fn emit_local(&self, candidate: IceCandidate) {
        self.events.local_candidate(candidate);
    }

    pub fn remote_count(&self) -> usize {
        self.remote.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn apply_offer(&self, _offer: &SessionDescription) -> Result<()> {
        self.log.push(format!("apply_offer:{}", self.events.slot()));
        if self.fail_apply {
            return Err(CoordinatorError::TransportFailure("bad remote sdp".into()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.fail_answer {
            return Err(CoordinatorError::TransportFailure("no codecs in common".into()));
        }
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.remote.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.push(format!("transport_close:{}", self.events.slot()));
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Переключатели ошибок действуют на транспорты, созданные после их установки
#[derive(Default)]
pub struct FakeTransports {
    pub log: CallLog,
    pub created: Mutex<Vec<Arc<FakeTransport>>>,
    pub fail_create: AtomicBool,
    pub fail_apply: AtomicBool,
    pub fail_answer: AtomicBool,
}

impl FakeTransports {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn nth(&self, i: usize) -> Arc<FakeTransport> {
        self.created.lock().unwrap()[i].clone()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl TransportFactory for FakeTransports {
    async fn create(
        &self,
        _media: &MediaHandle,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>> {
        self.log.push(format!("create_transport:{}", events.slot()));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CoordinatorError::TransportFailure("peer connection refused".into()));
        }
        let transport = Arc::new(FakeTransport {
            events,
            log: self.log.clone(),
            fail_apply: self.fail_apply.load(Ordering::SeqCst),
            fail_answer: self.fail_answer.load(Ordering::SeqCst),
            remote: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

// ========== PROJECTION ==========

#[derive(Default)]
pub struct RecordingProjection {
    pub statuses: Mutex<Vec<(String, SlotStatus)>>,
    pub errors: Mutex<Vec<(String, String)>>,
    pub snapshots: Mutex<Vec<ChatState>>,
    pub channel: Mutex<Vec<ChannelStatus>>,
}

impl RecordingProjection {
    pub fn history(&self, slot: &str) -> Vec<SlotStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == slot)
            .map(|(_, st)| *st)
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn channel_history(&self) -> Vec<ChannelStatus> {
        self.channel.lock().unwrap().clone()
    }
}

impl Projection for RecordingProjection {
    fn slot_status(&self, slot: &str, status: SlotStatus) {
        self.statuses
            .lock()
            .unwrap()
            .push((slot.to_string(), status));
    }

    fn snapshot_changed(&self, snapshot: &ChatState) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }

    fn channel_status(&self, status: ChannelStatus) {
        self.channel.lock().unwrap().push(status);
    }

    fn error(&self, slot: &str, error: &CoordinatorError) {
        self.errors
            .lock()
            .unwrap()
            .push((slot.to_string(), error.to_string()));
    }
}

// ========== HARNESS ==========

pub struct Harness {
    pub log: CallLog,
    pub signaling: Arc<FakeSignaling>,
    pub capture: Arc<FakeCapture>,
    pub transports: Arc<FakeTransports>,
    pub projection: Arc<RecordingProjection>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            signaling: Arc::new(FakeSignaling::new(log.clone())),
            capture: Arc::new(FakeCapture::new(log.clone())),
            transports: Arc::new(FakeTransports::new(log.clone())),
            projection: Arc::new(RecordingProjection::default()),
            log,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            capture: self.capture.clone(),
            signaling: self.signaling.clone(),
            transports: self.transports.clone(),
            projection: self.projection.clone(),
        }
    }
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
}

/// Ждёт условие, отдавая управление фоновым задачам
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not reached");
}
