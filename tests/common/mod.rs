#![allow(dead_code)]

use async_trait::async_trait;
use micstream_lib::peer::{
    IceCandidate, LocalTrack, MediaEngine, MediaEvent, MediaEvents, MediaSession, ServerConfig,
    SessionDescription, TrackKind,
};
use micstream_lib::signaling::Fields;
use micstream_lib::{Config, MediaError, MemoryStore, SessionManager};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const USER: &str = "user-1";
pub const DOC: &str = "calls/user-1";

/// Media engine double: records every call, fails on demand.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<EngineState>,
}

#[derive(Default)]
struct EngineState {
    sessions: Mutex<Vec<Arc<FakeMedia>>>,
    ice_servers: Mutex<Vec<Vec<ServerConfig>>>,
    fail_offer: AtomicBool,
    reject_answers: AtomicU32,
}

impl FakeEngine {
    pub fn fail_offers(&self) {
        self.state.fail_offer.store(true, Ordering::SeqCst);
    }

    /// Rejects the next `count` remote descriptions.
    pub fn reject_answers(&self, count: u32) {
        self.state.reject_answers.store(count, Ordering::SeqCst);
    }

    pub fn session_count(&self) -> usize {
        self.state.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<FakeMedia> {
        self.state.sessions.lock().unwrap()[index].clone()
    }

    pub fn ice_servers_used(&self) -> Vec<Vec<ServerConfig>> {
        self.state.ice_servers.lock().unwrap().clone()
    }
}

pub struct FakeMedia {
    index: usize,
    events: mpsc::UnboundedSender<MediaEvent>,
    engine: Arc<EngineState>,
    tracks: Mutex<Vec<(LocalTrack, Vec<String>)>>,
    local: Mutex<Vec<SessionDescription>>,
    remote: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    rejected_candidates: AtomicU32,
    closed: AtomicBool,
}

impl FakeMedia {
    pub fn offer_sdp(&self) -> String {
        format!("fake-offer-{}", self.index)
    }

    /// Pretends the engine gathered a local candidate.
    pub fn emit_local(&self, line: &str) {
        let _ = self
            .events
            .send(MediaEvent::LocalCandidateGenerated(candidate(line)));
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    pub fn tracks(&self) -> Vec<(LocalTrack, Vec<String>)> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn candidate_lines(&self) -> Vec<String> {
        self.candidates
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn rejected_candidates(&self) -> u32 {
        self.rejected_candidates.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSession(Arc<FakeMedia>);

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
    ) -> Result<(Box<dyn MediaSession>, MediaEvents), MediaError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .ice_servers
            .lock()
            .unwrap()
            .push(ice_servers.to_vec());

        let mut sessions = self.state.sessions.lock().unwrap();
        let media = Arc::new(FakeMedia {
            index: sessions.len() + 1,
            events: tx,
            engine: self.state.clone(),
            tracks: Mutex::new(Vec::new()),
            local: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            rejected_candidates: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });
        sessions.push(media.clone());
        Ok((Box::new(FakeSession(media)), rx))
    }
}

#[async_trait]
impl MediaSession for FakeSession {
    async fn create_local_audio_track(&self, track_id: &str) -> Result<LocalTrack, MediaError> {
        Ok(LocalTrack {
            id: track_id.to_string(),
            kind: TrackKind::Audio,
        })
    }

    async fn add_track(
        &self,
        track: &LocalTrack,
        stream_labels: &[String],
    ) -> Result<(), MediaError> {
        self.0
            .tracks
            .lock()
            .unwrap()
            .push((track.clone(), stream_labels.to_vec()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        if self.0.engine.fail_offer.load(Ordering::SeqCst) {
            return Err(MediaError::OfferCreationFailed("scripted".into()));
        }
        Ok(SessionDescription::offer(self.0.offer_sdp()))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.0.local.lock().unwrap().push(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let rejects = &self.0.engine.reject_answers;
        if rejects.load(Ordering::SeqCst) > 0 {
            rejects.fetch_sub(1, Ordering::SeqCst);
            return Err(MediaError::DescriptionRejected("scripted".into()));
        }
        self.0.remote.lock().unwrap().push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        // Real engines refuse candidates before the remote description.
        if self.0.remote.lock().unwrap().is_empty() {
            self.0.rejected_candidates.fetch_add(1, Ordering::SeqCst);
            return Err(MediaError::CandidateRejected("no remote description".into()));
        }
        self.0.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

pub fn setup() -> (MemoryStore, FakeEngine, SessionManager) {
    setup_with(Config::default())
}

pub fn setup_with(config: Config) -> (MemoryStore, FakeEngine, SessionManager) {
    let store = MemoryStore::new();
    let engine = FakeEngine::default();
    let manager = SessionManager::new(
        Arc::new(config),
        Arc::new(store.clone()),
        Arc::new(engine.clone()),
    );
    (store, engine, manager)
}

pub fn candidate(line: &str) -> IceCandidate {
    IceCandidate {
        candidate: line.to_string(),
        sdp_mid: "0".into(),
        sdp_mline_index: 0,
    }
}

pub fn candidate_entry(line: &str) -> Fields {
    fields(json!({"candidate": line, "sdpMid": "0", "sdpMLineIndex": 0}))
}

pub fn answer(sdp: &str) -> Value {
    json!({"type": "answer", "sdp": sdp})
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

pub fn field(store: &MemoryStore, name: &str) -> Option<Value> {
    store.document(DOC).and_then(|doc| doc.get(name).cloned())
}

pub fn offer_sdp(store: &MemoryStore) -> Option<String> {
    field(store, "offer")
        .and_then(|offer| offer.get("sdp").cloned())
        .and_then(|sdp| sdp.as_str().map(str::to_string))
}

/// Polls `check` until it holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached in time");
}

/// Lets queued events drain before asserting that nothing happened.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn connect(store: &MemoryStore) {
    use micstream_lib::SignalingChannel;
    store.update(DOC, "answer", answer("fake-answer")).await.unwrap();
    wait_until(|| field(store, "status") == Some(json!("connected"))).await;
}

pub async fn disconnect_and_wait_for_offer(store: &MemoryStore, expected_sdp: &str) {
    use micstream_lib::SignalingChannel;
    store
        .update(DOC, "status", json!("disconnected"))
        .await
        .unwrap();
    wait_until(|| {
        offer_sdp(store).as_deref() == Some(expected_sdp)
            && field(store, "status") == Some(json!("waiting"))
    })
    .await;
}

