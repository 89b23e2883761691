//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use beacon_voice::voice::{LevelSender, level_channel};
use beacon_voice::{
    ConnectionBroker, ConnectionDetails, ConnectionRequest, Credentials, Error, LocalAudioTrack,
    Result, SessionHandle, TrackSource, Transport,
};

/// Transport whose outcomes are scripted by the test
#[derive(Default)]
pub struct MockTransport {
    hold_open: AtomicBool,
    gate: Notify,
    hold_publish: AtomicBool,
    publish_gate: Notify,
    open_error: Mutex<Option<String>>,
    publish_error: Mutex<Option<String>>,
    opens: AtomicUsize,
    opened: Mutex<Vec<SessionHandle>>,
    closed: Mutex<Vec<SessionHandle>>,
    publishes: AtomicUsize,
    unpublishes: AtomicUsize,
    published_devices: Mutex<Vec<Option<String>>>,
    level_senders: Mutex<Vec<LevelSender>>,
    noise_filter: Mutex<Option<bool>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `open_session` wait until [`MockTransport::release_open`]
    pub fn hold_open(&self) {
        self.hold_open.store(true, Ordering::SeqCst);
    }

    /// Let one held `open_session` finish
    pub fn release_open(&self) {
        self.gate.notify_one();
    }

    /// Make `publish_audio_track` wait until [`MockTransport::release_publish`]
    pub fn hold_publish(&self) {
        self.hold_publish.store(true, Ordering::SeqCst);
    }

    /// Stop holding publishes and let the held one finish
    pub fn release_publish(&self) {
        self.hold_publish.store(false, Ordering::SeqCst);
        self.publish_gate.notify_one();
    }

    pub fn fail_open(&self, reason: &str) {
        *self.open_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn allow_open(&self) {
        *self.open_error.lock().unwrap() = None;
    }

    pub fn fail_publish(&self, reason: &str) {
        *self.publish_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn allow_publish(&self) {
        *self.publish_error.lock().unwrap() = None;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closed.lock().unwrap().len()
    }

    /// Sessions that opened successfully, in completion order
    pub fn opened_sessions(&self) -> Vec<SessionHandle> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed_sessions(&self) -> Vec<SessionHandle> {
        self.closed.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn unpublishes(&self) -> usize {
        self.unpublishes.load(Ordering::SeqCst)
    }

    pub fn published_devices(&self) -> Vec<Option<String>> {
        self.published_devices.lock().unwrap().clone()
    }

    pub fn noise_filter(&self) -> Option<bool> {
        *self.noise_filter.lock().unwrap()
    }

    /// Push a level sample into the most recently published track
    pub fn push_level(&self, level: f32) {
        if let Some(sender) = self.level_senders.lock().unwrap().last() {
            sender.push(level);
        }
    }

    /// Wait until `open_session` has been entered `count` times
    pub async fn wait_for_opens(&self, count: usize) {
        for _ in 0..1000 {
            if self.opens() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("open_session was not called {count} times");
    }

    /// Wait until `publish_audio_track` has been entered `count` times
    pub async fn wait_for_publishes(&self, count: usize) {
        for _ in 0..1000 {
            if self.publishes() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("publish_audio_track was not called {count} times");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_session(&self, _credentials: &Credentials) -> Result<SessionHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.hold_open.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }

        if let Some(reason) = self.open_error.lock().unwrap().clone() {
            return Err(Error::Connection(reason));
        }

        let handle = SessionHandle::new();
        self.opened.lock().unwrap().push(handle);
        Ok(handle)
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<()> {
        self.closed.lock().unwrap().push(*session);
        Ok(())
    }

    async fn publish_audio_track(&self, device_id: Option<&str>) -> Result<LocalAudioTrack> {
        let n = self.publishes.fetch_add(1, Ordering::SeqCst) + 1;

        if self.hold_publish.load(Ordering::SeqCst) {
            self.publish_gate.notified().await;
        }

        if let Some(reason) = self.publish_error.lock().unwrap().clone() {
            return Err(Error::device(TrackSource::Microphone, reason));
        }

        self.published_devices
            .lock()
            .unwrap()
            .push(device_id.map(ToString::to_string));

        let (sender, feed) = level_channel();
        self.level_senders.lock().unwrap().push(sender);
        Ok(LocalAudioTrack::new(
            format!("TR_{n}"),
            device_id.map(ToString::to_string),
            feed,
        ))
    }

    async fn unpublish_audio_track(&self, _track: &LocalAudioTrack) -> Result<()> {
        self.unpublishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_noise_filter(&self, enabled: bool) -> Result<()> {
        *self.noise_filter.lock().unwrap() = Some(enabled);
        Ok(())
    }
}

/// Broker returning canned details
pub struct MockBroker {
    response: std::result::Result<(String, String), String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ConnectionRequest>>,
}

impl MockBroker {
    pub fn ok(server_url: &str, token: &str) -> Self {
        Self {
            response: Ok((server_url.to_string(), token.to_string())),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            response: Err(reason.to_string()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<ConnectionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionBroker for MockBroker {
    async fn request_connection(&self, request: &ConnectionRequest) -> Result<ConnectionDetails> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.response {
            Ok((server_url, token)) => Ok(serde_json::from_value(serde_json::json!({
                "serverUrl": server_url,
                "participantToken": token,
                "roomName": "voice_room",
            }))?),
            Err(reason) => Err(Error::Connection(reason.clone())),
        }
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("wss://agent.example.com", "token").unwrap()
}

pub fn request() -> ConnectionRequest {
    ConnectionRequest {
        user_name: "Test User".to_string(),
        agent_id: "agent_1".to_string(),
        user_id: "user_1".to_string(),
    }
}

/// Collect values published to a callback
pub fn recorder<T>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static)
where
    T: Clone + Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
}
