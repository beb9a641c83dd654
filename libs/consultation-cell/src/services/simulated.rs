// libs/consultation-cell/src/services/simulated.rs
//! In-process transport used by the demo binary and the test suites.
//!
//! Connection, acquisition and publish behaviour is driven by
//! [`SimulatedTransportSettings`]; tests push connection changes and
//! quality samples through the driver methods.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::models::{
    ConnectionState, ConsultationError, JoinConfig, MediaKind, NetworkQualitySample,
    RemoteAudioTrack, RemoteParticipant,
};
use crate::services::transport::{LocalTrack, LocalTrackHandle, RealtimeTransport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct SimulatedTransportSettings {
    pub connect_delay: Duration,
    pub audio_delay: Duration,
    pub video_delay: Duration,
    pub publish_delay: Duration,
    /// Move to `Connected` once the connect delay elapses
    pub auto_connect: bool,
    pub join_failure: Option<String>,
    pub audio_failure: Option<ConsultationError>,
    pub video_failure: Option<ConsultationError>,
    pub fail_audio_close: bool,
    pub fail_video_close: bool,
    pub fail_leave: bool,
}

impl Default for SimulatedTransportSettings {
    fn default() -> Self {
        Self {
            connect_delay: Duration::ZERO,
            audio_delay: Duration::ZERO,
            video_delay: Duration::ZERO,
            publish_delay: Duration::ZERO,
            auto_connect: true,
            join_failure: None,
            audio_failure: None,
            video_failure: None,
            fail_audio_close: false,
            fail_video_close: false,
            fail_leave: false,
        }
    }
}

pub struct SimulatedTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_close: bool,
}

impl SimulatedTrack {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl LocalTrack for SimulatedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ConsultationError> {
        if self.is_closed() {
            return Err(ConsultationError::TransportError {
                message: format!("track {} is closed", self.id),
            });
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), ConsultationError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(ConsultationError::DeviceUnavailable {
                kind: self.kind,
                message: format!("device for track {} refused to stop", self.id),
            });
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PublishCall {
    pub at: Instant,
    pub track_ids: Vec<String>,
    pub succeeded: bool,
}

pub struct SimulatedTransport {
    settings: SimulatedTransportSettings,
    state_tx: watch::Sender<ConnectionState>,
    quality_tx: broadcast::Sender<NetworkQualitySample>,
    tracks: Mutex<Vec<Arc<SimulatedTrack>>>,
    published: Mutex<Vec<String>>,
    publish_calls: Mutex<Vec<PublishCall>>,
    remote: Mutex<Vec<RemoteParticipant>>,
    pending_publish_failures: AtomicUsize,
    join_calls: AtomicUsize,
    leave_calls: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new(settings: SimulatedTransportSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (quality_tx, _) = broadcast::channel(64);

        Self {
            settings,
            state_tx,
            quality_tx,
            tracks: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            publish_calls: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
            pending_publish_failures: AtomicUsize::new(0),
            join_calls: AtomicUsize::new(0),
            leave_calls: AtomicUsize::new(0),
        }
    }

    // ==========================================================================
    // DRIVER METHODS
    // ==========================================================================

    pub fn set_connection_state(&self, state: ConnectionState) {
        debug!("Simulated transport state -> {}", state);
        self.state_tx.send_replace(state);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns the number of subscribers that received the sample.
    pub fn push_quality_sample(&self, sample: NetworkQualitySample) -> usize {
        self.quality_tx.send(sample).unwrap_or(0)
    }

    pub fn add_remote_participant(&self, participant: RemoteParticipant) {
        lock(&self.remote).push(participant);
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.pending_publish_failures.store(count, Ordering::SeqCst);
    }

    pub fn created_tracks(&self, kind: MediaKind) -> Vec<Arc<SimulatedTrack>> {
        lock(&self.tracks)
            .iter()
            .filter(|track| track.kind == kind)
            .cloned()
            .collect()
    }

    pub fn publish_calls(&self) -> Vec<PublishCall> {
        lock(&self.publish_calls).clone()
    }

    pub fn join_count(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    pub fn leave_count(&self) -> usize {
        self.leave_calls.load(Ordering::SeqCst)
    }

    async fn create_track(
        &self,
        kind: MediaKind,
        enabled: bool,
        delay: Duration,
        failure: &Option<ConsultationError>,
        fail_close: bool,
    ) -> Result<LocalTrackHandle, ConsultationError> {
        sleep(delay).await;

        if let Some(error) = failure {
            return Err(error.clone());
        }

        let mut tracks = lock(&self.tracks);
        let track = Arc::new(SimulatedTrack {
            id: format!("local-{}-{}", kind, tracks.len() + 1),
            kind,
            enabled: AtomicBool::new(enabled),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_close,
        });
        tracks.push(track.clone());

        Ok(track)
    }
}

#[async_trait]
impl RealtimeTransport for SimulatedTransport {
    async fn join(&self, config: JoinConfig) -> Result<(), ConsultationError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        info!(
            "Simulated join to channel {} as {}",
            config.channel_id, config.identity
        );

        self.set_connection_state(ConnectionState::Connecting);
        sleep(self.settings.connect_delay).await;

        if let Some(message) = &self.settings.join_failure {
            self.set_connection_state(ConnectionState::Failed);
            return Err(ConsultationError::JoinFailed {
                message: message.clone(),
            });
        }

        if self.settings.auto_connect {
            self.set_connection_state(ConnectionState::Connected);
        }
        Ok(())
    }

    fn connection_states(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn create_local_audio_track(
        &self,
        enabled: bool,
    ) -> Result<LocalTrackHandle, ConsultationError> {
        self.create_track(
            MediaKind::Audio,
            enabled,
            self.settings.audio_delay,
            &self.settings.audio_failure,
            self.settings.fail_audio_close,
        )
        .await
    }

    async fn create_local_video_track(
        &self,
        enabled: bool,
    ) -> Result<LocalTrackHandle, ConsultationError> {
        self.create_track(
            MediaKind::Video,
            enabled,
            self.settings.video_delay,
            &self.settings.video_failure,
            self.settings.fail_video_close,
        )
        .await
    }

    async fn publish(&self, tracks: Vec<LocalTrackHandle>) -> Result<(), ConsultationError> {
        let track_ids: Vec<String> = tracks.iter().map(|track| track.id().to_string()).collect();
        sleep(self.settings.publish_delay).await;

        let should_fail = self
            .pending_publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        lock(&self.publish_calls).push(PublishCall {
            at: Instant::now(),
            track_ids: track_ids.clone(),
            succeeded: !should_fail,
        });

        if should_fail {
            return Err(ConsultationError::PublishFailed {
                message: "simulated publish rejection".to_string(),
            });
        }

        let mut published = lock(&self.published);
        for id in track_ids {
            if !published.contains(&id) {
                published.push(id);
            }
        }
        Ok(())
    }

    fn currently_published_tracks(&self) -> Vec<String> {
        lock(&self.published).clone()
    }

    async fn leave(&self) -> Result<(), ConsultationError> {
        self.leave_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.published).clear();
        self.set_connection_state(ConnectionState::Disconnected);

        if self.settings.fail_leave {
            return Err(ConsultationError::TransportError {
                message: "simulated leave failure".to_string(),
            });
        }
        Ok(())
    }

    fn remote_participants(&self) -> Vec<RemoteParticipant> {
        lock(&self.remote).clone()
    }

    fn remote_audio_tracks(&self, participants: &[RemoteParticipant]) -> Vec<RemoteAudioTrack> {
        participants
            .iter()
            .filter(|participant| participant.has_audio)
            .map(|participant| RemoteAudioTrack {
                participant_identity: participant.identity,
                track_id: format!("remote-audio-{}", participant.identity),
            })
            .collect()
    }

    fn network_quality(&self) -> broadcast::Receiver<NetworkQualitySample> {
        self.quality_tx.subscribe()
    }
}
