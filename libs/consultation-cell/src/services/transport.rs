// libs/consultation-cell/src/services/transport.rs
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::models::{
    ConnectionState, ConsultationError, JoinConfig, MediaKind, NetworkQualitySample,
    RemoteAudioTrack, RemoteParticipant,
};

/// A local capture track created by the transport.
///
/// Disabling mutes the capture without releasing the device. Closing
/// releases the device; the handle is unusable afterwards.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool) -> Result<(), ConsultationError>;
    fn close(&self) -> Result<(), ConsultationError>;
}

impl std::fmt::Debug for dyn LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

pub type LocalTrackHandle = Arc<dyn LocalTrack>;

/// The realtime media transport a consultation runs on.
///
/// Only the session controller calls `join`, `publish` and `leave`.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn join(&self, config: JoinConfig) -> Result<(), ConsultationError>;

    /// Connection state changes; the receiver starts at the current state
    fn connection_states(&self) -> watch::Receiver<ConnectionState>;

    async fn create_local_audio_track(
        &self,
        enabled: bool,
    ) -> Result<LocalTrackHandle, ConsultationError>;

    async fn create_local_video_track(
        &self,
        enabled: bool,
    ) -> Result<LocalTrackHandle, ConsultationError>;

    async fn publish(&self, tracks: Vec<LocalTrackHandle>) -> Result<(), ConsultationError>;

    /// Ids of local tracks the transport currently publishes
    fn currently_published_tracks(&self) -> Vec<String>;

    async fn leave(&self) -> Result<(), ConsultationError>;

    fn remote_participants(&self) -> Vec<RemoteParticipant>;

    fn remote_audio_tracks(&self, participants: &[RemoteParticipant]) -> Vec<RemoteAudioTrack>;

    /// Push stream of network quality readings
    fn network_quality(&self) -> broadcast::Receiver<NetworkQualitySample>;
}

/// Creates a local track of the given kind through the transport.
pub async fn create_local_track(
    transport: &dyn RealtimeTransport,
    kind: MediaKind,
    enabled: bool,
) -> Result<LocalTrackHandle, ConsultationError> {
    match kind {
        MediaKind::Audio => transport.create_local_audio_track(enabled).await,
        MediaKind::Video => transport.create_local_video_track(enabled).await,
    }
}
