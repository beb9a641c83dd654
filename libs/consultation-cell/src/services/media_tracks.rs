// libs/consultation-cell/src/services/media_tracks.rs
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::models::{ConsultationError, MediaKind, MediaTrackSnapshot};
use crate::services::transport::{create_local_track, LocalTrackHandle, RealtimeTransport};

#[derive(Default)]
struct TrackSlot {
    enabled: bool,
    handle: Option<LocalTrackHandle>,
    attempted: bool,
    acquisition_failed: bool,
}

struct TrackSlots {
    audio: TrackSlot,
    video: TrackSlot,
    released: bool,
}

impl TrackSlots {
    fn slot_mut(&mut self, kind: MediaKind) -> &mut TrackSlot {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    fn slot(&self, kind: MediaKind) -> &TrackSlot {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

/// Sole owner of the local audio and video capture handles.
pub struct MediaTrackManager {
    transport: Arc<dyn RealtimeTransport>,
    slots: Mutex<TrackSlots>,
}

impl MediaTrackManager {
    pub fn new(transport: Arc<dyn RealtimeTransport>, audio_enabled: bool, video_enabled: bool) -> Self {
        Self {
            transport,
            slots: Mutex::new(TrackSlots {
                audio: TrackSlot {
                    enabled: audio_enabled,
                    ..TrackSlot::default()
                },
                video: TrackSlot {
                    enabled: video_enabled,
                    ..TrackSlot::default()
                },
                released: false,
            }),
        }
    }

    /// Creates the capture track for `kind` using the current enabled intent.
    ///
    /// Only one attempt is made per kind. A track that arrives after
    /// `release_all` is closed straight away and never installed.
    pub async fn acquire(&self, kind: MediaKind) -> Result<LocalTrackHandle, ConsultationError> {
        let enabled = {
            let mut slots = self.slots.lock().await;
            if slots.released {
                return Err(ConsultationError::SessionEnded);
            }
            let slot = slots.slot_mut(kind);
            if slot.attempted {
                return Err(ConsultationError::AlreadyAcquired { kind });
            }
            slot.attempted = true;
            slot.enabled
        };

        debug!("Acquiring local {} track (enabled: {})", kind, enabled);
        let result = create_local_track(self.transport.as_ref(), kind, enabled).await;

        let mut slots = self.slots.lock().await;
        match result {
            Ok(handle) => {
                if slots.released {
                    warn!("Local {} track arrived after release, closing it", kind);
                    if let Err(e) = handle.close() {
                        error!("Failed to close late {} track: {}", kind, e);
                    }
                    return Err(ConsultationError::SessionEnded);
                }

                let slot = slots.slot_mut(kind);
                if slot.enabled != enabled {
                    // intent changed while the device was opening
                    if let Err(e) = handle.set_enabled(slot.enabled) {
                        warn!("Failed to apply {} intent to new track: {}", kind, e);
                        slot.enabled = enabled;
                    }
                }
                slot.handle = Some(handle.clone());

                info!("Local {} track {} acquired", kind, handle.id());
                Ok(handle)
            }
            Err(e) => {
                slots.slot_mut(kind).acquisition_failed = true;
                warn!("Local {} track unavailable: {}", kind, e);
                Err(e)
            }
        }
    }

    /// Records the enabled intent for `kind` and applies it to the capture
    /// if present. Returns whether a handle was updated.
    pub async fn set_enabled(&self, kind: MediaKind, enabled: bool) -> Result<bool, ConsultationError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.slot_mut(kind);

        match &slot.handle {
            Some(handle) => {
                handle.set_enabled(enabled)?;
                slot.enabled = enabled;
                Ok(true)
            }
            None => {
                slot.enabled = enabled;
                Ok(false)
            }
        }
    }

    /// Flips the enabled state of an acquired track. Returns the new state,
    /// or `None` without touching the intent when no handle is present.
    pub async fn toggle(&self, kind: MediaKind) -> Result<Option<bool>, ConsultationError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.slot_mut(kind);

        let Some(handle) = &slot.handle else {
            debug!("Ignoring {} toggle, no track present", kind);
            return Ok(None);
        };

        let next = !slot.enabled;
        handle.set_enabled(next)?;
        slot.enabled = next;
        Ok(Some(next))
    }

    /// Closes the track for `kind`. Absent or already-released handles are a no-op.
    pub async fn release(&self, kind: MediaKind) -> Result<(), ConsultationError> {
        let handle = {
            let mut slots = self.slots.lock().await;
            slots.slot_mut(kind).handle.take()
        };

        match handle {
            Some(handle) => {
                debug!("Releasing local {} track {}", kind, handle.id());
                handle.close()
            }
            None => Ok(()),
        }
    }

    /// Stops accepting new tracks, then releases audio and video
    /// independently. A failure on one does not skip the other.
    pub async fn release_all(&self) -> Vec<(MediaKind, ConsultationError)> {
        self.slots.lock().await.released = true;

        let mut failures = Vec::new();
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if let Err(e) = self.release(kind).await {
                error!("Failed to release local {} track: {}", kind, e);
                failures.push((kind, e));
            }
        }
        failures
    }

    pub async fn handle(&self, kind: MediaKind) -> Option<LocalTrackHandle> {
        self.slots.lock().await.slot(kind).handle.clone()
    }

    /// Both handles, read under a single lock.
    pub async fn handles(&self) -> (Option<LocalTrackHandle>, Option<LocalTrackHandle>) {
        let slots = self.slots.lock().await;
        (slots.audio.handle.clone(), slots.video.handle.clone())
    }

    pub async fn snapshot(&self, kind: MediaKind) -> MediaTrackSnapshot {
        let slots = self.slots.lock().await;
        let slot = slots.slot(kind);
        MediaTrackSnapshot {
            kind,
            enabled: slot.enabled,
            present: slot.handle.is_some(),
            acquisition_failed: slot.acquisition_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::simulated::{SimulatedTransport, SimulatedTransportSettings};
    use assert_matches::assert_matches;

    fn manager_with(settings: SimulatedTransportSettings) -> (Arc<SimulatedTransport>, MediaTrackManager) {
        let transport = Arc::new(SimulatedTransport::new(settings));
        let manager = MediaTrackManager::new(transport.clone(), true, true);
        (transport, manager)
    }

    #[tokio::test]
    async fn test_acquire_installs_handle() {
        let (transport, manager) = manager_with(SimulatedTransportSettings::default());

        let handle = manager.acquire(MediaKind::Audio).await.unwrap();
        assert_eq!(handle.kind(), MediaKind::Audio);

        let snapshot = manager.snapshot(MediaKind::Audio).await;
        assert!(snapshot.present);
        assert!(snapshot.enabled);
        assert_eq!(transport.created_tracks(MediaKind::Audio).len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_is_attempted_once_per_kind() {
        let (_transport, manager) = manager_with(SimulatedTransportSettings::default());

        manager.acquire(MediaKind::Video).await.unwrap();
        let second = manager.acquire(MediaKind::Video).await;
        assert_matches!(second, Err(ConsultationError::AlreadyAcquired { kind: MediaKind::Video }));
    }

    #[tokio::test]
    async fn test_failed_acquisition_leaves_kind_absent() {
        let (_transport, manager) = manager_with(SimulatedTransportSettings {
            audio_failure: Some(ConsultationError::PermissionDenied { kind: MediaKind::Audio }),
            ..SimulatedTransportSettings::default()
        });

        let result = manager.acquire(MediaKind::Audio).await;
        assert_matches!(result, Err(ConsultationError::PermissionDenied { .. }));

        let snapshot = manager.snapshot(MediaKind::Audio).await;
        assert!(!snapshot.present);
        assert!(snapshot.acquisition_failed);
    }

    #[tokio::test]
    async fn test_toggle_without_handle_has_no_effect() {
        let (_transport, manager) = manager_with(SimulatedTransportSettings::default());

        assert_eq!(manager.toggle(MediaKind::Audio).await.unwrap(), None);
        assert!(manager.snapshot(MediaKind::Audio).await.enabled);
    }

    #[tokio::test]
    async fn test_toggle_mutes_without_closing() {
        let (transport, manager) = manager_with(SimulatedTransportSettings::default());
        manager.acquire(MediaKind::Audio).await.unwrap();

        assert_eq!(manager.toggle(MediaKind::Audio).await.unwrap(), Some(false));
        let track = transport.created_tracks(MediaKind::Audio).remove(0);
        assert!(!track.is_enabled());
        assert_eq!(track.close_count(), 0);

        assert_eq!(manager.toggle(MediaKind::Audio).await.unwrap(), Some(true));
        assert!(track.is_enabled());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (transport, manager) = manager_with(SimulatedTransportSettings::default());
        manager.acquire(MediaKind::Video).await.unwrap();

        manager.release(MediaKind::Video).await.unwrap();
        manager.release(MediaKind::Video).await.unwrap();
        manager.release(MediaKind::Audio).await.unwrap();

        assert_eq!(transport.created_tracks(MediaKind::Video)[0].close_count(), 1);
        assert!(!manager.snapshot(MediaKind::Video).await.present);
    }

    #[tokio::test]
    async fn test_release_all_continues_after_failure() {
        let (transport, manager) = manager_with(SimulatedTransportSettings {
            fail_audio_close: true,
            ..SimulatedTransportSettings::default()
        });
        manager.acquire(MediaKind::Audio).await.unwrap();
        manager.acquire(MediaKind::Video).await.unwrap();

        let failures = manager.release_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, MediaKind::Audio);
        assert_eq!(transport.created_tracks(MediaKind::Video)[0].close_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_after_release_is_rejected() {
        let (_transport, manager) = manager_with(SimulatedTransportSettings::default());
        manager.release_all().await;

        let result = manager.acquire(MediaKind::Audio).await;
        assert_matches!(result, Err(ConsultationError::SessionEnded));
    }

    #[tokio::test]
    async fn test_intent_recorded_before_acquisition_is_applied() {
        let (transport, manager) = manager_with(SimulatedTransportSettings::default());

        assert!(!manager.set_enabled(MediaKind::Video, false).await.unwrap());
        manager.acquire(MediaKind::Video).await.unwrap();

        assert!(!transport.created_tracks(MediaKind::Video)[0].is_enabled());
    }
}
