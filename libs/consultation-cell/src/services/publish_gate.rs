// libs/consultation-cell/src/services/publish_gate.rs
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::models::{ConnectionState, ConsultationError};
use crate::services::liveness::Liveness;
use crate::services::transport::{LocalTrackHandle, RealtimeTransport};

/// The three inputs the gate is level-triggered on
#[derive(Clone)]
pub struct GateInputs {
    pub connection_state: ConnectionState,
    pub audio: Option<LocalTrackHandle>,
    pub video: Option<LocalTrackHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateBlocker {
    NotConnected(ConnectionState),
    MissingAudio,
    MissingVideo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// This evaluation issued the publish call and it succeeded
    Published,
    /// Nothing sent; the tracks were already published
    AlreadyPublished,
    Waiting(GateBlocker),
    /// Publish was rejected; the gate stays open for the next input change
    Failed(ConsultationError),
    /// The session was torn down before or during evaluation
    Cancelled,
}

/// Publishes local audio and video exactly once per session, as soon as the
/// transport is connected and both tracks exist.
pub struct PublishGate {
    published: AtomicBool,
    serial: Mutex<()>,
}

/// Exclusive right to evaluate the gate. Held across the publish call so
/// that no two publish attempts are ever in flight.
pub struct GateEvaluation<'a> {
    gate: &'a PublishGate,
    _serial: MutexGuard<'a, ()>,
}

impl PublishGate {
    pub fn new() -> Self {
        Self {
            published: AtomicBool::new(false),
            serial: Mutex::new(()),
        }
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::SeqCst)
    }

    /// Waits for any in-flight evaluation to finish. Read the gate inputs
    /// after this returns so they are never stale.
    pub async fn begin(&self) -> GateEvaluation<'_> {
        GateEvaluation {
            gate: self,
            _serial: self.serial.lock().await,
        }
    }

    pub async fn evaluate(
        &self,
        transport: &dyn RealtimeTransport,
        inputs: GateInputs,
        liveness: &Liveness,
    ) -> GateOutcome {
        self.begin().await.evaluate(transport, inputs, liveness).await
    }

    /// Clears the published flag once the session is over.
    pub fn reset(&self) {
        self.published.store(false, Ordering::SeqCst);
    }
}

impl Default for PublishGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GateEvaluation<'_> {
    pub async fn evaluate(
        self,
        transport: &dyn RealtimeTransport,
        inputs: GateInputs,
        liveness: &Liveness,
    ) -> GateOutcome {
        if !liveness.is_alive() {
            return GateOutcome::Cancelled;
        }
        if self.gate.is_published() {
            return GateOutcome::AlreadyPublished;
        }
        if inputs.connection_state != ConnectionState::Connected {
            debug!("Publish gate waiting: transport is {}", inputs.connection_state);
            return GateOutcome::Waiting(GateBlocker::NotConnected(inputs.connection_state));
        }
        let Some(audio) = inputs.audio else {
            debug!("Publish gate waiting: no local audio track");
            return GateOutcome::Waiting(GateBlocker::MissingAudio);
        };
        let Some(video) = inputs.video else {
            debug!("Publish gate waiting: no local video track");
            return GateOutcome::Waiting(GateBlocker::MissingVideo);
        };

        let already_published = transport.currently_published_tracks();
        if already_published.iter().any(|id| id == audio.id())
            && already_published.iter().any(|id| id == video.id())
        {
            debug!("Local tracks already published, skipping publish");
            self.gate.published.store(true, Ordering::SeqCst);
            return GateOutcome::AlreadyPublished;
        }

        info!("Publishing local tracks {} and {}", audio.id(), video.id());
        let result = transport.publish(vec![audio, video]).await;

        if !liveness.is_alive() {
            debug!("Session ended while publishing, discarding publish result");
            return GateOutcome::Cancelled;
        }

        match result {
            Ok(()) => {
                self.gate.published.store(true, Ordering::SeqCst);
                info!("Local media published");
                GateOutcome::Published
            }
            Err(e) => {
                warn!("Publish failed, will retry on next input change: {}", e);
                GateOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;
    use crate::services::simulated::{SimulatedTransport, SimulatedTransportSettings};
    use crate::services::transport::create_local_track;
    use assert_matches::assert_matches;

    async fn ready_inputs(transport: &SimulatedTransport) -> GateInputs {
        GateInputs {
            connection_state: ConnectionState::Connected,
            audio: Some(create_local_track(transport, MediaKind::Audio, true).await.unwrap()),
            video: Some(create_local_track(transport, MediaKind::Video, true).await.unwrap()),
        }
    }

    #[tokio::test]
    async fn test_waits_for_every_precondition() {
        let transport = SimulatedTransport::new(SimulatedTransportSettings::default());
        let gate = PublishGate::new();
        let liveness = Liveness::new();
        let ready = ready_inputs(&transport).await;

        let mut inputs = ready.clone();
        inputs.connection_state = ConnectionState::Connecting;
        assert_eq!(
            gate.evaluate(&transport, inputs, &liveness).await,
            GateOutcome::Waiting(GateBlocker::NotConnected(ConnectionState::Connecting))
        );

        let mut inputs = ready.clone();
        inputs.audio = None;
        assert_eq!(
            gate.evaluate(&transport, inputs, &liveness).await,
            GateOutcome::Waiting(GateBlocker::MissingAudio)
        );

        let mut inputs = ready;
        inputs.video = None;
        assert_eq!(
            gate.evaluate(&transport, inputs, &liveness).await,
            GateOutcome::Waiting(GateBlocker::MissingVideo)
        );

        assert!(transport.publish_calls().is_empty());
        assert!(!gate.is_published());
    }

    #[tokio::test]
    async fn test_publishes_once() {
        let transport = SimulatedTransport::new(SimulatedTransportSettings::default());
        let gate = PublishGate::new();
        let liveness = Liveness::new();
        let inputs = ready_inputs(&transport).await;

        assert_eq!(
            gate.evaluate(&transport, inputs.clone(), &liveness).await,
            GateOutcome::Published
        );
        assert_eq!(
            gate.evaluate(&transport, inputs, &liveness).await,
            GateOutcome::AlreadyPublished
        );

        let calls = transport.publish_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].track_ids.len(), 2);
        assert!(gate.is_published());
    }

    #[tokio::test]
    async fn test_detects_tracks_published_elsewhere() {
        let transport = SimulatedTransport::new(SimulatedTransportSettings::default());
        let inputs = ready_inputs(&transport).await;
        let tracks = vec![inputs.audio.clone().unwrap(), inputs.video.clone().unwrap()];
        transport.publish(tracks).await.unwrap();

        let gate = PublishGate::new();
        let outcome = gate.evaluate(&transport, inputs, &Liveness::new()).await;

        assert_eq!(outcome, GateOutcome::AlreadyPublished);
        assert_eq!(transport.publish_calls().len(), 1);
        assert!(gate.is_published());
    }

    #[tokio::test]
    async fn test_failure_keeps_gate_open_for_retry() {
        let transport = SimulatedTransport::new(SimulatedTransportSettings::default());
        transport.fail_next_publishes(1);
        let gate = PublishGate::new();
        let liveness = Liveness::new();
        let inputs = ready_inputs(&transport).await;

        let first = gate.evaluate(&transport, inputs.clone(), &liveness).await;
        assert_matches!(first, GateOutcome::Failed(ConsultationError::PublishFailed { .. }));
        assert!(!gate.is_published());

        let second = gate.evaluate(&transport, inputs, &liveness).await;
        assert_eq!(second, GateOutcome::Published);
        assert_eq!(transport.publish_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_revoked_liveness_cancels_evaluation() {
        let transport = SimulatedTransport::new(SimulatedTransportSettings::default());
        let gate = PublishGate::new();
        let liveness = Liveness::new();
        liveness.revoke();

        let outcome = gate
            .evaluate(&transport, ready_inputs(&transport).await, &liveness)
            .await;

        assert_eq!(outcome, GateOutcome::Cancelled);
        assert!(transport.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_published_flag() {
        let transport = SimulatedTransport::new(SimulatedTransportSettings::default());
        let gate = PublishGate::new();
        gate.evaluate(&transport, ready_inputs(&transport).await, &Liveness::new())
            .await;
        assert!(gate.is_published());

        gate.reset();
        assert!(!gate.is_published());
    }
}
