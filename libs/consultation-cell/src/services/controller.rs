// libs/consultation-cell/src/services/controller.rs
use serde_json::Value;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use shared_config::ConsultationConfig;

use crate::models::{
    ConnectionState, ConsultationError, MediaKind, NetworkQualitySample, NewPrescription,
    NewSessionNote, Notification, RemoteView, SessionLifecycle, SessionParams, SessionSnapshot,
    TeardownFailure, TeardownReport, TeardownStep,
};
use crate::services::annotations::AnnotationStore;
use crate::services::liveness::Liveness;
use crate::services::media_tracks::MediaTrackManager;
use crate::services::network_quality::NetworkQualityMonitor;
use crate::services::notifications::Notifier;
use crate::services::publish_gate::{GateInputs, GateOutcome, PublishGate};
use crate::services::session_timer::SessionTimer;
use crate::services::transport::RealtimeTransport;

struct SessionState {
    lifecycle: SessionLifecycle,
    connection_state: ConnectionState,
    timer: SessionTimer,
    join_error: Option<String>,
}

/// Runs one live consultation: join, local media, publish, countdown,
/// network monitoring and teardown.
///
/// Every state write goes through the controller. Background work checks
/// [`Liveness`] before writing, so nothing lands on a torn-down session.
pub struct SessionController {
    params: SessionParams,
    config: ConsultationConfig,
    transport: Arc<dyn RealtimeTransport>,
    annotations: Arc<dyn AnnotationStore>,
    notifier: Arc<dyn Notifier>,
    tracks: MediaTrackManager,
    gate: PublishGate,
    quality: NetworkQualityMonitor,
    state: Mutex<SessionState>,
    liveness: Liveness,
    started: AtomicBool,
    teardown_started: AtomicBool,
    background: StdMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController").finish_non_exhaustive()
    }
}

impl SessionController {
    /// Fails with `ValidationError` when the timing configuration is unusable.
    pub fn new(
        params: SessionParams,
        config: ConsultationConfig,
        transport: Arc<dyn RealtimeTransport>,
        annotations: Arc<dyn AnnotationStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, ConsultationError> {
        config
            .validate()
            .map_err(|message| ConsultationError::ValidationError { message })?;

        let tracks = MediaTrackManager::new(
            transport.clone(),
            config.start_with_audio,
            config.start_with_video,
        );
        let quality = NetworkQualityMonitor::new(
            config.network_delay_threshold_ms,
            config.network_warning_cooldown(),
        );
        let state = SessionState {
            lifecycle: SessionLifecycle::Joining,
            connection_state: ConnectionState::Disconnected,
            timer: SessionTimer::from_config(&config),
            join_error: None,
        };

        Ok(Arc::new(Self {
            params,
            config,
            transport,
            annotations,
            notifier,
            tracks,
            gate: PublishGate::new(),
            quality,
            state: Mutex::new(state),
            liveness: Liveness::new(),
            started: AtomicBool::new(false),
            teardown_started: AtomicBool::new(false),
            background: StdMutex::new(Vec::new()),
        }))
    }

    /// Starts the join and both track acquisitions concurrently, along with
    /// the connection watcher, network monitor and countdown.
    pub fn start(self: &Arc<Self>) -> Result<(), ConsultationError> {
        if self.teardown_started.load(Ordering::SeqCst) {
            return Err(ConsultationError::SessionEnded);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Consultation {} already started", self.params.appointment_id);
            return Ok(());
        }

        info!(
            "Starting consultation {} on channel {}",
            self.params.appointment_id, self.params.channel_id
        );

        // subscribe before joining so no state change or sample is missed
        let connection_states = self.transport.connection_states();
        let quality_samples = self.transport.network_quality();

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_join().await });

        for kind in [MediaKind::Audio, MediaKind::Video] {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_acquisition(kind).await });
        }

        let handles = vec![
            tokio::spawn(Arc::clone(self).watch_connection(connection_states)),
            tokio::spawn(Arc::clone(self).monitor_network(quality_samples)),
            tokio::spawn(Arc::clone(self).run_countdown()),
        ];
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        Ok(())
    }

    // ==========================================================================
    // BACKGROUND WORK
    // ==========================================================================

    async fn run_join(&self) {
        let result = self.transport.join(self.params.join_config()).await;

        if !self.liveness.is_alive() {
            if result.is_ok() {
                info!("Join completed after teardown, leaving channel {}", self.params.channel_id);
                if let Err(e) = self.transport.leave().await {
                    error!("Failed to leave channel {} after late join: {}", self.params.channel_id, e);
                }
            }
            return;
        }

        match result {
            Ok(()) => {
                let state = self.state.lock().await;
                if state.connection_state == ConnectionState::Failed
                    && state.lifecycle == SessionLifecycle::Joining
                {
                    self.notifier.notify(
                        Notification::error("Connection to the consultation was lost")
                            .with_key("connection-failed"),
                    );
                }
            }
            Err(e) => {
                error!("Failed to join channel {}: {}", self.params.channel_id, e);
                self.state.lock().await.join_error = Some(e.to_string());
                self.notifier.notify(
                    Notification::error(format!("Could not connect to the consultation: {}", e))
                        .with_key("join-failed"),
                );
            }
        }
    }

    async fn run_acquisition(&self, kind: MediaKind) {
        match self.tracks.acquire(kind).await {
            Ok(_) => {
                if self.liveness.is_alive() {
                    self.evaluate_gate().await;
                }
            }
            Err(ConsultationError::SessionEnded) => {}
            Err(e) => {
                if !self.liveness.is_alive() {
                    return;
                }
                let device = match kind {
                    MediaKind::Audio => "Microphone",
                    MediaKind::Video => "Camera",
                };
                self.notifier.notify(
                    Notification::error(format!("{} unavailable: {}", device, e))
                        .with_key(format!("track-{}", kind)),
                );
            }
        }
    }

    async fn watch_connection(self: Arc<Self>, mut states: watch::Receiver<ConnectionState>) {
        loop {
            let next = *states.borrow_and_update();
            if !self.liveness.is_alive() {
                break;
            }
            if self.apply_connection_state(next).await {
                self.evaluate_gate().await;
            }
            if states.changed().await.is_err() {
                debug!("Connection state stream closed");
                break;
            }
        }
    }

    /// Returns whether the observed state was accepted as a change.
    async fn apply_connection_state(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock().await;
        if !self.liveness.is_alive() {
            return false;
        }

        let current = state.connection_state;
        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            warn!(
                "{}",
                ConsultationError::InvalidTransition {
                    from: current,
                    to: next
                }
            );
            return false;
        }

        state.connection_state = next;
        info!("Connection state {} -> {}", current, next);

        if next == ConnectionState::Connected && state.lifecycle == SessionLifecycle::Joining {
            state.lifecycle = SessionLifecycle::Active;
            info!("Consultation {} is active", self.params.appointment_id);
        }
        // a failure while joining is reported by the join itself
        if next == ConnectionState::Failed && state.lifecycle != SessionLifecycle::Joining {
            self.notifier.notify(
                Notification::error("Connection to the consultation was lost")
                    .with_key("connection-failed"),
            );
        }
        true
    }

    async fn monitor_network(self: Arc<Self>, mut samples: broadcast::Receiver<NetworkQualitySample>) {
        loop {
            match samples.recv().await {
                Ok(sample) => {
                    if !self.liveness.is_alive() {
                        break;
                    }
                    if let Some(warning) = self.quality.observe(sample).await {
                        if self.liveness.is_alive() {
                            self.notifier.notify(warning.notification());
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Network monitor skipped {} samples", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn run_countdown(self: Arc<Self>) {
        let period = self.config.tick_interval();
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            ticker.tick().await;

            let (warning, expired) = {
                let mut state = self.state.lock().await;
                if !self.liveness.is_alive() {
                    break;
                }
                let warning = state.timer.tick();
                (warning, state.timer.is_expired())
            };

            if let Some(warning) = warning {
                info!("Countdown warning: {:?}", warning);
                self.notifier
                    .notify(Notification::warning(warning.message()).with_key(warning.dedup_key()));
            }
            if expired {
                debug!("Countdown reached zero");
                break;
            }
        }
    }

    /// Re-evaluates the publish gate against the current inputs.
    async fn evaluate_gate(&self) -> GateOutcome {
        let evaluation = self.gate.begin().await;

        let connection_state = self.state.lock().await.connection_state;
        let (audio, video) = self.tracks.handles().await;
        let inputs = GateInputs {
            connection_state,
            audio,
            video,
        };

        let outcome = evaluation
            .evaluate(self.transport.as_ref(), inputs, &self.liveness)
            .await;

        if let GateOutcome::Failed(e) = &outcome {
            self.notifier.notify(
                Notification::error(format!("Failed to share your audio and video: {}", e))
                    .with_key("publish-failed"),
            );
        }
        outcome
    }

    fn abort_background(&self) {
        let handles = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            handle.abort();
        }
    }

    /// Stops all background work without releasing anything.
    pub fn cancel(&self) {
        if self.liveness.revoke() {
            debug!("Consultation {} cancelled", self.params.appointment_id);
        }
        self.abort_background();
    }

    // ==========================================================================
    // USER ACTIONS
    // ==========================================================================

    fn ensure_not_ended(&self) -> Result<(), ConsultationError> {
        if self.teardown_started.load(Ordering::SeqCst) {
            return Err(ConsultationError::SessionEnded);
        }
        Ok(())
    }

    pub async fn toggle_mic(&self) -> Result<Option<bool>, ConsultationError> {
        self.toggle(MediaKind::Audio).await
    }

    pub async fn toggle_camera(&self) -> Result<Option<bool>, ConsultationError> {
        self.toggle(MediaKind::Video).await
    }

    async fn toggle(&self, kind: MediaKind) -> Result<Option<bool>, ConsultationError> {
        self.ensure_not_ended()?;

        let result = self.tracks.toggle(kind).await;
        match &result {
            Ok(Some(enabled)) => debug!("Local {} enabled: {}", kind, enabled),
            Ok(None) => {}
            Err(e) => {
                self.notifier
                    .notify(Notification::error(format!("Could not toggle {}: {}", kind, e)));
            }
        }
        result
    }

    pub async fn set_mic_enabled(&self, enabled: bool) -> Result<bool, ConsultationError> {
        self.ensure_not_ended()?;
        self.tracks.set_enabled(MediaKind::Audio, enabled).await
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<bool, ConsultationError> {
        self.ensure_not_ended()?;
        self.tracks.set_enabled(MediaKind::Video, enabled).await
    }

    /// Releases audio, releases video, leaves the transport and marks the
    /// session ended. Every step runs regardless of earlier failures. Calls
    /// after the first return immediately with `performed == false`.
    #[instrument(skip(self), fields(appointment_id = %self.params.appointment_id))]
    pub async fn end_call(&self) -> TeardownReport {
        if self.teardown_started.swap(true, Ordering::SeqCst) {
            debug!("Teardown already performed");
            return TeardownReport::default();
        }

        info!("Ending consultation");
        self.cancel();

        let mut failures = Vec::new();
        for (kind, e) in self.tracks.release_all().await {
            let step = match kind {
                MediaKind::Audio => TeardownStep::ReleaseAudio,
                MediaKind::Video => TeardownStep::ReleaseVideo,
            };
            failures.push(TeardownFailure {
                step,
                message: e.to_string(),
            });
        }

        if let Err(e) = self.transport.leave().await {
            error!("Failed to leave channel {}: {}", self.params.channel_id, e);
            failures.push(TeardownFailure {
                step: TeardownStep::Leave,
                message: e.to_string(),
            });
        }

        {
            let mut state = self.state.lock().await;
            state.connection_state = ConnectionState::Disconnected;
            state.lifecycle = SessionLifecycle::Ended;
        }
        self.gate.reset();

        if failures.is_empty() {
            info!("Consultation ended cleanly");
        } else {
            self.notifier.notify(
                Notification::warning("Call ended, but some resources did not close cleanly")
                    .with_key("teardown"),
            );
        }

        TeardownReport {
            performed: true,
            failures,
        }
    }

    #[instrument(skip(self, prescription), fields(patient_id = %prescription.patient_id))]
    pub async fn add_prescription(
        &self,
        prescription: NewPrescription,
    ) -> Result<Value, ConsultationError> {
        let result = match prescription.validate() {
            Ok(()) => {
                self.annotations
                    .add_prescription(&prescription, &self.params.auth_token)
                    .await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => self
                .notifier
                .notify(Notification::success("Prescription added successfully")),
            Err(e) => {
                warn!("Failed to add prescription: {}", e);
                self.notifier
                    .notify(Notification::error(format!("Failed to add prescription: {}", e)));
            }
        }
        result
    }

    #[instrument(skip(self, note), fields(appointment_id = %note.appointment_id))]
    pub async fn add_session_note(&self, note: NewSessionNote) -> Result<Value, ConsultationError> {
        let result = match note.validate() {
            Ok(()) => {
                self.annotations
                    .add_session_note(&note, &self.params.auth_token)
                    .await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => self
                .notifier
                .notify(Notification::success("Session note saved")),
            Err(e) => {
                warn!("Failed to save session note: {}", e);
                self.notifier
                    .notify(Notification::error(format!("Failed to save session note: {}", e)));
            }
        }
        result
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn lifecycle(&self) -> SessionLifecycle {
        self.state.lock().await.lifecycle
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection_state
    }

    pub async fn remaining_seconds(&self) -> u32 {
        self.state.lock().await.timer.remaining_seconds()
    }

    pub fn is_published(&self) -> bool {
        self.gate.is_published()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let (lifecycle, connection_state, remaining_seconds, warnings, join_error) = {
            let state = self.state.lock().await;
            (
                state.lifecycle,
                state.connection_state,
                state.timer.remaining_seconds(),
                state.timer.flags(),
                state.join_error.clone(),
            )
        };

        SessionSnapshot {
            appointment_id: self.params.appointment_id,
            channel_id: self.params.channel_id.clone(),
            local_identity: self.params.local_identity,
            lifecycle,
            connection_state,
            remaining_seconds,
            warnings,
            audio: self.tracks.snapshot(MediaKind::Audio).await,
            video: self.tracks.snapshot(MediaKind::Video).await,
            published: self.gate.is_published(),
            join_error,
            latest_network_sample: self.quality.latest_sample().await,
        }
    }

    /// The remote participant and their audio. Only the first remote
    /// participant is considered.
    pub fn remote_view(&self) -> RemoteView {
        let participants = self.transport.remote_participants();
        if participants.len() > 1 {
            warn!(
                "{} remote participants present, showing the first",
                participants.len()
            );
        }

        let remote: Vec<_> = participants.into_iter().take(1).collect();
        RemoteView {
            audio_tracks: self.transport.remote_audio_tracks(&remote),
            participant: remote.into_iter().next(),
        }
    }
}

/// Owns a running consultation on behalf of a view. Dropping the guard
/// cancels background work immediately and ends the call in the background.
pub struct SessionGuard {
    controller: Arc<SessionController>,
}

impl SessionGuard {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }
}

impl Deref for SessionGuard {
    type Target = SessionController;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.controller.teardown_started.load(Ordering::SeqCst) {
            return;
        }

        self.controller.cancel();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let controller = Arc::clone(&self.controller);
                runtime.spawn(async move {
                    controller.end_call().await;
                });
            }
            Err(_) => warn!("No async runtime available, skipping end_call on drop"),
        }
    }
}
