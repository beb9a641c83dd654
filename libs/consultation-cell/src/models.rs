// libs/consultation-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CONSULTATION SESSION DOMAIN MODELS
// ==============================================================================

/// Local media kinds captured for a consultation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaKind {
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "video")]
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Transport connection states as reported by the realtime transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "connecting")]
    Connecting,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "reconnecting")]
    Reconnecting,
    #[serde(rename = "failed")]
    Failed,
}

impl ConnectionState {
    fn rank(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }

    /// Whether the transport may report `next` while in `self`.
    ///
    /// States only move forward through the ordering, except for
    /// `Reconnecting -> Connected` recovery. `Failed` is terminal, and
    /// dropping back to `Disconnected` is reserved for an explicit leave.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        match (self, next) {
            (ConnectionState::Failed, _) => false,
            (_, ConnectionState::Failed) => true,
            (ConnectionState::Reconnecting, ConnectionState::Connected) => true,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionLifecycle {
    #[serde(rename = "joining")]
    Joining,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "ended")]
    Ended,
}

/// Everything the transport needs to join a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    pub channel_id: String,
    pub identity: u32,
    #[serde(skip_serializing)]
    pub credential: String,
}

/// Parameters for one consultation instance
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub channel_id: String,
    pub local_identity: u32,
    pub credential: String,
    /// Bearer token forwarded to the persistence backend
    pub auth_token: String,
}

impl SessionParams {
    pub fn join_config(&self) -> JoinConfig {
        JoinConfig {
            channel_id: self.channel_id.clone(),
            identity: self.local_identity,
            credential: self.credential.clone(),
        }
    }
}

/// One-shot countdown warnings. Each flag moves from unset to set at most once.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WarningFlags {
    ten_minutes: bool,
    five_minutes: bool,
    time_up: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CountdownWarning {
    #[serde(rename = "ten_minutes")]
    TenMinutes,
    #[serde(rename = "five_minutes")]
    FiveMinutes,
    #[serde(rename = "time_up")]
    TimeUp,
}

impl WarningFlags {
    pub fn ten_minutes(&self) -> bool {
        self.ten_minutes
    }

    pub fn five_minutes(&self) -> bool {
        self.five_minutes
    }

    pub fn time_up(&self) -> bool {
        self.time_up
    }

    pub fn is_set(&self, warning: CountdownWarning) -> bool {
        match warning {
            CountdownWarning::TenMinutes => self.ten_minutes,
            CountdownWarning::FiveMinutes => self.five_minutes,
            CountdownWarning::TimeUp => self.time_up,
        }
    }

    /// Sets the flag, returning `true` only the first time.
    pub fn set_once(&mut self, warning: CountdownWarning) -> bool {
        let flag = match warning {
            CountdownWarning::TenMinutes => &mut self.ten_minutes,
            CountdownWarning::FiveMinutes => &mut self.five_minutes,
            CountdownWarning::TimeUp => &mut self.time_up,
        };
        if *flag {
            return false;
        }
        *flag = true;
        true
    }
}

impl CountdownWarning {
    pub fn message(&self) -> &'static str {
        match self {
            CountdownWarning::TenMinutes => "10 minutes remaining in this consultation",
            CountdownWarning::FiveMinutes => "5 minutes remaining in this consultation",
            CountdownWarning::TimeUp => "Consultation time is up. Please wrap up the call",
        }
    }

    pub fn dedup_key(&self) -> &'static str {
        match self {
            CountdownWarning::TenMinutes => "session-ten-minutes",
            CountdownWarning::FiveMinutes => "session-five-minutes",
            CountdownWarning::TimeUp => "session-time-up",
        }
    }
}

/// A single transport quality reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NetworkQualitySample {
    pub delay_ms: u32,
    pub observed_at: DateTime<Utc>,
}

impl NetworkQualitySample {
    pub fn now(delay_ms: u32) -> Self {
        Self {
            delay_ms,
            observed_at: Utc::now(),
        }
    }
}

/// Observable state of one local media kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaTrackSnapshot {
    pub kind: MediaKind,
    pub enabled: bool,
    pub present: bool,
    pub acquisition_failed: bool,
}

/// Point-in-time view of a running consultation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub appointment_id: Uuid,
    pub channel_id: String,
    pub local_identity: u32,
    pub lifecycle: SessionLifecycle,
    pub connection_state: ConnectionState,
    pub remaining_seconds: u32,
    pub warnings: WarningFlags,
    pub audio: MediaTrackSnapshot,
    pub video: MediaTrackSnapshot,
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_network_sample: Option<NetworkQualitySample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub identity: u32,
    pub has_audio: bool,
    pub has_video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteAudioTrack {
    pub participant_identity: u32,
    pub track_id: String,
}

/// The single remote participant and their audio
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteView {
    pub participant: Option<RemoteParticipant>,
    pub audio_tracks: Vec<RemoteAudioTrack>,
}

/// Outcome of `end_call`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TeardownReport {
    /// False when teardown had already run or was running
    pub performed: bool,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TeardownStep {
    #[serde(rename = "release_audio")]
    ReleaseAudio,
    #[serde(rename = "release_video")]
    ReleaseVideo,
    #[serde(rename = "leave")]
    Leave,
}

// ==============================================================================
// ANNOTATION PAYLOADS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPrescription {
    pub patient_id: Uuid,
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewPrescription {
    pub fn validate(&self) -> Result<(), ConsultationError> {
        if self.medication.trim().is_empty() {
            return Err(ConsultationError::ValidationError {
                message: "Medication is required".to_string(),
            });
        }
        if self.dosage.trim().is_empty() {
            return Err(ConsultationError::ValidationError {
                message: "Dosage is required".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSessionNote {
    pub patient_id: Uuid,
    pub note: String,
    pub appointment_id: Uuid,
}

impl NewSessionNote {
    pub fn validate(&self) -> Result<(), ConsultationError> {
        if self.note.trim().is_empty() {
            return Err(ConsultationError::ValidationError {
                message: "Session note cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationLevel {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "error")]
    Error,
}

/// A user-facing message. Notifications sharing a `dedup_key` coalesce in the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
            dedup_key: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
            dedup_key: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
            dedup_key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ConsultationError {
    #[error("{kind} device unavailable: {message}")]
    DeviceUnavailable { kind: MediaKind, message: String },

    #[error("Permission denied for {kind} capture")]
    PermissionDenied { kind: MediaKind },

    #[error("{kind} track already acquired for this session")]
    AlreadyAcquired { kind: MediaKind },

    #[error("Failed to join channel: {message}")]
    JoinFailed { message: String },

    #[error("Failed to publish local media: {message}")]
    PublishFailed { message: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Invalid connection state transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Consultation session has ended")]
    SessionEnded,

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Persistence error: {message}")]
    PersistenceError { message: String },

    #[error("Persistence not configured")]
    NotConfigured,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<anyhow::Error> for ConsultationError {
    fn from(err: anyhow::Error) -> Self {
        ConsultationError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_forward_transitions() {
        assert!(ConnectionState::Disconnected.can_transition_to(ConnectionState::Connecting));
        assert!(ConnectionState::Connecting.can_transition_to(ConnectionState::Connected));
        assert!(ConnectionState::Connected.can_transition_to(ConnectionState::Reconnecting));
        assert!(ConnectionState::Reconnecting.can_transition_to(ConnectionState::Connected));
        assert!(ConnectionState::Disconnected.can_transition_to(ConnectionState::Connected));
    }

    #[test]
    fn test_connection_state_rejects_backward_and_terminal() {
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Disconnected));
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Failed.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Failed.can_transition_to(ConnectionState::Failed));
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Connected));
    }

    #[test]
    fn test_any_live_state_can_fail() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
        ] {
            assert!(state.can_transition_to(ConnectionState::Failed));
        }
    }

    #[test]
    fn test_warning_flags_set_once() {
        let mut flags = WarningFlags::default();
        assert!(flags.set_once(CountdownWarning::FiveMinutes));
        assert!(!flags.set_once(CountdownWarning::FiveMinutes));
        assert!(flags.five_minutes());
        assert!(!flags.ten_minutes());
        assert!(!flags.time_up());
    }

    #[test]
    fn test_prescription_requires_medication_and_dosage() {
        let mut prescription = NewPrescription {
            patient_id: Uuid::new_v4(),
            medication: "  ".to_string(),
            dosage: "500mg".to_string(),
            frequency: "twice daily".to_string(),
            duration: "7 days".to_string(),
            notes: None,
        };
        assert!(prescription.validate().is_err());

        prescription.medication = "Amoxicillin".to_string();
        assert!(prescription.validate().is_ok());

        prescription.dosage = String::new();
        assert!(prescription.validate().is_err());
    }

    #[test]
    fn test_notification_serialization_skips_missing_key() {
        let json = serde_json::to_value(Notification::success("Saved")).unwrap();
        assert_eq!(json["level"], "success");
        assert!(json.get("dedup_key").is_none());

        let keyed = Notification::warning("Slow").with_key("network-quality");
        assert_eq!(keyed.dedup_key.as_deref(), Some("network-quality"));
    }
}
