// libs/consultation-cell/src/lib.rs
//! # Consultation Cell
//!
//! This cell runs the live part of a telehealth appointment: a two-party
//! audio/video session between a doctor and a patient on top of a realtime
//! media transport.
//!
//! ## Features
//!
//! - **Local Media**: Microphone and camera capture with mute/unmute that keeps the device open
//! - **Publish Gate**: Local media is published exactly once, as soon as the transport is connected and both tracks exist
//! - **Network Monitoring**: Degraded-connection warnings, at most one per cooldown window
//! - **Countdown**: Session timer with one-shot ten-minute, five-minute and time-up warnings
//! - **Teardown**: Idempotent end-call that releases every resource even when one step fails
//! - **Annotations**: Prescriptions and session notes written during the call
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                    Consultation Cell                        |
//! +-------------------------------------------------------------+
//! |  models.rs               |  Session data model, payloads    |
//! |  services/               |                                  |
//! |    controller.rs         |  Session lifecycle + user actions|
//! |    media_tracks.rs       |  Local capture ownership         |
//! |    publish_gate.rs       |  Level-triggered single publish  |
//! |    network_quality.rs    |  Rate-limited quality warnings   |
//! |    session_timer.rs      |  Countdown + warning flags       |
//! |    transport.rs          |  Realtime transport capability   |
//! |    simulated.rs          |  In-process transport            |
//! |    annotations.rs        |  Prescription / note persistence |
//! |    notifications.rs      |  User-facing notifications       |
//! +-------------------------------------------------------------+
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use consultation_cell::services::{
//!     BroadcastNotifier, DisabledAnnotationStore, SessionController, SessionGuard,
//!     SimulatedTransport, SimulatedTransportSettings,
//! };
//! use consultation_cell::SessionParams;
//! use shared_config::ConsultationConfig;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let params = SessionParams {
//!     appointment_id: Uuid::new_v4(),
//!     patient_id: Uuid::new_v4(),
//!     channel_id: "appointment-42".to_string(),
//!     local_identity: 1001,
//!     credential: "rtc-token".to_string(),
//!     auth_token: "supabase-jwt".to_string(),
//! };
//!
//! let controller = SessionController::new(
//!     params,
//!     ConsultationConfig::default(),
//!     Arc::new(SimulatedTransport::new(SimulatedTransportSettings::default())),
//!     Arc::new(DisabledAnnotationStore),
//!     Arc::new(BroadcastNotifier::new()),
//! )?;
//! let session = SessionGuard::new(controller);
//! session.controller().start()?;
//!
//! session.toggle_mic().await?;
//! let report = session.end_call().await;
//! assert!(report.performed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Timing and thresholds come from [`shared_config::ConsultationConfig`]:
//! session length, warning marks, tick interval, network delay threshold
//! and warning cooldown.

pub mod models;
pub mod services;

// Re-export commonly used types
pub use models::{
    ConnectionState, ConsultationError, CountdownWarning, MediaKind, NetworkQualitySample,
    NewPrescription, NewSessionNote, Notification, NotificationLevel, SessionLifecycle,
    SessionParams, SessionSnapshot, TeardownReport, WarningFlags,
};

pub use services::{
    MediaTrackManager, NetworkQualityMonitor, PublishGate, SessionController, SessionGuard,
    SessionTimer,
};
