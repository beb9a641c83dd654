// libs/consultation-cell/src/services/mod.rs

pub mod annotations;
pub mod controller;
pub mod liveness;
pub mod media_tracks;
pub mod network_quality;
pub mod notifications;
pub mod publish_gate;
pub mod session_timer;
pub mod simulated;
pub mod transport;

pub use annotations::{AnnotationStore, DisabledAnnotationStore, SupabaseAnnotationStore};
pub use controller::{SessionController, SessionGuard};
pub use liveness::Liveness;
pub use media_tracks::MediaTrackManager;
pub use network_quality::{NetworkQualityMonitor, QualityWarning};
pub use notifications::{BroadcastNotifier, Notifier};
pub use publish_gate::{GateBlocker, GateInputs, GateOutcome, PublishGate};
pub use session_timer::SessionTimer;
pub use simulated::{SimulatedTransport, SimulatedTransportSettings};
pub use transport::{LocalTrack, LocalTrackHandle, RealtimeTransport};
