use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use consultation_cell::models::{NetworkQualitySample, NewSessionNote, RemoteParticipant};
use consultation_cell::services::{
    AnnotationStore, BroadcastNotifier, DisabledAnnotationStore, SessionController, SessionGuard,
    SimulatedTransport, SimulatedTransportSettings, SupabaseAnnotationStore,
};
use consultation_cell::SessionParams;
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,consultation_cell=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting consultation demo");

    // Load configuration
    let config = AppConfig::from_env();

    let annotations: Arc<dyn AnnotationStore> = match SupabaseAnnotationStore::new(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Annotations disabled: {}", e);
            Arc::new(DisabledAnnotationStore)
        }
    };

    let transport = Arc::new(SimulatedTransport::new(SimulatedTransportSettings {
        connect_delay: Duration::from_millis(800),
        audio_delay: Duration::from_millis(300),
        video_delay: Duration::from_millis(1200),
        ..SimulatedTransportSettings::default()
    }));
    transport.add_remote_participant(RemoteParticipant {
        identity: 2002,
        has_audio: true,
        has_video: true,
    });

    // BroadcastNotifier logs every notification through tracing
    let notifier = Arc::new(BroadcastNotifier::new());

    let params = SessionParams {
        appointment_id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        channel_id: "appointment-demo".to_string(),
        local_identity: 1001,
        credential: "demo-rtc-token".to_string(),
        auth_token: std::env::var("DEMO_AUTH_TOKEN").unwrap_or_default(),
    };
    let patient_id = params.patient_id;
    let appointment_id = params.appointment_id;

    let session = SessionGuard::new(SessionController::new(
        params,
        config.consultation.clone(),
        transport.clone(),
        annotations,
        notifier,
    )?);
    session.controller().start()?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Published: {}", session.is_published());

    let remote = session.remote_view();
    info!(
        "Remote participant: {:?}, audio tracks: {}",
        remote.participant.map(|p| p.identity),
        remote.audio_tracks.len()
    );

    for delay_ms in [120, 450, 500] {
        transport.push_quality_sample(NetworkQualitySample::now(delay_ms));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let mic = session.toggle_mic().await?;
    info!("Microphone enabled: {:?}", mic);

    if let Err(e) = session
        .add_session_note(NewSessionNote {
            patient_id,
            note: "Patient reports improved sleep since last visit".to_string(),
            appointment_id,
        })
        .await
    {
        warn!("Session note not saved: {}", e);
    }

    let report = session.end_call().await;
    info!(
        "Teardown performed: {}, failures: {}",
        report.performed,
        report.failures.len()
    );

    let snapshot = session.snapshot().await;
    info!("Final session state:\n{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
