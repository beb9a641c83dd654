// libs/consultation-cell/src/services/annotations.rs
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{ConsultationError, NewPrescription, NewSessionNote};

/// Persistence for prescriptions and notes written during a consultation.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    async fn add_prescription(
        &self,
        prescription: &NewPrescription,
        auth_token: &str,
    ) -> Result<Value, ConsultationError>;

    async fn add_session_note(
        &self,
        note: &NewSessionNote,
        auth_token: &str,
    ) -> Result<Value, ConsultationError>;
}

/// Stores annotations in the Supabase `prescriptions` and `session_notes` tables.
pub struct SupabaseAnnotationStore {
    supabase: SupabaseClient,
}

impl std::fmt::Debug for SupabaseAnnotationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAnnotationStore").finish_non_exhaustive()
    }
}

impl SupabaseAnnotationStore {
    pub fn new(config: &AppConfig) -> Result<Self, ConsultationError> {
        if !config.is_configured() {
            return Err(ConsultationError::NotConfigured);
        }

        Ok(Self {
            supabase: SupabaseClient::new(config),
        })
    }

    async fn insert_one<T: serde::Serialize>(
        &self,
        table: &str,
        payload: &T,
        auth_token: &str,
    ) -> Result<Value, ConsultationError> {
        let body = serde_json::to_value(payload).map_err(|e| ConsultationError::Internal {
            message: format!("Failed to serialize {} payload: {}", table, e),
        })?;

        let rows: Vec<Value> = self
            .supabase
            .insert(table, auth_token, body)
            .await
            .map_err(|e| ConsultationError::PersistenceError {
                message: e.to_string(),
            })?;

        rows.into_iter()
            .next()
            .ok_or_else(|| ConsultationError::PersistenceError {
                message: format!("No {} row returned", table),
            })
    }
}

#[async_trait]
impl AnnotationStore for SupabaseAnnotationStore {
    #[instrument(skip(self, prescription, auth_token), fields(patient_id = %prescription.patient_id))]
    async fn add_prescription(
        &self,
        prescription: &NewPrescription,
        auth_token: &str,
    ) -> Result<Value, ConsultationError> {
        let row = self.insert_one("prescriptions", prescription, auth_token).await?;
        info!("Prescription stored for patient {}", prescription.patient_id);
        Ok(row)
    }

    #[instrument(skip(self, note, auth_token), fields(appointment_id = %note.appointment_id))]
    async fn add_session_note(
        &self,
        note: &NewSessionNote,
        auth_token: &str,
    ) -> Result<Value, ConsultationError> {
        let row = self.insert_one("session_notes", note, auth_token).await?;
        info!("Session note stored for appointment {}", note.appointment_id);
        Ok(row)
    }
}

/// Used when persistence is not configured; every write is rejected.
pub struct DisabledAnnotationStore;

#[async_trait]
impl AnnotationStore for DisabledAnnotationStore {
    async fn add_prescription(
        &self,
        _prescription: &NewPrescription,
        _auth_token: &str,
    ) -> Result<Value, ConsultationError> {
        Err(ConsultationError::NotConfigured)
    }

    async fn add_session_note(
        &self,
        _note: &NewSessionNote,
        _auth_token: &str,
    ) -> Result<Value, ConsultationError> {
        Err(ConsultationError::NotConfigured)
    }
}
