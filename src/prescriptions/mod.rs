//! Prescriptions Module - Issuance and lookup
//!
//! Issuing validates everything up front, then persists the prescription,
//! its items, and exactly one redemption code as a single store unit. The
//! code payload seals the prescription identity with AES-256-GCM; the code
//! hash is what travels inside the QR image.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{CodeCipher, Crypto};
use crate::model::{
    CodePayload, Prescription, PrescriptionItem, PrescriptionStatus, RedemptionCode, Role,
};
use crate::reference::{ReferenceGenerator, ReferenceKind};
use crate::store::{Store, StoreError};

#[derive(Clone, Debug, PartialEq)]
pub enum PrescriptionError {
    PatientNotFound,
    DoctorNotFound,
    VisitNotFound,
    PrescriptionNotFound,
    InvalidItems(String),
    Validation(String),
    ReferenceGenerationExhausted,
    Sealing(String),
}

impl std::fmt::Display for PrescriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrescriptionError::PatientNotFound => write!(f, "Patient not found"),
            PrescriptionError::DoctorNotFound => write!(f, "Doctor not found"),
            PrescriptionError::VisitNotFound => write!(f, "Visit not found"),
            PrescriptionError::PrescriptionNotFound => write!(f, "Prescription not found"),
            PrescriptionError::InvalidItems(message) => {
                write!(f, "Invalid prescription items: {}", message)
            }
            PrescriptionError::Validation(message) => write!(f, "{}", message),
            PrescriptionError::ReferenceGenerationExhausted => {
                write!(f, "Could not generate a unique prescription number")
            }
            PrescriptionError::Sealing(message) => {
                write!(f, "Could not seal redemption code: {}", message)
            }
        }
    }
}

impl std::error::Error for PrescriptionError {}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    pub medicine_name: String,
    pub dosage: String,
    pub frequency: String,
    pub quantity: u32,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionDraft {
    #[serde(default)]
    pub doctor_id: Option<Uuid>,
    pub visit_id: Uuid,
    pub diagnosis: String,
    #[serde(default)]
    pub doctor_notes: Option<String>,
    pub items: Vec<ItemDraft>,
}

/// Prescription with its items and the code bound to it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionBundle {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<PrescriptionItem>,
    pub redemption_code: RedemptionCode,
}

pub struct PrescriptionService {
    store: Arc<Store>,
    references: ReferenceGenerator,
    cipher: CodeCipher,
    code_ttl: Duration,
}

impl PrescriptionService {
    pub fn new(
        store: Arc<Store>,
        references: ReferenceGenerator,
        cipher: CodeCipher,
        code_ttl_days: i64,
    ) -> Self {
        Self {
            store,
            references,
            cipher,
            code_ttl: Duration::days(code_ttl_days),
        }
    }

    /// Issue a prescription. All checks run before any persistence; the
    /// prescription, its items, and one redemption code land atomically.
    pub async fn issue(
        &self,
        patient_id: Uuid,
        doctor_id: Uuid,
        draft: PrescriptionDraft,
    ) -> Result<PrescriptionBundle, PrescriptionError> {
        let patient = self
            .store
            .get_patient(patient_id)
            .await
            .ok_or(PrescriptionError::PatientNotFound)?;
        let patient_active = self
            .store
            .get_user(patient.user_id)
            .await
            .map(|u| u.is_active)
            .unwrap_or(false);
        if !patient_active {
            return Err(PrescriptionError::PatientNotFound);
        }

        self.store
            .get_user(doctor_id)
            .await
            .filter(|u| u.is_active && u.role == Role::Doctor)
            .ok_or(PrescriptionError::DoctorNotFound)?;

        let visit = self
            .store
            .get_visit(draft.visit_id)
            .await
            .ok_or(PrescriptionError::VisitNotFound)?;
        if visit.patient_id != patient_id {
            return Err(PrescriptionError::VisitNotFound);
        }

        if draft.diagnosis.trim().is_empty() {
            return Err(PrescriptionError::Validation(
                "Diagnosis is required".to_string(),
            ));
        }
        validate_items(&draft.items)?;

        for _ in 0..self.references.max_attempts() {
            let now = Utc::now();
            let prescription_id = Uuid::new_v4();
            let number = self.references.candidate(ReferenceKind::Prescription);

            // Hash over the prescription id plus fresh randomness; retried
            // wholesale on the (unlikely) hash collision.
            let mut hash_input = prescription_id.as_bytes().to_vec();
            hash_input.extend_from_slice(&Crypto::random_bytes(16));
            let code_hash = Crypto::sha256_hex(&hash_input);

            let payload = CodePayload {
                prescription_id,
                prescription_number: number.clone(),
                patient_id,
                issued_at: now,
            };
            let plaintext = serde_json::to_vec(&payload)
                .map_err(|e| PrescriptionError::Sealing(e.to_string()))?;
            let encrypted_data = self
                .cipher
                .encrypt(&plaintext)
                .map_err(PrescriptionError::Sealing)?;

            let prescription = Prescription {
                id: prescription_id,
                prescription_number: number,
                patient_id,
                doctor_id,
                visit_id: visit.id,
                diagnosis: draft.diagnosis.trim().to_string(),
                doctor_notes: draft.doctor_notes.clone(),
                status: PrescriptionStatus::Pending,
                code_hash: code_hash.clone(),
                created_at: now,
                updated_at: now,
            };
            let items: Vec<PrescriptionItem> = draft
                .items
                .iter()
                .map(|item| PrescriptionItem {
                    id: Uuid::new_v4(),
                    prescription_id,
                    medicine_name: item.medicine_name.trim().to_string(),
                    dosage: item.dosage.trim().to_string(),
                    frequency: item.frequency.trim().to_string(),
                    quantity: item.quantity,
                    instructions: item.instructions.clone(),
                })
                .collect();
            let code = RedemptionCode {
                id: Uuid::new_v4(),
                code_hash,
                prescription_id,
                encrypted_data,
                expires_at: now + self.code_ttl,
                is_used: false,
                scan_count: 0,
                created_at: now,
            };

            match self
                .store
                .insert_prescription_bundle(prescription.clone(), items.clone(), code.clone())
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        prescription_id = %prescription.id,
                        number = %prescription.prescription_number,
                        items = items.len(),
                        "Issued prescription"
                    );
                    return Ok(PrescriptionBundle {
                        prescription,
                        items,
                        redemption_code: code,
                    });
                }
                Err(StoreError::DuplicateReference(number)) => {
                    tracing::warn!(number = %number, "Prescription number collision, retrying");
                }
                Err(StoreError::DuplicateCodeHash) => {
                    tracing::warn!("Code hash collision, retrying");
                }
                Err(e) => return Err(PrescriptionError::Validation(e.to_string())),
            }
        }
        Err(PrescriptionError::ReferenceGenerationExhausted)
    }

    pub async fn get(&self, id: Uuid) -> Result<PrescriptionBundle, PrescriptionError> {
        let prescription = self
            .store
            .get_prescription(id)
            .await
            .ok_or(PrescriptionError::PrescriptionNotFound)?;
        self.bundle(prescription).await
    }

    /// Prescriptions for a patient, newest first, each with items and code.
    pub async fn list_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<PrescriptionBundle>, PrescriptionError> {
        self.store
            .get_patient(patient_id)
            .await
            .ok_or(PrescriptionError::PatientNotFound)?;
        let mut bundles = Vec::new();
        for prescription in self.store.prescriptions_for_patient(patient_id).await {
            bundles.push(self.bundle(prescription).await?);
        }
        Ok(bundles)
    }

    async fn bundle(
        &self,
        prescription: Prescription,
    ) -> Result<PrescriptionBundle, PrescriptionError> {
        let items = self.store.items_for_prescription(prescription.id).await;
        let redemption_code = self
            .store
            .code_for_prescription(prescription.id)
            .await
            .ok_or_else(|| {
                PrescriptionError::Validation("Prescription has no redemption code".to_string())
            })?;
        Ok(PrescriptionBundle {
            prescription,
            items,
            redemption_code,
        })
    }
}

fn validate_items(items: &[ItemDraft]) -> Result<(), PrescriptionError> {
    if items.is_empty() {
        return Err(PrescriptionError::InvalidItems(
            "at least one item is required".to_string(),
        ));
    }
    for (index, item) in items.iter().enumerate() {
        if item.medicine_name.trim().is_empty() {
            return Err(PrescriptionError::InvalidItems(format!(
                "item {} is missing a medicine name",
                index + 1
            )));
        }
        if item.dosage.trim().is_empty() {
            return Err(PrescriptionError::InvalidItems(format!(
                "item {} is missing a dosage",
                index + 1
            )));
        }
        if item.frequency.trim().is_empty() {
            return Err(PrescriptionError::InvalidItems(format!(
                "item {} is missing a frequency",
                index + 1
            )));
        }
        if item.quantity == 0 {
            return Err(PrescriptionError::InvalidItems(format!(
                "item {} must have quantity of at least 1",
                index + 1
            )));
        }
    }
    Ok(())
}
