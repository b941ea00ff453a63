//! Patients Module - Registry, visits, and medical history
//!
//! Patient registration creates the account and the patient record as one
//! store unit, minting a `PAT-YYYYMMDD-NNNN` reference with bounded retry.
//! Lookups treat a patient whose linked account is deactivated as absent.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Crypto;
use crate::model::{
    Gender, MedicalVisit, Patient, PatientSummary, PrescriptionItem, Prescription, Role, User,
    UserPublic, VisitType,
};
use crate::reference::{ReferenceGenerator, ReferenceKind};
use crate::store::{Store, StoreError};

/// Hard cap on fuzzy-search results.
const SEARCH_LIMIT: usize = 20;

#[derive(Clone, Debug, PartialEq)]
pub enum RegistryError {
    Validation(String),
    EmailTaken(String),
    InsuranceTaken(String),
    PatientNotFound,
    DoctorNotFound,
    ReferenceGenerationExhausted,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Validation(message) => write!(f, "{}", message),
            RegistryError::EmailTaken(email) => {
                write!(f, "Email already registered: {}", email)
            }
            RegistryError::InsuranceTaken(number) => {
                write!(f, "Insurance number already registered: {}", number)
            }
            RegistryError::PatientNotFound => write!(f, "Patient not found"),
            RegistryError::DoctorNotFound => write!(f, "Doctor not found"),
            RegistryError::ReferenceGenerationExhausted => {
                write!(f, "Could not generate a unique reference number")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDraft {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    #[serde(default)]
    pub insurance_provider: Option<String>,
    #[serde(default)]
    pub insurance_number: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub existing_conditions: Vec<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub emergency_phone: Option<String>,
}

/// Field allowlist for patient updates. Reference number, linked user, date
/// of birth, and gender are not reachable from here.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub insurance_provider: Option<String>,
    #[serde(default)]
    pub insurance_number: Option<String>,
    #[serde(default)]
    pub allergies: Option<Vec<String>>,
    #[serde(default)]
    pub existing_conditions: Option<Vec<String>>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub emergency_phone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDraft {
    #[serde(default)]
    pub doctor_id: Option<Uuid>,
    pub visit_date: NaiveDate,
    #[serde(default)]
    pub visit_type: VisitType,
    pub chief_complaint: String,
    #[serde(default)]
    pub symptoms: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub treatment_notes: Option<String>,
    #[serde(default)]
    pub recommendations: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPatient {
    pub patient: Patient,
    pub user: UserPublic,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitView {
    #[serde(flatten)]
    pub visit: MedicalVisit,
    pub doctor_name: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPrescription {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<PrescriptionItem>,
    pub doctor_name: Option<String>,
}

/// Combined clinical history, newest entries first.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalHistory {
    pub patient: Patient,
    pub visits: Vec<VisitView>,
    pub prescriptions: Vec<HistoryPrescription>,
}

pub struct PatientService {
    store: Arc<Store>,
    references: ReferenceGenerator,
}

impl PatientService {
    pub fn new(store: Arc<Store>, references: ReferenceGenerator) -> Self {
        Self { store, references }
    }

    /// Register a patient: account plus record in one unit. Reference
    /// collisions retry with fresh randomness up to the generator bound.
    pub async fn register(&self, draft: PatientDraft) -> Result<RegisteredPatient, RegistryError> {
        if draft.full_name.trim().is_empty() {
            return Err(RegistryError::Validation("Full name is required".to_string()));
        }
        if !draft.email.contains('@') {
            return Err(RegistryError::Validation("Invalid email address".to_string()));
        }
        if draft.password.len() < 8 {
            return Err(RegistryError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        if draft.date_of_birth > Utc::now().date_naive() {
            return Err(RegistryError::Validation(
                "Date of birth cannot be in the future".to_string(),
            ));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: draft.email.trim().to_lowercase(),
            password_hash: Crypto::hash_password(&draft.password),
            role: Role::Patient,
            full_name: draft.full_name.trim().to_string(),
            phone: draft.phone.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        for _ in 0..self.references.max_attempts() {
            let patient = Patient {
                id: Uuid::new_v4(),
                reference_number: self.references.candidate(ReferenceKind::Patient),
                user_id: user.id,
                full_name: user.full_name.clone(),
                date_of_birth: draft.date_of_birth,
                gender: draft.gender,
                insurance_provider: draft.insurance_provider.clone(),
                insurance_number: draft.insurance_number.clone(),
                allergies: draft.allergies.clone(),
                existing_conditions: draft.existing_conditions.clone(),
                emergency_contact: draft.emergency_contact.clone(),
                emergency_phone: draft.emergency_phone.clone(),
                created_at: now,
                updated_at: now,
            };

            match self
                .store
                .insert_patient_with_user(user.clone(), patient.clone())
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        patient_id = %patient.id,
                        reference = %patient.reference_number,
                        "Registered patient"
                    );
                    return Ok(RegisteredPatient {
                        patient,
                        user: UserPublic::from(&user),
                    });
                }
                // Fresh suffix, same unit.
                Err(StoreError::DuplicateReference(reference)) => {
                    tracing::warn!(reference = %reference, "Reference collision, retrying");
                }
                Err(StoreError::DuplicateEmail(email)) => {
                    return Err(RegistryError::EmailTaken(email))
                }
                Err(StoreError::DuplicateInsurance(number)) => {
                    return Err(RegistryError::InsuranceTaken(number))
                }
                Err(e) => return Err(RegistryError::Validation(e.to_string())),
            }
        }
        Err(RegistryError::ReferenceGenerationExhausted)
    }

    pub async fn get(&self, id: Uuid) -> Result<Patient, RegistryError> {
        let patient = self
            .store
            .get_patient(id)
            .await
            .ok_or(RegistryError::PatientNotFound)?;
        self.require_active(&patient).await?;
        Ok(patient)
    }

    pub async fn by_reference(&self, reference: &str) -> Result<Patient, RegistryError> {
        let patient = self
            .store
            .patient_by_reference(reference)
            .await
            .ok_or(RegistryError::PatientNotFound)?;
        self.require_active(&patient).await?;
        Ok(patient)
    }

    pub async fn update(&self, id: Uuid, update: PatientUpdate) -> Result<Patient, RegistryError> {
        if let Some(name) = &update.full_name {
            if name.trim().is_empty() {
                return Err(RegistryError::Validation(
                    "Full name cannot be empty".to_string(),
                ));
            }
        }
        // Resolve first so deactivated patients read as absent.
        self.get(id).await?;
        self.store
            .update_patient(id, |patient| {
                if let Some(name) = update.full_name {
                    patient.full_name = name.trim().to_string();
                }
                if let Some(provider) = update.insurance_provider {
                    patient.insurance_provider = Some(provider);
                }
                if let Some(number) = update.insurance_number {
                    patient.insurance_number = Some(number);
                }
                if let Some(allergies) = update.allergies {
                    patient.allergies = allergies;
                }
                if let Some(conditions) = update.existing_conditions {
                    patient.existing_conditions = conditions;
                }
                if let Some(contact) = update.emergency_contact {
                    patient.emergency_contact = Some(contact);
                }
                if let Some(phone) = update.emergency_phone {
                    patient.emergency_phone = Some(phone);
                }
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateInsurance(number) => RegistryError::InsuranceTaken(number),
                StoreError::NotFound(_) => RegistryError::PatientNotFound,
                other => RegistryError::Validation(other.to_string()),
            })
    }

    /// Case-insensitive substring search over names and reference numbers,
    /// active patients only, capped at 20.
    pub async fn search(&self, query: &str) -> Result<Vec<PatientSummary>, RegistryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RegistryError::Validation(
                "Search query is required".to_string(),
            ));
        }
        let matches = self.store.search_patients(query, SEARCH_LIMIT).await;
        Ok(matches.iter().map(PatientSummary::from).collect())
    }

    pub async fn create_visit(
        &self,
        patient_id: Uuid,
        doctor_id: Uuid,
        draft: VisitDraft,
    ) -> Result<MedicalVisit, RegistryError> {
        if draft.chief_complaint.trim().is_empty() {
            return Err(RegistryError::Validation(
                "Chief complaint is required".to_string(),
            ));
        }
        self.get(patient_id).await?;
        let doctor = self
            .store
            .get_user(doctor_id)
            .await
            .filter(|u| u.is_active && u.role == Role::Doctor)
            .ok_or(RegistryError::DoctorNotFound)?;

        let visit = MedicalVisit {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id: doctor.id,
            visit_date: draft.visit_date,
            visit_type: draft.visit_type,
            chief_complaint: draft.chief_complaint.trim().to_string(),
            symptoms: draft.symptoms,
            diagnosis: draft.diagnosis,
            treatment_notes: draft.treatment_notes,
            recommendations: draft.recommendations,
            created_at: Utc::now(),
        };
        self.store.insert_visit(visit.clone()).await;
        tracing::info!(visit_id = %visit.id, patient_id = %patient_id, "Recorded visit");
        Ok(visit)
    }

    pub async fn history(&self, patient_id: Uuid) -> Result<MedicalHistory, RegistryError> {
        let patient = self.get(patient_id).await?;

        let mut visits = Vec::new();
        for visit in self.store.visits_for_patient(patient_id).await {
            let doctor_name = self
                .store
                .get_user(visit.doctor_id)
                .await
                .map(|u| u.full_name);
            visits.push(VisitView { visit, doctor_name });
        }

        let mut prescriptions = Vec::new();
        for prescription in self.store.prescriptions_for_patient(patient_id).await {
            let items = self.store.items_for_prescription(prescription.id).await;
            let doctor_name = self
                .store
                .get_user(prescription.doctor_id)
                .await
                .map(|u| u.full_name);
            prescriptions.push(HistoryPrescription {
                prescription,
                items,
                doctor_name,
            });
        }

        Ok(MedicalHistory {
            patient,
            visits,
            prescriptions,
        })
    }

    async fn require_active(&self, patient: &Patient) -> Result<(), RegistryError> {
        let active = self
            .store
            .get_user(patient.user_id)
            .await
            .map(|u| u.is_active)
            .unwrap_or(false);
        if active {
            Ok(())
        } else {
            Err(RegistryError::PatientNotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn service() -> PatientService {
        PatientService::new(Arc::new(Store::new()), ReferenceGenerator::new(5))
    }

    fn draft(email: &str, name: &str) -> PatientDraft {
        PatientDraft {
            email: email.to_string(),
            password: "patient-pw".to_string(),
            full_name: name.to_string(),
            phone: None,
            date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 1).unwrap(),
            gender: Gender::Female,
            insurance_provider: None,
            insurance_number: None,
            allergies: vec!["penicillin".to_string()],
            existing_conditions: vec![],
            emergency_contact: None,
            emergency_phone: None,
        }
    }

    #[tokio::test]
    async fn test_registration_mints_reference() {
        let patients = service();
        let registered = patients.register(draft("uwase@example.com", "Uwase Marie")).await.unwrap();
        let pattern = Regex::new(r"^PAT-\d{8}-\d{4}$").unwrap();
        assert!(pattern.is_match(&registered.patient.reference_number));
        assert_eq!(registered.user.role, Role::Patient);

        let found = patients
            .by_reference(&registered.patient.reference_number)
            .await
            .unwrap();
        assert_eq!(found.id, registered.patient.id);
    }

    #[tokio::test]
    async fn test_reference_exhaustion_is_deterministic() {
        let store = Arc::new(Store::new());
        // One suffix available per day; the second registration must exhaust.
        let patients = PatientService::new(
            store,
            ReferenceGenerator::new(3).with_suffix_space(1),
        );
        patients.register(draft("a@example.com", "First Patient")).await.unwrap();
        let err = patients.register(draft("b@example.com", "Second Patient")).await.unwrap_err();
        assert_eq!(err, RegistryError::ReferenceGenerationExhausted);
    }

    #[tokio::test]
    async fn test_duplicate_email_not_retried() {
        let patients = service();
        patients.register(draft("same@example.com", "First")).await.unwrap();
        let err = patients.register(draft("same@example.com", "Second")).await.unwrap_err();
        assert!(matches!(err, RegistryError::EmailTaken(_)));
    }

    #[tokio::test]
    async fn test_update_allowlist() {
        let patients = service();
        let registered = patients.register(draft("uwase@example.com", "Uwase Marie")).await.unwrap();
        let updated = patients
            .update(
                registered.patient.id,
                PatientUpdate {
                    allergies: Some(vec!["aspirin".to_string()]),
                    emergency_contact: Some("Mukamana Jeanne".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.allergies, vec!["aspirin".to_string()]);
        assert_eq!(updated.emergency_contact.as_deref(), Some("Mukamana Jeanne"));
        // Untouched fields survive.
        assert_eq!(updated.full_name, "Uwase Marie");
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let patients = service();
        assert!(matches!(
            patients.search("  ").await.unwrap_err(),
            RegistryError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_visit_requires_active_doctor() {
        let store = Arc::new(Store::new());
        let patients = PatientService::new(store.clone(), ReferenceGenerator::new(5));
        let registered = patients.register(draft("uwase@example.com", "Uwase Marie")).await.unwrap();

        let visit_draft = VisitDraft {
            doctor_id: None,
            visit_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            visit_type: VisitType::Consultation,
            chief_complaint: "Fever".to_string(),
            symptoms: None,
            diagnosis: None,
            treatment_notes: None,
            recommendations: None,
        };
        let err = patients
            .create_visit(registered.patient.id, Uuid::new_v4(), visit_draft.clone())
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::DoctorNotFound);

        let now = Utc::now();
        let doctor = User {
            id: Uuid::new_v4(),
            email: "doc@example.com".to_string(),
            password_hash: "salt$key".to_string(),
            role: Role::Doctor,
            full_name: "Dr. Ndayisaba".to_string(),
            phone: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_user(doctor.clone()).await.unwrap();
        let visit = patients
            .create_visit(registered.patient.id, doctor.id, visit_draft)
            .await
            .unwrap();
        assert_eq!(visit.chief_complaint, "Fever");

        let history = patients.history(registered.patient.id).await.unwrap();
        assert_eq!(history.visits.len(), 1);
        assert_eq!(history.visits[0].doctor_name.as_deref(), Some("Dr. Ndayisaba"));
    }

    #[tokio::test]
    async fn test_deactivated_patient_reads_as_absent() {
        let store = Arc::new(Store::new());
        let patients = PatientService::new(store.clone(), ReferenceGenerator::new(5));
        let registered = patients.register(draft("uwase@example.com", "Uwase Marie")).await.unwrap();

        store
            .update_user(registered.user.id, |u| u.is_active = false)
            .await
            .unwrap();
        assert_eq!(
            patients.get(registered.patient.id).await.unwrap_err(),
            RegistryError::PatientNotFound
        );
        assert!(patients
            .by_reference(&registered.patient.reference_number)
            .await
            .is_err());
    }
}
