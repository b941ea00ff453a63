//! Pharmacy Module - Redemption state machine and audit log
//!
//! Drives a code through scanned → validated → fulfilled. Expiry is checked
//! before anything else, a used code rejects every later action, and
//! fulfillment is a compare-and-set so concurrent attempts cannot both win.
//! Every attempt, successful or rejected, lands in the append-only log.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::crypto::CodeCipher;
use crate::model::{
    CodePayload, PatientSummary, PharmacyAction, PharmacyLogEntry, Prescription, PrescriptionItem,
    PrescriptionStatus, RedemptionCode,
};
use crate::store::{Store, StoreError};

#[derive(Clone, Debug, PartialEq)]
pub enum RedemptionError {
    CodeNotFound,
    CodeExpired,
    CodeAlreadyUsed,
    PrescriptionCancelled,
    AlreadyFulfilled,
    ValidationRequired,
    PayloadMismatch,
    PrescriptionNotFound,
    Internal(String),
}

impl std::fmt::Display for RedemptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedemptionError::CodeNotFound => write!(f, "Redemption code not found"),
            RedemptionError::CodeExpired => write!(f, "Redemption code has expired"),
            RedemptionError::CodeAlreadyUsed => {
                write!(f, "Redemption code has already been used")
            }
            RedemptionError::PrescriptionCancelled => {
                write!(f, "Prescription has been cancelled")
            }
            RedemptionError::AlreadyFulfilled => {
                write!(f, "Prescription has already been fulfilled")
            }
            RedemptionError::ValidationRequired => {
                write!(f, "Prescription must be validated before fulfillment")
            }
            RedemptionError::PayloadMismatch => {
                write!(f, "Redemption code payload does not match the prescription")
            }
            RedemptionError::PrescriptionNotFound => write!(f, "Prescription not found"),
            RedemptionError::Internal(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for RedemptionError {}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub prescription_number: String,
    pub status: PrescriptionStatus,
    pub scan_count: u32,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<PrescriptionItem>,
    pub patient: PatientSummary,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentReport {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub redemption_code: RedemptionCode,
}

pub struct RedemptionService {
    store: Arc<Store>,
    cipher: CodeCipher,
}

impl RedemptionService {
    pub fn new(store: Arc<Store>, cipher: CodeCipher) -> Self {
        Self { store, cipher }
    }

    /// Informational presentation of a code. Bumps the scan counter and
    /// logs, but never touches prescription status.
    pub async fn scan(
        &self,
        code_hash: &str,
        pharmacist_id: Uuid,
        notes: Option<String>,
    ) -> Result<ScanReport, RedemptionError> {
        let code = self.resolve(code_hash).await?;
        self.check_code(&code, pharmacist_id, PharmacyAction::Scanned)
            .await?;

        let entry = PharmacyLogEntry::new(
            code.prescription_id,
            pharmacist_id,
            PharmacyAction::Scanned,
            notes,
        );
        // The store re-checks the used flag under its write lock; a scan
        // racing a fulfillment loses here even after check_code passed.
        let scan_count = match self.store.record_scan(code.id, entry).await {
            Ok(count) => count,
            Err(StoreError::CodeUsed) => {
                return self
                    .reject(
                        code.prescription_id,
                        pharmacist_id,
                        PharmacyAction::Scanned,
                        RedemptionError::CodeAlreadyUsed,
                    )
                    .await
            }
            Err(e) => return Err(RedemptionError::Internal(e.to_string())),
        };
        let prescription = self.prescription_for(&code).await?;
        tracing::info!(
            prescription = %prescription.prescription_number,
            scan_count,
            "Code scanned"
        );
        Ok(ScanReport {
            prescription_number: prescription.prescription_number,
            status: prescription.status,
            scan_count,
            expires_at: code.expires_at,
        })
    }

    /// Pharmacist authenticity check: opens the sealed payload and
    /// cross-checks the bound prescription identity. The code stays unused.
    pub async fn validate(
        &self,
        code_hash: &str,
        pharmacist_id: Uuid,
        notes: Option<String>,
    ) -> Result<ValidationReport, RedemptionError> {
        let code = self.resolve(code_hash).await?;
        self.check_code(&code, pharmacist_id, PharmacyAction::Validated)
            .await?;
        let prescription = self.prescription_for(&code).await?;
        match prescription.status {
            PrescriptionStatus::Pending => {}
            PrescriptionStatus::Cancelled => {
                return self
                    .reject(
                        code.prescription_id,
                        pharmacist_id,
                        PharmacyAction::Validated,
                        RedemptionError::PrescriptionCancelled,
                    )
                    .await
            }
            PrescriptionStatus::Fulfilled => {
                return self
                    .reject(
                        code.prescription_id,
                        pharmacist_id,
                        PharmacyAction::Validated,
                        RedemptionError::CodeAlreadyUsed,
                    )
                    .await
            }
        }

        let payload = match self.open_payload(&code) {
            Ok(payload) => payload,
            Err(err) => {
                return self
                    .reject(
                        code.prescription_id,
                        pharmacist_id,
                        PharmacyAction::Validated,
                        err,
                    )
                    .await
            }
        };
        if payload.prescription_id != prescription.id
            || payload.prescription_number != prescription.prescription_number
            || payload.patient_id != prescription.patient_id
        {
            return self
                .reject(
                    code.prescription_id,
                    pharmacist_id,
                    PharmacyAction::Validated,
                    RedemptionError::PayloadMismatch,
                )
                .await;
        }

        self.store
            .append_log(PharmacyLogEntry::new(
                code.prescription_id,
                pharmacist_id,
                PharmacyAction::Validated,
                notes,
            ))
            .await;
        tracing::info!(
            prescription = %prescription.prescription_number,
            "Code validated"
        );

        let items = self.store.items_for_prescription(prescription.id).await;
        let patient = self
            .store
            .get_patient(prescription.patient_id)
            .await
            .ok_or(RedemptionError::PrescriptionNotFound)?;
        Ok(ValidationReport {
            prescription,
            items,
            patient: PatientSummary::from(&patient),
        })
    }

    /// Terminal dispensing action. Requires a prior validated entry; the
    /// mark-used flip is a compare-and-set, so of two racing calls exactly
    /// one succeeds and the loser sees `CodeAlreadyUsed`.
    pub async fn fulfill(
        &self,
        code_hash: &str,
        pharmacist_id: Uuid,
        notes: Option<String>,
    ) -> Result<FulfillmentReport, RedemptionError> {
        let code = self.resolve(code_hash).await?;
        if code.is_expired(Utc::now()) {
            return self
                .reject(
                    code.prescription_id,
                    pharmacist_id,
                    PharmacyAction::Fulfilled,
                    RedemptionError::CodeExpired,
                )
                .await;
        }
        if !self.store.has_validated_entry(code.prescription_id).await {
            return self
                .reject(
                    code.prescription_id,
                    pharmacist_id,
                    PharmacyAction::Fulfilled,
                    RedemptionError::ValidationRequired,
                )
                .await;
        }

        let entry = PharmacyLogEntry::new(
            code.prescription_id,
            pharmacist_id,
            PharmacyAction::Fulfilled,
            notes,
        );
        match self.store.fulfill(code.id, entry).await {
            Ok((prescription, redemption_code)) => {
                tracing::info!(
                    prescription = %prescription.prescription_number,
                    pharmacist_id = %pharmacist_id,
                    "Prescription fulfilled"
                );
                Ok(FulfillmentReport {
                    prescription,
                    redemption_code,
                })
            }
            Err(StoreError::CodeUsed) => {
                self.reject(
                    code.prescription_id,
                    pharmacist_id,
                    PharmacyAction::Fulfilled,
                    RedemptionError::CodeAlreadyUsed,
                )
                .await
            }
            Err(StoreError::PrescriptionNotPending(PrescriptionStatus::Cancelled)) => {
                self.reject(
                    code.prescription_id,
                    pharmacist_id,
                    PharmacyAction::Fulfilled,
                    RedemptionError::PrescriptionCancelled,
                )
                .await
            }
            Err(StoreError::PrescriptionNotPending(_)) => {
                self.reject(
                    code.prescription_id,
                    pharmacist_id,
                    PharmacyAction::Fulfilled,
                    RedemptionError::CodeAlreadyUsed,
                )
                .await
            }
            Err(e) => Err(RedemptionError::Internal(e.to_string())),
        }
    }

    /// Administrative cancellation, only reachable from pending.
    pub async fn cancel(&self, prescription_id: Uuid) -> Result<Prescription, RedemptionError> {
        let cancelled = self
            .store
            .cancel_prescription(prescription_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => RedemptionError::PrescriptionNotFound,
                StoreError::PrescriptionNotPending(PrescriptionStatus::Fulfilled) => {
                    RedemptionError::AlreadyFulfilled
                }
                StoreError::PrescriptionNotPending(_) => RedemptionError::PrescriptionCancelled,
                other => RedemptionError::Internal(other.to_string()),
            })?;
        tracing::info!(
            prescription = %cancelled.prescription_number,
            "Prescription cancelled"
        );
        Ok(cancelled)
    }

    /// Full audit trail for one prescription, oldest first.
    pub async fn logs(
        &self,
        prescription_id: Uuid,
    ) -> Result<Vec<PharmacyLogEntry>, RedemptionError> {
        self.store
            .get_prescription(prescription_id)
            .await
            .ok_or(RedemptionError::PrescriptionNotFound)?;
        Ok(self.store.logs_for_prescription(prescription_id).await)
    }

    async fn resolve(&self, code_hash: &str) -> Result<RedemptionCode, RedemptionError> {
        self.store
            .code_by_hash(code_hash)
            .await
            .ok_or(RedemptionError::CodeNotFound)
    }

    /// Expiry first, then used-state. Both rejections are logged.
    async fn check_code(
        &self,
        code: &RedemptionCode,
        pharmacist_id: Uuid,
        action: PharmacyAction,
    ) -> Result<(), RedemptionError> {
        if code.is_expired(Utc::now()) {
            return self
                .reject(code.prescription_id, pharmacist_id, action, RedemptionError::CodeExpired)
                .await;
        }
        if code.is_used {
            return self
                .reject(
                    code.prescription_id,
                    pharmacist_id,
                    action,
                    RedemptionError::CodeAlreadyUsed,
                )
                .await;
        }
        Ok(())
    }

    /// Log the rejected attempt, then surface the error. Nothing else moves.
    async fn reject<T>(
        &self,
        prescription_id: Uuid,
        pharmacist_id: Uuid,
        action: PharmacyAction,
        err: RedemptionError,
    ) -> Result<T, RedemptionError> {
        self.store
            .append_log(PharmacyLogEntry::new(
                prescription_id,
                pharmacist_id,
                action,
                Some(format!("rejected: {}", err)),
            ))
            .await;
        tracing::warn!(prescription_id = %prescription_id, action = %action, error = %err, "Redemption attempt rejected");
        Err(err)
    }

    fn open_payload(&self, code: &RedemptionCode) -> Result<CodePayload, RedemptionError> {
        let plaintext = self
            .cipher
            .decrypt(&code.encrypted_data)
            .map_err(|_| RedemptionError::PayloadMismatch)?;
        serde_json::from_slice(&plaintext).map_err(|_| RedemptionError::PayloadMismatch)
    }

    async fn prescription_for(
        &self,
        code: &RedemptionCode,
    ) -> Result<Prescription, RedemptionError> {
        self.store
            .get_prescription(code.prescription_id)
            .await
            .ok_or(RedemptionError::PrescriptionNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gender, Patient, User};
    use crate::model::Role;
    use chrono::{Duration, NaiveDate};

    const KEY: [u8; 32] = [0x42u8; 32];

    struct Fixture {
        store: Arc<Store>,
        service: RedemptionService,
        code_hash: String,
        prescription_id: Uuid,
        pharmacist_id: Uuid,
    }

    async fn fixture_with_expiry(expires_in: Duration) -> Fixture {
        let store = Arc::new(Store::new());
        let cipher = CodeCipher::new(&KEY);
        let now = Utc::now();

        let patient_user = User {
            id: Uuid::new_v4(),
            email: "uwase@example.com".to_string(),
            password_hash: "salt$key".to_string(),
            role: Role::Patient,
            full_name: "Uwase Marie".to_string(),
            phone: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let patient = Patient {
            id: Uuid::new_v4(),
            reference_number: "PAT-20260101-0001".to_string(),
            user_id: patient_user.id,
            full_name: "Uwase Marie".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 1).unwrap(),
            gender: Gender::Female,
            insurance_provider: None,
            insurance_number: None,
            allergies: vec![],
            existing_conditions: vec![],
            emergency_contact: None,
            emergency_phone: None,
            created_at: now,
            updated_at: now,
        };
        let patient_id = patient.id;
        store.insert_patient_with_user(patient_user, patient).await.unwrap();

        let prescription_id = Uuid::new_v4();
        let number = "RX-20260101-0001".to_string();
        let payload = CodePayload {
            prescription_id,
            prescription_number: number.clone(),
            patient_id,
            issued_at: now,
        };
        let encrypted_data = cipher
            .encrypt(&serde_json::to_vec(&payload).unwrap())
            .unwrap();
        let code_hash = "a".repeat(64);

        let prescription = Prescription {
            id: prescription_id,
            prescription_number: number,
            patient_id,
            doctor_id: Uuid::new_v4(),
            visit_id: Uuid::new_v4(),
            diagnosis: "Malaria".to_string(),
            doctor_notes: None,
            status: PrescriptionStatus::Pending,
            code_hash: code_hash.clone(),
            created_at: now,
            updated_at: now,
        };
        let items = vec![PrescriptionItem {
            id: Uuid::new_v4(),
            prescription_id,
            medicine_name: "Coartem".to_string(),
            dosage: "80/480mg".to_string(),
            frequency: "twice daily".to_string(),
            quantity: 6,
            instructions: None,
        }];
        let code = RedemptionCode {
            id: Uuid::new_v4(),
            code_hash: code_hash.clone(),
            prescription_id,
            encrypted_data,
            expires_at: now + expires_in,
            is_used: false,
            scan_count: 0,
            created_at: now,
        };
        store
            .insert_prescription_bundle(prescription, items, code)
            .await
            .unwrap();

        Fixture {
            service: RedemptionService::new(store.clone(), cipher),
            store,
            code_hash,
            prescription_id,
            pharmacist_id: Uuid::new_v4(),
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_expiry(Duration::days(30)).await
    }

    #[tokio::test]
    async fn test_full_redemption_flow() {
        let fx = fixture().await;

        let scan = fx.service.scan(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();
        assert_eq!(scan.scan_count, 1);
        assert_eq!(scan.status, PrescriptionStatus::Pending);

        let validation = fx
            .service
            .validate(&fx.code_hash, fx.pharmacist_id, Some("checked id".to_string()))
            .await
            .unwrap();
        assert_eq!(validation.items.len(), 1);
        assert_eq!(validation.patient.full_name, "Uwase Marie");

        let fulfillment = fx.service.fulfill(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();
        assert_eq!(fulfillment.prescription.status, PrescriptionStatus::Fulfilled);
        assert!(fulfillment.redemption_code.is_used);

        let logs = fx.service.logs(fx.prescription_id).await.unwrap();
        let actions: Vec<PharmacyAction> = logs.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                PharmacyAction::Scanned,
                PharmacyAction::Validated,
                PharmacyAction::Fulfilled
            ]
        );
    }

    #[tokio::test]
    async fn test_used_code_rejects_everything() {
        let fx = fixture().await;
        fx.service.validate(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();
        fx.service.fulfill(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();

        // Replays fail identically, same pharmacist or not.
        for _ in 0..2 {
            let err = fx.service.fulfill(&fx.code_hash, fx.pharmacist_id, None).await.unwrap_err();
            assert_eq!(err, RedemptionError::CodeAlreadyUsed);
        }
        let err = fx.service.scan(&fx.code_hash, Uuid::new_v4(), None).await.unwrap_err();
        assert_eq!(err, RedemptionError::CodeAlreadyUsed);
        let err = fx.service.validate(&fx.code_hash, Uuid::new_v4(), None).await.unwrap_err();
        assert_eq!(err, RedemptionError::CodeAlreadyUsed);

        // Rejections are logged but the scan counter never moved again.
        let code = fx.store.code_by_hash(&fx.code_hash).await.unwrap();
        assert_eq!(code.scan_count, 0);
        let logs = fx.service.logs(fx.prescription_id).await.unwrap();
        assert_eq!(logs.len(), 6);
    }

    #[tokio::test]
    async fn test_expired_code_rejected_in_every_state() {
        let fx = fixture_with_expiry(Duration::seconds(-1)).await;
        for result in [
            fx.service.scan(&fx.code_hash, fx.pharmacist_id, None).await.map(|_| ()),
            fx.service.validate(&fx.code_hash, fx.pharmacist_id, None).await.map(|_| ()),
            fx.service.fulfill(&fx.code_hash, fx.pharmacist_id, None).await.map(|_| ()),
        ] {
            assert_eq!(result.unwrap_err(), RedemptionError::CodeExpired);
        }
        let logs = fx.service.logs(fx.prescription_id).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|e| e
            .notes
            .as_deref()
            .unwrap_or_default()
            .starts_with("rejected:")));
    }

    #[tokio::test]
    async fn test_fulfill_requires_validation() {
        let fx = fixture().await;
        fx.service.scan(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();
        let err = fx.service.fulfill(&fx.code_hash, fx.pharmacist_id, None).await.unwrap_err();
        assert_eq!(err, RedemptionError::ValidationRequired);

        // The prescription did not advance.
        let prescription = fx.store.get_prescription(fx.prescription_id).await.unwrap();
        assert_eq!(prescription.status, PrescriptionStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_blocks_validate_and_fulfill() {
        let fx = fixture().await;
        fx.service.validate(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();
        fx.service.cancel(fx.prescription_id).await.unwrap();

        let err = fx.service.validate(&fx.code_hash, fx.pharmacist_id, None).await.unwrap_err();
        assert_eq!(err, RedemptionError::PrescriptionCancelled);
        let err = fx.service.fulfill(&fx.code_hash, fx.pharmacist_id, None).await.unwrap_err();
        assert_eq!(err, RedemptionError::PrescriptionCancelled);

        let err = fx.service.cancel(fx.prescription_id).await.unwrap_err();
        assert_eq!(err, RedemptionError::PrescriptionCancelled);
    }

    #[tokio::test]
    async fn test_cancel_unreachable_after_fulfillment() {
        let fx = fixture().await;
        fx.service.validate(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();
        fx.service.fulfill(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();
        let err = fx.service.cancel(fx.prescription_id).await.unwrap_err();
        assert_eq!(err, RedemptionError::AlreadyFulfilled);
    }

    #[tokio::test]
    async fn test_wrong_key_payload_rejected() {
        let fx = fixture().await;
        let service = RedemptionService::new(fx.store.clone(), CodeCipher::new(&[0x99u8; 32]));
        let err = service.validate(&fx.code_hash, fx.pharmacist_id, None).await.unwrap_err();
        assert_eq!(err, RedemptionError::PayloadMismatch);
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let fx = fixture().await;
        let err = fx.service.scan("no-such-hash", fx.pharmacist_id, None).await.unwrap_err();
        assert_eq!(err, RedemptionError::CodeNotFound);
    }

    #[tokio::test]
    async fn test_concurrent_fulfill_single_winner() {
        let fx = fixture().await;
        fx.service.validate(&fx.code_hash, fx.pharmacist_id, None).await.unwrap();

        let first = fx.service.fulfill(&fx.code_hash, Uuid::new_v4(), None);
        let second = fx.service.fulfill(&fx.code_hash, Uuid::new_v4(), None);
        let (a, b) = tokio::join!(first, second);

        let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert_eq!(loser, RedemptionError::CodeAlreadyUsed);

        // Both attempts are on the record: validated + winning fulfill +
        // rejected fulfill.
        let logs = fx.service.logs(fx.prescription_id).await.unwrap();
        let fulfill_entries = logs
            .iter()
            .filter(|e| e.action == PharmacyAction::Fulfilled)
            .count();
        assert_eq!(fulfill_entries, 2);
    }
}
