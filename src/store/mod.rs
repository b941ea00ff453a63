//! Store Module - In-process relational store
//!
//! All tables live behind one `RwLock`. Unique-index checks run inside the
//! same write critical section as the insert, multi-entity units are
//! all-or-nothing, and marking a redemption code used is a compare-and-set.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{
    DoctorProfile, MedicalVisit, Patient, PharmacyAction, PharmacyLogEntry, Prescription,
    PrescriptionItem, PrescriptionStatus, RedemptionCode, Role, User,
};

#[derive(Clone, Debug, PartialEq)]
pub enum StoreError {
    DuplicateEmail(String),
    DuplicateReference(String),
    DuplicateLicense(String),
    DuplicateInsurance(String),
    DuplicateCodeHash,
    UserAlreadyLinked(Uuid),
    NotFound(&'static str),
    CodeUsed,
    PrescriptionNotPending(PrescriptionStatus),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateEmail(email) => write!(f, "Email already registered: {}", email),
            StoreError::DuplicateReference(reference) => {
                write!(f, "Reference already taken: {}", reference)
            }
            StoreError::DuplicateLicense(license) => {
                write!(f, "License already registered: {}", license)
            }
            StoreError::DuplicateInsurance(number) => {
                write!(f, "Insurance number already registered: {}", number)
            }
            StoreError::DuplicateCodeHash => write!(f, "Code hash already taken"),
            StoreError::UserAlreadyLinked(user_id) => {
                write!(f, "User already linked to a record: {}", user_id)
            }
            StoreError::NotFound(what) => write!(f, "{} not found", what),
            StoreError::CodeUsed => write!(f, "Redemption code already used"),
            StoreError::PrescriptionNotPending(status) => {
                write!(f, "Prescription is not pending (status: {})", status)
            }
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    email_index: HashMap<String, Uuid>,
    /// Doctor profiles keyed by the owning user id (1:1).
    doctor_profiles: HashMap<Uuid, DoctorProfile>,
    license_index: HashMap<String, Uuid>,
    patients: HashMap<Uuid, Patient>,
    reference_index: HashMap<String, Uuid>,
    patient_by_user: HashMap<Uuid, Uuid>,
    insurance_index: HashMap<String, Uuid>,
    visits: HashMap<Uuid, MedicalVisit>,
    prescriptions: HashMap<Uuid, Prescription>,
    prescription_number_index: HashMap<String, Uuid>,
    /// Line items keyed by the owning prescription id.
    items: HashMap<Uuid, Vec<PrescriptionItem>>,
    codes: HashMap<Uuid, RedemptionCode>,
    code_hash_index: HashMap<String, Uuid>,
    code_by_prescription: HashMap<Uuid, Uuid>,
    pharmacy_log: Vec<PharmacyLogEntry>,
}

pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    // --- users ---

    pub async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.email_index.contains_key(&user.email) {
            return Err(StoreError::DuplicateEmail(user.email));
        }
        t.email_index.insert(user.email.clone(), user.id);
        t.users.insert(user.id, user);
        Ok(())
    }

    pub async fn get_user(&self, id: Uuid) -> Option<User> {
        let t = self.tables.read().await;
        t.users.get(&id).cloned()
    }

    pub async fn find_user_by_email(&self, email: &str) -> Option<User> {
        let t = self.tables.read().await;
        let id = t.email_index.get(email)?;
        t.users.get(id).cloned()
    }

    pub async fn update_user<F>(&self, id: Uuid, apply: F) -> Result<User, StoreError>
    where
        F: FnOnce(&mut User),
    {
        let mut t = self.tables.write().await;
        let user = t.users.get_mut(&id).ok_or(StoreError::NotFound("User"))?;
        apply(user);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    pub async fn any_admin(&self) -> bool {
        let t = self.tables.read().await;
        t.users.values().any(|u| u.role == Role::Admin)
    }

    // --- doctor profiles ---

    pub async fn insert_doctor_profile(&self, profile: DoctorProfile) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&profile.user_id) {
            return Err(StoreError::NotFound("User"));
        }
        if t.doctor_profiles.contains_key(&profile.user_id) {
            return Err(StoreError::UserAlreadyLinked(profile.user_id));
        }
        if t.license_index.contains_key(&profile.license_number) {
            return Err(StoreError::DuplicateLicense(profile.license_number));
        }
        t.license_index
            .insert(profile.license_number.clone(), profile.user_id);
        t.doctor_profiles.insert(profile.user_id, profile);
        Ok(())
    }

    pub async fn doctor_profile_for_user(&self, user_id: Uuid) -> Option<DoctorProfile> {
        let t = self.tables.read().await;
        t.doctor_profiles.get(&user_id).cloned()
    }

    pub async fn set_doctor_verified(&self, user_id: Uuid) -> Result<DoctorProfile, StoreError> {
        let mut t = self.tables.write().await;
        let profile = t
            .doctor_profiles
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound("Doctor profile"))?;
        profile.is_verified = true;
        Ok(profile.clone())
    }

    // --- patients ---

    /// Insert a freshly created account together with its patient record.
    /// Either both land or neither does; a reference collision leaves the
    /// user unpersisted so the caller can retry the whole unit.
    pub async fn insert_patient_with_user(
        &self,
        user: User,
        patient: Patient,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.email_index.contains_key(&user.email) {
            return Err(StoreError::DuplicateEmail(user.email));
        }
        if t.reference_index.contains_key(&patient.reference_number) {
            return Err(StoreError::DuplicateReference(patient.reference_number));
        }
        if t.patient_by_user.contains_key(&user.id) {
            return Err(StoreError::UserAlreadyLinked(user.id));
        }
        if let Some(number) = &patient.insurance_number {
            if t.insurance_index.contains_key(number) {
                return Err(StoreError::DuplicateInsurance(number.clone()));
            }
        }

        t.email_index.insert(user.email.clone(), user.id);
        t.users.insert(user.id, user);
        t.reference_index
            .insert(patient.reference_number.clone(), patient.id);
        t.patient_by_user.insert(patient.user_id, patient.id);
        if let Some(number) = &patient.insurance_number {
            t.insurance_index.insert(number.clone(), patient.id);
        }
        t.patients.insert(patient.id, patient);
        Ok(())
    }

    pub async fn get_patient(&self, id: Uuid) -> Option<Patient> {
        let t = self.tables.read().await;
        t.patients.get(&id).cloned()
    }

    pub async fn patient_by_reference(&self, reference: &str) -> Option<Patient> {
        let t = self.tables.read().await;
        let id = t.reference_index.get(reference)?;
        t.patients.get(id).cloned()
    }

    pub async fn update_patient<F>(&self, id: Uuid, apply: F) -> Result<Patient, StoreError>
    where
        F: FnOnce(&mut Patient),
    {
        let mut t = self.tables.write().await;
        let current = t
            .patients
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("Patient"))?;

        let mut updated = current.clone();
        apply(&mut updated);
        updated.updated_at = Utc::now();

        if updated.insurance_number != current.insurance_number {
            if let Some(number) = &updated.insurance_number {
                if let Some(owner) = t.insurance_index.get(number) {
                    if *owner != id {
                        return Err(StoreError::DuplicateInsurance(number.clone()));
                    }
                }
            }
            if let Some(old) = &current.insurance_number {
                t.insurance_index.remove(old);
            }
            if let Some(new) = &updated.insurance_number {
                t.insurance_index.insert(new.clone(), id);
            }
        }

        t.patients.insert(id, updated.clone());
        Ok(updated)
    }

    /// Case-insensitive substring search over name and reference number,
    /// restricted to patients whose linked account is active.
    pub async fn search_patients(&self, query: &str, limit: usize) -> Vec<Patient> {
        let t = self.tables.read().await;
        let needle = query.to_lowercase();
        let mut matches: Vec<&Patient> = t
            .patients
            .values()
            .filter(|p| {
                let active = t.users.get(&p.user_id).map(|u| u.is_active).unwrap_or(false);
                active
                    && (p.full_name.to_lowercase().contains(&needle)
                        || p.reference_number.to_lowercase().contains(&needle))
            })
            .collect();
        matches.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        matches.into_iter().take(limit).cloned().collect()
    }

    // --- visits ---

    pub async fn insert_visit(&self, visit: MedicalVisit) {
        let mut t = self.tables.write().await;
        t.visits.insert(visit.id, visit);
    }

    pub async fn get_visit(&self, id: Uuid) -> Option<MedicalVisit> {
        let t = self.tables.read().await;
        t.visits.get(&id).cloned()
    }

    /// Visits for a patient, newest visit date first.
    pub async fn visits_for_patient(&self, patient_id: Uuid) -> Vec<MedicalVisit> {
        let t = self.tables.read().await;
        let mut visits: Vec<MedicalVisit> = t
            .visits
            .values()
            .filter(|v| v.patient_id == patient_id)
            .cloned()
            .collect();
        visits.sort_by(|a, b| {
            b.visit_date
                .cmp(&a.visit_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        visits
    }

    // --- prescriptions ---

    /// Insert a prescription with its items and redemption code as one unit.
    /// Nothing is persisted when any uniqueness check fails.
    pub async fn insert_prescription_bundle(
        &self,
        prescription: Prescription,
        items: Vec<PrescriptionItem>,
        code: RedemptionCode,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.prescription_number_index
            .contains_key(&prescription.prescription_number)
        {
            return Err(StoreError::DuplicateReference(
                prescription.prescription_number,
            ));
        }
        if t.code_hash_index.contains_key(&code.code_hash) {
            return Err(StoreError::DuplicateCodeHash);
        }

        t.prescription_number_index
            .insert(prescription.prescription_number.clone(), prescription.id);
        t.items.insert(prescription.id, items);
        t.code_hash_index.insert(code.code_hash.clone(), code.id);
        t.code_by_prescription.insert(prescription.id, code.id);
        t.codes.insert(code.id, code);
        t.prescriptions.insert(prescription.id, prescription);
        Ok(())
    }

    pub async fn get_prescription(&self, id: Uuid) -> Option<Prescription> {
        let t = self.tables.read().await;
        t.prescriptions.get(&id).cloned()
    }

    /// Prescriptions for a patient, newest first.
    pub async fn prescriptions_for_patient(&self, patient_id: Uuid) -> Vec<Prescription> {
        let t = self.tables.read().await;
        let mut prescriptions: Vec<Prescription> = t
            .prescriptions
            .values()
            .filter(|p| p.patient_id == patient_id)
            .cloned()
            .collect();
        prescriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        prescriptions
    }

    pub async fn items_for_prescription(&self, prescription_id: Uuid) -> Vec<PrescriptionItem> {
        let t = self.tables.read().await;
        t.items.get(&prescription_id).cloned().unwrap_or_default()
    }

    /// Flip a pending prescription to cancelled. Terminal states stay put.
    pub async fn cancel_prescription(&self, id: Uuid) -> Result<Prescription, StoreError> {
        let mut t = self.tables.write().await;
        let prescription = t
            .prescriptions
            .get_mut(&id)
            .ok_or(StoreError::NotFound("Prescription"))?;
        if prescription.status != PrescriptionStatus::Pending {
            return Err(StoreError::PrescriptionNotPending(prescription.status));
        }
        prescription.status = PrescriptionStatus::Cancelled;
        prescription.updated_at = Utc::now();
        Ok(prescription.clone())
    }

    // --- redemption codes ---

    pub async fn code_by_hash(&self, hash: &str) -> Option<RedemptionCode> {
        let t = self.tables.read().await;
        let id = t.code_hash_index.get(hash)?;
        t.codes.get(id).cloned()
    }

    pub async fn code_for_prescription(&self, prescription_id: Uuid) -> Option<RedemptionCode> {
        let t = self.tables.read().await;
        let id = t.code_by_prescription.get(&prescription_id)?;
        t.codes.get(id).cloned()
    }

    /// Bump the scan counter and append the log entry in one critical
    /// section. Re-checks the used flag under the write lock, so a scan
    /// racing a fulfillment cannot touch a code that just got used.
    pub async fn record_scan(
        &self,
        code_id: Uuid,
        entry: PharmacyLogEntry,
    ) -> Result<u32, StoreError> {
        let mut t = self.tables.write().await;
        let code = t
            .codes
            .get_mut(&code_id)
            .ok_or(StoreError::NotFound("Redemption code"))?;
        if code.is_used {
            return Err(StoreError::CodeUsed);
        }
        code.scan_count += 1;
        let count = code.scan_count;
        t.pharmacy_log.push(entry);
        Ok(count)
    }

    /// Compare-and-set fulfillment: marks the code used, advances the
    /// prescription to fulfilled, and appends the log entry atomically.
    /// Exactly one of two racing callers succeeds.
    pub async fn fulfill(
        &self,
        code_id: Uuid,
        entry: PharmacyLogEntry,
    ) -> Result<(Prescription, RedemptionCode), StoreError> {
        let mut t = self.tables.write().await;

        let (is_used, prescription_id) = {
            let code = t
                .codes
                .get(&code_id)
                .ok_or(StoreError::NotFound("Redemption code"))?;
            (code.is_used, code.prescription_id)
        };
        if is_used {
            return Err(StoreError::CodeUsed);
        }
        let status = t
            .prescriptions
            .get(&prescription_id)
            .map(|p| p.status)
            .ok_or(StoreError::NotFound("Prescription"))?;
        if status != PrescriptionStatus::Pending {
            return Err(StoreError::PrescriptionNotPending(status));
        }

        let now = Utc::now();
        let code = match t.codes.get_mut(&code_id) {
            Some(code) => {
                code.is_used = true;
                code.clone()
            }
            None => return Err(StoreError::NotFound("Redemption code")),
        };
        let prescription = match t.prescriptions.get_mut(&prescription_id) {
            Some(prescription) => {
                prescription.status = PrescriptionStatus::Fulfilled;
                prescription.updated_at = now;
                prescription.clone()
            }
            None => return Err(StoreError::NotFound("Prescription")),
        };
        t.pharmacy_log.push(entry);
        Ok((prescription, code))
    }

    // --- pharmacy log ---

    pub async fn append_log(&self, entry: PharmacyLogEntry) {
        let mut t = self.tables.write().await;
        t.pharmacy_log.push(entry);
    }

    pub async fn logs_for_prescription(&self, prescription_id: Uuid) -> Vec<PharmacyLogEntry> {
        let t = self.tables.read().await;
        t.pharmacy_log
            .iter()
            .filter(|e| e.prescription_id == prescription_id)
            .cloned()
            .collect()
    }

    pub async fn has_validated_entry(&self, prescription_id: Uuid) -> bool {
        let t = self.tables.read().await;
        t.pharmacy_log
            .iter()
            .any(|e| e.prescription_id == prescription_id && e.action == PharmacyAction::Validated)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gender, VisitType};
    use chrono::NaiveDate;

    fn user(email: &str, role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: "salt$key".to_string(),
            role,
            full_name: "Test User".to_string(),
            phone: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn patient(user_id: Uuid, reference: &str) -> Patient {
        let now = Utc::now();
        Patient {
            id: Uuid::new_v4(),
            reference_number: reference.to_string(),
            user_id,
            full_name: "Uwase Marie".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 12).unwrap(),
            gender: Gender::Female,
            insurance_provider: None,
            insurance_number: None,
            allergies: vec![],
            existing_conditions: vec![],
            emergency_contact: None,
            emergency_phone: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn prescription(patient_id: Uuid, doctor_id: Uuid, number: &str, hash: &str) -> Prescription {
        let now = Utc::now();
        Prescription {
            id: Uuid::new_v4(),
            prescription_number: number.to_string(),
            patient_id,
            doctor_id,
            visit_id: Uuid::new_v4(),
            diagnosis: "Malaria".to_string(),
            doctor_notes: None,
            status: PrescriptionStatus::Pending,
            code_hash: hash.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn code(prescription_id: Uuid, hash: &str) -> RedemptionCode {
        let now = Utc::now();
        RedemptionCode {
            id: Uuid::new_v4(),
            code_hash: hash.to_string(),
            prescription_id,
            encrypted_data: "sealed".to_string(),
            expires_at: now + chrono::Duration::days(30),
            is_used: false,
            scan_count: 0,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = Store::new();
        store.insert_user(user("a@example.com", Role::Doctor)).await.unwrap();
        let err = store
            .insert_user(user("a@example.com", Role::Patient))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateEmail("a@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_patient_insert_is_all_or_nothing() {
        let store = Store::new();
        let first = user("first@example.com", Role::Patient);
        store
            .insert_patient_with_user(first.clone(), patient(first.id, "PAT-20260101-0001"))
            .await
            .unwrap();

        let second = user("second@example.com", Role::Patient);
        let err = store
            .insert_patient_with_user(second.clone(), patient(second.id, "PAT-20260101-0001"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReference(_)));
        // The colliding unit must leave no user behind.
        assert!(store.find_user_by_email("second@example.com").await.is_none());
    }

    #[tokio::test]
    async fn test_prescription_bundle_atomicity() {
        let store = Store::new();
        let doctor = user("doc@example.com", Role::Doctor);
        let p = patient(Uuid::new_v4(), "PAT-20260101-0002");
        let patient_id = p.id;

        let rx1 = prescription(patient_id, doctor.id, "RX-20260101-0001", "hash-1");
        let c1 = code(rx1.id, "hash-1");
        store
            .insert_prescription_bundle(rx1, vec![], c1)
            .await
            .unwrap();

        let rx2 = prescription(patient_id, doctor.id, "RX-20260101-0001", "hash-2");
        let c2 = code(rx2.id, "hash-2");
        let err = store
            .insert_prescription_bundle(rx2, vec![], c2)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReference(_)));
        assert!(store.code_by_hash("hash-2").await.is_none());
        assert_eq!(store.prescriptions_for_patient(patient_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_fulfill_is_compare_and_set() {
        let store = Store::new();
        let rx = prescription(Uuid::new_v4(), Uuid::new_v4(), "RX-20260101-0010", "h10");
        let c = code(rx.id, "h10");
        let code_id = c.id;
        let rx_id = rx.id;
        store.insert_prescription_bundle(rx, vec![], c).await.unwrap();

        let entry = PharmacyLogEntry::new(rx_id, Uuid::new_v4(), PharmacyAction::Fulfilled, None);
        let (fulfilled, used_code) = store.fulfill(code_id, entry.clone()).await.unwrap();
        assert_eq!(fulfilled.status, PrescriptionStatus::Fulfilled);
        assert!(used_code.is_used);

        let err = store.fulfill(code_id, entry).await.unwrap_err();
        assert_eq!(err, StoreError::CodeUsed);
        assert_eq!(store.logs_for_prescription(rx_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_fulfill_rejected_after_cancel() {
        let store = Store::new();
        let rx = prescription(Uuid::new_v4(), Uuid::new_v4(), "RX-20260101-0011", "h11");
        let c = code(rx.id, "h11");
        let code_id = c.id;
        let rx_id = rx.id;
        store.insert_prescription_bundle(rx, vec![], c).await.unwrap();

        store.cancel_prescription(rx_id).await.unwrap();
        let entry = PharmacyLogEntry::new(rx_id, Uuid::new_v4(), PharmacyAction::Fulfilled, None);
        let err = store.fulfill(code_id, entry).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::PrescriptionNotPending(PrescriptionStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_cancel_only_from_pending() {
        let store = Store::new();
        let rx = prescription(Uuid::new_v4(), Uuid::new_v4(), "RX-20260101-0012", "h12");
        let rx_id = rx.id;
        let c = code(rx.id, "h12");
        store.insert_prescription_bundle(rx, vec![], c).await.unwrap();

        store.cancel_prescription(rx_id).await.unwrap();
        let err = store.cancel_prescription(rx_id).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::PrescriptionNotPending(PrescriptionStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_search_skips_inactive_and_ignores_case() {
        let store = Store::new();
        let active = user("uwase@example.com", Role::Patient);
        store
            .insert_patient_with_user(active.clone(), patient(active.id, "PAT-20260101-0100"))
            .await
            .unwrap();

        let mut inactive = user("gone@example.com", Role::Patient);
        inactive.is_active = false;
        let mut hidden = patient(inactive.id, "PAT-20260101-0101");
        hidden.full_name = "Uwamahoro Jean".to_string();
        store.insert_patient_with_user(inactive, hidden).await.unwrap();

        let results = store.search_patients("UWA", 20).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].full_name, "Uwase Marie");

        let by_reference = store.search_patients("pat-20260101", 20).await;
        assert_eq!(by_reference.len(), 1);
    }

    #[tokio::test]
    async fn test_record_scan_increments() {
        let store = Store::new();
        let rx = prescription(Uuid::new_v4(), Uuid::new_v4(), "RX-20260101-0013", "h13");
        let rx_id = rx.id;
        let c = code(rx.id, "h13");
        let code_id = c.id;
        store.insert_prescription_bundle(rx, vec![], c).await.unwrap();

        let entry = PharmacyLogEntry::new(rx_id, Uuid::new_v4(), PharmacyAction::Scanned, None);
        assert_eq!(store.record_scan(code_id, entry.clone()).await.unwrap(), 1);
        assert_eq!(store.record_scan(code_id, entry).await.unwrap(), 2);
        assert_eq!(store.logs_for_prescription(rx_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_record_scan_refuses_used_code() {
        let store = Store::new();
        let rx = prescription(Uuid::new_v4(), Uuid::new_v4(), "RX-20260101-0014", "h14");
        let rx_id = rx.id;
        let c = code(rx.id, "h14");
        let code_id = c.id;
        store.insert_prescription_bundle(rx, vec![], c).await.unwrap();

        store
            .fulfill(
                code_id,
                PharmacyLogEntry::new(rx_id, Uuid::new_v4(), PharmacyAction::Fulfilled, None),
            )
            .await
            .unwrap();

        // A scan whose pre-check raced the fulfillment ends up here with a
        // now-used code; the critical section must turn it away.
        let entry = PharmacyLogEntry::new(rx_id, Uuid::new_v4(), PharmacyAction::Scanned, None);
        let err = store.record_scan(code_id, entry).await.unwrap_err();
        assert_eq!(err, StoreError::CodeUsed);
        assert_eq!(store.code_by_hash("h14").await.unwrap().scan_count, 0);
        // Only the fulfillment entry is on the record.
        assert_eq!(store.logs_for_prescription(rx_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_validated_entry_lookup() {
        let store = Store::new();
        let rx_id = Uuid::new_v4();
        assert!(!store.has_validated_entry(rx_id).await);
        store
            .append_log(PharmacyLogEntry::new(
                rx_id,
                Uuid::new_v4(),
                PharmacyAction::Scanned,
                None,
            ))
            .await;
        assert!(!store.has_validated_entry(rx_id).await);
        store
            .append_log(PharmacyLogEntry::new(
                rx_id,
                Uuid::new_v4(),
                PharmacyAction::Validated,
                None,
            ))
            .await;
        assert!(store.has_validated_entry(rx_id).await);
    }

    #[tokio::test]
    async fn test_insurance_number_unique_across_updates() {
        let store = Store::new();
        let u1 = user("p1@example.com", Role::Patient);
        let mut p1 = patient(u1.id, "PAT-20260101-0200");
        p1.insurance_number = Some("INS-111".to_string());
        store.insert_patient_with_user(u1, p1).await.unwrap();

        let u2 = user("p2@example.com", Role::Patient);
        let p2 = patient(u2.id, "PAT-20260101-0201");
        let p2_id = p2.id;
        store.insert_patient_with_user(u2, p2).await.unwrap();

        let err = store
            .update_patient(p2_id, |p| p.insurance_number = Some("INS-111".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateInsurance("INS-111".to_string()));
        // Conflicting update must not stick.
        assert_eq!(store.get_patient(p2_id).await.unwrap().insurance_number, None);
    }

    #[tokio::test]
    async fn test_visit_ordering_newest_first() {
        let store = Store::new();
        let patient_id = Uuid::new_v4();
        let doctor_id = Uuid::new_v4();
        for (day, complaint) in [(1, "first"), (3, "third"), (2, "second")] {
            store
                .insert_visit(MedicalVisit {
                    id: Uuid::new_v4(),
                    patient_id,
                    doctor_id,
                    visit_date: NaiveDate::from_ymd_opt(2026, 2, day).unwrap(),
                    visit_type: VisitType::Consultation,
                    chief_complaint: complaint.to_string(),
                    symptoms: None,
                    diagnosis: None,
                    treatment_notes: None,
                    recommendations: None,
                    created_at: Utc::now(),
                })
                .await;
        }
        let visits = store.visits_for_patient(patient_id).await;
        let complaints: Vec<&str> = visits.iter().map(|v| v.chief_complaint.as_str()).collect();
        assert_eq!(complaints, vec!["third", "second", "first"]);
    }
}
