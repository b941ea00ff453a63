//! Domain Model - Records and enums for the prescription service

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Pharmacist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Pharmacist => "pharmacist",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "patient" => Some(Role::Patient),
            "doctor" => Some(Role::Doctor),
            "pharmacist" => Some(Role::Pharmacist),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitType {
    Consultation,
    Emergency,
    Followup,
}

impl Default for VisitType {
    fn default() -> Self {
        VisitType::Consultation
    }
}

/// Prescription lifecycle. Transitions are forward-only: pending may become
/// fulfilled or cancelled, both of which are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrescriptionStatus {
    Pending,
    Fulfilled,
    Cancelled,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Pending => "pending",
            PrescriptionStatus::Fulfilled => "fulfilled",
            PrescriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PharmacyAction {
    Scanned,
    Validated,
    Fulfilled,
}

impl PharmacyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PharmacyAction::Scanned => "scanned",
            PharmacyAction::Validated => "validated",
            PharmacyAction::Fulfilled => "fulfilled",
        }
    }
}

impl std::fmt::Display for PharmacyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account record. Never serialized directly; use [`UserPublic`] for
/// anything that leaves the process.
#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub full_name: String,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire-safe view of a user (no credentials).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub full_name: String,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserPublic {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Professional credentials attached to a doctor account.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub license_number: String,
    pub specialization: String,
    pub hospital_name: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    /// Human-readable unique identifier, `PAT-YYYYMMDD-NNNN`.
    pub reference_number: String,
    pub user_id: Uuid,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub insurance_provider: Option<String>,
    pub insurance_number: Option<String>,
    pub allergies: Vec<String>,
    pub existing_conditions: Vec<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compact patient row for search results and pharmacy reports.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: Uuid,
    pub reference_number: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
}

impl From<&Patient> for PatientSummary {
    fn from(patient: &Patient) -> Self {
        Self {
            id: patient.id,
            reference_number: patient.reference_number.clone(),
            full_name: patient.full_name.clone(),
            date_of_birth: patient.date_of_birth,
        }
    }
}

/// A clinical encounter. Immutable once recorded.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalVisit {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub visit_date: NaiveDate,
    pub visit_type: VisitType,
    pub chief_complaint: String,
    pub symptoms: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_notes: Option<String>,
    pub recommendations: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: Uuid,
    /// Human-readable unique identifier, `RX-YYYYMMDD-NNNN`.
    pub prescription_number: String,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub visit_id: Uuid,
    pub diagnosis: String,
    pub doctor_notes: Option<String>,
    pub status: PrescriptionStatus,
    /// Hash of the redemption code bound to this prescription.
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionItem {
    pub id: Uuid,
    pub prescription_id: Uuid,
    pub medicine_name: String,
    pub dosage: String,
    pub frequency: String,
    pub quantity: u32,
    pub instructions: Option<String>,
}

/// One-time-use token backing the QR code handed to the patient.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionCode {
    pub id: Uuid,
    pub code_hash: String,
    pub prescription_id: Uuid,
    /// AES-256-GCM sealed [`CodePayload`], base64 encoded.
    pub encrypted_data: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub scan_count: u32,
    pub created_at: DateTime<Utc>,
}

impl RedemptionCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Plaintext sealed inside [`RedemptionCode::encrypted_data`]. Validation
/// decrypts it and cross-checks the bound prescription identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePayload {
    pub prescription_id: Uuid,
    pub prescription_number: String,
    pub patient_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// Append-only fact about a pharmacy action, successful or rejected.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PharmacyLogEntry {
    pub id: Uuid,
    pub prescription_id: Uuid,
    pub pharmacist_id: Uuid,
    pub action: PharmacyAction,
    pub notes: Option<String>,
    pub action_timestamp: DateTime<Utc>,
}

impl PharmacyLogEntry {
    pub fn new(
        prescription_id: Uuid,
        pharmacist_id: Uuid,
        action: PharmacyAction,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prescription_id,
            pharmacist_id,
            action,
            notes,
            action_timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_roundtrip() {
        for role in [Role::Patient, Role::Doctor, Role::Pharmacist, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn test_enum_wire_names() {
        let json = serde_json::to_string(&PrescriptionStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        let json = serde_json::to_string(&PharmacyAction::Scanned).unwrap();
        assert_eq!(json, "\"scanned\"");
    }

    #[test]
    fn test_code_expiry() {
        let now = Utc::now();
        let code = RedemptionCode {
            id: Uuid::new_v4(),
            code_hash: "abc".to_string(),
            prescription_id: Uuid::new_v4(),
            encrypted_data: String::new(),
            expires_at: now - chrono::Duration::seconds(1),
            is_used: false,
            scan_count: 0,
            created_at: now,
        };
        assert!(code.is_expired(now));
        assert!(!code.is_expired(now - chrono::Duration::days(1)));
    }

    #[test]
    fn test_user_public_hides_credentials() {
        let user = User {
            id: Uuid::new_v4(),
            email: "doc@example.com".to_string(),
            password_hash: "salt$key".to_string(),
            role: Role::Doctor,
            full_name: "Dr. Test".to_string(),
            phone: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&UserPublic::from(&user)).unwrap();
        assert!(!json.contains("salt$key"));
        assert!(json.contains("\"fullName\":\"Dr. Test\""));
    }
}
