//! Auth Module - Accounts, credentials, and bearer tokens
//!
//! Registration, login, profile management, admin activation toggles, and
//! doctor profiles. Tokens are HS256 JWTs carrying {id, email, role,
//! fullName}; login failures never reveal which precondition failed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Crypto;
use crate::model::{DoctorProfile, Role, User, UserPublic};
use crate::store::{Store, StoreError};

/// Message returned for every login failure, whatever the cause.
const LOGIN_FAILED: &str = "Invalid email or password";

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub enum AuthError {
    Validation(String),
    InvalidCredentials,
    EmailTaken(String),
    UserNotFound,
    DoctorProfileNotFound,
    ProfileExists,
    LicenseTaken(String),
    Token(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Validation(message) => write!(f, "{}", message),
            AuthError::InvalidCredentials => write!(f, "{}", LOGIN_FAILED),
            AuthError::EmailTaken(email) => write!(f, "Email already registered: {}", email),
            AuthError::UserNotFound => write!(f, "User not found"),
            AuthError::DoctorProfileNotFound => write!(f, "Doctor profile not found"),
            AuthError::ProfileExists => write!(f, "User already has a doctor profile"),
            AuthError::LicenseTaken(license) => {
                write!(f, "License already registered: {}", license)
            }
            AuthError::Token(message) => write!(f, "Token error: {}", message),
        }
    }
}

impl std::error::Error for AuthError {}

/// JWT payload. `sub` is the user id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub iat: usize,
    pub exp: usize,
}

/// HS256 token mint/verify around the configured secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: String,
    ttl_hours: i64,
}

impl TokenSigner {
    pub fn new(secret: String, ttl_hours: i64) -> Self {
        Self { secret, ttl_hours }
    }

    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            full_name: user.full_name.clone(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::hours(self.ttl_hours)).timestamp() as usize,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Token(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| AuthError::Token(e.to_string()))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorProfileInput {
    pub user_id: Uuid,
    pub license_number: String,
    pub specialization: String,
    pub hospital_name: String,
}

/// User plus the token minted for them.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: UserPublic,
    pub token: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub user: UserPublic,
    pub doctor_profile: Option<DoctorProfile>,
}

pub struct AuthService {
    store: Arc<Store>,
    signer: TokenSigner,
}

impl AuthService {
    pub fn new(store: Arc<Store>, signer: TokenSigner) -> Self {
        Self { store, signer }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Create a staff or patient account. Admin accounts are seeded at
    /// startup, never registered over the wire.
    pub async fn register(&self, input: RegisterInput) -> Result<Session, AuthError> {
        validate_email(&input.email)?;
        validate_password(&input.password)?;
        if input.full_name.trim().is_empty() {
            return Err(AuthError::Validation("Full name is required".to_string()));
        }
        if input.role == Role::Admin {
            return Err(AuthError::Validation(
                "Admin accounts cannot be self-registered".to_string(),
            ));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: input.email.trim().to_lowercase(),
            password_hash: Crypto::hash_password(&input.password),
            role: input.role,
            full_name: input.full_name.trim().to_string(),
            phone: input.phone,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_user(user.clone()).await {
            Ok(()) => {}
            Err(StoreError::DuplicateEmail(email)) => return Err(AuthError::EmailTaken(email)),
            Err(e) => return Err(AuthError::Validation(e.to_string())),
        }
        tracing::info!(user_id = %user.id, role = %user.role, "Registered account");

        let token = self.signer.issue(&user)?;
        Ok(Session {
            user: UserPublic::from(&user),
            token,
        })
    }

    /// Authenticate and mint a token. Unknown email, deactivated account,
    /// and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let user = self
            .store
            .find_user_by_email(&email.trim().to_lowercase())
            .await
            .ok_or(AuthError::InvalidCredentials)?;
        if !user.is_active || !Crypto::verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        let token = self.signer.issue(&user)?;
        tracing::info!(user_id = %user.id, "Login succeeded");
        Ok(Session {
            user: UserPublic::from(&user),
            token,
        })
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<ProfileView, AuthError> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .ok_or(AuthError::UserNotFound)?;
        let doctor_profile = self.store.doctor_profile_for_user(user_id).await;
        Ok(ProfileView {
            user: UserPublic::from(&user),
            doctor_profile,
        })
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<UserPublic, AuthError> {
        if let Some(name) = &update.full_name {
            if name.trim().is_empty() {
                return Err(AuthError::Validation("Full name cannot be empty".to_string()));
            }
        }
        let user = self
            .store
            .update_user(user_id, |user| {
                if let Some(name) = update.full_name {
                    user.full_name = name.trim().to_string();
                }
                if let Some(phone) = update.phone {
                    user.phone = Some(phone);
                }
            })
            .await
            .map_err(|_| AuthError::UserNotFound)?;
        Ok(UserPublic::from(&user))
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        validate_password(new)?;
        let user = self
            .store
            .get_user(user_id)
            .await
            .ok_or(AuthError::UserNotFound)?;
        if !Crypto::verify_password(current, &user.password_hash) {
            return Err(AuthError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }
        let hash = Crypto::hash_password(new);
        self.store
            .update_user(user_id, |user| user.password_hash = hash)
            .await
            .map_err(|_| AuthError::UserNotFound)?;
        Ok(())
    }

    /// Soft-delete toggle. Accounts are never removed from the store.
    pub async fn set_active(&self, user_id: Uuid, active: bool) -> Result<UserPublic, AuthError> {
        let user = self
            .store
            .update_user(user_id, |user| user.is_active = active)
            .await
            .map_err(|_| AuthError::UserNotFound)?;
        tracing::info!(user_id = %user_id, active, "Account activation changed");
        Ok(UserPublic::from(&user))
    }

    pub async fn create_doctor_profile(
        &self,
        input: DoctorProfileInput,
    ) -> Result<DoctorProfile, AuthError> {
        if input.license_number.trim().is_empty() {
            return Err(AuthError::Validation("License number is required".to_string()));
        }
        let user = self
            .store
            .get_user(input.user_id)
            .await
            .ok_or(AuthError::UserNotFound)?;
        if user.role != Role::Doctor {
            return Err(AuthError::Validation(
                "Doctor profiles can only be attached to doctor accounts".to_string(),
            ));
        }

        let profile = DoctorProfile {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            license_number: input.license_number.trim().to_string(),
            specialization: input.specialization,
            hospital_name: input.hospital_name,
            is_verified: false,
            created_at: Utc::now(),
        };
        match self.store.insert_doctor_profile(profile.clone()).await {
            Ok(()) => Ok(profile),
            Err(StoreError::UserAlreadyLinked(_)) => Err(AuthError::ProfileExists),
            Err(StoreError::DuplicateLicense(license)) => Err(AuthError::LicenseTaken(license)),
            Err(StoreError::NotFound(_)) => Err(AuthError::UserNotFound),
            Err(e) => Err(AuthError::Validation(e.to_string())),
        }
    }

    pub async fn doctor_profile(&self, user_id: Uuid) -> Result<DoctorProfile, AuthError> {
        self.store
            .doctor_profile_for_user(user_id)
            .await
            .ok_or(AuthError::DoctorProfileNotFound)
    }

    pub async fn verify_doctor(&self, user_id: Uuid) -> Result<DoctorProfile, AuthError> {
        self.store
            .set_doctor_verified(user_id)
            .await
            .map_err(|_| AuthError::DoctorProfileNotFound)
    }
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    let valid = email.contains('@')
        && email.rsplit('@').next().map(|d| d.contains('.')).unwrap_or(false)
        && !email.starts_with('@')
        && !email.ends_with('.');
    if valid {
        Ok(())
    } else {
        Err(AuthError::Validation("Invalid email address".to_string()))
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
