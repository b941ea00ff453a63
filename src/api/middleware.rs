//! API Middleware - Bearer-token authentication and role checks

use axum::extract::Request;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::api::response::ApiError;
use crate::auth::{Claims, TokenSigner};
use crate::model::Role;

/// Endpoints reachable without a token.
const PUBLIC_PATHS: [&str; 3] = ["/health", "/api/auth/register", "/api/auth/login"];

/// Verified caller identity, inserted into request extensions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub full_name: String,
}

impl TryFrom<&Claims> for AuthContext {
    type Error = ApiError;

    fn try_from(claims: &Claims) -> Result<Self, ApiError> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ApiError::Unauthenticated("Invalid token subject".to_string()))?;
        Ok(Self {
            user_id,
            email: claims.email.clone(),
            role: claims.role,
            full_name: claims.full_name.clone(),
        })
    }
}

/// Bearer-token middleware: verifies the JWT and stashes the caller
/// identity in request extensions for the handlers.
pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, ApiError> {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let signer = request
        .extensions()
        .get::<TokenSigner>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("Token signer not configured".to_string()))?;

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(auth) if auth.starts_with("Bearer ") => {
            let token = &auth[7..];
            let claims = signer
                .verify(token)
                .map_err(|_| ApiError::Unauthenticated("Invalid or expired token".to_string()))?;
            let context = AuthContext::try_from(&claims)?;
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        _ => Err(ApiError::Unauthenticated(
            "Missing bearer token".to_string(),
        )),
    }
}

/// Reject callers whose role is not in the allowlist.
pub fn require_role(context: &AuthContext, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&context.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "Role '{}' is not permitted for this operation",
            context.role
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            role,
            full_name: "Someone".to_string(),
        }
    }

    #[test]
    fn test_require_role() {
        let admin = context(Role::Admin);
        assert!(require_role(&admin, &[Role::Admin, Role::Doctor]).is_ok());

        let patient = context(Role::Patient);
        let err = require_role(&patient, &[Role::Admin, Role::Doctor]).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn test_context_from_claims() {
        let id = Uuid::new_v4();
        let claims = Claims {
            sub: id.to_string(),
            email: "doc@example.com".to_string(),
            role: Role::Doctor,
            full_name: "Dr. Test".to_string(),
            iat: 0,
            exp: 0,
        };
        let context = AuthContext::try_from(&claims).unwrap();
        assert_eq!(context.user_id, id);
        assert_eq!(context.role, Role::Doctor);

        let bad = Claims {
            sub: "not-a-uuid".to_string(),
            ..claims
        };
        assert!(AuthContext::try_from(&bad).is_err());
    }
}
