//! Admin credential gate.
//!
//! The feed only needs a yes/no answer plus who is asking. Tokens come from
//! `Authorization: Bearer <jwt>` or, for browser WebSocket handshakes that
//! cannot set headers, a `token` query parameter.

use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::AuthRejected;

/// Raw connection-time credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token, if one was presented.
    pub token: Option<String>,
}

impl Credentials {
    /// Credentials carrying `token`.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Read the bearer header, falling back to the query parameter.
    pub fn from_request(headers: &HeaderMap, query_token: Option<String>) -> Self {
        let header_token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string);
        Self {
            token: header_token.or(query_token.filter(|t| !t.is_empty())),
        }
    }
}

/// An accepted administrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminIdentity {
    /// Token subject (the admin's email in practice).
    pub subject: String,
    /// Granted role.
    pub role: String,
}

/// Decides whether a connection belongs to an administrator.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialVerifier: Send + Sync {
    /// Accept or reject `credentials`.
    fn verify(&self, credentials: &Credentials) -> Result<AdminIdentity, AuthRejected>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AdminClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    exp: u64,
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    allowed_roles: Vec<String>,
}

impl JwtVerifier {
    /// Verifier for tokens signed with `secret` whose `role` is in `allowed_roles`.
    pub fn new(secret: &str, allowed_roles: Vec<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            allowed_roles,
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, credentials: &Credentials) -> Result<AdminIdentity, AuthRejected> {
        let token = credentials
            .token
            .as_deref()
            .ok_or(AuthRejected::MissingCredential)?;
        let data = jsonwebtoken::decode::<AdminClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthRejected::InvalidToken(e.to_string()))?;
        let role = data.claims.role.unwrap_or_default();
        if !self.allowed_roles.iter().any(|r| *r == role) {
            return Err(AuthRejected::InsufficientRole(if role.is_empty() {
                "none".into()
            } else {
                role
            }));
        }
        Ok(AdminIdentity {
            subject: data.claims.sub,
            role,
        })
    }
}

/// Mint an HS256 token for `subject` with `role`, valid for `ttl`.
pub fn issue_admin_token(
    secret: &str,
    subject: &str,
    role: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = jsonwebtoken::get_current_timestamp();
    let claims = AdminClaims {
        sub: subject.to_string(),
        role: Some(role.to_string()),
        exp: now + ttl.as_secs(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(SECRET, vec!["admin".into(), "superadmin".into()])
    }

    fn token(role: &str) -> String {
        issue_admin_token(SECRET, "root@planvix.io", role, Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn accepts_admin_token() {
        let identity = verifier().verify(&Credentials::bearer(token("admin"))).unwrap();
        assert_eq!(identity.subject, "root@planvix.io");
        assert_eq!(identity.role, "admin");
    }

    #[test]
    fn accepts_superadmin_token() {
        assert!(verifier().verify(&Credentials::bearer(token("superadmin"))).is_ok());
    }

    #[test]
    fn rejects_user_role() {
        assert_matches!(
            verifier().verify(&Credentials::bearer(token("user"))),
            Err(AuthRejected::InsufficientRole(role)) if role == "user"
        );
    }

    #[test]
    fn rejects_missing_token() {
        assert_eq!(
            verifier().verify(&Credentials::default()),
            Err(AuthRejected::MissingCredential)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let forged =
            issue_admin_token("other", "x@y.z", "admin", Duration::from_secs(60)).unwrap();
        assert_matches!(
            verifier().verify(&Credentials::bearer(forged)),
            Err(AuthRejected::InvalidToken(_))
        );
    }

    #[test]
    fn rejects_expired_token() {
        let claims = AdminClaims {
            sub: "x@y.z".into(),
            role: Some("admin".into()),
            exp: jsonwebtoken::get_current_timestamp() - 3600,
        };
        let expired = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_matches!(
            verifier().verify(&Credentials::bearer(expired)),
            Err(AuthRejected::InvalidToken(_))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_matches!(
            verifier().verify(&Credentials::bearer("not.a.jwt")),
            Err(AuthRejected::InvalidToken(_))
        );
    }

    #[test]
    fn header_preferred_over_query() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        let creds = Credentials::from_request(&headers, Some("from-query".into()));
        assert_eq!(creds.token.as_deref(), Some("from-header"));
    }

    #[test]
    fn query_used_without_header() {
        let creds = Credentials::from_request(&HeaderMap::new(), Some("from-query".into()));
        assert_eq!(creds.token.as_deref(), Some("from-query"));
    }

    #[test]
    fn non_bearer_header_ignored() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(Credentials::from_request(&headers, None), Credentials::default());
    }
}
