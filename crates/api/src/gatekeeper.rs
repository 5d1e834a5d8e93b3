use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use thiserror::Error;

use careline_domain::identity::ConnectionSession;
use careline_domain::roles::{effective_role, Role};

use crate::error::{ErrorBody, ErrorEnvelope};
use crate::middleware::cookie_value;
use crate::observability;
use crate::state::AppState;

/// Where the realtime credential was found. A hint for diagnostics and for
/// detecting an upward claim - never ground truth for privilege.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    Handshake,
    AdminCookie,
    UserCookie,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialSource::Handshake => "handshake",
            CredentialSource::AdminCookie => "admin",
            CredentialSource::UserCookie => "user",
        }
    }
}

/// Connection-time failures. All of them reject the connection outright with
/// an explicit signal; a gatekept socket never silently hangs.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("credential required")]
    CredentialRequired,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("authentication failed")]
    AuthenticationFailed,
}

impl GateError {
    fn error_code(&self) -> &'static str {
        match self {
            GateError::CredentialRequired => "credential_required",
            GateError::InvalidCredential => "invalid_credential",
            GateError::AuthenticationFailed => "authentication_failed",
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        observability::register_gate_rejection(self.error_code());
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Connection-establishment parameters carried on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
    pub client_type: Option<String>,
}

/// Runs exactly once per incoming realtime connection, before any
/// application event is processed. Resolves the credential, verifies it,
/// and computes the effective role with the anti-spoofing rule: an admin
/// claim (declared client type or admin-cookie carrier) is accepted only
/// when the stored role table returns exactly admin, and is otherwise
/// silently downgraded to user. User claims are trusted without a lookup.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query: &HandshakeQuery,
) -> Result<ConnectionSession, GateError> {
    let (credential, source) =
        extract_credential(headers, query, state).ok_or(GateError::CredentialRequired)?;

    let user = state
        .verifier
        .verify(&credential)
        .map_err(|err| {
            tracing::warn!(error = %err, source = source.as_str(), "realtime credential rejected");
            GateError::InvalidCredential
        })?;

    let claims_admin = source == CredentialSource::AdminCookie
        || query.client_type.as_deref() == Some("admin");

    let role = if claims_admin {
        let stored = state.roles.role_of(&user.user_id).await.map_err(|err| {
            tracing::error!(error = %err, "role lookup failed during gatekeeping");
            GateError::AuthenticationFailed
        })?;
        let granted = effective_role(true, stored);
        if granted != Role::Admin {
            tracing::warn!(
                user_id = %user.user_id,
                source = source.as_str(),
                "admin claim not backed by role table; downgrading to user"
            );
        }
        granted
    } else {
        Role::User
    };

    Ok(ConnectionSession::new(user, role))
}

/// Credential extraction order, first match wins: explicit handshake token,
/// connection query parameter, admin cookie, user cookie.
pub fn extract_credential(
    headers: &HeaderMap,
    query: &HandshakeQuery,
    state: &AppState,
) -> Option<(String, CredentialSource)> {
    if let Some(token) = bearer_token(headers) {
        return Some((token.to_string(), CredentialSource::Handshake));
    }
    if let Some(token) = query.token.as_deref().filter(|token| !token.is_empty()) {
        return Some((token.to_string(), CredentialSource::Handshake));
    }
    if let Some(token) = cookie_value(headers, &state.config.admin_cookie_name) {
        return Some((token.to_string(), CredentialSource::AdminCookie));
    }
    cookie_value(headers, &state.config.user_cookie_name)
        .map(|token| (token.to_string(), CredentialSource::UserCookie))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
}
