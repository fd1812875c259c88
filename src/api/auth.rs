//! Caller identity as forwarded by the upstream auth layer.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind, DomainError};
use crate::middleware::error::get_request_id_from_headers;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Admin,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "client" => Some(Role::Client),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Client scope for queries; admins see everything.
    pub fn client_scope(&self) -> Option<Uuid> {
        match self.role {
            Role::Admin => None,
            Role::Client => Some(self.user_id),
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::new(AppErrorKind::Domain(DomainError::Forbidden {
                reason: "admin role required".to_string(),
            })))
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = get_request_id_from_headers(&parts.headers);
        let unauthorized = || {
            let err = AppError::new(AppErrorKind::Domain(DomainError::Unauthorized));
            match &request_id {
                Some(id) => err.with_request_id(id.clone()),
                None => err,
            }
        };

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(unauthorized)?;

        // A missing role header means an ordinary client.
        let role = match parts.headers.get(USER_ROLE_HEADER) {
            None => Role::Client,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(Role::parse)
                .ok_or_else(unauthorized)?,
        };

        Ok(Caller { user_id, role })
    }
}
