//! Authenticated caller.
//!
//! Login is handled upstream; the caller's identity and role arrive as
//! request headers and are trusted as given.

use crate::core::{AdminId, Result, UserId, VigilError};
use crate::trustee::normalize_contact;
use crate::web::error::WebError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PRINCIPAL_HEADER: &str = "x-vigil-principal";
pub const ROLE_HEADER: &str = "x-vigil-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Account owner
    User,
    /// Designated verifier, identified by contact email
    Trustee,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Trustee => "trustee",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "trustee" => Ok(Self::Trustee),
            "admin" => Ok(Self::Admin),
            other => Err(VigilError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    id: String,
    role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn require(&self, role: Role) -> Result<()> {
        if self.role != role {
            return Err(VigilError::Forbidden(format!(
                "{} role required, caller is {}",
                role, self.role
            )));
        }
        Ok(())
    }

    pub fn as_user(&self) -> Result<UserId> {
        self.require(Role::User)?;
        Ok(UserId::from(self.id.as_str()))
    }

    pub fn as_admin(&self) -> Result<AdminId> {
        self.require(Role::Admin)?;
        Ok(AdminId::from(self.id.as_str()))
    }

    /// The trustee's normalized contact address.
    pub fn as_trustee(&self) -> Result<String> {
        self.require(Role::Trustee)?;
        normalize_contact(&self.id)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let id = header(PRINCIPAL_HEADER)
            .ok_or_else(|| WebError::Unauthorized(format!("missing {PRINCIPAL_HEADER} header")))?;
        let role = header(ROLE_HEADER)
            .ok_or_else(|| WebError::Unauthorized(format!("missing {ROLE_HEADER} header")))?
            .parse::<Role>()
            .map_err(|e| WebError::Unauthorized(e.to_string()))?;

        Ok(Principal::new(id, role))
    }
}
