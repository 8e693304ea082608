//! Per-request tenant context.
//!
//! Every data-plane operation receives the context explicitly; there is no
//! ambient default tenant. A request whose claims do not resolve to a tenant
//! fails with `TENANT_CONTEXT_MISSING` before any query runs.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::error::ErrorCode;
use crate::id::{TenantId, UserId};

/// Claim names used to resolve the context from an authenticated request.
///
/// Token issuance itself is a collaborator; only the extracted claims are
/// consumed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimNames {
    pub tenant: String,
    pub user: String,
    /// Fallback for issuers that emit a standard name-identifier claim
    /// instead of `sub`.
    pub name_identifier: String,
    pub email: String,
}

impl Default for ClaimNames {
    fn default() -> Self {
        Self {
            tenant: "tenant_id".to_string(),
            user: "sub".to_string(),
            name_identifier: "name_identifier".to_string(),
            email: "email".to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantContextError {
    #[error("tenant context missing: {0}")]
    Missing(String),
}

impl TenantContextError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::TenantContextMissing
    }
}

/// Immutable per-request identity: tenant partition + acting principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    user_id: UserId,
    email: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self {
            tenant_id,
            user_id,
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Resolve the context from a claims map.
    ///
    /// The tenant claim is mandatory and must parse as a UUID. The user id is
    /// taken from the subject claim, falling back to the name-identifier
    /// claim when the subject is absent. The email claim is optional.
    pub fn from_claims(
        claims: &HashMap<String, String>,
        names: &ClaimNames,
    ) -> Result<Self, TenantContextError> {
        let tenant_raw = claims
            .get(&names.tenant)
            .ok_or_else(|| TenantContextError::Missing(format!("claim '{}' absent", names.tenant)))?;
        let tenant_id = TenantId::from_str(tenant_raw).map_err(|e| {
            TenantContextError::Missing(format!("claim '{}' invalid: {e}", names.tenant))
        })?;

        let (user_claim, user_raw) = claims
            .get(&names.user)
            .map(|raw| (names.user.as_str(), raw))
            .or_else(|| {
                claims
                    .get(&names.name_identifier)
                    .map(|raw| (names.name_identifier.as_str(), raw))
            })
            .ok_or_else(|| {
                TenantContextError::Missing(format!(
                    "claims '{}' and '{}' absent",
                    names.user, names.name_identifier
                ))
            })?;
        let user_id = UserId::from_str(user_raw).map_err(|e| {
            TenantContextError::Missing(format!("claim '{user_claim}' invalid: {e}"))
        })?;

        let mut ctx = Self::new(tenant_id, user_id);
        if let Some(email) = claims.get(&names.email) {
            ctx = ctx.with_email(email.clone());
        }
        Ok(ctx)
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(pairs: &[(&str, String)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn resolves_full_context_from_claims() {
        let tenant = TenantId::new();
        let user = UserId::new();
        let claims = claims(&[
            ("tenant_id", tenant.to_string()),
            ("sub", user.to_string()),
            ("email", "ops@acme.example".to_string()),
        ]);

        let ctx = TenantContext::from_claims(&claims, &ClaimNames::default()).unwrap();
        assert_eq!(ctx.tenant_id(), tenant);
        assert_eq!(ctx.user_id(), user);
        assert_eq!(ctx.email(), Some("ops@acme.example"));
    }

    #[test]
    fn absent_tenant_claim_is_missing_context() {
        let claims = claims(&[("sub", UserId::new().to_string())]);
        let err = TenantContext::from_claims(&claims, &ClaimNames::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TenantContextMissing);
    }

    #[test]
    fn user_id_falls_back_to_name_identifier_claim() {
        let tenant = TenantId::new();
        let user = UserId::new();
        let fallback_only = claims(&[
            ("tenant_id", tenant.to_string()),
            ("name_identifier", user.to_string()),
        ]);

        let ctx = TenantContext::from_claims(&fallback_only, &ClaimNames::default()).unwrap();
        assert_eq!(ctx.user_id(), user);

        // The subject claim wins when both are present.
        let other = UserId::new();
        let both = claims(&[
            ("tenant_id", tenant.to_string()),
            ("sub", other.to_string()),
            ("name_identifier", user.to_string()),
        ]);
        let ctx = TenantContext::from_claims(&both, &ClaimNames::default()).unwrap();
        assert_eq!(ctx.user_id(), other);
    }

    #[test]
    fn missing_both_user_claims_is_missing_context() {
        let claims = claims(&[("tenant_id", TenantId::new().to_string())]);
        let err = TenantContext::from_claims(&claims, &ClaimNames::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TenantContextMissing);
    }

    #[test]
    fn malformed_tenant_claim_is_missing_context() {
        let claims = claims(&[
            ("tenant_id", "not-a-uuid".to_string()),
            ("sub", UserId::new().to_string()),
        ]);
        assert!(TenantContext::from_claims(&claims, &ClaimNames::default()).is_err());
    }
}
