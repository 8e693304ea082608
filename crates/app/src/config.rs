//! Runtime configuration (environment-driven, with dev defaults).

use rideledger_core::{ClaimNames, Currency};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Primary data store connection string.
    pub database_url: String,
    /// Claim names used to resolve the per-request tenant context.
    pub claims: ClaimNames,
    /// Currency assigned to accounts that do not specify one.
    pub default_currency: Currency,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            tracing::warn!("DATABASE_URL not set; using local dev default");
            "postgres://localhost:5432/rideledger".to_string()
        });

        let claims = ClaimNames {
            tenant: env_or("TENANT_CLAIM", "tenant_id"),
            user: env_or("USER_CLAIM", "sub"),
            name_identifier: env_or("NAME_IDENTIFIER_CLAIM", "name_identifier"),
            email: env_or("EMAIL_CLAIM", "email"),
        };

        let default_currency = match std::env::var("DEFAULT_CURRENCY") {
            Ok(raw) => Currency::new(&raw).unwrap_or_else(|e| {
                tracing::warn!(%raw, error = %e, "invalid DEFAULT_CURRENCY; falling back to USD");
                Currency::usd()
            }),
            Err(_) => Currency::usd(),
        };

        Self {
            database_url,
            claims,
            default_currency,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
