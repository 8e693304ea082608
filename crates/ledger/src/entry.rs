use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use rideledger_core::{
    AccountId, DomainError, DomainResult, LedgerEntryId, Money, TenantId, UserId,
};

/// Maximum length of a source reference (ride id / payment reference).
pub const MAX_SOURCE_REFERENCE_LEN: usize = 100;

/// Ledger-account kind a posting lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAccount {
    AccountsReceivable,
    ServiceRevenue,
    Cash,
}

impl LedgerAccount {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAccount::AccountsReceivable => "accounts_receivable",
            LedgerAccount::ServiceRevenue => "service_revenue",
            LedgerAccount::Cash => "cash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accounts_receivable" => Some(LedgerAccount::AccountsReceivable),
            "service_revenue" => Some(LedgerAccount::ServiceRevenue),
            "cash" => Some(LedgerAccount::Cash),
            _ => None,
        }
    }
}

/// Business origin of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Ride,
    Payment,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Ride => "ride",
            SourceType::Payment => "payment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ride" => Some(SourceType::Ride),
            "payment" => Some(SourceType::Payment),
            _ => None,
        }
    }
}

/// Debit or credit side of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySide {
    Debit,
    Credit,
}

/// One immutable half of a double-entry posting.
///
/// Exactly one side is populated with a strictly positive amount. Once
/// persisted an entry is never mutated or deleted; corrections are new
/// entries. The entry stores its owner's `account_id` rather than a back
/// pointer to the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: LedgerEntryId,
    tenant_id: TenantId,
    account_id: AccountId,
    ledger_account: LedgerAccount,
    side: EntrySide,
    amount: Money,
    transaction_date: NaiveDate,
    source_type: SourceType,
    source_reference_id: String,
    metadata: Option<JsonValue>,
    created_at: DateTime<Utc>,
    created_by: UserId,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new_debit(
        tenant_id: TenantId,
        account_id: AccountId,
        ledger_account: LedgerAccount,
        amount: Money,
        transaction_date: NaiveDate,
        source_type: SourceType,
        source_reference_id: &str,
        metadata: Option<JsonValue>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::new(
            EntrySide::Debit,
            tenant_id,
            account_id,
            ledger_account,
            amount,
            transaction_date,
            source_type,
            source_reference_id,
            metadata,
            created_by,
            created_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_credit(
        tenant_id: TenantId,
        account_id: AccountId,
        ledger_account: LedgerAccount,
        amount: Money,
        transaction_date: NaiveDate,
        source_type: SourceType,
        source_reference_id: &str,
        metadata: Option<JsonValue>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::new(
            EntrySide::Credit,
            tenant_id,
            account_id,
            ledger_account,
            amount,
            transaction_date,
            source_type,
            source_reference_id,
            metadata,
            created_by,
            created_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        side: EntrySide,
        tenant_id: TenantId,
        account_id: AccountId,
        ledger_account: LedgerAccount,
        amount: Money,
        transaction_date: NaiveDate,
        source_type: SourceType,
        source_reference_id: &str,
        metadata: Option<JsonValue>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if amount.is_zero() {
            return Err(DomainError::invalid_amount(
                "entry amount must be strictly positive",
            ));
        }

        let reference = source_reference_id.trim();
        if reference.is_empty() || reference.len() > MAX_SOURCE_REFERENCE_LEN {
            return Err(DomainError::InvalidSourceReference);
        }

        Ok(Self {
            id: LedgerEntryId::new(),
            tenant_id,
            account_id,
            ledger_account,
            side,
            amount,
            transaction_date,
            source_type,
            source_reference_id: reference.to_string(),
            metadata,
            created_at,
            created_by,
        })
    }

    /// Reconstitute a persisted entry.
    ///
    /// Bypasses constructor validation; callers pass values that already
    /// satisfied the invariants when first written.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: LedgerEntryId,
        tenant_id: TenantId,
        account_id: AccountId,
        ledger_account: LedgerAccount,
        side: EntrySide,
        amount: Money,
        transaction_date: NaiveDate,
        source_type: SourceType,
        source_reference_id: String,
        metadata: Option<JsonValue>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            account_id,
            ledger_account,
            side,
            amount,
            transaction_date,
            source_type,
            source_reference_id,
            metadata,
            created_at,
            created_by,
        }
    }

    pub fn id(&self) -> LedgerEntryId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn ledger_account(&self) -> LedgerAccount {
        self.ledger_account
    }

    pub fn side(&self) -> EntrySide {
        self.side
    }

    pub fn amount(&self) -> &Money {
        &self.amount
    }

    /// The populated debit amount, if this is a debit entry.
    pub fn debit_amount(&self) -> Option<&Money> {
        match self.side {
            EntrySide::Debit => Some(&self.amount),
            EntrySide::Credit => None,
        }
    }

    /// The populated credit amount, if this is a credit entry.
    pub fn credit_amount(&self) -> Option<&Money> {
        match self.side {
            EntrySide::Credit => Some(&self.amount),
            EntrySide::Debit => None,
        }
    }

    pub fn transaction_date(&self) -> NaiveDate {
        self.transaction_date
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn source_reference_id(&self) -> &str {
        &self.source_reference_id
    }

    pub fn metadata(&self) -> Option<&JsonValue> {
        self.metadata.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    /// Signed amount for balance arithmetic: `+amount` for debits, `-amount`
    /// for credits. A computation only, never stored.
    pub fn effective_amount(&self) -> Decimal {
        match self.side {
            EntrySide::Debit => self.amount.amount(),
            EntrySide::Credit => -self.amount.amount(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rideledger_core::Currency;

    fn usd(s: &str) -> Money {
        Money::new(s.parse().unwrap(), Currency::usd()).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn debit(reference: &str, amount: &str) -> DomainResult<LedgerEntry> {
        LedgerEntry::new_debit(
            TenantId::new(),
            AccountId::new(),
            LedgerAccount::AccountsReceivable,
            usd(amount),
            date("2026-03-01"),
            SourceType::Ride,
            reference,
            None,
            UserId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn zero_amount_is_rejected() {
        let err = debit("R-1", "0").unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount { .. }));
    }

    #[test]
    fn blank_source_reference_is_rejected() {
        assert!(matches!(
            debit("   ", "10").unwrap_err(),
            DomainError::InvalidSourceReference
        ));
        assert!(matches!(
            debit(&"x".repeat(MAX_SOURCE_REFERENCE_LEN + 1), "10").unwrap_err(),
            DomainError::InvalidSourceReference
        ));
    }

    #[test]
    fn source_reference_is_trimmed() {
        let entry = debit("  R-1  ", "10").unwrap();
        assert_eq!(entry.source_reference_id(), "R-1");
    }

    #[test]
    fn effective_amount_signs_by_side() {
        let debit = debit("R-1", "25").unwrap();
        assert_eq!(debit.effective_amount(), "25".parse::<Decimal>().unwrap());
        assert!(debit.debit_amount().is_some());
        assert!(debit.credit_amount().is_none());

        let credit = LedgerEntry::new_credit(
            TenantId::new(),
            AccountId::new(),
            LedgerAccount::ServiceRevenue,
            usd("25"),
            date("2026-03-01"),
            SourceType::Ride,
            "R-1",
            None,
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(credit.effective_amount(), "-25".parse::<Decimal>().unwrap());
        assert!(credit.debit_amount().is_none());
    }
}
