use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use rideledger_core::{
    AccountId, Currency, DomainError, DomainResult, LedgerEntryId, Money, TenantId, UserId,
};
use rideledger_events::{Event, TenantScoped};

use crate::entry::{EntrySide, LedgerAccount, LedgerEntry, SourceType};

/// Customer account classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Organization,
    Individual,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Organization => "organization",
            AccountType::Individual => "individual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organization" => Some(AccountType::Organization),
            "individual" => Some(AccountType::Individual),
            _ => None,
        }
    }
}

/// Account lifecycle. `Active → Inactive` is the only transition; an
/// inactive account keeps serving historical reads but accepts no new
/// transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

const MAX_NAME_LEN: usize = 200;

/// Aggregate root: a customer account owning its ledger entries.
///
/// Entries are created only through the aggregate's operations; each business
/// event appends two balanced entries (same amount, opposite sides), so the
/// double-entry law Σ debits = Σ credits holds across the full history by
/// construction. Entries are keyed by id (UUIDv7, so iteration stays
/// time-ordered); ids appended since load are tracked so persistence inserts
/// only new rows and never rewrites an existing entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    id: AccountId,
    tenant_id: TenantId,
    name: String,
    account_type: AccountType,
    status: AccountStatus,
    currency: Currency,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    entries: BTreeMap<LedgerEntryId, LedgerEntry>,
    uncommitted: Vec<LedgerEntryId>,
}

impl Account {
    /// Open a new account.
    ///
    /// The id is client-supplied and must be non-nil; the name must be 1–200
    /// characters after trimming. All entries will be denominated in
    /// `currency`.
    pub fn open(
        id: AccountId,
        tenant_id: TenantId,
        name: &str,
        account_type: AccountType,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> DomainResult<(Self, AccountOpened)> {
        if id.as_uuid().is_nil() {
            return Err(DomainError::invalid_id("account id must be non-nil"));
        }
        let name = validate_name(name)?;

        let account = Self {
            id,
            tenant_id,
            name: name.clone(),
            account_type,
            status: AccountStatus::Active,
            currency: currency.clone(),
            created_at: now,
            updated_at: now,
            entries: BTreeMap::new(),
            uncommitted: Vec::new(),
        };

        let event = AccountOpened {
            tenant_id,
            account_id: id,
            name,
            account_type,
            currency,
            occurred_at: now,
        };

        Ok((account, event))
    }

    /// Reconstitute a persisted account (header + entries).
    ///
    /// Bypasses the command surface; invariants were enforced when the state
    /// was first written.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: AccountId,
        tenant_id: TenantId,
        name: String,
        account_type: AccountType,
        status: AccountStatus,
        currency: Currency,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        entries: Vec<LedgerEntry>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name,
            account_type,
            status,
            currency,
            created_at,
            updated_at,
            entries: entries.into_iter().map(|e| (e.id(), e)).collect(),
            uncommitted: Vec::new(),
        }
    }

    /// Record a ride charge: an AccountsReceivable debit and a
    /// ServiceRevenue credit, both for `amount`, dated `service_date`.
    ///
    /// Idempotency: a second charge with the same ride id fails with
    /// `DuplicateCharge` carrying the existing entry ids.
    pub fn record_charge(
        &mut self,
        ride_id: &str,
        amount: Money,
        service_date: NaiveDate,
        fleet_id: &str,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<ChargeRecorded> {
        self.ensure_active()?;

        let existing = self.entries_for_source(SourceType::Ride, ride_id);
        if !existing.is_empty() {
            return Err(DomainError::DuplicateCharge {
                ride_id: ride_id.trim().to_string(),
                existing_entry_ids: existing,
            });
        }

        self.ensure_currency(&amount)?;

        let metadata = json!({ "fleet_id": fleet_id });
        let debit = LedgerEntry::new_debit(
            self.tenant_id,
            self.id,
            LedgerAccount::AccountsReceivable,
            amount.clone(),
            service_date,
            SourceType::Ride,
            ride_id,
            Some(metadata.clone()),
            created_by,
            now,
        )?;
        let credit = LedgerEntry::new_credit(
            self.tenant_id,
            self.id,
            LedgerAccount::ServiceRevenue,
            amount.clone(),
            service_date,
            SourceType::Ride,
            ride_id,
            Some(metadata),
            created_by,
            now,
        )?;

        let entry_ids = self.append_pair(debit, credit)?;
        self.updated_at = now;

        Ok(ChargeRecorded {
            tenant_id: self.tenant_id,
            account_id: self.id,
            ride_id: ride_id.trim().to_string(),
            fleet_id: fleet_id.to_string(),
            amount,
            service_date,
            entry_ids,
            occurred_at: now,
        })
    }

    /// Record a customer payment: a Cash debit and an AccountsReceivable
    /// credit, both for `amount`, dated `payment_date`.
    ///
    /// Idempotency: the payment reference is unique — a repeat fails with
    /// `DuplicatePayment`. The reference is globally unique across accounts;
    /// the storage index backstops what this per-account guard cannot see.
    pub fn record_payment(
        &mut self,
        reference: &str,
        amount: Money,
        payment_date: NaiveDate,
        payment_mode: Option<&str>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<PaymentReceived> {
        self.ensure_active()?;

        let existing = self.entries_for_source(SourceType::Payment, reference);
        if !existing.is_empty() {
            return Err(DomainError::DuplicatePayment {
                reference: reference.trim().to_string(),
                existing_entry_ids: existing,
            });
        }

        self.ensure_currency(&amount)?;

        let metadata = payment_mode.map(|mode| json!({ "payment_mode": mode }));
        let debit = LedgerEntry::new_debit(
            self.tenant_id,
            self.id,
            LedgerAccount::Cash,
            amount.clone(),
            payment_date,
            SourceType::Payment,
            reference,
            metadata.clone(),
            created_by,
            now,
        )?;
        let credit = LedgerEntry::new_credit(
            self.tenant_id,
            self.id,
            LedgerAccount::AccountsReceivable,
            amount.clone(),
            payment_date,
            SourceType::Payment,
            reference,
            metadata,
            created_by,
            now,
        )?;

        let entry_ids = self.append_pair(debit, credit)?;
        self.updated_at = now;

        Ok(PaymentReceived {
            tenant_id: self.tenant_id,
            account_id: self.id,
            reference: reference.trim().to_string(),
            payment_mode: payment_mode.map(str::to_string),
            amount,
            payment_date,
            entry_ids,
            occurred_at: now,
        })
    }

    /// Transition `Active → Inactive`. Returns `None` (success, no event)
    /// when the account is already inactive.
    pub fn deactivate(
        &mut self,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<AccountDeactivated> {
        if self.status == AccountStatus::Inactive {
            return None;
        }
        self.status = AccountStatus::Inactive;
        self.updated_at = now;

        Some(AccountDeactivated {
            tenant_id: self.tenant_id,
            account_id: self.id,
            reason,
            occurred_at: now,
        })
    }

    /// Outstanding receivable: Σ debits − Σ credits over
    /// `AccountsReceivable` entries, floored at zero (an overpaid account
    /// reports 0 here; the prepayment shows up as a Cash balance).
    pub fn balance(&self) -> DomainResult<Money> {
        self.receivable_balance(None)
    }

    /// [`balance`](Self::balance) restricted to entries with
    /// `transaction_date ≤ date`.
    pub fn balance_as_of(&self, date: NaiveDate) -> DomainResult<Money> {
        self.receivable_balance(Some(date))
    }

    fn receivable_balance(&self, as_of: Option<NaiveDate>) -> DomainResult<Money> {
        let sum = self.signed_sum(LedgerAccount::AccountsReceivable, as_of)?;
        Money::new(sum.max(Decimal::ZERO), self.currency.clone())
    }

    /// Signed effective sum for one ledger-account kind. Used by balance
    /// reads and by tests checking the Cash / Revenue legs.
    pub(crate) fn signed_sum(
        &self,
        kind: LedgerAccount,
        as_of: Option<NaiveDate>,
    ) -> DomainResult<Decimal> {
        let mut sum = Decimal::ZERO;
        for entry in self.entries.values() {
            if entry.ledger_account() != kind {
                continue;
            }
            if let Some(cutoff) = as_of {
                if entry.transaction_date() > cutoff {
                    continue;
                }
            }
            if entry.amount().currency() != &self.currency {
                return Err(DomainError::balance_calculation(format!(
                    "entry {} is denominated in {}, account uses {}",
                    entry.id(),
                    entry.amount().currency(),
                    self.currency
                )));
            }
            sum += entry.effective_amount();
        }
        Ok(sum)
    }

    fn ensure_active(&self) -> DomainResult<()> {
        if !self.status.is_active() {
            return Err(DomainError::AccountInactive);
        }
        Ok(())
    }

    fn ensure_currency(&self, amount: &Money) -> DomainResult<()> {
        if amount.currency() != &self.currency {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.as_str().to_string(),
                right: amount.currency().as_str().to_string(),
            });
        }
        Ok(())
    }

    fn entries_for_source(&self, source_type: SourceType, reference: &str) -> Vec<LedgerEntryId> {
        let reference = reference.trim();
        self.entries
            .values()
            .filter(|e| e.source_type() == source_type && e.source_reference_id() == reference)
            .map(|e| e.id())
            .collect()
    }

    /// Append one balanced debit/credit pair atomically.
    fn append_pair(
        &mut self,
        debit: LedgerEntry,
        credit: LedgerEntry,
    ) -> DomainResult<[LedgerEntryId; 2]> {
        if debit.side() != EntrySide::Debit || credit.side() != EntrySide::Credit {
            return Err(DomainError::unbalanced("sides of the pair are swapped"));
        }
        if debit.amount() != credit.amount() {
            return Err(DomainError::unbalanced(format!(
                "debit {} does not equal credit {}",
                debit.amount(),
                credit.amount()
            )));
        }

        let ids = [debit.id(), credit.id()];
        self.entries.insert(debit.id(), debit);
        self.entries.insert(credit.id(), credit);
        self.uncommitted.extend_from_slice(&ids);
        Ok(ids)
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, id: LedgerEntryId) -> Option<&LedgerEntry> {
        self.entries.get(&id)
    }

    /// Entries appended since load, in append order. Persistence inserts
    /// exactly these; existing rows are never rewritten.
    pub fn uncommitted_entries(&self) -> Vec<&LedgerEntry> {
        self.uncommitted
            .iter()
            .filter_map(|id| self.entries.get(id))
            .collect()
    }

    /// Clear the uncommitted marker after a successful persist.
    pub fn mark_entries_committed(&mut self) {
        self.uncommitted.clear();
    }
}

fn validate_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::invalid_name("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DomainError::invalid_name(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Event: an account was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub name: String,
    pub account_type: AccountType,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

/// Event: two balanced entries were appended for a ride charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRecorded {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub ride_id: String,
    pub fleet_id: String,
    pub amount: Money,
    pub service_date: NaiveDate,
    pub entry_ids: [LedgerEntryId; 2],
    pub occurred_at: DateTime<Utc>,
}

/// Event: a customer payment was applied to the receivable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceived {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub reference: String,
    pub payment_mode: Option<String>,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub entry_ids: [LedgerEntryId; 2],
    pub occurred_at: DateTime<Utc>,
}

/// Event: the account stopped accepting new transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDeactivated {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

macro_rules! impl_account_event {
    ($t:ty, $name:literal) => {
        impl Event for $t {
            fn event_type(&self) -> &'static str {
                $name
            }

            fn occurred_at(&self) -> DateTime<Utc> {
                self.occurred_at
            }
        }

        impl TenantScoped for $t {
            fn tenant_id(&self) -> TenantId {
                self.tenant_id
            }
        }
    };
}

impl_account_event!(AccountOpened, "ledger.account.opened");
impl_account_event!(ChargeRecorded, "ledger.account.charge_recorded");
impl_account_event!(PaymentReceived, "ledger.account.payment_received");
impl_account_event!(AccountDeactivated, "ledger.account.deactivated");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn usd(s: &str) -> Money {
        Money::new(s.parse().unwrap(), Currency::usd()).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn test_account() -> Account {
        let (account, _) = Account::open(
            AccountId::new(),
            TenantId::new(),
            "Acme",
            AccountType::Organization,
            Currency::usd(),
            Utc::now(),
        )
        .unwrap();
        account
    }

    fn charge(account: &mut Account, ride: &str, amount: &str, day: &str) -> ChargeRecorded {
        account
            .record_charge(ride, usd(amount), date(day), "F1", UserId::new(), Utc::now())
            .unwrap()
    }

    fn pay(account: &mut Account, reference: &str, amount: &str, day: &str) -> PaymentReceived {
        account
            .record_payment(
                reference,
                usd(amount),
                date(day),
                Some("bank_transfer"),
                UserId::new(),
                Utc::now(),
            )
            .unwrap()
    }

    #[test]
    fn open_validates_name() {
        let err = Account::open(
            AccountId::new(),
            TenantId::new(),
            "   ",
            AccountType::Individual,
            Currency::usd(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidAccountName { .. }));

        let long = "x".repeat(201);
        assert!(
            Account::open(
                AccountId::new(),
                TenantId::new(),
                &long,
                AccountType::Individual,
                Currency::usd(),
                Utc::now(),
            )
            .is_err()
        );
    }

    #[test]
    fn charge_appends_balanced_pair_and_updates_balance() {
        let mut account = test_account();
        let event = charge(&mut account, "R-1", "25.0000", "2026-03-01");

        assert_eq!(account.entry_count(), 2);
        assert_eq!(account.balance().unwrap(), usd("25.0000"));

        let debit = account.entry(event.entry_ids[0]).unwrap();
        let credit = account.entry(event.entry_ids[1]).unwrap();
        assert_eq!(debit.ledger_account(), LedgerAccount::AccountsReceivable);
        assert_eq!(debit.side(), EntrySide::Debit);
        assert_eq!(credit.ledger_account(), LedgerAccount::ServiceRevenue);
        assert_eq!(credit.side(), EntrySide::Credit);
        assert_eq!(debit.amount(), credit.amount());
        assert_eq!(debit.metadata().unwrap()["fleet_id"], "F1");
    }

    #[test]
    fn duplicate_charge_is_rejected_and_carries_existing_ids() {
        let mut account = test_account();
        let first = charge(&mut account, "R-1", "25", "2026-03-01");

        let err = account
            .record_charge("R-1", usd("25"), date("2026-03-01"), "F1", UserId::new(), Utc::now())
            .unwrap_err();
        match err {
            DomainError::DuplicateCharge {
                ride_id,
                existing_entry_ids,
            } => {
                assert_eq!(ride_id, "R-1");
                let mut expected = first.entry_ids.to_vec();
                expected.sort();
                let mut got = existing_entry_ids.clone();
                got.sort();
                assert_eq!(got, expected);
            }
            other => panic!("expected DuplicateCharge, got {other:?}"),
        }

        assert_eq!(account.entry_count(), 2);
        assert_eq!(account.balance().unwrap(), usd("25"));
    }

    #[test]
    fn payment_clears_balance() {
        let mut account = test_account();
        charge(&mut account, "R-1", "25.0000", "2026-03-01");
        pay(&mut account, "P-1", "25.0000", "2026-03-02");

        assert_eq!(account.entry_count(), 4);
        assert_eq!(account.balance().unwrap(), usd("0"));
        assert_eq!(
            account.signed_sum(LedgerAccount::Cash, None).unwrap(),
            "25".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn duplicate_payment_is_rejected() {
        let mut account = test_account();
        charge(&mut account, "R-1", "25", "2026-03-01");
        pay(&mut account, "P-1", "10", "2026-03-02");

        let err = account
            .record_payment("P-1", usd("10"), date("2026-03-02"), None, UserId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicatePayment { .. }));
        assert_eq!(account.entry_count(), 4);
    }

    #[test]
    fn inactive_account_rejects_new_transactions() {
        let mut account = test_account();
        assert!(account.deactivate(Some("churned".into()), Utc::now()).is_some());
        assert_eq!(account.status(), AccountStatus::Inactive);

        // Idempotent: deactivating again emits nothing.
        assert!(account.deactivate(None, Utc::now()).is_none());

        let err = account
            .record_charge("R-9", usd("5"), date("2026-03-05"), "F1", UserId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::AccountInactive));
    }

    #[test]
    fn balance_as_of_respects_cutoff() {
        let mut account = test_account();
        charge(&mut account, "R-1", "10", "2026-03-01");
        charge(&mut account, "R-2", "15", "2026-03-10");

        assert_eq!(account.balance_as_of(date("2026-03-05")).unwrap(), usd("10"));
        assert_eq!(account.balance_as_of(date("2026-03-10")).unwrap(), usd("25"));
        assert_eq!(account.balance_as_of(date("2026-02-28")).unwrap(), usd("0"));
    }

    #[test]
    fn overpayment_floors_receivable_at_zero() {
        let mut account = test_account();
        charge(&mut account, "R-1", "10", "2026-03-01");
        pay(&mut account, "P-1", "30", "2026-03-02");

        assert_eq!(account.balance().unwrap(), usd("0"));
        // The prepayment is visible as cash.
        assert_eq!(
            account.signed_sum(LedgerAccount::Cash, None).unwrap(),
            "30".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn foreign_currency_charge_is_rejected() {
        let mut account = test_account();
        let eur = Money::new("10".parse().unwrap(), Currency::new("EUR").unwrap()).unwrap();
        let err = account
            .record_charge("R-1", eur, date("2026-03-01"), "F1", UserId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::CurrencyMismatch { .. }));
        assert_eq!(account.entry_count(), 0);
    }

    #[test]
    fn uncommitted_entries_track_appends_since_load() {
        let mut account = test_account();
        charge(&mut account, "R-1", "10", "2026-03-01");
        assert_eq!(account.uncommitted_entries().len(), 2);

        account.mark_entries_committed();
        assert!(account.uncommitted_entries().is_empty());

        pay(&mut account, "P-1", "10", "2026-03-02");
        assert_eq!(account.uncommitted_entries().len(), 2);
    }

    #[test]
    fn rehydrate_round_trips_state() {
        let mut account = test_account();
        charge(&mut account, "R-1", "10", "2026-03-01");

        let entries: Vec<LedgerEntry> = account.entries().cloned().collect();
        let copy = Account::rehydrate(
            account.id(),
            account.tenant_id(),
            account.name().to_string(),
            account.account_type(),
            account.status(),
            account.currency().clone(),
            account.created_at(),
            account.updated_at(),
            entries,
        );

        assert_eq!(copy.balance().unwrap(), account.balance().unwrap());
        assert!(copy.uncommitted_entries().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: any interleaving of distinct charges and payments keeps
        /// Σ debits = Σ credits across all kinds, and the receivable balance
        /// equals charges − payments floored at zero.
        #[test]
        fn double_entry_law_holds_under_interleaving(
            ops in prop::collection::vec((prop::bool::ANY, 1i64..100_000i64), 1..40)
        ) {
            let mut account = test_account();
            let mut charges = Decimal::ZERO;
            let mut payments = Decimal::ZERO;

            for (i, (is_charge, cents)) in ops.iter().enumerate() {
                let amount = Money::new(Decimal::new(*cents, 2), Currency::usd()).unwrap();
                if *is_charge {
                    charges += amount.amount();
                    account
                        .record_charge(&format!("R-{i}"), amount, date("2026-03-01"), "F1", UserId::new(), Utc::now())
                        .unwrap();
                } else {
                    payments += amount.amount();
                    account
                        .record_payment(&format!("P-{i}"), amount, date("2026-03-01"), None, UserId::new(), Utc::now())
                        .unwrap();
                }
            }

            let mut debits = Decimal::ZERO;
            let mut credits = Decimal::ZERO;
            for entry in account.entries() {
                match entry.side() {
                    EntrySide::Debit => debits += entry.amount().amount(),
                    EntrySide::Credit => credits += entry.amount().amount(),
                }
            }
            prop_assert_eq!(debits, credits);

            let expected = (charges - payments).max(Decimal::ZERO);
            prop_assert_eq!(account.balance().unwrap().amount(), expected);
        }
    }
}
