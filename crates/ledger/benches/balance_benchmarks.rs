use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use rideledger_core::{AccountId, Currency, Money, TenantId, UserId};
use rideledger_ledger::{Account, AccountType};

fn account_with_history(rides: usize) -> Account {
    let (mut account, _) = Account::open(
        AccountId::new(),
        TenantId::new(),
        "Bench Fleet",
        AccountType::Organization,
        Currency::usd(),
        Utc::now(),
    )
    .unwrap();

    let user = UserId::new();
    let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    for i in 0..rides {
        let amount = Money::new(Decimal::new(1000 + i as i64, 2), Currency::usd()).unwrap();
        account
            .record_charge(&format!("R-{i}"), amount, day, "F1", user, Utc::now())
            .unwrap();
        if i % 3 == 0 {
            let payment = Money::new(Decimal::new(500, 2), Currency::usd()).unwrap();
            account
                .record_payment(&format!("P-{i}"), payment, day, None, user, Utc::now())
                .unwrap();
        }
    }
    account
}

fn bench_receivable_balance(c: &mut Criterion) {
    let mut group = c.benchmark_group("receivable_balance");
    for rides in [100usize, 1_000, 10_000] {
        let account = account_with_history(rides);
        group.throughput(Throughput::Elements(account.entry_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rides), &account, |b, account| {
            b.iter(|| black_box(account.balance().unwrap()));
        });
    }
    group.finish();
}

fn bench_balance_as_of(c: &mut Criterion) {
    let account = account_with_history(5_000);
    let cutoff = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    c.bench_function("balance_as_of_5k_entries", |b| {
        b.iter(|| black_box(account.balance_as_of(cutoff).unwrap()));
    });
}

criterion_group!(benches, bench_receivable_balance, bench_balance_as_of);
criterion_main!(benches);
