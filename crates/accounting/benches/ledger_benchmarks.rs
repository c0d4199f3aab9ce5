use std::collections::HashMap;

use chrono::{DateTime, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use fundledger_accounting::{
    Account, AccountCategory, AccountType, LineInput, NewAccount, ParentRef, ValidatedLines,
    build_tree, plan_import,
};
use fundledger_core::AccountId;

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

fn detail(code: String, category: AccountCategory) -> Account {
    Account::create(
        AccountId::new(),
        NewAccount::new(code.clone(), code, AccountType::Detail, category),
        None,
        now(),
    )
    .unwrap()
}

fn bench_line_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_validation");

    for line_count in [2usize, 20, 200].iter() {
        let debit_accounts: Vec<Account> = (0..*line_count)
            .map(|i| detail(format!("5{i:04}"), AccountCategory::Expense))
            .collect();
        let cash = detail("1100".into(), AccountCategory::Asset);

        let mut accounts: HashMap<AccountId, Account> =
            debit_accounts.iter().map(|a| (a.id, a.clone())).collect();
        accounts.insert(cash.id, cash.clone());

        let mut inputs: Vec<LineInput> = debit_accounts
            .iter()
            .map(|a| LineInput::debit(a.id, 1_000))
            .collect();
        inputs.push(LineInput::credit(cash.id, 1_000 * *line_count as i64));

        group.throughput(Throughput::Elements(inputs.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("validate", line_count),
            &inputs,
            |b, inputs| {
                b.iter(|| black_box(ValidatedLines::validate(inputs, &accounts).unwrap()));
            },
        );
    }

    group.finish();
}

fn chart(headers: usize, children_per_header: usize) -> Vec<NewAccount> {
    let mut rows = Vec::with_capacity(headers * (children_per_header + 1));
    for h in 0..headers {
        let header_code = format!("5{h:03}");
        // Children first so the planner has to defer them.
        for c in 0..children_per_header {
            rows.push(
                NewAccount::new(
                    format!("{header_code}{c:02}"),
                    "Expense",
                    AccountType::IncomeExpenseDetail,
                    AccountCategory::Expense,
                )
                .with_parent(ParentRef::Code(header_code.clone())),
            );
        }
        rows.push(NewAccount::new(
            header_code,
            "Expense group",
            AccountType::Header,
            AccountCategory::Expense,
        ));
    }
    rows
}

fn bench_chart_of_accounts(c: &mut Criterion) {
    let mut group = c.benchmark_group("chart_of_accounts");

    for headers in [10usize, 100].iter() {
        let rows = chart(*headers, 20);
        group.throughput(Throughput::Elements(rows.len() as u64));

        group.bench_with_input(BenchmarkId::new("plan_import", headers), &rows, |b, rows| {
            b.iter(|| black_box(plan_import(rows.clone(), &[], now()).unwrap()));
        });

        let planned = plan_import(rows, &[], now()).unwrap();
        group.bench_with_input(
            BenchmarkId::new("build_tree", headers),
            &planned,
            |b, planned| {
                b.iter(|| black_box(build_tree(planned.clone())));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_line_validation, bench_chart_of_accounts);
criterion_main!(benches);
