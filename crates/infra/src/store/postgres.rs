//! Postgres-backed ledger store.
//!
//! Every multi-row write runs in one transaction. Journal rows carry a
//! `version` column and are only updated when it still equals the caller's
//! expectation, so two concurrent transitions on one journal cannot both
//! commit.
//!
//! ## Error Mapping
//!
//! | PostgreSQL error | Constraint | StoreError |
//! |------------------|------------|------------|
//! | `23505` unique violation | `accounts_code_key`, `funds_code_key`, ... | `DuplicateCode` |
//! | `23505` unique violation | `journals_number_key` | `DuplicateNumber` |
//! | `23505` unique violation | `budgets_active_key` | `DuplicateBudget` |
//! | `23505` unique violation | `journal_events_sequence_key`, primary keys | `Concurrency` |
//! | `23503` foreign key violation | `journal_lines_account_fkey` | `HasTransactions` |
//! | `23503` foreign key violation | `budgets_account_fkey` | `InUse` |
//! | `23503` foreign key violation | `accounts_parent_id_fkey` | `HasChildren` |
//! | `23503` foreign key violation | `journal_lines_{fund,program,donor}_fkey` | `NotFound` |
//!
//! Budget writes and guarded journal saves take a share lock on the fiscal
//! year row and fail with `FiscalYearClosed` when it is closed.
//! | decode failures | n/a | `Corrupt` |
//! | anything else | n/a | `Backend` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use fundledger_accounting::{
    Account, Budget, BudgetScope, Donor, FiscalYear, Fund, Journal, JournalLine, LineDimensions,
    Program, SequenceKey, parse_number,
};
use fundledger_core::{
    AccountId, BranchId, BudgetId, DateRange, DomainError, ExpectedVersion, FiscalYearId,
    JournalId, Money, Page, PageWindow, UserId,
};
use fundledger_events::EventEnvelope;

use super::query::{
    AccountFilter, BudgetFilter, JournalFilter, LineTotals, LineWrite, PostedLine, ReportScope,
    YearCheck,
};
use super::r#trait::{Branch, BranchDirectory, LedgerStore, StoreError, StoredJournalEvent};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

const ACCOUNT_COLUMNS: &str = "id, parent_id, code, name, name_en, description, account_type, \
     category, normal_balance, is_active, is_detail, level, created_at, updated_at";

const JOURNAL_COLUMNS: &str = "id, branch_id, number, date, description, reference, status, \
     total_debit, total_credit, is_posted, posted_at, posted_by, created_by, created_at, \
     updated_at, reviewed_by, reviewed_at, review_notes, approved_by, approved_at, rejected_by, \
     rejected_at, reject_reason, version";

const LINE_COLUMNS: &str = "id, journal_id, line_no, account_id, description, debit, credit, \
     fund_id, program_id, donor_id, project_id";

const BUDGET_COLUMNS: &str = "id, fiscal_year_id, account_id, period, amount, branch_id, \
     fund_id, program_id, description, is_active, created_at, updated_at";

const FISCAL_YEAR_COLUMNS: &str =
    "id, name, start_date, end_date, is_current, is_closed, closed_at, closed_by, created_at";

const ACCOUNT_FILTER: &str = "($1::text IS NULL OR category = $1) \
     AND ($2::text IS NULL OR account_type = $2) \
     AND ($3::boolean IS NULL OR is_active = $3) \
     AND ($4::boolean IS NULL OR is_detail = $4) \
     AND ($5::text IS NULL OR code ILIKE '%' || $5 || '%' OR name ILIKE '%' || $5 || '%')";

const JOURNAL_FILTER: &str = "($1::text IS NULL OR status = $1) \
     AND ($2::uuid IS NULL OR branch_id = $2) \
     AND ($3::date IS NULL OR date >= $3) \
     AND ($4::date IS NULL OR date <= $4) \
     AND ($5::text IS NULL OR number ILIKE '%' || $5 || '%' OR description ILIKE '%' || $5 || '%')";

const BUDGET_FILTER: &str = "($1::uuid IS NULL OR fiscal_year_id = $1) \
     AND ($2::text IS NULL OR period = $2) \
     AND ($3::uuid IS NULL OR branch_id = $3) \
     AND ($4::uuid IS NULL OR account_id = $4) \
     AND (NOT $5 OR is_active)";

/// Posted lines joined to their journal, restricted by date range and scope.
/// `$1..$6` are start, end, branch, fund, program and donor.
const POSTED_FILTER: &str = "j.is_posted \
     AND ($1::date IS NULL OR j.date >= $1) \
     AND j.date <= $2 \
     AND ($3::uuid IS NULL OR j.branch_id = $3) \
     AND ($4::uuid IS NULL OR l.fund_id = $4) \
     AND ($5::uuid IS NULL OR l.program_id = $5) \
     AND ($6::uuid IS NULL OR l.donor_id = $6)";

/// Postgres implementation of [`LedgerStore`] and [`BranchDirectory`].
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Create or refresh a branch directory entry.
    #[instrument(skip(self), fields(branch_id = %branch.id, code = %branch.code), err)]
    pub async fn upsert_branch(&self, branch: &Branch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO branches (id, code, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET code = EXCLUDED.code, name = EXCLUDED.name
            "#,
        )
        .bind(Uuid::from(branch.id))
        .bind(&branch.code)
        .bind(&branch.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::DuplicateCode(branch.code.clone()),
            None => map_sqlx_error("upsert_branch", e),
        })?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn load_lines(
        &self,
        journal_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<JournalLine>>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM journal_lines WHERE journal_id = ANY($1) \
             ORDER BY journal_id, line_no"
        ))
        .bind(journal_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?;

        let mut lines: HashMap<Uuid, Vec<JournalLine>> = HashMap::new();
        for row in rows {
            let row = LineRow::from_row(&row).map_err(|e| decode_error("journal_lines", e))?;
            lines.entry(row.journal_id).or_default().push(row.into());
        }
        Ok(lines)
    }

    async fn journals_with_lines(&self, rows: Vec<PgRow>) -> Result<Vec<Journal>, StoreError> {
        let headers = rows
            .iter()
            .map(|row| JournalRow::from_row(row).map_err(|e| decode_error("journals", e)))
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = headers.iter().map(|h| h.id).collect();
        let mut lines = self.load_lines(&ids).await?;
        headers
            .into_iter()
            .map(|header| {
                let journal_lines = lines.remove(&header.id).unwrap_or_default();
                header.into_journal(journal_lines)
            })
            .collect()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, accounts), fields(account_count = accounts.len()), err)]
    async fn insert_accounts(&self, accounts: &[Account]) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        // Parents before children so the self-reference holds row by row.
        let mut ordered: Vec<&Account> = accounts.iter().collect();
        ordered.sort_by_key(|a| a.level);

        for account in ordered {
            sqlx::query(&format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))
            .bind(Uuid::from(account.id))
            .bind(account.parent_id.map(Uuid::from))
            .bind(&account.code)
            .bind(&account.name)
            .bind(&account.name_en)
            .bind(&account.description)
            .bind(account.account_type.as_str())
            .bind(account.category.as_str())
            .bind(account.normal_balance.as_str())
            .bind(account.is_active)
            .bind(account.is_detail)
            .bind(account.level as i32)
            .bind(account.created_at)
            .bind(account.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match unique_constraint(&e) {
                Some(_) => StoreError::DuplicateCode(account.code.clone()),
                None => map_sqlx_error("insert_account", e),
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $2, name_en = $3, description = $4, is_active = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(account.id))
        .bind(&account.name)
        .bind(&account.name_en)
        .bind(&account.description)
        .bind(account.is_active)
        .bind(account.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("account", account.id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let code: Option<String> =
            sqlx::query_scalar("SELECT code FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(Uuid::from(id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("lock_account", e))?;
        let Some(code) = code else {
            return Err(StoreError::not_found("account", id));
        };

        let row = sqlx::query(
            r#"
            SELECT
                EXISTS (SELECT 1 FROM accounts WHERE parent_id = $1) AS has_children,
                EXISTS (SELECT 1 FROM journal_lines WHERE account_id = $1) AS has_lines,
                EXISTS (SELECT 1 FROM budgets WHERE account_id = $1) AS has_budgets
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_account_references", e))?;

        let flag = |column: &str| -> Result<bool, StoreError> {
            row.try_get(column)
                .map_err(|e| decode_error("account references", e))
        };
        if flag("has_children")? {
            return Err(StoreError::HasChildren(code));
        }
        if flag("has_lines")? {
            return Err(StoreError::HasTransactions(code));
        }
        if flag("has_budgets")? {
            return Err(StoreError::InUse(format!("account {code}")));
        }

        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(|e| match foreign_key_constraint(&e).as_deref() {
                Some("journal_lines_account_fkey") => StoreError::HasTransactions(code.clone()),
                Some("budgets_account_fkey") => StoreError::InUse(format!("account {code}")),
                Some(_) => StoreError::HasChildren(code.clone()),
                None => map_sqlx_error("delete_account", e),
            })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;
        row.map(|row| decode_account(&row)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn get_account_by_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account_by_code", e))?;
        row.map(|row| decode_account(&row)).transpose()
    }

    #[instrument(skip(self, ids), fields(id_count = ids.len()), err)]
    async fn get_accounts(
        &self,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, Account>, StoreError> {
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_accounts", e))?;

        rows.iter()
            .map(|row| decode_account(row).map(|a| (a.id, a)))
            .collect()
    }

    #[instrument(skip(self), fields(row_count = tracing::field::Empty), err)]
    async fn list_accounts(&self, filter: &AccountFilter) -> Result<Vec<Account>, StoreError> {
        let rows = bind_account_filter(
            sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {ACCOUNT_FILTER} ORDER BY code"
            )),
            filter,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(decode_account).collect()
    }

    #[instrument(skip(self), err)]
    async fn page_accounts(
        &self,
        filter: &AccountFilter,
        window: PageWindow,
    ) -> Result<Page<Account>, StoreError> {
        let total: i64 = bind_account_filter(
            sqlx::query(&format!(
                "SELECT COUNT(*) AS total FROM accounts WHERE {ACCOUNT_FILTER}"
            )),
            filter,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_accounts", e))?
        .try_get("total")
        .map_err(|e| decode_error("account count", e))?;

        let rows = bind_account_filter(
            sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {ACCOUNT_FILTER} \
                 ORDER BY code LIMIT $6 OFFSET $7"
            )),
            filter,
        )
        .bind(window.limit() as i64)
        .bind(window.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("page_accounts", e))?;

        let items = rows.iter().map(decode_account).collect::<Result<_, _>>()?;
        Ok(Page::new(items, total as u64, window))
    }

    #[instrument(skip(self, key), fields(key = %key), err)]
    async fn peek_sequence(&self, key: &SequenceKey) -> Result<u32, StoreError> {
        let value: Option<i32> =
            sqlx::query_scalar("SELECT last_value FROM journal_sequences WHERE key = $1")
                .bind(key.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("peek_sequence", e))?;

        let last = u32::try_from(value.unwrap_or(0))
            .map_err(|_| StoreError::Corrupt(format!("sequence {key}: {value:?}")))?;
        Ok(last + 1)
    }

    #[instrument(
        skip(self, journal, events),
        fields(journal_id = %journal.id, number = %journal.number, event_count = events.len()),
        err
    )]
    async fn insert_journal(
        &self,
        journal: &Journal,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError> {
        let (key, sequence) = parse_number(&journal.number)
            .ok_or_else(|| StoreError::Corrupt(format!("journal number {}", journal.number)))?;
        let sequence = i32::try_from(sequence)
            .map_err(|_| StoreError::Corrupt(format!("journal number {}", journal.number)))?;

        let mut tx = self.begin().await?;

        // Advances the counter only when this number is the next free one;
        // a rollback below releases it again.
        let claimed = sqlx::query(
            r#"
            INSERT INTO journal_sequences (key, last_value)
            SELECT $1::text, $2::integer
            WHERE $2::integer = 1
               OR EXISTS (SELECT 1 FROM journal_sequences WHERE key = $1::text)
            ON CONFLICT (key) DO UPDATE SET last_value = EXCLUDED.last_value
            WHERE journal_sequences.last_value = EXCLUDED.last_value - 1
            "#,
        )
        .bind(key.as_str())
        .bind(sequence)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_sequence", e))?;
        if claimed.rows_affected() == 0 {
            return Err(StoreError::DuplicateNumber(journal.number.clone()));
        }

        sqlx::query(&format!(
            "INSERT INTO journals ({JOURNAL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, \
             $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)"
        ))
        .bind(Uuid::from(journal.id))
        .bind(Uuid::from(journal.branch_id))
        .bind(&journal.number)
        .bind(journal.date)
        .bind(&journal.description)
        .bind(&journal.reference)
        .bind(journal.status.as_str())
        .bind(journal.total_debit.minor_units())
        .bind(journal.total_credit.minor_units())
        .bind(journal.is_posted)
        .bind(journal.posted_at)
        .bind(journal.posted_by.map(Uuid::from))
        .bind(Uuid::from(journal.created_by))
        .bind(journal.created_at)
        .bind(journal.updated_at)
        .bind(journal.reviewed_by.map(Uuid::from))
        .bind(journal.reviewed_at)
        .bind(&journal.review_notes)
        .bind(journal.approved_by.map(Uuid::from))
        .bind(journal.approved_at)
        .bind(journal.rejected_by.map(Uuid::from))
        .bind(journal.rejected_at)
        .bind(&journal.reject_reason)
        .bind(journal.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_constraint(&e).as_deref() {
            Some("journals_number_key") => StoreError::DuplicateNumber(journal.number.clone()),
            Some(_) => StoreError::Concurrency(format!("journal {} already exists", journal.id)),
            None => map_sqlx_error("insert_journal", e),
        })?;

        insert_lines(&mut tx, journal.id, &journal.lines).await?;
        insert_events(&mut tx, events).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(
        skip_all,
        fields(
            journal_id = %journal.id,
            status = %journal.status,
            expected_version = ?expected,
            line_write = ?lines,
            year_check = ?year
        ),
        err
    )]
    async fn save_journal(
        &self,
        journal: &Journal,
        expected: ExpectedVersion,
        lines: LineWrite,
        year: YearCheck,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        if year == YearCheck::RequireOpen {
            ensure_open_on(&mut tx, journal.date).await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE journals SET
                date = $3, description = $4, reference = $5, status = $6,
                total_debit = $7, total_credit = $8, is_posted = $9, posted_at = $10,
                posted_by = $11, updated_at = $12, reviewed_by = $13, reviewed_at = $14,
                review_notes = $15, approved_by = $16, approved_at = $17, rejected_by = $18,
                rejected_at = $19, reject_reason = $20, version = $21
            WHERE id = $1 AND ($2::bigint IS NULL OR version = $2)
            "#,
        )
        .bind(Uuid::from(journal.id))
        .bind(expected_version(expected))
        .bind(journal.date)
        .bind(&journal.description)
        .bind(&journal.reference)
        .bind(journal.status.as_str())
        .bind(journal.total_debit.minor_units())
        .bind(journal.total_credit.minor_units())
        .bind(journal.is_posted)
        .bind(journal.posted_at)
        .bind(journal.posted_by.map(Uuid::from))
        .bind(journal.updated_at)
        .bind(journal.reviewed_by.map(Uuid::from))
        .bind(journal.reviewed_at)
        .bind(&journal.review_notes)
        .bind(journal.approved_by.map(Uuid::from))
        .bind(journal.approved_at)
        .bind(journal.rejected_by.map(Uuid::from))
        .bind(journal.rejected_at)
        .bind(&journal.reject_reason)
        .bind(journal.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("save_journal", e))?;

        if result.rows_affected() == 0 {
            return Err(missing_or_stale(&mut tx, journal.id, expected).await);
        }

        if lines == LineWrite::Replace {
            sqlx::query("DELETE FROM journal_lines WHERE journal_id = $1")
                .bind(Uuid::from(journal.id))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_lines", e))?;
            insert_lines(&mut tx, journal.id, &journal.lines).await?;
        }
        insert_events(&mut tx, events).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, events), fields(journal_id = %id, expected_version = ?expected), err)]
    async fn delete_journal(
        &self,
        id: JournalId,
        expected: ExpectedVersion,
        events: &[StoredJournalEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let result =
            sqlx::query("DELETE FROM journals WHERE id = $1 AND ($2::bigint IS NULL OR version = $2)")
                .bind(Uuid::from(id))
                .bind(expected_version(expected))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_journal", e))?;

        if result.rows_affected() == 0 {
            return Err(missing_or_stale(&mut tx, id, expected).await);
        }
        insert_events(&mut tx, events).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(journal_id = %id), err)]
    async fn get_journal(&self, id: JournalId) -> Result<Option<Journal>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOURNAL_COLUMNS} FROM journals WHERE id = $1"))
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_journal", e))?;

        match row {
            Some(row) => Ok(self.journals_with_lines(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn page_journals(
        &self,
        filter: &JournalFilter,
        window: PageWindow,
    ) -> Result<Page<Journal>, StoreError> {
        let total: i64 = bind_journal_filter(
            sqlx::query(&format!(
                "SELECT COUNT(*) AS total FROM journals WHERE {JOURNAL_FILTER}"
            )),
            filter,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_journals", e))?
        .try_get("total")
        .map_err(|e| decode_error("journal count", e))?;

        let rows = bind_journal_filter(
            sqlx::query(&format!(
                "SELECT {JOURNAL_COLUMNS} FROM journals WHERE {JOURNAL_FILTER} \
                 ORDER BY date DESC, created_at DESC, id DESC LIMIT $6 OFFSET $7"
            )),
            filter,
        )
        .bind(window.limit() as i64)
        .bind(window.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("page_journals", e))?;

        let items = self.journals_with_lines(rows).await?;
        Ok(Page::new(items, total as u64, window))
    }

    #[instrument(skip(self), fields(journal_id = %id), err)]
    async fn journal_events(&self, id: JournalId) -> Result<Vec<StoredJournalEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, journal_id, stream_type, sequence_number, event_type, actor,
                   occurred_at, payload
            FROM journal_events
            WHERE journal_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("journal_events", e))?;

        rows.iter()
            .map(|row| {
                EventRow::from_row(row)
                    .map(StoredJournalEvent::from)
                    .map_err(|e| decode_error("journal_events", e))
            })
            .collect()
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn posted_totals(
        &self,
        account_id: AccountId,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<LineTotals, StoreError> {
        let row = bind_posted_filter(
            sqlx::query(&format!(
                "SELECT COALESCE(SUM(l.debit), 0)::BIGINT AS debit, \
                        COALESCE(SUM(l.credit), 0)::BIGINT AS credit \
                 FROM journal_lines l JOIN journals j ON j.id = l.journal_id \
                 WHERE {POSTED_FILTER} AND l.account_id = $7"
            )),
            range,
            scope,
        )
        .bind(Uuid::from(account_id))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("posted_totals", e))?;

        decode_totals(&row)
    }

    #[instrument(skip(self), fields(account_count = tracing::field::Empty), err)]
    async fn posted_totals_by_account(
        &self,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<HashMap<AccountId, LineTotals>, StoreError> {
        let rows = bind_posted_filter(
            sqlx::query(&format!(
                "SELECT l.account_id, SUM(l.debit)::BIGINT AS debit, SUM(l.credit)::BIGINT AS credit \
                 FROM journal_lines l JOIN journals j ON j.id = l.journal_id \
                 WHERE {POSTED_FILTER} GROUP BY l.account_id"
            )),
            range,
            scope,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("posted_totals_by_account", e))?;

        Span::current().record("account_count", rows.len());
        rows.iter()
            .map(|row| {
                let account_id: Uuid = row
                    .try_get("account_id")
                    .map_err(|e| decode_error("posted totals", e))?;
                Ok((AccountId::from_uuid(account_id), decode_totals(row)?))
            })
            .collect()
    }

    #[instrument(skip(self), fields(account_id = %account_id, line_count = tracing::field::Empty), err)]
    async fn posted_lines(
        &self,
        account_id: AccountId,
        range: DateRange,
        scope: &ReportScope,
    ) -> Result<Vec<PostedLine>, StoreError> {
        let rows = bind_posted_filter(
            sqlx::query(&format!(
                "SELECT j.id AS journal_id, j.number AS journal_number, j.date AS journal_date, \
                        j.created_at AS journal_created_at, l.line_no, l.account_id, \
                        COALESCE(l.description, j.description) AS description, \
                        l.debit, l.credit, l.fund_id, l.program_id, l.donor_id, l.project_id \
                 FROM journal_lines l JOIN journals j ON j.id = l.journal_id \
                 WHERE {POSTED_FILTER} AND l.account_id = $7 \
                 ORDER BY j.date, j.created_at, j.id, l.line_no"
            )),
            range,
            scope,
        )
        .bind(Uuid::from(account_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("posted_lines", e))?;

        Span::current().record("line_count", rows.len());
        rows.iter().map(decode_posted_line).collect()
    }

    #[instrument(skip(self, fiscal_year), fields(fiscal_year_id = %fiscal_year.id), err)]
    async fn insert_fiscal_year(&self, fiscal_year: &FiscalYear) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO fiscal_years ({FISCAL_YEAR_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(Uuid::from(fiscal_year.id))
        .bind(&fiscal_year.name)
        .bind(fiscal_year.start_date)
        .bind(fiscal_year.end_date)
        .bind(fiscal_year.is_current)
        .bind(fiscal_year.is_closed)
        .bind(fiscal_year.closed_at)
        .bind(fiscal_year.closed_by.map(Uuid::from))
        .bind(fiscal_year.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_fiscal_year", e))?;
        Ok(())
    }

    #[instrument(skip(self, fiscal_year), fields(fiscal_year_id = %fiscal_year.id), err)]
    async fn update_fiscal_year(&self, fiscal_year: &FiscalYear) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fiscal_years
            SET name = $2, start_date = $3, end_date = $4, is_current = $5, is_closed = $6,
                closed_at = $7, closed_by = $8
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(fiscal_year.id))
        .bind(&fiscal_year.name)
        .bind(fiscal_year.start_date)
        .bind(fiscal_year.end_date)
        .bind(fiscal_year.is_current)
        .bind(fiscal_year.is_closed)
        .bind(fiscal_year.closed_at)
        .bind(fiscal_year.closed_by.map(Uuid::from))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_fiscal_year", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("fiscal year", fiscal_year.id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(fiscal_year_id = %id), err)]
    async fn get_fiscal_year(&self, id: FiscalYearId) -> Result<Option<FiscalYear>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {FISCAL_YEAR_COLUMNS} FROM fiscal_years WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_fiscal_year", e))?;

        row.map(|row| {
            FiscalYearRow::from_row(&row)
                .map(FiscalYear::from)
                .map_err(|e| decode_error("fiscal_years", e))
        })
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_fiscal_years(&self) -> Result<Vec<FiscalYear>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {FISCAL_YEAR_COLUMNS} FROM fiscal_years ORDER BY start_date"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_fiscal_years", e))?;

        rows.iter()
            .map(|row| {
                FiscalYearRow::from_row(row)
                    .map(FiscalYear::from)
                    .map_err(|e| decode_error("fiscal_years", e))
            })
            .collect()
    }

    #[instrument(skip(self), fields(fiscal_year_id = %id), err)]
    async fn set_current_fiscal_year(&self, id: FiscalYearId) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM fiscal_years WHERE id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_fiscal_year", e))?;
        if !exists {
            return Err(StoreError::not_found("fiscal year", id));
        }

        sqlx::query("UPDATE fiscal_years SET is_current = (id = $1)")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_current_fiscal_year", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, budget), fields(budget_id = %budget.id, period = %budget.period), err)]
    async fn insert_budget(&self, budget: &Budget) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        ensure_year_open(&mut tx, budget.fiscal_year_id).await?;

        sqlx::query(&format!(
            "INSERT INTO budgets ({BUDGET_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(Uuid::from(budget.id))
        .bind(Uuid::from(budget.fiscal_year_id))
        .bind(Uuid::from(budget.account_id))
        .bind(budget.period.to_string())
        .bind(budget.amount.minor_units())
        .bind(budget.scope.branch_id.map(Uuid::from))
        .bind(budget.scope.fund_id.map(Uuid::from))
        .bind(budget.scope.program_id.map(Uuid::from))
        .bind(&budget.description)
        .bind(budget.is_active)
        .bind(budget.created_at)
        .bind(budget.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_constraint(&e).as_deref() {
            Some("budgets_active_key") => StoreError::DuplicateBudget,
            _ => map_sqlx_error("insert_budget", e),
        })?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, budget), fields(budget_id = %budget.id), err)]
    async fn update_budget(&self, budget: &Budget) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let fiscal_year_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE budgets
            SET amount = $2, description = $3, is_active = $4, updated_at = $5
            WHERE id = $1
            RETURNING fiscal_year_id
            "#,
        )
        .bind(Uuid::from(budget.id))
        .bind(budget.amount.minor_units())
        .bind(&budget.description)
        .bind(budget.is_active)
        .bind(budget.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| match unique_constraint(&e).as_deref() {
            Some("budgets_active_key") => StoreError::DuplicateBudget,
            _ => map_sqlx_error("update_budget", e),
        })?;

        let fiscal_year_id =
            fiscal_year_id.ok_or_else(|| StoreError::not_found("budget", budget.id))?;
        ensure_year_open(&mut tx, FiscalYearId::from_uuid(fiscal_year_id)).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(budget_id = %id), err)]
    async fn delete_budget(&self, id: BudgetId) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let fiscal_year_id: Option<Uuid> =
            sqlx::query_scalar("DELETE FROM budgets WHERE id = $1 RETURNING fiscal_year_id")
                .bind(Uuid::from(id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_budget", e))?;

        let fiscal_year_id = fiscal_year_id.ok_or_else(|| StoreError::not_found("budget", id))?;
        ensure_year_open(&mut tx, FiscalYearId::from_uuid(fiscal_year_id)).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(budget_id = %id), err)]
    async fn get_budget(&self, id: BudgetId) -> Result<Option<Budget>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BUDGET_COLUMNS} FROM budgets WHERE id = $1"))
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_budget", e))?;
        row.map(|row| decode_budget(&row)).transpose()
    }

    #[instrument(skip(self), fields(row_count = tracing::field::Empty), err)]
    async fn list_budgets(&self, filter: &BudgetFilter) -> Result<Vec<Budget>, StoreError> {
        let rows = bind_budget_filter(
            sqlx::query(&format!(
                "SELECT {BUDGET_COLUMNS} FROM budgets WHERE {BUDGET_FILTER} \
                 ORDER BY period, created_at, id"
            )),
            filter,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_budgets", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(decode_budget).collect()
    }

    #[instrument(skip(self), err)]
    async fn page_budgets(
        &self,
        filter: &BudgetFilter,
        window: PageWindow,
    ) -> Result<Page<Budget>, StoreError> {
        let total: i64 = bind_budget_filter(
            sqlx::query(&format!(
                "SELECT COUNT(*) AS total FROM budgets WHERE {BUDGET_FILTER}"
            )),
            filter,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_budgets", e))?
        .try_get("total")
        .map_err(|e| decode_error("budget count", e))?;

        let rows = bind_budget_filter(
            sqlx::query(&format!(
                "SELECT {BUDGET_COLUMNS} FROM budgets WHERE {BUDGET_FILTER} \
                 ORDER BY period, created_at, id LIMIT $6 OFFSET $7"
            )),
            filter,
        )
        .bind(window.limit() as i64)
        .bind(window.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("page_budgets", e))?;

        let items = rows.iter().map(decode_budget).collect::<Result<_, _>>()?;
        Ok(Page::new(items, total as u64, window))
    }

    #[instrument(skip(self, fund), fields(code = %fund.code), err)]
    async fn insert_fund(&self, fund: &Fund) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO funds (id, code, name, restriction, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(fund.id))
        .bind(&fund.code)
        .bind(&fund.name)
        .bind(fund.restriction.as_str())
        .bind(fund.is_active)
        .bind(fund.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::DuplicateCode(fund.code.clone()),
            None => map_sqlx_error("insert_fund", e),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_funds(&self) -> Result<Vec<Fund>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, code, name, restriction, is_active, created_at FROM funds ORDER BY code",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_funds", e))?;

        rows.iter()
            .map(|row| {
                let restriction: String = column(row, "restriction")?;
                Ok(Fund {
                    id: column::<Uuid>(row, "id")?.into(),
                    code: column(row, "code")?,
                    name: column(row, "name")?,
                    restriction: restriction.parse().map_err(corrupt("funds.restriction"))?,
                    is_active: column(row, "is_active")?,
                    created_at: column(row, "created_at")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, program), fields(code = %program.code), err)]
    async fn insert_program(&self, program: &Program) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO programs (id, code, name, starts_on, ends_on, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::from(program.id))
        .bind(&program.code)
        .bind(&program.name)
        .bind(program.starts_on)
        .bind(program.ends_on)
        .bind(program.is_active)
        .bind(program.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::DuplicateCode(program.code.clone()),
            None => map_sqlx_error("insert_program", e),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_programs(&self) -> Result<Vec<Program>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, code, name, starts_on, ends_on, is_active, created_at \
             FROM programs ORDER BY code",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_programs", e))?;

        rows.iter()
            .map(|row| {
                Ok(Program {
                    id: column::<Uuid>(row, "id")?.into(),
                    code: column(row, "code")?,
                    name: column(row, "name")?,
                    starts_on: column(row, "starts_on")?,
                    ends_on: column(row, "ends_on")?,
                    is_active: column(row, "is_active")?,
                    created_at: column(row, "created_at")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, donor), fields(code = %donor.code), err)]
    async fn insert_donor(&self, donor: &Donor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO donors (id, code, name, kind, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(donor.id))
        .bind(&donor.code)
        .bind(&donor.name)
        .bind(donor.kind.as_str())
        .bind(donor.is_active)
        .bind(donor.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match unique_constraint(&e) {
            Some(_) => StoreError::DuplicateCode(donor.code.clone()),
            None => map_sqlx_error("insert_donor", e),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_donors(&self) -> Result<Vec<Donor>, StoreError> {
        let rows =
            sqlx::query("SELECT id, code, name, kind, is_active, created_at FROM donors ORDER BY code")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("list_donors", e))?;

        rows.iter()
            .map(|row| {
                let kind: String = column(row, "kind")?;
                Ok(Donor {
                    id: column::<Uuid>(row, "id")?.into(),
                    code: column(row, "code")?,
                    name: column(row, "name")?,
                    kind: kind.parse().map_err(corrupt("donors.kind"))?,
                    is_active: column(row, "is_active")?,
                    created_at: column(row, "created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl BranchDirectory for PostgresLedgerStore {
    #[instrument(skip(self), fields(branch_id = %id), err)]
    async fn branch(&self, id: BranchId) -> Result<Option<Branch>, StoreError> {
        let row = sqlx::query("SELECT id, code, name FROM branches WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_branch", e))?;

        row.map(|row| {
            Ok(Branch {
                id: column::<Uuid>(&row, "id")?.into(),
                code: column(&row, "code")?,
                name: column(&row, "name")?,
            })
        })
        .transpose()
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn bind_account_filter<'q>(query: PgQuery<'q>, filter: &'q AccountFilter) -> PgQuery<'q> {
    query
        .bind(filter.category.map(|c| c.as_str()))
        .bind(filter.account_type.map(|t| t.as_str()))
        .bind(filter.is_active)
        .bind(filter.is_detail)
        .bind(filter.search.as_deref())
}

fn bind_journal_filter<'q>(query: PgQuery<'q>, filter: &'q JournalFilter) -> PgQuery<'q> {
    query
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.branch_id.map(Uuid::from))
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(filter.search.as_deref())
}

fn bind_budget_filter<'q>(query: PgQuery<'q>, filter: &'q BudgetFilter) -> PgQuery<'q> {
    query
        .bind(filter.fiscal_year_id.map(Uuid::from))
        .bind(filter.period.map(|p| p.to_string()))
        .bind(filter.branch_id.map(Uuid::from))
        .bind(filter.account_id.map(Uuid::from))
        .bind(filter.active_only)
}

fn bind_posted_filter<'q>(query: PgQuery<'q>, range: DateRange, scope: &ReportScope) -> PgQuery<'q> {
    query
        .bind(range.start)
        .bind(range.end)
        .bind(scope.branch_id.map(Uuid::from))
        .bind(scope.fund_id.map(Uuid::from))
        .bind(scope.program_id.map(Uuid::from))
        .bind(scope.donor_id.map(Uuid::from))
}

fn expected_version(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

/// Tell a missing journal apart from a stale version after a guarded write
/// matched no row.
async fn missing_or_stale(
    tx: &mut Transaction<'_, Postgres>,
    id: JournalId,
    expected: ExpectedVersion,
) -> StoreError {
    let current: Result<Option<i64>, _> =
        sqlx::query_scalar("SELECT version FROM journals WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&mut **tx)
            .await;
    match current {
        Ok(Some(version)) => StoreError::Concurrency(format!(
            "journal {id} is at version {version}, expected {expected:?}"
        )),
        Ok(None) => StoreError::not_found("journal", id),
        Err(e) => map_sqlx_error("check_journal_version", e),
    }
}

/// Fail when the fiscal year is closed. The share lock makes a concurrent
/// close wait for this transaction.
async fn ensure_year_open(
    tx: &mut Transaction<'_, Postgres>,
    id: FiscalYearId,
) -> Result<(), StoreError> {
    let row: Option<(String, bool)> =
        sqlx::query_as("SELECT name, is_closed FROM fiscal_years WHERE id = $1 FOR SHARE")
            .bind(Uuid::from(id))
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("check_fiscal_year", e))?;
    match row {
        Some((name, true)) => Err(StoreError::FiscalYearClosed(name)),
        Some(_) => Ok(()),
        None => Err(StoreError::not_found("fiscal year", id)),
    }
}

/// [`ensure_year_open`] for whichever fiscal year contains `date`, if any.
async fn ensure_open_on(
    tx: &mut Transaction<'_, Postgres>,
    date: NaiveDate,
) -> Result<(), StoreError> {
    let rows: Vec<(String, bool)> = sqlx::query_as(
        "SELECT name, is_closed FROM fiscal_years \
         WHERE start_date <= $1 AND end_date >= $1 FOR SHARE",
    )
    .bind(date)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_fiscal_year", e))?;
    match rows.into_iter().find(|(_, closed)| *closed) {
        Some((name, _)) => Err(StoreError::FiscalYearClosed(name)),
        None => Ok(()),
    }
}

async fn insert_lines(
    tx: &mut Transaction<'_, Postgres>,
    journal_id: JournalId,
    lines: &[JournalLine],
) -> Result<(), StoreError> {
    for line in lines {
        sqlx::query(&format!(
            "INSERT INTO journal_lines ({LINE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(Uuid::from(line.id))
        .bind(Uuid::from(journal_id))
        .bind(line.line_no as i32)
        .bind(Uuid::from(line.account_id))
        .bind(&line.description)
        .bind(line.debit.minor_units())
        .bind(line.credit.minor_units())
        .bind(line.dimensions.fund_id.map(Uuid::from))
        .bind(line.dimensions.program_id.map(Uuid::from))
        .bind(line.dimensions.donor_id.map(Uuid::from))
        .bind(line.dimensions.project_id.map(Uuid::from))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            let tags = &line.dimensions;
            match foreign_key_constraint(&e).as_deref() {
                Some("journal_lines_account_fkey") => {
                    StoreError::not_found("account", line.account_id)
                }
                Some("journal_lines_fund_fkey") => tag_not_found("fund", tags.fund_id),
                Some("journal_lines_program_fkey") => {
                    tag_not_found("program", tags.program_id)
                }
                Some("journal_lines_donor_fkey") => tag_not_found("donor", tags.donor_id),
                _ => map_sqlx_error("insert_line", e),
            }
        })?;
    }
    Ok(())
}

fn tag_not_found<I: core::fmt::Display>(entity: &'static str, id: Option<I>) -> StoreError {
    match id {
        Some(id) => StoreError::not_found(entity, id),
        None => StoreError::not_found(entity, "?"),
    }
}

async fn insert_events(
    tx: &mut Transaction<'_, Postgres>,
    events: &[StoredJournalEvent],
) -> Result<(), StoreError> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO journal_events (
                event_id, journal_id, stream_type, sequence_number, event_type, actor,
                occurred_at, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.event_id())
        .bind(event.stream_id())
        .bind(event.stream_type())
        .bind(event.sequence_number() as i64)
        .bind(event.event_type())
        .bind(Uuid::from(event.actor()))
        .bind(event.occurred_at())
        .bind(event.payload())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if unique_constraint(&e).is_some() {
                StoreError::Concurrency(format!(
                    "journal event {} already recorded for {}",
                    event.sequence_number(),
                    event.stream_id()
                ))
            } else {
                map_sqlx_error("insert_event", e)
            }
        })?;
    }
    Ok(())
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation not handled at the call site.
                Some("23505") => StoreError::Concurrency(msg),
                // Foreign key violation.
                Some("23503") => StoreError::InUse(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("failed to decode row in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn violated_constraint(err: &sqlx::Error, sqlstate: &str) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some(sqlstate) {
            return Some(db_err.constraint().unwrap_or_default().to_string());
        }
    }
    None
}

/// Constraint name when `err` is a unique violation.
fn unique_constraint(err: &sqlx::Error) -> Option<String> {
    violated_constraint(err, "23505")
}

fn foreign_key_constraint(err: &sqlx::Error) -> Option<String> {
    violated_constraint(err, "23503")
}

fn decode_error(what: &str, err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(format!("failed to decode {what}: {err}"))
}

fn corrupt(what: &'static str) -> impl FnOnce(DomainError) -> StoreError {
    move |err| StoreError::Corrupt(format!("{what}: {err}"))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| decode_error(name, e))
}

fn decode_totals(row: &PgRow) -> Result<LineTotals, StoreError> {
    Ok(LineTotals {
        debit: Money::new(column(row, "debit")?),
        credit: Money::new(column(row, "credit")?),
    })
}

fn decode_account(row: &PgRow) -> Result<Account, StoreError> {
    AccountRow::from_row(row)
        .map_err(|e| decode_error("accounts", e))?
        .try_into()
}

fn decode_budget(row: &PgRow) -> Result<Budget, StoreError> {
    BudgetRow::from_row(row)
        .map_err(|e| decode_error("budgets", e))?
        .try_into()
}

fn decode_posted_line(row: &PgRow) -> Result<PostedLine, StoreError> {
    let line_no: i32 = column(row, "line_no")?;
    Ok(PostedLine {
        journal_id: column::<Uuid>(row, "journal_id")?.into(),
        journal_number: column(row, "journal_number")?,
        journal_date: column(row, "journal_date")?,
        journal_created_at: column(row, "journal_created_at")?,
        line_no: line_no as u32,
        account_id: column::<Uuid>(row, "account_id")?.into(),
        description: column(row, "description")?,
        debit: Money::new(column(row, "debit")?),
        credit: Money::new(column(row, "credit")?),
        dimensions: LineDimensions {
            fund_id: column::<Option<Uuid>>(row, "fund_id")?.map(Into::into),
            program_id: column::<Option<Uuid>>(row, "program_id")?.map(Into::into),
            donor_id: column::<Option<Uuid>>(row, "donor_id")?.map(Into::into),
            project_id: column::<Option<Uuid>>(row, "project_id")?.map(Into::into),
        },
    })
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: Uuid,
    parent_id: Option<Uuid>,
    code: String,
    name: String,
    name_en: Option<String>,
    description: Option<String>,
    account_type: String,
    category: String,
    normal_balance: String,
    is_active: bool,
    is_detail: bool,
    level: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            parent_id: row.try_get("parent_id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            name_en: row.try_get("name_en")?,
            description: row.try_get("description")?,
            account_type: row.try_get("account_type")?,
            category: row.try_get("category")?,
            normal_balance: row.try_get("normal_balance")?,
            is_active: row.try_get("is_active")?,
            is_detail: row.try_get("is_detail")?,
            level: row.try_get("level")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId::from_uuid(row.id),
            parent_id: row.parent_id.map(AccountId::from_uuid),
            code: row.code,
            name: row.name,
            name_en: row.name_en,
            description: row.description,
            account_type: row
                .account_type
                .parse()
                .map_err(corrupt("accounts.account_type"))?,
            category: row.category.parse().map_err(corrupt("accounts.category"))?,
            normal_balance: row
                .normal_balance
                .parse()
                .map_err(corrupt("accounts.normal_balance"))?,
            is_active: row.is_active,
            is_detail: row.is_detail,
            level: row.level as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct JournalRow {
    id: Uuid,
    branch_id: Uuid,
    number: String,
    date: NaiveDate,
    description: String,
    reference: Option<String>,
    status: String,
    total_debit: i64,
    total_credit: i64,
    is_posted: bool,
    posted_at: Option<DateTime<Utc>>,
    posted_by: Option<Uuid>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    rejected_by: Option<Uuid>,
    rejected_at: Option<DateTime<Utc>>,
    reject_reason: Option<String>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for JournalRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JournalRow {
            id: row.try_get("id")?,
            branch_id: row.try_get("branch_id")?,
            number: row.try_get("number")?,
            date: row.try_get("date")?,
            description: row.try_get("description")?,
            reference: row.try_get("reference")?,
            status: row.try_get("status")?,
            total_debit: row.try_get("total_debit")?,
            total_credit: row.try_get("total_credit")?,
            is_posted: row.try_get("is_posted")?,
            posted_at: row.try_get("posted_at")?,
            posted_by: row.try_get("posted_by")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            reviewed_by: row.try_get("reviewed_by")?,
            reviewed_at: row.try_get("reviewed_at")?,
            review_notes: row.try_get("review_notes")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
            rejected_by: row.try_get("rejected_by")?,
            rejected_at: row.try_get("rejected_at")?,
            reject_reason: row.try_get("reject_reason")?,
            version: row.try_get("version")?,
        })
    }
}

impl JournalRow {
    fn into_journal(self, lines: Vec<JournalLine>) -> Result<Journal, StoreError> {
        Ok(Journal {
            id: JournalId::from_uuid(self.id),
            branch_id: BranchId::from_uuid(self.branch_id),
            number: self.number,
            date: self.date,
            description: self.description,
            reference: self.reference,
            status: self.status.parse().map_err(corrupt("journals.status"))?,
            total_debit: Money::new(self.total_debit),
            total_credit: Money::new(self.total_credit),
            lines,
            is_posted: self.is_posted,
            posted_at: self.posted_at,
            posted_by: self.posted_by.map(UserId::from_uuid),
            created_by: UserId::from_uuid(self.created_by),
            created_at: self.created_at,
            updated_at: self.updated_at,
            reviewed_by: self.reviewed_by.map(UserId::from_uuid),
            reviewed_at: self.reviewed_at,
            review_notes: self.review_notes,
            approved_by: self.approved_by.map(UserId::from_uuid),
            approved_at: self.approved_at,
            rejected_by: self.rejected_by.map(UserId::from_uuid),
            rejected_at: self.rejected_at,
            reject_reason: self.reject_reason,
            version: self.version as u64,
        })
    }
}

#[derive(Debug)]
struct LineRow {
    id: Uuid,
    journal_id: Uuid,
    line_no: i32,
    account_id: Uuid,
    description: Option<String>,
    debit: i64,
    credit: i64,
    fund_id: Option<Uuid>,
    program_id: Option<Uuid>,
    donor_id: Option<Uuid>,
    project_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineRow {
            id: row.try_get("id")?,
            journal_id: row.try_get("journal_id")?,
            line_no: row.try_get("line_no")?,
            account_id: row.try_get("account_id")?,
            description: row.try_get("description")?,
            debit: row.try_get("debit")?,
            credit: row.try_get("credit")?,
            fund_id: row.try_get("fund_id")?,
            program_id: row.try_get("program_id")?,
            donor_id: row.try_get("donor_id")?,
            project_id: row.try_get("project_id")?,
        })
    }
}

impl From<LineRow> for JournalLine {
    fn from(row: LineRow) -> Self {
        JournalLine {
            id: row.id.into(),
            line_no: row.line_no as u32,
            account_id: row.account_id.into(),
            description: row.description,
            debit: Money::new(row.debit),
            credit: Money::new(row.credit),
            dimensions: LineDimensions {
                fund_id: row.fund_id.map(Into::into),
                program_id: row.program_id.map(Into::into),
                donor_id: row.donor_id.map(Into::into),
                project_id: row.project_id.map(Into::into),
            },
        }
    }
}

#[derive(Debug)]
struct EventRow {
    event_id: Uuid,
    journal_id: Uuid,
    stream_type: String,
    sequence_number: i64,
    event_type: String,
    actor: Uuid,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'r> FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            event_id: row.try_get("event_id")?,
            journal_id: row.try_get("journal_id")?,
            stream_type: row.try_get("stream_type")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            actor: row.try_get("actor")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<EventRow> for StoredJournalEvent {
    fn from(row: EventRow) -> Self {
        EventEnvelope::new(
            row.event_id,
            row.journal_id,
            row.stream_type,
            row.sequence_number as u64,
            row.event_type,
            UserId::from_uuid(row.actor),
            row.occurred_at,
            row.payload,
        )
    }
}

#[derive(Debug)]
struct FiscalYearRow {
    id: Uuid,
    name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    is_current: bool,
    is_closed: bool,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for FiscalYearRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(FiscalYearRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            is_current: row.try_get("is_current")?,
            is_closed: row.try_get("is_closed")?,
            closed_at: row.try_get("closed_at")?,
            closed_by: row.try_get("closed_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<FiscalYearRow> for FiscalYear {
    fn from(row: FiscalYearRow) -> Self {
        FiscalYear {
            id: FiscalYearId::from_uuid(row.id),
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            is_current: row.is_current,
            is_closed: row.is_closed,
            closed_at: row.closed_at,
            closed_by: row.closed_by.map(UserId::from_uuid),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug)]
struct BudgetRow {
    id: Uuid,
    fiscal_year_id: Uuid,
    account_id: Uuid,
    period: String,
    amount: i64,
    branch_id: Option<Uuid>,
    fund_id: Option<Uuid>,
    program_id: Option<Uuid>,
    description: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for BudgetRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BudgetRow {
            id: row.try_get("id")?,
            fiscal_year_id: row.try_get("fiscal_year_id")?,
            account_id: row.try_get("account_id")?,
            period: row.try_get("period")?,
            amount: row.try_get("amount")?,
            branch_id: row.try_get("branch_id")?,
            fund_id: row.try_get("fund_id")?,
            program_id: row.try_get("program_id")?,
            description: row.try_get("description")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<BudgetRow> for Budget {
    type Error = StoreError;

    fn try_from(row: BudgetRow) -> Result<Self, Self::Error> {
        Ok(Budget {
            id: BudgetId::from_uuid(row.id),
            fiscal_year_id: FiscalYearId::from_uuid(row.fiscal_year_id),
            account_id: AccountId::from_uuid(row.account_id),
            period: row.period.parse().map_err(corrupt("budgets.period"))?,
            amount: Money::new(row.amount),
            scope: BudgetScope {
                branch_id: row.branch_id.map(Into::into),
                fund_id: row.fund_id.map(Into::into),
                program_id: row.program_id.map(Into::into),
            },
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
