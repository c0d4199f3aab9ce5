//! Chart-of-accounts management.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use fundledger_accounting::{
    Account, AccountNode, AccountUpdate, LegacyAccountRow, NewAccount, ParentRef, build_tree,
    from_legacy_rows, plan_import,
};
use fundledger_auth::{Permission, Principal, authorize};
use fundledger_core::{AccountId, DomainError, Page, PageRequest, SortDirection};

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::store::{AccountFilter, LedgerStore};

/// Sole writer of account metadata.
#[derive(Debug)]
pub struct ChartOfAccounts<S> {
    store: Arc<S>,
    config: Arc<LedgerConfig>,
}

impl<S> Clone for ChartOfAccounts<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: LedgerStore> ChartOfAccounts<S> {
    pub fn new(store: Arc<S>, config: Arc<LedgerConfig>) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self, principal, new), fields(code = %new.code, user_id = %principal.user_id), err)]
    pub async fn create(&self, principal: &Principal, new: NewAccount) -> LedgerResult<Account> {
        authorize(principal, &Permission::ACCOUNTS_MANAGE)?;

        let code = new.code.trim();
        if self.store.get_account_by_code(code).await?.is_some() {
            return Err(DomainError::DuplicateCode(code.to_string()).into());
        }

        let parent = match &new.parent {
            None => None,
            Some(ParentRef::Id(id)) => Some(
                self.store
                    .get_account(*id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("parent account", id))?,
            ),
            Some(ParentRef::Code(code)) => Some(
                self.store
                    .get_account_by_code(code.trim())
                    .await?
                    .ok_or_else(|| DomainError::not_found("parent account", code))?,
            ),
        };

        let account = Account::create(AccountId::new(), new, parent.as_ref(), Utc::now())?;
        self.store
            .insert_accounts(std::slice::from_ref(&account))
            .await?;

        info!(account_id = %account.id, level = account.level, "account created");
        Ok(account)
    }

    /// Change descriptive metadata. Code and hierarchy position never change.
    #[instrument(skip(self, principal, update), fields(account_id = %id), err)]
    pub async fn update(
        &self,
        principal: &Principal,
        id: AccountId,
        update: AccountUpdate,
    ) -> LedgerResult<Account> {
        authorize(principal, &Permission::ACCOUNTS_MANAGE)?;

        let mut account = self.get(id).await?;
        account.apply_update(update, Utc::now())?;
        self.store.update_account(&account).await?;
        Ok(account)
    }

    /// Delete an account without children, lines or budgets. The store
    /// re-checks every reference inside the deleting transaction.
    #[instrument(skip(self, principal), fields(account_id = %id), err)]
    pub async fn delete(&self, principal: &Principal, id: AccountId) -> LedgerResult<()> {
        authorize(principal, &Permission::ACCOUNTS_MANAGE)?;
        self.store.delete_account(id).await?;
        info!("account deleted");
        Ok(())
    }

    pub async fn get(&self, id: AccountId) -> LedgerResult<Account> {
        Ok(self
            .store
            .get_account(id)
            .await?
            .ok_or_else(|| DomainError::not_found("account", id))?)
    }

    pub async fn get_by_code(&self, code: &str) -> LedgerResult<Account> {
        let code = code.trim();
        Ok(self
            .store
            .get_account_by_code(code)
            .await?
            .ok_or_else(|| DomainError::not_found("account", code))?)
    }

    /// Filtered page of accounts, by code ascending unless `request.sort`
    /// names `code`, `name` or `level`.
    #[instrument(skip(self), err)]
    pub async fn list(
        &self,
        filter: &AccountFilter,
        request: &PageRequest,
    ) -> LedgerResult<Page<Account>> {
        let window = request.window(self.config.page_limits);
        let sort = request
            .sort
            .as_ref()
            .filter(|s| matches!(s.field.as_str(), "name" | "level" | "code"))
            .filter(|s| !(s.field == "code" && s.direction == SortDirection::Asc));

        let Some(sort) = sort else {
            return Ok(self.store.page_accounts(filter, window).await?);
        };

        let mut accounts = self.store.list_accounts(filter).await?;
        match sort.field.as_str() {
            "name" => accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.code.cmp(&b.code))),
            "level" => accounts.sort_by(|a, b| a.level.cmp(&b.level).then(a.code.cmp(&b.code))),
            _ => {}
        }
        if sort.direction == SortDirection::Desc {
            accounts.reverse();
        }
        Ok(window.slice(accounts))
    }

    /// Whole chart as a forest ordered by code at every level.
    #[instrument(skip(self), err)]
    pub async fn tree(&self) -> LedgerResult<Vec<AccountNode>> {
        let accounts = self.store.list_accounts(&AccountFilter::default()).await?;
        Ok(build_tree(accounts))
    }

    /// Create a batch of accounts in one transaction.
    ///
    /// Parents may be named by code anywhere in the batch; a duplicate code
    /// or unresolvable parent rejects the whole batch.
    #[instrument(skip(self, principal, rows), fields(row_count = rows.len()), err)]
    pub async fn bulk_import(
        &self,
        principal: &Principal,
        rows: Vec<NewAccount>,
    ) -> LedgerResult<Vec<Account>> {
        authorize(principal, &Permission::ACCOUNTS_MANAGE)?;

        let existing = self.store.list_accounts(&AccountFilter::default()).await?;
        let planned = plan_import(rows, &existing, Utc::now())?;
        self.store.insert_accounts(&planned).await?;

        info!(imported = planned.len(), "accounts imported");
        Ok(planned)
    }

    /// Import rows of the legacy chart-of-accounts export.
    #[instrument(skip(self, principal, rows), fields(row_count = rows.len()), err)]
    pub async fn import_legacy_rows(
        &self,
        principal: &Principal,
        rows: &[LegacyAccountRow],
    ) -> LedgerResult<Vec<Account>> {
        authorize(principal, &Permission::ACCOUNTS_MANAGE)?;

        let known: HashSet<String> = self
            .store
            .list_accounts(&AccountFilter::default())
            .await?
            .into_iter()
            .map(|a| a.code)
            .collect();
        let new_accounts = from_legacy_rows(rows, &known)?;
        self.bulk_import(principal, new_accounts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::store::InMemoryLedgerStore;
    use fundledger_accounting::{AccountCategory, AccountType};
    use fundledger_core::{Sort, UserId};

    fn service() -> (ChartOfAccounts<InMemoryLedgerStore>, Principal) {
        let chart = ChartOfAccounts::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(LedgerConfig::default()),
        );
        (chart, Principal::superuser(UserId::new()))
    }

    fn header(code: &str, category: AccountCategory) -> NewAccount {
        NewAccount::new(code, format!("Header {code}"), AccountType::Header, category)
    }

    fn detail_under(code: &str, parent: &str, category: AccountCategory) -> NewAccount {
        NewAccount::new(code, format!("Account {code}"), AccountType::Detail, category)
            .with_parent(ParentRef::Code(parent.to_string()))
    }

    #[tokio::test]
    async fn create_derives_level_and_normal_balance() {
        let (chart, admin) = service();
        let root = chart
            .create(&admin, header("2000", AccountCategory::Liability))
            .await
            .unwrap();
        let child = chart
            .create(&admin, detail_under("2100", "2000", AccountCategory::Liability))
            .await
            .unwrap();

        assert_eq!(root.level, 0);
        assert_eq!(child.level, 1);
        assert_eq!(child.parent_id, Some(root.id));
        assert!(child.is_detail);
        assert_eq!(
            child.normal_balance,
            fundledger_accounting::NormalBalance::Credit
        );
    }

    #[tokio::test]
    async fn duplicate_code_and_unknown_parent_are_rejected() {
        let (chart, admin) = service();
        chart
            .create(&admin, header("1000", AccountCategory::Asset))
            .await
            .unwrap();

        let err = chart
            .create(&admin, header("1000", AccountCategory::Asset))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Domain(DomainError::DuplicateCode("1000".into())));

        let err = chart
            .create(&admin, detail_under("1100", "9999", AccountCategory::Asset))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn deleting_a_parent_is_a_conflict_and_keeps_the_tree() {
        let (chart, admin) = service();
        let parent = chart
            .create(&admin, header("1000", AccountCategory::Asset))
            .await
            .unwrap();
        chart
            .create(&admin, detail_under("1100", "1000", AccountCategory::Asset))
            .await
            .unwrap();
        let before = chart.tree().await.unwrap();

        let err = chart.delete(&admin, parent.id).await.unwrap_err();
        assert_eq!(err, LedgerError::Domain(DomainError::HasChildren("1000".into())));
        assert_eq!(err.kind(), Some(fundledger_core::ErrorKind::Conflict));

        assert_eq!(chart.tree().await.unwrap(), before);
        assert_eq!(chart.get(parent.id).await.unwrap(), parent);
    }

    #[tokio::test]
    async fn create_requires_permission() {
        let (chart, _) = service();
        let clerk = Principal::new(UserId::new(), [Permission::JOURNAL_WRITE]);
        let err = chart
            .create(&clerk, header("1000", AccountCategory::Asset))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn tree_orders_children_by_code() {
        let (chart, admin) = service();
        chart
            .bulk_import(
                &admin,
                vec![
                    detail_under("1200", "1000", AccountCategory::Asset),
                    detail_under("1100", "1000", AccountCategory::Asset),
                    header("1000", AccountCategory::Asset),
                    header("5000", AccountCategory::Expense),
                ],
            )
            .await
            .unwrap();

        let tree = chart.tree().await.unwrap();
        let roots: Vec<&str> = tree.iter().map(|n| n.account.code.as_str()).collect();
        assert_eq!(roots, ["1000", "5000"]);
        let children: Vec<&str> = tree[0]
            .children
            .iter()
            .map(|n| n.account.code.as_str())
            .collect();
        assert_eq!(children, ["1100", "1200"]);
    }

    #[tokio::test]
    async fn update_keeps_structure() {
        let (chart, admin) = service();
        let account = chart
            .create(&admin, header("3000", AccountCategory::Equity))
            .await
            .unwrap();

        let updated = chart
            .update(
                &admin,
                account.id,
                AccountUpdate {
                    name: Some("Net Assets".into()),
                    is_active: Some(false),
                    ..AccountUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Net Assets");
        assert!(!updated.is_active);
        assert_eq!(updated.code, "3000");
        assert_eq!(chart.get_by_code("3000").await.unwrap(), updated);
    }

    #[tokio::test]
    async fn parent_cannot_be_deleted_before_children() {
        let (chart, admin) = service();
        let planned = chart
            .bulk_import(
                &admin,
                vec![
                    header("1000", AccountCategory::Asset),
                    detail_under("1100", "1000", AccountCategory::Asset),
                ],
            )
            .await
            .unwrap();
        let parent = planned.iter().find(|a| a.code == "1000").unwrap();
        let child = planned.iter().find(|a| a.code == "1100").unwrap();

        let err = chart.delete(&admin, parent.id).await.unwrap_err();
        assert_eq!(err, LedgerError::Domain(DomainError::HasChildren("1000".into())));

        chart.delete(&admin, child.id).await.unwrap();
        chart.delete(&admin, parent.id).await.unwrap();
        assert!(chart.tree().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_pages_by_code_and_honours_name_sort() {
        let (chart, admin) = service();
        for (code, name) in [("1300", "Alpha"), ("1100", "Charlie"), ("1200", "Bravo")] {
            chart
                .create(
                    &admin,
                    NewAccount::new(code, name, AccountType::Detail, AccountCategory::Asset),
                )
                .await
                .unwrap();
        }

        let page = chart
            .list(&AccountFilter::default(), &PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        let codes: Vec<&str> = page.items.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, ["1100", "1200"]);

        let by_name = chart
            .list(
                &AccountFilter::default(),
                &PageRequest::new(1, 10).sorted_by(Sort::desc("name")),
            )
            .await
            .unwrap();
        let names: Vec<&str> = by_name.items.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["Charlie", "Bravo", "Alpha"]);
    }

    #[tokio::test]
    async fn legacy_rows_link_to_their_code_prefix() {
        let (chart, admin) = service();
        let row = |code: &str, kind: &str, name: &str| LegacyAccountRow {
            no: 0,
            code: code.into(),
            kind: kind.into(),
            name: name.into(),
            level1: String::new(),
            level2: String::new(),
            level3: String::new(),
            level4: String::new(),
        };

        let imported = chart
            .import_legacy_rows(
                &admin,
                &[row("11101", "B", "Petty Cash"), row("1110", "H", "Cash")],
            )
            .await
            .unwrap();
        assert_eq!(imported.len(), 2);

        let cash = chart.get_by_code("1110").await.unwrap();
        let petty = chart.get_by_code("11101").await.unwrap();
        assert_eq!(petty.parent_id, Some(cash.id));
        assert_eq!(petty.category, AccountCategory::Asset);
        assert!(petty.is_detail);
    }
}
