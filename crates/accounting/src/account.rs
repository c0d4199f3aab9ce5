//! Chart-of-accounts model: classification rules and the account hierarchy.

use core::str::FromStr;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fundledger_core::{AccountId, DomainError, DomainResult, Entity, Money};

/// Structural role of an account. Only the detail-like variants accept
/// journal lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Header,
    SubHeader,
    Detail,
    IncomeExpenseDetail,
    RetainedEarnings,
    CurrentYearRetained,
}

impl AccountType {
    pub const ALL: [AccountType; 6] = [
        AccountType::Header,
        AccountType::SubHeader,
        AccountType::Detail,
        AccountType::IncomeExpenseDetail,
        AccountType::RetainedEarnings,
        AccountType::CurrentYearRetained,
    ];

    pub fn is_detail(self) -> bool {
        match self {
            AccountType::Header | AccountType::SubHeader => false,
            AccountType::Detail
            | AccountType::IncomeExpenseDetail
            | AccountType::RetainedEarnings
            | AccountType::CurrentYearRetained => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Header => "header",
            AccountType::SubHeader => "sub_header",
            AccountType::Detail => "detail",
            AccountType::IncomeExpenseDetail => "income_expense_detail",
            AccountType::RetainedEarnings => "retained_earnings",
            AccountType::CurrentYearRetained => "current_year_retained",
        }
    }

    /// Single-letter codes used by legacy chart exports.
    pub fn legacy_code(self) -> &'static str {
        match self {
            AccountType::Header => "H",
            AccountType::SubHeader => "SH",
            AccountType::Detail => "B",
            AccountType::IncomeExpenseDetail => "I",
            AccountType::RetainedEarnings => "R",
            AccountType::CurrentYearRetained => "R1",
        }
    }

    pub fn from_legacy_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.legacy_code().eq_ignore_ascii_case(code.trim()))
    }
}

impl core::fmt::Display for AccountType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = DomainError;

    /// Accepts the snake_case name or the legacy letter code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .or_else(|| Self::from_legacy_code(s))
            .ok_or_else(|| DomainError::validation(format!("unknown account type: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountCategory {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountCategory {
    pub const ALL: [AccountCategory; 5] = [
        AccountCategory::Asset,
        AccountCategory::Liability,
        AccountCategory::Equity,
        AccountCategory::Revenue,
        AccountCategory::Expense,
    ];

    pub fn default_normal_balance(self) -> NormalBalance {
        match self {
            AccountCategory::Asset | AccountCategory::Expense => NormalBalance::Debit,
            AccountCategory::Liability | AccountCategory::Equity | AccountCategory::Revenue => {
                NormalBalance::Credit
            }
        }
    }

    /// Category implied by the first digit of a numeric account code
    /// (1 asset, 2 liability, 3 equity, 4 revenue, 5-9 expense).
    pub fn from_code_prefix(code: &str) -> Option<Self> {
        match code.trim().chars().next()? {
            '1' => Some(AccountCategory::Asset),
            '2' => Some(AccountCategory::Liability),
            '3' => Some(AccountCategory::Equity),
            '4' => Some(AccountCategory::Revenue),
            '5'..='9' => Some(AccountCategory::Expense),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountCategory::Asset => "asset",
            AccountCategory::Liability => "liability",
            AccountCategory::Equity => "equity",
            AccountCategory::Revenue => "revenue",
            AccountCategory::Expense => "expense",
        }
    }
}

impl core::fmt::Display for AccountCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown account category: {s}")))
    }
}

/// Side on which an account's balance normally sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl NormalBalance {
    /// Net of debit and credit totals, positive when the balance sits on
    /// this side.
    pub fn signed(self, debit: Money, credit: Money) -> Money {
        match self {
            NormalBalance::Debit => debit - credit,
            NormalBalance::Credit => credit - debit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NormalBalance::Debit => "debit",
            NormalBalance::Credit => "credit",
        }
    }
}

impl FromStr for NormalBalance {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debit" => Ok(NormalBalance::Debit),
            "credit" => Ok(NormalBalance::Credit),
            other => Err(DomainError::validation(format!(
                "unknown normal balance: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub parent_id: Option<AccountId>,
    pub code: String,
    pub name: String,
    pub name_en: Option<String>,
    pub description: Option<String>,
    pub account_type: AccountType,
    pub category: AccountCategory,
    pub normal_balance: NormalBalance,
    pub is_active: bool,
    pub is_detail: bool,
    pub level: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// How a new account names its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef {
    Id(AccountId),
    Code(String),
}

/// Input for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub name_en: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub account_type: AccountType,
    pub category: AccountCategory,
    /// Defaults from the category when absent.
    #[serde(default)]
    pub normal_balance: Option<NormalBalance>,
    #[serde(default)]
    pub parent: Option<ParentRef>,
}

impl NewAccount {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        account_type: AccountType,
        category: AccountCategory,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            name_en: None,
            description: None,
            account_type,
            category,
            normal_balance: None,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_normal_balance(mut self, normal_balance: NormalBalance) -> Self {
        self.normal_balance = Some(normal_balance);
        self
    }
}

/// Mutable account metadata. Code, type, category and parent are fixed once
/// created so historical postings keep their meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_en: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl Account {
    /// Build an account under `parent` (already resolved by the caller).
    pub fn create(
        id: AccountId,
        new: NewAccount,
        parent: Option<&Account>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let code = new.code.trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("account code is required"));
        }
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation(format!(
                "account {code}: name is required"
            )));
        }

        Ok(Self {
            id,
            parent_id: parent.map(|p| p.id),
            code,
            name,
            name_en: non_blank(new.name_en),
            description: non_blank(new.description),
            account_type: new.account_type,
            category: new.category,
            normal_balance: new
                .normal_balance
                .unwrap_or_else(|| new.category.default_normal_balance()),
            is_active: true,
            is_detail: new.account_type.is_detail(),
            level: parent.map_or(0, |p| p.level + 1),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, update: AccountUpdate, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DomainError::validation("account name cannot be blank"));
            }
            self.name = name;
        }
        if let Some(name_en) = update.name_en {
            self.name_en = non_blank(Some(name_en));
        }
        if let Some(description) = update.description {
            self.description = non_blank(Some(description));
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn can_post(&self) -> bool {
        self.is_detail && self.is_active
    }

    pub fn ensure_postable(&self) -> DomainResult<()> {
        if self.can_post() {
            Ok(())
        } else {
            Err(DomainError::AccountNotPostable(self.code.clone()))
        }
    }

    /// Balance with this account's sign convention applied.
    pub fn signed_balance(&self, debit: Money, credit: Money) -> Money {
        self.normal_balance.signed(debit, credit)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// An account with its children, as returned by the tree view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountNode {
    #[serde(flatten)]
    pub account: Account,
    pub children: Vec<AccountNode>,
}

/// Assemble the chart into a forest ordered by code at every level.
///
/// Accounts whose parent is missing from `accounts` are treated as roots.
pub fn build_tree(accounts: Vec<Account>) -> Vec<AccountNode> {
    let known: std::collections::HashSet<AccountId> = accounts.iter().map(|a| a.id).collect();
    let mut by_parent: HashMap<Option<AccountId>, Vec<Account>> = HashMap::new();
    for account in accounts {
        let parent = account.parent_id.filter(|p| known.contains(p));
        by_parent.entry(parent).or_default().push(account);
    }
    attach_children(None, &mut by_parent)
}

fn attach_children(
    parent: Option<AccountId>,
    by_parent: &mut HashMap<Option<AccountId>, Vec<Account>>,
) -> Vec<AccountNode> {
    let mut accounts = by_parent.remove(&parent).unwrap_or_default();
    accounts.sort_by(|a, b| a.code.cmp(&b.code));
    accounts
        .into_iter()
        .map(|account| {
            let children = attach_children(Some(account.id), by_parent);
            AccountNode { account, children }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap()
    }

    fn account(code: &str, account_type: AccountType, parent: Option<&Account>) -> Account {
        let category = AccountCategory::from_code_prefix(code).unwrap();
        Account::create(
            AccountId::new(),
            NewAccount::new(code, format!("Account {code}"), account_type, category),
            parent,
            now(),
        )
        .unwrap()
    }

    #[test]
    fn normal_balance_defaults_from_category() {
        let cash = account("1100", AccountType::Detail, None);
        let revenue = account("4100", AccountType::Detail, None);
        let expense = account("5100", AccountType::IncomeExpenseDetail, None);
        assert_eq!(cash.normal_balance, NormalBalance::Debit);
        assert_eq!(revenue.normal_balance, NormalBalance::Credit);
        assert_eq!(expense.normal_balance, NormalBalance::Debit);
    }

    #[test]
    fn explicit_normal_balance_wins() {
        let contra = Account::create(
            AccountId::new(),
            NewAccount::new(
                "1190",
                "Accumulated depreciation",
                AccountType::Detail,
                AccountCategory::Asset,
            )
            .with_normal_balance(NormalBalance::Credit),
            None,
            now(),
        )
        .unwrap();
        assert_eq!(contra.normal_balance, NormalBalance::Credit);
    }

    #[test]
    fn level_follows_parent() {
        let root = account("1", AccountType::Header, None);
        let sub = account("11", AccountType::SubHeader, Some(&root));
        let leaf = account("1100", AccountType::Detail, Some(&sub));
        assert_eq!((root.level, sub.level, leaf.level), (0, 1, 2));
        assert_eq!(leaf.parent_id, Some(sub.id));
    }

    #[test]
    fn only_active_detail_accounts_accept_postings() {
        let header = account("1", AccountType::Header, None);
        assert!(!header.is_detail);
        assert_eq!(
            header.ensure_postable(),
            Err(DomainError::AccountNotPostable("1".to_string()))
        );

        let mut cash = account("1100", AccountType::Detail, None);
        assert!(cash.ensure_postable().is_ok());
        cash.apply_update(
            AccountUpdate {
                is_active: Some(false),
                ..AccountUpdate::default()
            },
            now(),
        )
        .unwrap();
        assert!(!cash.can_post());
    }

    #[test]
    fn update_rejects_blank_name() {
        let mut cash = account("1100", AccountType::Detail, None);
        let err = cash
            .apply_update(
                AccountUpdate {
                    name: Some("   ".into()),
                    ..AccountUpdate::default()
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn type_parses_names_and_legacy_codes() {
        assert_eq!("sub_header".parse::<AccountType>().unwrap(), AccountType::SubHeader);
        assert_eq!("R1".parse::<AccountType>().unwrap(), AccountType::CurrentYearRetained);
        assert_eq!("b".parse::<AccountType>().unwrap(), AccountType::Detail);
        assert!("X".parse::<AccountType>().is_err());
    }

    #[test]
    fn tree_is_ordered_by_code_at_every_level() {
        let assets = account("1", AccountType::Header, None);
        let liabilities = account("2", AccountType::Header, None);
        let bank = account("1200", AccountType::Detail, Some(&assets));
        let cash = account("1100", AccountType::Detail, Some(&assets));
        let payable = account("2100", AccountType::Detail, Some(&liabilities));

        let tree = build_tree(vec![
            payable,
            bank.clone(),
            liabilities,
            cash.clone(),
            assets,
        ]);

        let roots: Vec<&str> = tree.iter().map(|n| n.account.code.as_str()).collect();
        assert_eq!(roots, ["1", "2"]);
        let asset_children: Vec<&str> = tree[0]
            .children
            .iter()
            .map(|n| n.account.code.as_str())
            .collect();
        assert_eq!(asset_children, ["1100", "1200"]);
        assert_eq!(tree[1].children.len(), 1);
        assert!(tree[0].children[0].children.is_empty());
    }

    #[test]
    fn orphaned_accounts_surface_as_roots() {
        let parent = account("1", AccountType::Header, None);
        let child = account("1100", AccountType::Detail, Some(&parent));
        let tree = build_tree(vec![child]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].account.code, "1100");
    }
}
