//! Bulk chart-of-accounts import planning.
//!
//! Planning is pure: it turns a batch of [`NewAccount`] rows into fully
//! resolved [`Account`]s (ids, parents, levels) or fails as a whole. The
//! caller persists the plan in one transaction.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fundledger_core::{AccountId, DomainError, DomainResult};

use crate::account::{Account, AccountCategory, AccountType, NewAccount, ParentRef};

/// Resolve a batch against the existing chart.
///
/// Parents may be referenced by id (existing accounts only) or by code
/// (existing or elsewhere in the same batch, in any order). Codes must be
/// unique across the batch and the existing chart.
pub fn plan_import(
    rows: Vec<NewAccount>,
    existing: &[Account],
    now: DateTime<Utc>,
) -> DomainResult<Vec<Account>> {
    let existing_by_code: HashMap<&str, &Account> =
        existing.iter().map(|a| (a.code.as_str(), a)).collect();
    let existing_by_id: HashMap<AccountId, &Account> = existing.iter().map(|a| (a.id, a)).collect();

    let mut batch_codes = HashSet::with_capacity(rows.len());
    for row in &rows {
        let code = row.code.trim();
        if existing_by_code.contains_key(code) || !batch_codes.insert(code.to_string()) {
            return Err(DomainError::DuplicateCode(code.to_string()));
        }
    }

    let mut planned: Vec<Option<Account>> = vec![None; rows.len()];
    let mut planned_by_code: HashMap<String, Account> = HashMap::with_capacity(rows.len());
    let mut pending: Vec<(usize, NewAccount)> = rows.into_iter().enumerate().collect();

    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();

        for (index, row) in pending {
            let parent = match &row.parent {
                None => None,
                Some(ParentRef::Id(id)) => match existing_by_id.get(id) {
                    Some(parent) => Some((*parent).clone()),
                    None => {
                        match planned_by_code.values().find(|a| a.id == *id) {
                            Some(parent) => Some(parent.clone()),
                            None => return Err(DomainError::not_found("parent account", id)),
                        }
                    }
                },
                Some(ParentRef::Code(code)) => {
                    let code = code.trim();
                    if let Some(parent) = existing_by_code.get(code) {
                        Some((*parent).clone())
                    } else if let Some(parent) = planned_by_code.get(code) {
                        Some(parent.clone())
                    } else if batch_codes.contains(code) {
                        deferred.push((index, row));
                        continue;
                    } else {
                        return Err(DomainError::not_found("parent account", code));
                    }
                }
            };

            let account = Account::create(AccountId::new(), row, parent.as_ref(), now)?;
            planned_by_code.insert(account.code.clone(), account.clone());
            planned[index] = Some(account);
        }

        if deferred.len() == before {
            let codes: Vec<&str> = deferred.iter().map(|(_, r)| r.code.as_str()).collect();
            return Err(DomainError::validation(format!(
                "circular parent references among accounts: {}",
                codes.join(", ")
            )));
        }
        pending = deferred;
    }

    Ok(planned.into_iter().flatten().collect())
}

/// Row of the legacy chart-of-accounts export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAccountRow {
    #[serde(default)]
    pub no: i64,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub level1: String,
    #[serde(default)]
    pub level2: String,
    #[serde(default)]
    pub level3: String,
    #[serde(default)]
    pub level4: String,
}

/// Length of the code prefix that names a legacy row's parent.
const LEGACY_PARENT_CODE_LEN: usize = 4;

impl LegacyAccountRow {
    /// Display name, falling back to the deepest non-empty level label.
    pub fn display_name(&self) -> String {
        let name = self.name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
        [&self.level4, &self.level3, &self.level2, &self.level1]
            .into_iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    fn parent_code(&self) -> Option<&str> {
        let code = self.code.trim();
        if code.chars().count() > LEGACY_PARENT_CODE_LEN {
            code.get(..LEGACY_PARENT_CODE_LEN)
        } else {
            None
        }
    }
}

/// Convert legacy rows into import rows.
///
/// Category comes from the leading digit of the code, type from the legacy
/// letter. A row links to the 4-character code prefix when that code exists
/// in the batch or in `known_codes`; otherwise it becomes a root.
pub fn from_legacy_rows(
    rows: &[LegacyAccountRow],
    known_codes: &HashSet<String>,
) -> DomainResult<Vec<NewAccount>> {
    let batch_codes: HashSet<&str> = rows.iter().map(|r| r.code.trim()).collect();

    rows.iter()
        .map(|row| {
            let code = row.code.trim();
            let account_type = AccountType::from_legacy_code(&row.kind).ok_or_else(|| {
                DomainError::validation(format!("account {code}: unknown type {:?}", row.kind))
            })?;
            let category = AccountCategory::from_code_prefix(code).ok_or_else(|| {
                DomainError::validation(format!("account {code}: code has no category digit"))
            })?;

            let mut new = NewAccount::new(code, row.display_name(), account_type, category);
            if let Some(parent) = row
                .parent_code()
                .filter(|p| batch_codes.contains(p) || known_codes.contains(*p))
            {
                new = new.with_parent(ParentRef::Code(parent.to_string()));
            }
            Ok(new)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap()
    }

    fn row(code: &str, account_type: AccountType, parent: Option<&str>) -> NewAccount {
        let category = AccountCategory::from_code_prefix(code).unwrap();
        let mut new = NewAccount::new(code, format!("Account {code}"), account_type, category);
        if let Some(parent) = parent {
            new = new.with_parent(ParentRef::Code(parent.to_string()));
        }
        new
    }

    #[test]
    fn resolves_parents_declared_later_in_the_batch() {
        let plan = plan_import(
            vec![
                row("1100", AccountType::Detail, Some("11")),
                row("11", AccountType::SubHeader, Some("1")),
                row("1", AccountType::Header, None),
            ],
            &[],
            now(),
        )
        .unwrap();

        let codes: Vec<&str> = plan.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, ["1100", "11", "1"]);
        let levels: Vec<u32> = plan.iter().map(|a| a.level).collect();
        assert_eq!(levels, [2, 1, 0]);
        assert_eq!(plan[0].parent_id, Some(plan[1].id));
        assert_eq!(plan[1].parent_id, Some(plan[2].id));
    }

    #[test]
    fn resolves_parents_from_the_existing_chart() {
        let existing = plan_import(vec![row("1", AccountType::Header, None)], &[], now()).unwrap();
        let plan = plan_import(
            vec![row("1100", AccountType::Detail, Some("1"))],
            &existing,
            now(),
        )
        .unwrap();
        assert_eq!(plan[0].parent_id, Some(existing[0].id));
        assert_eq!(plan[0].level, 1);
    }

    #[test]
    fn duplicate_codes_reject_the_whole_batch() {
        let err = plan_import(
            vec![
                row("1", AccountType::Header, None),
                row("1", AccountType::Header, None),
            ],
            &[],
            now(),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::DuplicateCode("1".to_string()));

        let existing = plan_import(vec![row("1", AccountType::Header, None)], &[], now()).unwrap();
        let err = plan_import(vec![row("1", AccountType::Header, None)], &existing, now())
            .unwrap_err();
        assert_eq!(err, DomainError::DuplicateCode("1".to_string()));
    }

    #[test]
    fn unknown_parent_is_not_found() {
        let err = plan_import(
            vec![row("1100", AccountType::Detail, Some("19"))],
            &[],
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[test]
    fn circular_parents_are_rejected() {
        let err = plan_import(
            vec![
                row("11", AccountType::SubHeader, Some("12")),
                row("12", AccountType::SubHeader, Some("11")),
            ],
            &[],
            now(),
        )
        .unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("circular") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn legacy_rows_map_type_category_and_parent() {
        let rows: Vec<LegacyAccountRow> = serde_json::from_str(
            r#"[
                {"no": 1, "code": "1101", "type": "SH", "name": "", "level1": "Aset", "level2": "Kas dan Bank"},
                {"no": 2, "code": "110101", "type": "B", "name": "Kas Kecil"},
                {"no": 3, "code": "510101", "type": "I", "name": "Beban Listrik"}
            ]"#,
        )
        .unwrap();

        let new = from_legacy_rows(&rows, &HashSet::new()).unwrap();
        assert_eq!(new[0].name, "Kas dan Bank");
        assert_eq!(new[0].account_type, AccountType::SubHeader);
        assert_eq!(new[0].category, AccountCategory::Asset);
        assert_eq!(new[0].parent, None);
        assert_eq!(new[1].parent, Some(ParentRef::Code("1101".to_string())));
        assert_eq!(new[2].category, AccountCategory::Expense);
        assert_eq!(new[2].account_type, AccountType::IncomeExpenseDetail);
        // "5101" is neither in the batch nor known, so the row is a root.
        assert_eq!(new[2].parent, None);

        let plan = plan_import(new, &[], now()).unwrap();
        assert_eq!(plan[1].level, 1);
    }

    #[test]
    fn legacy_rows_reject_unknown_types() {
        let rows = vec![LegacyAccountRow {
            no: 1,
            code: "1101".into(),
            kind: "Z".into(),
            name: "Kas".into(),
            level1: String::new(),
            level2: String::new(),
            level3: String::new(),
            level4: String::new(),
        }];
        assert!(from_legacy_rows(&rows, &HashSet::new()).is_err());
    }
}
