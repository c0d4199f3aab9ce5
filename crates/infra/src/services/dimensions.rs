use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::instrument;

use fundledger_accounting::{Donor, DonorKind, Fund, FundRestriction, Program};
use fundledger_auth::{Permission, Principal, authorize};

use crate::error::LedgerResult;
use crate::store::LedgerStore;

/// Registry of the fund, program and donor tags carried by journal lines.
#[derive(Debug)]
pub struct DimensionService<S> {
    store: Arc<S>,
}

impl<S> Clone for DimensionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> DimensionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, principal), err)]
    pub async fn create_fund(
        &self,
        principal: &Principal,
        code: &str,
        name: &str,
        restriction: FundRestriction,
    ) -> LedgerResult<Fund> {
        authorize(principal, &Permission::DIMENSIONS_MANAGE)?;
        let fund = Fund::new(code, name, restriction, Utc::now())?;
        self.store.insert_fund(&fund).await?;
        Ok(fund)
    }

    #[instrument(skip(self, principal), err)]
    pub async fn create_program(
        &self,
        principal: &Principal,
        code: &str,
        name: &str,
        starts_on: Option<NaiveDate>,
        ends_on: Option<NaiveDate>,
    ) -> LedgerResult<Program> {
        authorize(principal, &Permission::DIMENSIONS_MANAGE)?;
        let program = Program::new(code, name, starts_on, ends_on, Utc::now())?;
        self.store.insert_program(&program).await?;
        Ok(program)
    }

    #[instrument(skip(self, principal), err)]
    pub async fn create_donor(
        &self,
        principal: &Principal,
        code: &str,
        name: &str,
        kind: DonorKind,
    ) -> LedgerResult<Donor> {
        authorize(principal, &Permission::DIMENSIONS_MANAGE)?;
        let donor = Donor::new(code, name, kind, Utc::now())?;
        self.store.insert_donor(&donor).await?;
        Ok(donor)
    }

    pub async fn funds(&self) -> LedgerResult<Vec<Fund>> {
        Ok(self.store.list_funds().await?)
    }

    pub async fn programs(&self) -> LedgerResult<Vec<Program>> {
        Ok(self.store.list_programs().await?)
    }

    pub async fn donors(&self) -> LedgerResult<Vec<Donor>> {
        Ok(self.store.list_donors().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::store::InMemoryLedgerStore;
    use fundledger_core::{DomainError, UserId};

    #[tokio::test]
    async fn codes_are_unique_per_dimension() {
        let dimensions = DimensionService::new(Arc::new(InMemoryLedgerStore::new()));
        let admin = Principal::superuser(UserId::new());

        dimensions
            .create_fund(&admin, "SCH", "Scholarships", FundRestriction::Restricted)
            .await
            .unwrap();
        let err = dimensions
            .create_fund(&admin, "SCH", "Other", FundRestriction::Unrestricted)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Domain(DomainError::DuplicateCode("SCH".into())));

        // Same code in another dimension is fine.
        dimensions
            .create_donor(&admin, "SCH", "School Trust", DonorKind::Organization)
            .await
            .unwrap();
        dimensions
            .create_program(&admin, "GEN", "General", None, None)
            .await
            .unwrap();

        assert_eq!(dimensions.funds().await.unwrap().len(), 1);
        assert_eq!(dimensions.donors().await.unwrap().len(), 1);
        assert_eq!(dimensions.programs().await.unwrap()[0].code, "GEN");
    }

    #[tokio::test]
    async fn creating_tags_requires_permission() {
        let dimensions = DimensionService::new(Arc::new(InMemoryLedgerStore::new()));
        let clerk = Principal::new(UserId::new(), [Permission::JOURNAL_WRITE]);
        let err = dimensions
            .create_fund(&clerk, "OPS", "Operations", FundRestriction::Unrestricted)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));
    }
}
