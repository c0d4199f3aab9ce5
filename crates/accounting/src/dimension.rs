//! Fund, program and donor tags carried by journal lines.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fundledger_core::{DomainError, DomainResult, DonorId, Entity, FundId, ProgramId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundRestriction {
    Restricted,
    Unrestricted,
}

impl FundRestriction {
    pub fn as_str(self) -> &'static str {
        match self {
            FundRestriction::Restricted => "restricted",
            FundRestriction::Unrestricted => "unrestricted",
        }
    }
}

impl FromStr for FundRestriction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restricted" => Ok(FundRestriction::Restricted),
            "unrestricted" => Ok(FundRestriction::Unrestricted),
            other => Err(DomainError::validation(format!(
                "unknown fund restriction: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fund {
    pub id: FundId,
    pub code: String,
    pub name: String,
    pub restriction: FundRestriction,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub code: String,
    pub name: String,
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonorKind {
    Individual,
    Organization,
}

impl DonorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DonorKind::Individual => "individual",
            DonorKind::Organization => "organization",
        }
    }
}

impl FromStr for DonorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(DonorKind::Individual),
            "organization" => Ok(DonorKind::Organization),
            other => Err(DomainError::validation(format!("unknown donor kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donor {
    pub id: DonorId,
    pub code: String,
    pub name: String,
    pub kind: DonorKind,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Fund {
    type Id = FundId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Entity for Program {
    type Id = ProgramId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Entity for Donor {
    type Id = DonorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn code_and_name(code: &str, name: &str, what: &str) -> DomainResult<(String, String)> {
    let code = code.trim();
    let name = name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(DomainError::validation(format!(
            "{what} code and name are required"
        )));
    }
    Ok((code.to_string(), name.to_string()))
}

impl Fund {
    pub fn new(
        code: &str,
        name: &str,
        restriction: FundRestriction,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let (code, name) = code_and_name(code, name, "fund")?;
        Ok(Self {
            id: FundId::new(),
            code,
            name,
            restriction,
            is_active: true,
            created_at: now,
        })
    }
}

impl Program {
    pub fn new(
        code: &str,
        name: &str,
        starts_on: Option<NaiveDate>,
        ends_on: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let (code, name) = code_and_name(code, name, "program")?;
        if let (Some(start), Some(end)) = (starts_on, ends_on) {
            if end < start {
                return Err(DomainError::validation(format!(
                    "program {code} ends before it starts"
                )));
            }
        }
        Ok(Self {
            id: ProgramId::new(),
            code,
            name,
            starts_on,
            ends_on,
            is_active: true,
            created_at: now,
        })
    }
}

impl Donor {
    pub fn new(code: &str, name: &str, kind: DonorKind, now: DateTime<Utc>) -> DomainResult<Self> {
        let (code, name) = code_and_name(code, name, "donor")?;
        Ok(Self {
            id: DonorId::new(),
            code,
            name,
            kind,
            is_active: true,
            created_at: now,
        })
    }
}
