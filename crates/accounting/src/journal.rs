//! Journal aggregate: line validation and the approval state machine.
//!
//! ```text
//! draft ──submit──▶ review ──approve──▶ approved ──post──▶ posted
//!                     │                    ▲                 │
//!                     └──reject──▶ rejected └─────unpost─────┘
//! ```
//!
//! `rejected` is terminal; a corrected entry is a new journal.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fundledger_core::{
    AccountId, Aggregate, AggregateRoot, BranchId, DomainError, DomainResult, DonorId, FundId,
    JournalId, JournalLineId, Money, ProgramId, ProjectId, UserId,
};
use fundledger_events::Event;

use crate::account::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    Draft,
    Review,
    Approved,
    Rejected,
    Posted,
}

impl JournalStatus {
    pub const ALL: [JournalStatus; 5] = [
        JournalStatus::Draft,
        JournalStatus::Review,
        JournalStatus::Approved,
        JournalStatus::Rejected,
        JournalStatus::Posted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JournalStatus::Draft => "draft",
            JournalStatus::Review => "review",
            JournalStatus::Approved => "approved",
            JournalStatus::Rejected => "rejected",
            JournalStatus::Posted => "posted",
        }
    }

    /// Edges of the lifecycle graph.
    pub fn can_transition_to(self, next: JournalStatus) -> bool {
        matches!(
            (self, next),
            (JournalStatus::Draft, JournalStatus::Review)
                | (JournalStatus::Review, JournalStatus::Approved)
                | (JournalStatus::Review, JournalStatus::Rejected)
                | (JournalStatus::Approved, JournalStatus::Posted)
                | (JournalStatus::Posted, JournalStatus::Approved)
        )
    }
}

impl core::fmt::Display for JournalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JournalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown journal status: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

/// Dimension tags for restricted-fund and cost-center slicing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineDimensions {
    #[serde(default)]
    pub fund_id: Option<FundId>,
    #[serde(default)]
    pub program_id: Option<ProgramId>,
    #[serde(default)]
    pub donor_id: Option<DonorId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}

/// A journal line as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub account_id: AccountId,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub debit: Money,
    #[serde(default)]
    pub credit: Money,
    #[serde(flatten)]
    pub dimensions: LineDimensions,
}

impl LineInput {
    pub fn debit(account_id: AccountId, amount: i64) -> Self {
        Self {
            account_id,
            description: None,
            debit: Money::new(amount),
            credit: Money::ZERO,
            dimensions: LineDimensions::default(),
        }
    }

    pub fn credit(account_id: AccountId, amount: i64) -> Self {
        Self {
            account_id,
            description: None,
            debit: Money::ZERO,
            credit: Money::new(amount),
            dimensions: LineDimensions::default(),
        }
    }

    pub fn with_dimensions(mut self, dimensions: LineDimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One leg of a stored journal. Exactly one of `debit`/`credit` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: JournalLineId,
    /// 1-based position within the journal.
    pub line_no: u32,
    pub account_id: AccountId,
    pub description: Option<String>,
    pub debit: Money,
    pub credit: Money,
    #[serde(flatten)]
    pub dimensions: LineDimensions,
}

/// Lines that passed every line rule and balance.
///
/// The only way to build one is [`ValidatedLines::validate`], so commands
/// carrying it cannot smuggle an unbalanced entry into the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLines {
    lines: Vec<JournalLine>,
    total: Money,
}

/// Minimum number of legs in a journal.
pub const MIN_LINES: usize = 2;

impl ValidatedLines {
    /// Check line rules against the referenced accounts, then balance.
    pub fn validate(
        inputs: &[LineInput],
        accounts: &HashMap<AccountId, Account>,
    ) -> DomainResult<Self> {
        if inputs.len() < MIN_LINES {
            return Err(DomainError::invalid_line(format!(
                "a journal needs at least {MIN_LINES} lines, got {}",
                inputs.len()
            )));
        }

        let mut debit_total = Money::ZERO;
        let mut credit_total = Money::ZERO;
        let mut lines = Vec::with_capacity(inputs.len());

        for (index, input) in inputs.iter().enumerate() {
            let line_no = index as u32 + 1;
            let account = accounts
                .get(&input.account_id)
                .ok_or_else(|| DomainError::not_found("account", input.account_id))?;
            account.ensure_postable()?;

            if input.debit.is_negative() || input.credit.is_negative() {
                return Err(DomainError::invalid_line(format!(
                    "line {line_no}: amounts cannot be negative"
                )));
            }
            match (input.debit.is_positive(), input.credit.is_positive()) {
                (true, true) => {
                    return Err(DomainError::invalid_line(format!(
                        "line {line_no}: cannot carry both debit and credit"
                    )));
                }
                (false, false) => {
                    return Err(DomainError::invalid_line(format!(
                        "line {line_no}: needs a debit or a credit amount"
                    )));
                }
                _ => {}
            }

            debit_total = debit_total
                .checked_add(input.debit)
                .ok_or_else(|| DomainError::validation("journal debit total overflows"))?;
            credit_total = credit_total
                .checked_add(input.credit)
                .ok_or_else(|| DomainError::validation("journal credit total overflows"))?;

            lines.push(JournalLine {
                id: JournalLineId::new(),
                line_no,
                account_id: input.account_id,
                description: input
                    .description
                    .as_ref()
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
                debit: input.debit,
                credit: input.credit,
                dimensions: input.dimensions,
            });
        }

        if debit_total != credit_total {
            return Err(DomainError::Unbalanced {
                debit: debit_total,
                credit: credit_total,
            });
        }

        Ok(Self {
            lines,
            total: debit_total,
        })
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    /// Equal debit and credit total.
    pub fn total(&self) -> Money {
        self.total
    }

    pub fn into_lines(self) -> Vec<JournalLine> {
        self.lines
    }
}

/// Current state of a journal.
///
/// Fields are readable for projections and persistence; state changes go
/// through [`Aggregate::handle`] and [`Aggregate::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: JournalId,
    pub branch_id: BranchId,
    pub number: String,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub status: JournalStatus,
    pub total_debit: Money,
    pub total_credit: Money,
    pub lines: Vec<JournalLine>,
    pub is_posted: bool,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UserId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub reject_reason: Option<String>,
    pub version: u64,
}

impl Journal {
    /// Not-yet-created instance, the starting point for [`JournalCommand::Create`].
    pub fn empty(id: JournalId) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            id,
            branch_id: BranchId::from_uuid(uuid::Uuid::nil()),
            number: String::new(),
            date: epoch.date_naive(),
            description: String::new(),
            reference: None,
            status: JournalStatus::Draft,
            total_debit: Money::ZERO,
            total_credit: Money::ZERO,
            lines: Vec::new(),
            is_posted: false,
            posted_at: None,
            posted_by: None,
            created_by: UserId::from_uuid(uuid::Uuid::nil()),
            created_at: epoch,
            updated_at: epoch,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            reject_reason: None,
            version: 0,
        }
    }

    pub fn is_created(&self) -> bool {
        self.version > 0
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }

    /// Approved, balanced, has lines, and not already posted.
    pub fn can_post(&self) -> bool {
        self.status == JournalStatus::Approved
            && !self.is_posted
            && self.is_balanced()
            && !self.lines.is_empty()
    }
}

impl AggregateRoot for Journal {
    type Id = JournalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateJournal {
    pub journal_id: JournalId,
    pub branch_id: BranchId,
    pub number: String,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub lines: ValidatedLines,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateJournal {
    pub journal_id: JournalId,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub lines: ValidatedLines,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteJournal {
    pub journal_id: JournalId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitJournal {
    pub journal_id: JournalId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewJournal {
    pub journal_id: JournalId,
    pub action: ReviewAction,
    pub notes: Option<String>,
    pub reviewer: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostJournal {
    pub journal_id: JournalId,
    /// Posting time recorded on the journal.
    pub posted_at: DateTime<Utc>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpostJournal {
    pub journal_id: JournalId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalCommand {
    Create(CreateJournal),
    Update(UpdateJournal),
    Delete(DeleteJournal),
    Submit(SubmitJournal),
    Review(ReviewJournal),
    Post(PostJournal),
    Unpost(UnpostJournal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalCreated {
    pub journal_id: JournalId,
    pub branch_id: BranchId,
    pub number: String,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub lines: Vec<JournalLine>,
    pub total: Money,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalUpdated {
    pub journal_id: JournalId,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub lines: Vec<JournalLine>,
    pub total: Money,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalDeleted {
    pub journal_id: JournalId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalSubmitted {
    pub journal_id: JournalId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalApproved {
    pub journal_id: JournalId,
    pub approver: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRejected {
    pub journal_id: JournalId,
    pub rejecter: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalPosted {
    pub journal_id: JournalId,
    pub posted_at: DateTime<Utc>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalUnposted {
    pub journal_id: JournalId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum JournalEvent {
    Created(JournalCreated),
    Updated(JournalUpdated),
    Deleted(JournalDeleted),
    Submitted(JournalSubmitted),
    Approved(JournalApproved),
    Rejected(JournalRejected),
    Posted(JournalPosted),
    Unposted(JournalUnposted),
}

impl Event for JournalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JournalEvent::Created(_) => "ledger.journal.created",
            JournalEvent::Updated(_) => "ledger.journal.updated",
            JournalEvent::Deleted(_) => "ledger.journal.deleted",
            JournalEvent::Submitted(_) => "ledger.journal.submitted",
            JournalEvent::Approved(_) => "ledger.journal.approved",
            JournalEvent::Rejected(_) => "ledger.journal.rejected",
            JournalEvent::Posted(_) => "ledger.journal.posted",
            JournalEvent::Unposted(_) => "ledger.journal.unposted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JournalEvent::Created(e) => e.occurred_at,
            JournalEvent::Updated(e) => e.occurred_at,
            JournalEvent::Deleted(e) => e.occurred_at,
            JournalEvent::Submitted(e) => e.occurred_at,
            JournalEvent::Approved(e) => e.occurred_at,
            JournalEvent::Rejected(e) => e.occurred_at,
            JournalEvent::Posted(e) => e.occurred_at,
            JournalEvent::Unposted(e) => e.occurred_at,
        }
    }

    fn actor(&self) -> UserId {
        match self {
            JournalEvent::Created(e) => e.created_by,
            JournalEvent::Updated(e) => e.actor,
            JournalEvent::Deleted(e) => e.actor,
            JournalEvent::Submitted(e) => e.actor,
            JournalEvent::Approved(e) => e.approver,
            JournalEvent::Rejected(e) => e.rejecter,
            JournalEvent::Posted(e) => e.actor,
            JournalEvent::Unposted(e) => e.actor,
        }
    }
}

impl Aggregate for Journal {
    type Command = JournalCommand;
    type Event = JournalEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            JournalEvent::Created(e) => {
                self.id = e.journal_id;
                self.branch_id = e.branch_id;
                self.number = e.number.clone();
                self.date = e.date;
                self.description = e.description.clone();
                self.reference = e.reference.clone();
                self.status = JournalStatus::Draft;
                self.lines = e.lines.clone();
                self.total_debit = e.total;
                self.total_credit = e.total;
                self.created_by = e.created_by;
                self.created_at = e.occurred_at;
                self.updated_at = e.occurred_at;
            }
            JournalEvent::Updated(e) => {
                self.date = e.date;
                self.description = e.description.clone();
                self.reference = e.reference.clone();
                self.lines = e.lines.clone();
                self.total_debit = e.total;
                self.total_credit = e.total;
                self.updated_at = e.occurred_at;
            }
            JournalEvent::Deleted(e) => {
                self.updated_at = e.occurred_at;
            }
            JournalEvent::Submitted(e) => {
                self.status = JournalStatus::Review;
                self.updated_at = e.occurred_at;
            }
            JournalEvent::Approved(e) => {
                self.status = JournalStatus::Approved;
                self.reviewed_by = Some(e.approver);
                self.reviewed_at = Some(e.occurred_at);
                self.review_notes = e.notes.clone();
                self.approved_by = Some(e.approver);
                self.approved_at = Some(e.occurred_at);
                self.updated_at = e.occurred_at;
            }
            JournalEvent::Rejected(e) => {
                self.status = JournalStatus::Rejected;
                self.reviewed_by = Some(e.rejecter);
                self.reviewed_at = Some(e.occurred_at);
                self.review_notes = e.reason.clone();
                self.rejected_by = Some(e.rejecter);
                self.rejected_at = Some(e.occurred_at);
                self.reject_reason = e.reason.clone();
                self.updated_at = e.occurred_at;
            }
            JournalEvent::Posted(e) => {
                self.status = JournalStatus::Posted;
                self.is_posted = true;
                self.posted_at = Some(e.posted_at);
                self.posted_by = Some(e.actor);
                self.updated_at = e.occurred_at;
            }
            JournalEvent::Unposted(e) => {
                self.status = JournalStatus::Approved;
                self.is_posted = false;
                self.posted_at = None;
                self.posted_by = None;
                self.updated_at = e.occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            JournalCommand::Create(cmd) => self.handle_create(cmd),
            JournalCommand::Update(cmd) => self.handle_update(cmd),
            JournalCommand::Delete(cmd) => self.handle_delete(cmd),
            JournalCommand::Submit(cmd) => self.handle_submit(cmd),
            JournalCommand::Review(cmd) => self.handle_review(cmd),
            JournalCommand::Post(cmd) => self.handle_post(cmd),
            JournalCommand::Unpost(cmd) => self.handle_unpost(cmd),
        }
    }
}

impl Journal {
    fn ensure_journal_id(&self, journal_id: JournalId) -> DomainResult<()> {
        if self.id != journal_id {
            return Err(DomainError::validation("journal_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> DomainResult<()> {
        if !self.is_created() {
            return Err(DomainError::not_found("journal", self.id));
        }
        Ok(())
    }

    fn ensure_creator(&self, actor: UserId, operation: &str) -> DomainResult<()> {
        if self.created_by != actor {
            return Err(DomainError::forbidden(format!(
                "only the journal creator may {operation} it"
            )));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: JournalStatus, operation: &'static str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(operation, self.status));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateJournal) -> DomainResult<Vec<JournalEvent>> {
        self.ensure_journal_id(cmd.journal_id)?;
        if self.is_created() {
            return Err(DomainError::conflict("journal already exists"));
        }
        let description = required_description(&cmd.description)?;
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("journal number is required"));
        }

        Ok(vec![JournalEvent::Created(JournalCreated {
            journal_id: cmd.journal_id,
            branch_id: cmd.branch_id,
            number: cmd.number.clone(),
            date: cmd.date,
            description,
            reference: optional_text(&cmd.reference),
            lines: cmd.lines.lines().to_vec(),
            total: cmd.lines.total(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateJournal) -> DomainResult<Vec<JournalEvent>> {
        self.ensure_journal_id(cmd.journal_id)?;
        self.ensure_created()?;
        self.ensure_creator(cmd.actor, "update")?;
        self.ensure_status(JournalStatus::Draft, "update")?;
        let description = required_description(&cmd.description)?;

        Ok(vec![JournalEvent::Updated(JournalUpdated {
            journal_id: cmd.journal_id,
            date: cmd.date,
            description,
            reference: optional_text(&cmd.reference),
            lines: cmd.lines.lines().to_vec(),
            total: cmd.lines.total(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteJournal) -> DomainResult<Vec<JournalEvent>> {
        self.ensure_journal_id(cmd.journal_id)?;
        self.ensure_created()?;
        self.ensure_creator(cmd.actor, "delete")?;
        self.ensure_status(JournalStatus::Draft, "delete")?;

        Ok(vec![JournalEvent::Deleted(JournalDeleted {
            journal_id: cmd.journal_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitJournal) -> DomainResult<Vec<JournalEvent>> {
        self.ensure_journal_id(cmd.journal_id)?;
        self.ensure_created()?;
        self.ensure_creator(cmd.actor, "submit")?;
        self.ensure_status(JournalStatus::Draft, "submit")?;
        if !self.is_balanced() {
            return Err(DomainError::Unbalanced {
                debit: self.total_debit,
                credit: self.total_credit,
            });
        }
        if self.lines.len() < MIN_LINES {
            return Err(DomainError::invalid_line(format!(
                "a journal needs at least {MIN_LINES} lines"
            )));
        }

        Ok(vec![JournalEvent::Submitted(JournalSubmitted {
            journal_id: cmd.journal_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_review(&self, cmd: &ReviewJournal) -> DomainResult<Vec<JournalEvent>> {
        self.ensure_journal_id(cmd.journal_id)?;
        self.ensure_created()?;
        // Maker/checker separation holds for every journal, whatever its status.
        if cmd.reviewer == self.created_by {
            return Err(DomainError::SelfReview);
        }
        self.ensure_status(JournalStatus::Review, "review")?;

        let notes = optional_text(&cmd.notes);
        let event = match cmd.action {
            ReviewAction::Approve => JournalEvent::Approved(JournalApproved {
                journal_id: cmd.journal_id,
                approver: cmd.reviewer,
                notes,
                occurred_at: cmd.occurred_at,
            }),
            ReviewAction::Reject => JournalEvent::Rejected(JournalRejected {
                journal_id: cmd.journal_id,
                rejecter: cmd.reviewer,
                reason: notes,
                occurred_at: cmd.occurred_at,
            }),
        };
        Ok(vec![event])
    }

    fn handle_post(&self, cmd: &PostJournal) -> DomainResult<Vec<JournalEvent>> {
        self.ensure_journal_id(cmd.journal_id)?;
        self.ensure_created()?;
        if !self.can_post() {
            return Err(DomainError::invalid_transition("post", self.status));
        }

        Ok(vec![JournalEvent::Posted(JournalPosted {
            journal_id: cmd.journal_id,
            posted_at: cmd.posted_at,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_unpost(&self, cmd: &UnpostJournal) -> DomainResult<Vec<JournalEvent>> {
        self.ensure_journal_id(cmd.journal_id)?;
        self.ensure_created()?;
        if !self.is_posted {
            return Err(DomainError::invalid_transition("unpost", self.status));
        }

        Ok(vec![JournalEvent::Unposted(JournalUnposted {
            journal_id: cmd.journal_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn required_description(description: &str) -> DomainResult<String> {
    let description = description.trim();
    if description.is_empty() {
        return Err(DomainError::validation("journal description is required"));
    }
    Ok(description.to_string())
}

fn optional_text(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
