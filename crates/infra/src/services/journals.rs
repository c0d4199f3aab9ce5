//! Journal lifecycle: create, edit, review, post, unpost.
//!
//! Every transition follows the same shape:
//!
//! ```text
//! load row ─▶ handle(command) ─▶ apply(events) ─▶ save row + events
//!                                                  (version-guarded)
//! ```

use core::fmt::Display;
use core::hash::Hash;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use fundledger_accounting::{
    CreateJournal, DeleteJournal, Journal, JournalCommand, LineInput, PostJournal, ReviewAction,
    ReviewJournal, SequenceKey, SubmitJournal, UnpostJournal, UpdateJournal, ValidatedLines,
};
use fundledger_auth::{Permission, Principal, authorize};
use fundledger_core::{
    AccountId, Aggregate, BranchId, DomainError, DomainResult, Entity, ExpectedVersion, JournalId,
    Page, PageRequest,
};
use fundledger_events::EventEnvelope;

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::store::{
    BranchDirectory, JournalFilter, LedgerStore, LineWrite, StoreError, StoredJournalEvent,
    YearCheck,
};

const STREAM_TYPE: &str = "journal";

/// Caller input for a new journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalDraft {
    pub branch_id: BranchId,
    pub date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub lines: Vec<LineInput>,
}

/// Replacement content for a draft journal. The branch and number are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalChanges {
    pub date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub lines: Vec<LineInput>,
}

/// The only writer of journal data.
#[derive(Debug)]
pub struct JournalService<S, B> {
    store: Arc<S>,
    branches: Arc<B>,
    config: Arc<LedgerConfig>,
}

impl<S, B> Clone for JournalService<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            branches: Arc::clone(&self.branches),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, B> JournalService<S, B>
where
    S: LedgerStore,
    B: BranchDirectory,
{
    pub fn new(store: Arc<S>, branches: Arc<B>, config: Arc<LedgerConfig>) -> Self {
        Self {
            store,
            branches,
            config,
        }
    }

    /// Validate and persist a draft journal under the next free number of
    /// its branch and month.
    #[instrument(
        skip(self, principal, draft),
        fields(branch_id = %draft.branch_id, date = %draft.date, user_id = %principal.user_id),
        err
    )]
    pub async fn create(&self, principal: &Principal, draft: JournalDraft) -> LedgerResult<Journal> {
        authorize(principal, &Permission::JOURNAL_WRITE)?;

        let lines = self.validate_lines(&draft.lines).await?;
        let branch = self
            .branches
            .branch(draft.branch_id)
            .await?
            .ok_or_else(|| DomainError::not_found("branch", draft.branch_id))?;
        let key = SequenceKey::new(&self.config.journal_number_scheme, &branch.code, draft.date)?;
        let journal_id = JournalId::new();

        let mut last_number = key.number(0);
        for attempt in 1..=self.config.sequence_retry_attempts {
            let number = key.number(self.store.peek_sequence(&key).await?);
            let command = JournalCommand::Create(CreateJournal {
                journal_id,
                branch_id: draft.branch_id,
                number: number.clone(),
                date: draft.date,
                description: draft.description.clone(),
                reference: draft.reference.clone(),
                lines: lines.clone(),
                created_by: principal.user_id,
                occurred_at: Utc::now(),
            });
            let (journal, events) = execute(Journal::empty(journal_id), &command)?;

            match self.store.insert_journal(&journal, &events).await {
                Ok(()) => {
                    info!(journal_id = %journal.id, number = %journal.number, "journal created");
                    return Ok(journal);
                }
                Err(StoreError::DuplicateNumber(taken)) => {
                    warn!(attempt, number = %taken, "journal number already taken");
                    last_number = taken;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DomainError::DuplicateSequence(last_number).into())
    }

    /// Replace the content and lines of a draft. Creator only.
    #[instrument(skip(self, principal, changes), fields(journal_id = %id), err)]
    pub async fn update(
        &self,
        principal: &Principal,
        id: JournalId,
        changes: JournalChanges,
    ) -> LedgerResult<Journal> {
        authorize(principal, &Permission::JOURNAL_WRITE)?;

        let current = self.get(id).await?;
        let lines = self.validate_lines(&changes.lines).await?;
        let command = JournalCommand::Update(UpdateJournal {
            journal_id: id,
            date: changes.date,
            description: changes.description,
            reference: changes.reference,
            lines,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        });
        self.save(current, &command, LineWrite::Replace).await
    }

    /// Remove a draft and its lines. Creator only; the event log is kept.
    #[instrument(skip(self, principal), fields(journal_id = %id), err)]
    pub async fn delete(&self, principal: &Principal, id: JournalId) -> LedgerResult<()> {
        authorize(principal, &Permission::JOURNAL_WRITE)?;

        let current = self.get(id).await?;
        let expected = ExpectedVersion::Exact(current.version);
        let command = JournalCommand::Delete(DeleteJournal {
            journal_id: id,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        });
        let (_, events) = execute(current, &command)?;
        self.store.delete_journal(id, expected, &events).await?;

        info!("journal deleted");
        Ok(())
    }

    #[instrument(skip(self, principal), fields(journal_id = %id), err)]
    pub async fn submit_for_review(
        &self,
        principal: &Principal,
        id: JournalId,
    ) -> LedgerResult<Journal> {
        authorize(principal, &Permission::JOURNAL_WRITE)?;

        let current = self.get(id).await?;
        let command = JournalCommand::Submit(SubmitJournal {
            journal_id: id,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        });
        self.save(current, &command, LineWrite::Keep).await
    }

    /// Approve or reject a journal in review. The creator can never review
    /// their own journal.
    #[instrument(skip(self, principal, notes), fields(journal_id = %id), err)]
    pub async fn review(
        &self,
        principal: &Principal,
        id: JournalId,
        action: ReviewAction,
        notes: Option<String>,
    ) -> LedgerResult<Journal> {
        authorize(principal, &Permission::JOURNAL_REVIEW)?;

        let current = self.get(id).await?;
        let command = JournalCommand::Review(ReviewJournal {
            journal_id: id,
            action,
            notes,
            reviewer: principal.user_id,
            occurred_at: Utc::now(),
        });
        self.save(current, &command, LineWrite::Keep).await
    }

    /// Post an approved journal; its lines start counting in every balance.
    #[instrument(skip(self, principal), fields(journal_id = %id), err)]
    pub async fn post(
        &self,
        principal: &Principal,
        id: JournalId,
        posted_at: DateTime<Utc>,
    ) -> LedgerResult<Journal> {
        authorize(principal, &Permission::JOURNAL_POST)?;

        let current = self.get(id).await?;
        let command = JournalCommand::Post(PostJournal {
            journal_id: id,
            posted_at,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        });
        let journal = self.save_guarded(current, &command).await?;
        info!(number = %journal.number, "journal posted");
        Ok(journal)
    }

    /// Take a posted journal back to `approved`.
    #[instrument(skip(self, principal), fields(journal_id = %id), err)]
    pub async fn unpost(&self, principal: &Principal, id: JournalId) -> LedgerResult<Journal> {
        authorize(principal, &Permission::JOURNAL_UNPOST)?;

        let current = self.get(id).await?;
        let command = JournalCommand::Unpost(UnpostJournal {
            journal_id: id,
            actor: principal.user_id,
            occurred_at: Utc::now(),
        });
        let journal = self.save_guarded(current, &command).await?;
        info!(number = %journal.number, "journal unposted");
        Ok(journal)
    }

    pub async fn get(&self, id: JournalId) -> LedgerResult<Journal> {
        Ok(self
            .store
            .get_journal(id)
            .await?
            .ok_or_else(|| DomainError::not_found("journal", id))?)
    }

    /// Filtered page of journals, newest date first.
    #[instrument(skip(self), err)]
    pub async fn list(
        &self,
        filter: &JournalFilter,
        request: &PageRequest,
    ) -> LedgerResult<Page<Journal>> {
        let window = request.window(self.config.page_limits);
        Ok(self.store.page_journals(filter, window).await?)
    }

    /// Every transition the journal went through, oldest first.
    #[instrument(skip(self), fields(journal_id = %id), err)]
    pub async fn history(&self, id: JournalId) -> LedgerResult<Vec<StoredJournalEvent>> {
        let events = self.store.journal_events(id).await?;
        if events.is_empty() {
            return Err(DomainError::not_found("journal", id).into());
        }
        Ok(events)
    }

    async fn validate_lines(&self, inputs: &[LineInput]) -> LedgerResult<ValidatedLines> {
        let mut ids: Vec<AccountId> = inputs.iter().map(|l| l.account_id).collect();
        ids.sort();
        ids.dedup();
        let accounts: HashMap<AccountId, _> = self.store.get_accounts(&ids).await?;
        let lines = ValidatedLines::validate(inputs, &accounts)?;
        self.resolve_tags(inputs).await?;
        Ok(lines)
    }

    /// Every fund, program and donor tag must name a registered record.
    async fn resolve_tags(&self, inputs: &[LineInput]) -> LedgerResult<()> {
        let tags: Vec<_> = inputs.iter().map(|l| &l.dimensions).collect();
        if tags.iter().any(|d| d.fund_id.is_some()) {
            let funds = ids(&self.store.list_funds().await?);
            for tag in &tags {
                ensure_known(&funds, tag.fund_id, "fund")?;
            }
        }
        if tags.iter().any(|d| d.program_id.is_some()) {
            let programs = ids(&self.store.list_programs().await?);
            for tag in &tags {
                ensure_known(&programs, tag.program_id, "program")?;
            }
        }
        if tags.iter().any(|d| d.donor_id.is_some()) {
            let donors = ids(&self.store.list_donors().await?);
            for tag in &tags {
                ensure_known(&donors, tag.donor_id, "donor")?;
            }
        }
        Ok(())
    }

    async fn save(
        &self,
        current: Journal,
        command: &JournalCommand,
        lines: LineWrite,
    ) -> LedgerResult<Journal> {
        let expected = ExpectedVersion::Exact(current.version);
        let (journal, events) = execute(current, command)?;
        self.store
            .save_journal(&journal, expected, lines, YearCheck::Skip, &events)
            .await?;
        Ok(journal)
    }

    /// Save a post or unpost; the store rejects it if the journal's fiscal
    /// year is closed by the time of the write.
    async fn save_guarded(
        &self,
        current: Journal,
        command: &JournalCommand,
    ) -> LedgerResult<Journal> {
        let expected = ExpectedVersion::Exact(current.version);
        let (journal, events) = execute(current, command)?;
        self.store
            .save_journal(&journal, expected, LineWrite::Keep, YearCheck::RequireOpen, &events)
            .await?;
        Ok(journal)
    }
}

fn ids<E: Entity>(records: &[E]) -> HashSet<E::Id> {
    records.iter().map(|record| record.id().clone()).collect()
}

fn ensure_known<I>(known: &HashSet<I>, id: Option<I>, entity: &'static str) -> DomainResult<()>
where
    I: Eq + Hash + Display,
{
    match id {
        Some(id) if !known.contains(&id) => Err(DomainError::not_found(entity, id)),
        _ => Ok(()),
    }
}

/// Run one command against `journal` and wrap the produced events for the log.
fn execute(
    mut journal: Journal,
    command: &JournalCommand,
) -> LedgerResult<(Journal, Vec<StoredJournalEvent>)> {
    let events = journal.handle(command)?;
    let mut stored = Vec::with_capacity(events.len());
    for event in events {
        journal.apply(&event);
        let envelope =
            EventEnvelope::record(journal.id.into_uuid(), STREAM_TYPE, journal.version, event);
        stored.push(envelope.to_json().map_err(StoreError::from)?);
    }
    Ok((journal, stored))
}
