//! Command handlers for the account context.
//!
//! Each handler loads the accounts it touches, records events through the
//! aggregate's invariants, and commits through a unit of work.

use folio_core::command::Command;
use folio_core::error::DomainError;
use folio_core::repository::Repository;
use folio_core::unit_of_work::CommitReport;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::aggregates::Account;
use crate::domain::commands::{Deposit, OpenAccount, TransferFunds, Withdraw};
use crate::domain::events::AccountEvent;

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct AccountCommandResult {
    /// Accounts changed by the command.
    pub aggregate_ids: Vec<Uuid>,
    /// Versions and events written by the commit.
    pub report: CommitReport,
}

/// Handles the `OpenAccount` command.
///
/// # Errors
///
/// Returns `DomainError::InvariantViolation` if the account already exists,
/// or the store's error if the commit fails.
#[instrument(skip_all, fields(command = command.command_type(), account_id = %command.account_id))]
pub async fn handle_open_account(
    command: &OpenAccount,
    repo: &Repository,
) -> Result<AccountCommandResult, DomainError> {
    let mut account = repo.load::<Account>(command.account_id).await?;
    account.record(
        AccountEvent::opened(command.owner.clone()),
        &command.event_context(),
        repo.clock(),
    )?;
    let report = repo.save(&mut account).await?;
    info!("account opened");
    Ok(AccountCommandResult {
        aggregate_ids: vec![command.account_id],
        report,
    })
}

/// Handles the `Deposit` command.
///
/// # Errors
///
/// Returns `DomainError::StreamNotFound` for an unknown account,
/// `DomainError::InvariantViolation` for a non-positive amount, or
/// `DomainError::ConcurrencyConflict` if the account changed meanwhile.
#[instrument(skip_all, fields(command = command.command_type(), account_id = %command.account_id))]
pub async fn handle_deposit(
    command: &Deposit,
    repo: &Repository,
) -> Result<AccountCommandResult, DomainError> {
    let mut account = repo.load_existing::<Account>(command.account_id).await?;
    account.record(
        AccountEvent::deposited(command.amount),
        &command.event_context(),
        repo.clock(),
    )?;
    let report = repo.save(&mut account).await?;
    Ok(AccountCommandResult {
        aggregate_ids: vec![command.account_id],
        report,
    })
}

/// Handles the `Withdraw` command.
///
/// # Errors
///
/// Same as [`handle_deposit`], plus `DomainError::InvariantViolation` when
/// the balance is insufficient.
#[instrument(skip_all, fields(command = command.command_type(), account_id = %command.account_id))]
pub async fn handle_withdraw(
    command: &Withdraw,
    repo: &Repository,
) -> Result<AccountCommandResult, DomainError> {
    let mut account = repo.load_existing::<Account>(command.account_id).await?;
    account.record(
        AccountEvent::withdrew(command.amount),
        &command.event_context(),
        repo.clock(),
    )?;
    let report = repo.save(&mut account).await?;
    Ok(AccountCommandResult {
        aggregate_ids: vec![command.account_id],
        report,
    })
}

/// Handles the `TransferFunds` command: a withdrawal from one account and a
/// deposit to another, committed together. The deposit's causation is the
/// withdrawal event.
///
/// # Errors
///
/// Returns `DomainError::InvariantViolation` for a self-transfer or
/// insufficient funds, `DomainError::StreamNotFound` for an unknown account,
/// `DomainError::ConcurrencyConflict` if either account changed meanwhile,
/// or `DomainError::PartialCommit` if the store failed halfway.
#[instrument(skip_all, fields(command = command.command_type(), from = %command.from_account_id, to = %command.to_account_id))]
pub async fn handle_transfer_funds(
    command: &TransferFunds,
    repo: &Repository,
) -> Result<AccountCommandResult, DomainError> {
    if command.from_account_id == command.to_account_id {
        return Err(DomainError::InvariantViolation(
            "cannot transfer to the same account".into(),
        ));
    }
    let mut source = repo.load_existing::<Account>(command.from_account_id).await?;
    let mut target = repo.load_existing::<Account>(command.to_account_id).await?;

    let context = command.event_context();
    let withdrawal_id = source
        .record(AccountEvent::withdrew(command.amount), &context, repo.clock())?
        .event_id();
    target.record(
        AccountEvent::deposited(command.amount),
        &context.clone().caused_by(withdrawal_id),
        repo.clock(),
    )?;

    let mut uow = repo.unit_of_work();
    uow.register(&mut source)?;
    uow.register(&mut target)?;
    let report = uow.commit().await?;
    info!(amount = command.amount, "transfer committed");
    Ok(AccountCommandResult {
        aggregate_ids: vec![command.from_account_id, command.to_account_id],
        report,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use folio_core::aggregate::AggregateRoot;
    use folio_core::event::EventContext;
    use folio_core::store::{EventStore, StreamKey};
    use folio_test_support::{EmptyEventStore, FailingEventStore, FixedClock, RecordingEventStore};

    use super::*;
    use crate::domain::events::ACCOUNT_OPENED_EVENT_TYPE;

    fn repository(store: impl EventStore + 'static) -> Repository {
        Repository::new(Arc::new(store), Arc::new(FixedClock::noon()))
    }

    #[tokio::test]
    async fn test_open_account_appends_opened_event() {
        // Arrange
        let repo = repository(EmptyEventStore);
        let command = OpenAccount {
            correlation_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            owner: "alice".into(),
            issued_by: "teller-1".into(),
        };

        // Act
        let result = handle_open_account(&command, &repo).await.unwrap();

        // Assert
        assert_eq!(result.aggregate_ids, vec![command.account_id]);
        assert_eq!(result.report.events.len(), 1);
        let event = &result.report.events[0];
        assert_eq!(event.event_type, ACCOUNT_OPENED_EVENT_TYPE);
        assert_eq!(event.sequence_number, 1);
        assert_eq!(event.correlation_id, command.correlation_id);
        assert_eq!(event.recorded_by, "teller-1");
        assert_eq!(
            result
                .report
                .version_of(&StreamKey::new("account", command.account_id)),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_deposit_to_unknown_account_is_not_found() {
        // Arrange
        let repo = repository(EmptyEventStore);
        let account_id = Uuid::new_v4();
        let command = Deposit {
            correlation_id: Uuid::new_v4(),
            account_id,
            amount: 100,
            issued_by: String::new(),
        };

        // Act
        let result = handle_deposit(&command, &repo).await;

        // Assert
        match result {
            Err(DomainError::StreamNotFound(stream)) => {
                assert_eq!(stream, StreamKey::new("account", account_id));
            }
            other => panic!("expected StreamNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_withdraw_beyond_balance_appends_nothing() {
        // Arrange
        let account_id = Uuid::new_v4();
        let mut opened = AggregateRoot::<Account>::new(account_id);
        opened
            .record(
                AccountEvent::opened("alice"),
                &EventContext::new(Uuid::new_v4()),
                &FixedClock::noon(),
            )
            .unwrap();
        let history = opened.pending_stored_events().unwrap();
        let store = Arc::new(RecordingEventStore::new(history));
        let repo = Repository::new(store.clone(), Arc::new(FixedClock::noon()));
        let command = Withdraw {
            correlation_id: Uuid::new_v4(),
            account_id,
            amount: 1,
            issued_by: String::new(),
        };

        // Act
        let result = handle_withdraw(&command, &repo).await;

        // Assert
        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
        assert!(store.appended_events().is_empty());
    }

    #[tokio::test]
    async fn test_self_transfer_is_rejected() {
        let repo = repository(EmptyEventStore);
        let account_id = Uuid::new_v4();
        let command = TransferFunds {
            correlation_id: Uuid::new_v4(),
            from_account_id: account_id,
            to_account_id: account_id,
            amount: 10,
            issued_by: String::new(),
        };

        let result = handle_transfer_funds(&command, &repo).await;

        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_open_account_propagates_store_failure() {
        let repo = repository(FailingEventStore);
        let command = OpenAccount {
            correlation_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            owner: "alice".into(),
            issued_by: String::new(),
        };

        let result = handle_open_account(&command, &repo).await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
    }
}
