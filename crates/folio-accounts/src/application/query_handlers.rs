//! Query handlers for the account context.
//!
//! Two read paths: [`get_account`] replays one account from its stream, and
//! [`AccountBalances`] is a projection kept current either synchronously by
//! a unit of work or asynchronously by a projector.

use std::collections::HashMap;

use folio_core::aggregate::Aggregate;
use folio_core::error::DomainError;
use folio_core::event::Event;
use folio_core::repository::Repository;
use folio_core::store::{StoredEvent, StreamKey};
use folio_core::view::{StreamPositions, View};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Account;
use crate::domain::events::AccountEvent;

/// Read-only view of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub account_id: Uuid,
    pub owner: String,
    /// Balance in minor units.
    pub balance: i64,
    /// Current version (event count).
    pub version: i64,
}

/// Retrieves an account by replaying its stream.
///
/// # Errors
///
/// Returns `DomainError::StreamNotFound` if the account has no events, or
/// `DomainError::Replay` if its history is corrupt.
pub async fn get_account(
    account_id: Uuid,
    repo: &Repository,
) -> Result<AccountSummary, DomainError> {
    let account = repo.load_existing::<Account>(account_id).await?;
    Ok(AccountSummary {
        account_id,
        owner: account.state().owner().unwrap_or_default().to_owned(),
        balance: account.state().balance(),
        version: account.version(),
    })
}

/// Balance of every account, folded from the event feed.
#[derive(Debug, Clone, Default)]
pub struct AccountBalances {
    accounts: HashMap<Uuid, AccountSummary>,
    applied: StreamPositions,
}

impl AccountBalances {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: Uuid) -> Option<&AccountSummary> {
        self.accounts.get(&account_id)
    }

    pub fn balance(&self, account_id: Uuid) -> Option<i64> {
        self.get(account_id).map(|summary| summary.balance)
    }

    /// Sum of all balances.
    pub fn total(&self) -> i64 {
        self.accounts.values().map(|summary| summary.balance).sum()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl View for AccountBalances {
    fn name(&self) -> &str {
        "account_balances"
    }

    fn apply(&mut self, stored: &StoredEvent) -> Result<(), DomainError> {
        if stored.aggregate_type != Account::AGGREGATE_TYPE || !self.applied.is_new(stored) {
            return Ok(());
        }
        let event = Event::<AccountEvent>::from_stored(stored)?;
        let account_id = event.aggregate_id();
        match event.payload() {
            AccountEvent::Opened(opened) => {
                self.accounts.insert(
                    account_id,
                    AccountSummary {
                        account_id,
                        owner: opened.owner.clone(),
                        balance: 0,
                        version: 0,
                    },
                );
            }
            AccountEvent::Deposited(deposit) => {
                let summary = self.summary_mut(stored, account_id)?;
                summary.balance = summary.balance.saturating_add(deposit.amount);
            }
            AccountEvent::Withdrew(withdrawal) => {
                let summary = self.summary_mut(stored, account_id)?;
                summary.balance = summary.balance.saturating_sub(withdrawal.amount);
            }
        }
        if let Some(summary) = self.accounts.get_mut(&account_id) {
            summary.version = event.sequence_number();
        }
        self.applied.advance(stored);
        Ok(())
    }

    fn reset(&mut self) {
        self.accounts.clear();
        self.applied.clear();
    }

    fn forget_stream(&mut self, stream: &StreamKey) {
        if stream.aggregate_type == Account::AGGREGATE_TYPE {
            self.accounts.remove(&stream.aggregate_id);
            self.applied.forget(stream);
        }
    }
}

impl AccountBalances {
    fn summary_mut(
        &mut self,
        stored: &StoredEvent,
        account_id: Uuid,
    ) -> Result<&mut AccountSummary, DomainError> {
        self.accounts.get_mut(&account_id).ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "{} for account {account_id} arrived before it was opened",
                stored.event_type
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use folio_core::aggregate::AggregateRoot;
    use folio_core::event::EventContext;
    use folio_test_support::{EmptyEventStore, FixedClock, RecordingEventStore};

    use super::*;

    fn history(account_id: Uuid, payloads: Vec<AccountEvent>) -> Vec<StoredEvent> {
        let mut account = AggregateRoot::<Account>::new(account_id);
        for payload in payloads {
            account
                .record(payload, &EventContext::new(Uuid::new_v4()), &FixedClock::noon())
                .unwrap();
        }
        account.pending_stored_events().unwrap()
    }

    #[tokio::test]
    async fn test_get_account_replays_stream() {
        // Arrange
        let account_id = Uuid::new_v4();
        let events = history(
            account_id,
            vec![
                AccountEvent::opened("alice"),
                AccountEvent::deposited(100),
                AccountEvent::withdrew(40),
            ],
        );
        let repo = Repository::new(
            Arc::new(RecordingEventStore::new(events)),
            Arc::new(FixedClock::noon()),
        );

        // Act
        let summary = get_account(account_id, &repo).await.unwrap();

        // Assert
        assert_eq!(
            summary,
            AccountSummary {
                account_id,
                owner: "alice".into(),
                balance: 60,
                version: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_get_account_returns_not_found_when_no_events() {
        let repo = Repository::new(Arc::new(EmptyEventStore), Arc::new(FixedClock::noon()));

        let result = get_account(Uuid::new_v4(), &repo).await;

        assert!(matches!(result, Err(DomainError::StreamNotFound(_))));
    }

    #[test]
    fn test_balances_fold_events_per_account() {
        // Arrange
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut events = history(alice, vec![AccountEvent::opened("alice"), AccountEvent::deposited(70)]);
        events.extend(history(bob, vec![AccountEvent::opened("bob")]));
        let mut balances = AccountBalances::new();

        // Act
        for event in &events {
            balances.apply(event).unwrap();
        }

        // Assert
        assert_eq!(balances.len(), 2);
        assert_eq!(balances.balance(alice), Some(70));
        assert_eq!(balances.balance(bob), Some(0));
        assert_eq!(balances.get(alice).unwrap().version, 2);
        assert_eq!(balances.total(), 70);
    }

    #[test]
    fn test_redelivered_events_are_ignored() {
        // Arrange
        let account_id = Uuid::new_v4();
        let events = history(
            account_id,
            vec![AccountEvent::opened("alice"), AccountEvent::deposited(25)],
        );
        let mut balances = AccountBalances::new();
        for event in &events {
            balances.apply(event).unwrap();
        }

        // Act
        balances.apply(&events[1]).unwrap();

        // Assert
        assert_eq!(balances.balance(account_id), Some(25));
    }

    #[test]
    fn test_rebuild_discards_previous_state() {
        let account_id = Uuid::new_v4();
        let events = history(account_id, vec![AccountEvent::opened("alice")]);
        let mut balances = AccountBalances::new();
        balances
            .apply(&history(Uuid::new_v4(), vec![AccountEvent::opened("old")])[0])
            .unwrap();

        balances.rebuild(&events).unwrap();

        assert_eq!(balances.len(), 1);
        assert!(balances.get(account_id).is_some());
    }

    #[test]
    fn test_revert_stream_drops_retracted_tail() {
        // Arrange
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let events = history(
            alice,
            vec![
                AccountEvent::opened("alice"),
                AccountEvent::deposited(100),
                AccountEvent::withdrew(30),
            ],
        );
        let mut balances = AccountBalances::new();
        for event in &events {
            balances.apply(event).unwrap();
        }
        balances
            .apply(&history(bob, vec![AccountEvent::opened("bob")])[0])
            .unwrap();

        // Act
        balances
            .revert_stream(&StreamKey::new(Account::AGGREGATE_TYPE, alice), &events[..2])
            .unwrap();

        // Assert
        assert_eq!(balances.balance(alice), Some(100));
        assert_eq!(balances.get(alice).unwrap().version, 2);
        assert_eq!(balances.balance(bob), Some(0));
    }

    #[test]
    fn test_deposit_before_open_is_rejected() {
        let account_id = Uuid::new_v4();
        let events = history(
            account_id,
            vec![AccountEvent::opened("alice"), AccountEvent::deposited(5)],
        );
        let mut balances = AccountBalances::new();

        let result = balances.apply(&events[1]);

        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
        assert!(balances.is_empty());
    }
}
