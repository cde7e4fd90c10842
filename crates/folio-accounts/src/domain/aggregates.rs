//! Aggregate root for the account context.

use folio_core::aggregate::Aggregate;
use folio_core::error::DomainError;

use super::events::AccountEvent;

/// State of one bank account, folded from its events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    owner: Option<String>,
    balance: i64,
}

impl Account {
    /// Owner recorded when the account was opened.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Balance in minor units.
    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn is_open(&self) -> bool {
        self.owner.is_some()
    }

    fn require_open(&self) -> Result<(), DomainError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DomainError::InvariantViolation(
                "account has not been opened".into(),
            ))
        }
    }
}

fn require_positive(amount: i64) -> Result<(), DomainError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(DomainError::InvariantViolation(format!(
            "amount must be positive, got {amount}"
        )))
    }
}

impl Aggregate for Account {
    const AGGREGATE_TYPE: &'static str = "account";

    type Payload = AccountEvent;

    fn validate(&self, payload: &AccountEvent) -> Result<(), DomainError> {
        match payload {
            AccountEvent::Opened(opened) => {
                if self.is_open() {
                    return Err(DomainError::InvariantViolation(
                        "account is already open".into(),
                    ));
                }
                if opened.owner.trim().is_empty() {
                    return Err(DomainError::InvariantViolation(
                        "owner must not be blank".into(),
                    ));
                }
                Ok(())
            }
            AccountEvent::Deposited(deposit) => {
                self.require_open()?;
                require_positive(deposit.amount)?;
                self.balance.checked_add(deposit.amount).map(|_| ()).ok_or_else(|| {
                    DomainError::InvariantViolation("balance would overflow".into())
                })
            }
            AccountEvent::Withdrew(withdrawal) => {
                self.require_open()?;
                require_positive(withdrawal.amount)?;
                if withdrawal.amount > self.balance {
                    return Err(DomainError::InvariantViolation(format!(
                        "insufficient funds: balance {}, requested {}",
                        self.balance, withdrawal.amount
                    )));
                }
                Ok(())
            }
        }
    }

    fn apply(&mut self, payload: &AccountEvent) {
        match payload {
            AccountEvent::Opened(opened) => {
                self.owner = Some(opened.owner.clone());
                self.balance = 0;
            }
            AccountEvent::Deposited(deposit) => {
                self.balance = self.balance.saturating_add(deposit.amount);
            }
            AccountEvent::Withdrew(withdrawal) => {
                self.balance = self.balance.saturating_sub(withdrawal.amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use folio_core::aggregate::AggregateRoot;
    use folio_core::event::EventContext;
    use folio_test_support::FixedClock;
    use uuid::Uuid;

    use super::*;

    fn context() -> EventContext {
        EventContext::new(Uuid::new_v4())
    }

    fn opened_with(balance: i64) -> AggregateRoot<Account> {
        let clock = FixedClock::noon();
        let mut account = AggregateRoot::<Account>::new(Uuid::new_v4());
        account
            .record(AccountEvent::opened("alice"), &context(), &clock)
            .unwrap();
        if balance > 0 {
            account
                .record(AccountEvent::deposited(balance), &context(), &clock)
                .unwrap();
        }
        account
    }

    #[test]
    fn test_open_account_yields_version_one_with_zero_balance() {
        // Arrange
        let clock = FixedClock::noon();
        let mut account = AggregateRoot::<Account>::new(Uuid::new_v4());

        // Act
        account
            .record(AccountEvent::opened("alice"), &context(), &clock)
            .unwrap();

        // Assert
        assert_eq!(account.version(), 1);
        assert_eq!(account.state().owner(), Some("alice"));
        assert_eq!(account.state().balance(), 0);
        assert_eq!(account.pending_events().len(), 1);
        assert_eq!(account.created_at(), Some(clock.0));
    }

    #[test]
    fn test_opening_twice_is_rejected() {
        // Arrange
        let mut account = opened_with(0);

        // Act
        let result = account.record(AccountEvent::opened("bob"), &context(), &FixedClock::noon());

        // Assert
        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
        assert_eq!(account.version(), 1);
        assert_eq!(account.state().owner(), Some("alice"));
    }

    #[test]
    fn test_deposit_before_opening_is_rejected() {
        let mut account = AggregateRoot::<Account>::new(Uuid::new_v4());

        let result = account.record(AccountEvent::deposited(10), &context(), &FixedClock::noon());

        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
        assert!(!account.has_pending_events());
    }

    #[test]
    fn test_non_positive_amounts_are_rejected() {
        let mut account = opened_with(100);

        for payload in [
            AccountEvent::deposited(0),
            AccountEvent::deposited(-5),
            AccountEvent::withdrew(0),
        ] {
            let result = account.record(payload, &context(), &FixedClock::noon());
            assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
        }
        assert_eq!(account.state().balance(), 100);
    }

    #[test]
    fn test_withdrawal_beyond_balance_is_rejected() {
        // Arrange
        let mut account = opened_with(100);

        // Act
        let result = account.record(AccountEvent::withdrew(101), &context(), &FixedClock::noon());

        // Assert
        match result {
            Err(DomainError::InvariantViolation(message)) => {
                assert!(message.contains("insufficient funds"));
            }
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
        assert_eq!(account.version(), 2);
    }

    #[test]
    fn test_deposit_and_withdraw_move_balance() {
        let mut account = opened_with(100);

        account
            .record(AccountEvent::withdrew(30), &context(), &FixedClock::noon())
            .unwrap();

        assert_eq!(account.state().balance(), 70);
        assert_eq!(account.version(), 3);
    }
}
