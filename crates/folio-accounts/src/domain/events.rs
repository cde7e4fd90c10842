//! Domain events for the account context.

use folio_core::event::EventPayload;
use serde::{Deserialize, Serialize};

/// Event type for [`AccountOpened`].
pub const ACCOUNT_OPENED_EVENT_TYPE: &str = "account.opened";
/// Event type for [`FundsDeposited`].
pub const FUNDS_DEPOSITED_EVENT_TYPE: &str = "account.deposited";
/// Event type for [`FundsWithdrawn`].
pub const FUNDS_WITHDRAWN_EVENT_TYPE: &str = "account.withdrew";

/// Emitted when an account is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
}

/// Emitted when money is paid in. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsDeposited {
    pub amount: i64,
}

/// Emitted when money is paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsWithdrawn {
    pub amount: i64,
}

/// Event payload variants for the account context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    Opened(AccountOpened),
    Deposited(FundsDeposited),
    Withdrew(FundsWithdrawn),
}

impl AccountEvent {
    pub fn opened(owner: impl Into<String>) -> Self {
        Self::Opened(AccountOpened {
            owner: owner.into(),
        })
    }

    pub fn deposited(amount: i64) -> Self {
        Self::Deposited(FundsDeposited { amount })
    }

    pub fn withdrew(amount: i64) -> Self {
        Self::Withdrew(FundsWithdrawn { amount })
    }
}

impl EventPayload for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Opened(_) => ACCOUNT_OPENED_EVENT_TYPE,
            Self::Deposited(_) => FUNDS_DEPOSITED_EVENT_TYPE,
            Self::Withdrew(_) => FUNDS_WITHDRAWN_EVENT_TYPE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_are_stable() {
        assert_eq!(AccountEvent::opened("alice").event_type(), "account.opened");
        assert_eq!(AccountEvent::deposited(1).event_type(), "account.deposited");
        assert_eq!(AccountEvent::withdrew(1).event_type(), "account.withdrew");
    }

    #[test]
    fn test_payload_json_shape() {
        // Arrange
        let event = AccountEvent::deposited(250);

        // Act
        let json = serde_json::to_value(&event).unwrap();

        // Assert
        assert_eq!(json, serde_json::json!({"Deposited": {"amount": 250}}));
    }
}
