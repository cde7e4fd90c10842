//! Commands for the account context.

use folio_core::command::Command;
use uuid::Uuid;

/// Command to open a new account.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub account_id: Uuid,
    pub owner: String,
    /// Actor issuing the command, stamped on the resulting events.
    pub issued_by: String,
}

/// Command to pay money into an account.
#[derive(Debug, Clone)]
pub struct Deposit {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
    pub issued_by: String,
}

/// Command to pay money out of an account.
#[derive(Debug, Clone)]
pub struct Withdraw {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
    pub issued_by: String,
}

/// Command to move money between two accounts as one atomic change.
#[derive(Debug, Clone)]
pub struct TransferFunds {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    /// Amount in minor units.
    pub amount: i64,
    pub issued_by: String,
}

impl Command for OpenAccount {
    fn command_type(&self) -> &'static str {
        "account.open"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn issued_by(&self) -> &str {
        &self.issued_by
    }
}

impl Command for Deposit {
    fn command_type(&self) -> &'static str {
        "account.deposit"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn issued_by(&self) -> &str {
        &self.issued_by
    }
}

impl Command for Withdraw {
    fn command_type(&self) -> &'static str {
        "account.withdraw"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn issued_by(&self) -> &str {
        &self.issued_by
    }
}

impl Command for TransferFunds {
    fn command_type(&self) -> &'static str {
        "account.transfer"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn issued_by(&self) -> &str {
        &self.issued_by
    }
}
