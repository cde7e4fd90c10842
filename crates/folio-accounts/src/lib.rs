//! Folio: bank account bounded context.
//!
//! Accounts are opened for an owner and move money through deposits,
//! withdrawals and transfers. A transfer touches two accounts and commits
//! them through one unit of work.

pub mod application;
pub mod domain;
