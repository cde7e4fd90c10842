//! Folio Core: event-sourcing persistence abstractions.
//!
//! This crate defines events, replay-built aggregates, the event store
//! contract, views, and the unit of work that commits several aggregates as
//! one atomic unit. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod repository;
pub mod store;
pub mod unit_of_work;
pub mod view;
