//! Transactions
//!
//! Connection-level transactions are flat; nesting is expressed with
//! savepoints kept per record in a [`SavepointStack`].

pub mod savepoints;

pub use savepoints::SavepointStack;
