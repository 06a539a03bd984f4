//! # exploder-core
//! Foundation types for the Exploder explorer: chain data model, identifier
//! shapes, caller-input parsing and the error taxonomy shared by the index
//! and the HTTP surface.

pub mod address;
pub mod constants;
pub mod error;
pub mod pagination;
pub mod types;
