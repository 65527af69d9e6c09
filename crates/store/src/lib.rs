//! Tenant-scoped persistence for the DOM gateway.
//!
//! - [`Database`] owns the SQLite pool and bootstraps the schema.
//! - [`Store<E>`] is generic CRUD for one [`Entity`] within one [`Scope`].
//! - [`UnitOfWork`] groups tenant-scoped writes into one transaction.

pub mod db;
pub mod entity;
pub mod queries;
pub mod scoped;

pub use db::Database;
pub use entity::{Entity, SystemScoped, Value};
pub use scoped::{Filter, Scope, Store, UnitOfWork};
