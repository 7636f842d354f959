//! Helpline Storage crate - SQLite persistence for sessions, turns, FAQs,
//! and escalations.
//!
//! Provides a WAL-mode SQLite database with migrations and the
//! `SqliteRepository` implementation of `SupportRepository`.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::SqliteRepository;
