//! # pmsync store
//!
//! SQLite-backed record store mirroring identity-provider users and
//! organizations, plus the projects and tasks the notification workflow reads.

pub mod db;

pub use db::AppDb;
