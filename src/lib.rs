//! pgreport - PostgreSQL health check and maintenance report library.
//!
//! This library provides the core functionality shared between:
//! - `pgreport` - full health report (text, HTML or JSON)
//! - `pgcheck` - single ad-hoc checks for cron jobs, with mail alerts

pub mod adhoc;
pub mod catalog;
pub mod checks;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod executor;
pub mod fmt;
pub mod host;
pub mod logging;
pub mod notify;
pub mod report;
pub mod version;
