//! Guild companion background jobs
//!
//! This library provides the job queue used by the guild companion platform:
//! a PostgreSQL-backed job table with an atomic claim, the polling worker
//! loop that drains it, and the HTTP surface for submitting and inspecting
//! jobs.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
