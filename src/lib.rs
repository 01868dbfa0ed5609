//! Distributed site-health monitoring pipeline
//!
//! Chats subscribe to URLs through a Telegram bot; the pipeline
//! periodically probes each monitored URL, persists every outcome and
//! notifies subscribers when a site's health transitions between up
//! and down.
//!
//! ## Architecture Overview
//!
//! Four stages, one process each, coupled through three queues and a
//! shared store:
//!
//! ```text
//! ┌───────────┐ sites  ┌───────────┐ results ┌───────────┐ notifs ┌───────────┐
//! │ Scheduler ├───────►│  Checker  ├────────►│  Alerter  ├───────►│ Notifier  │
//! │  (ticker) │        │ (workers) │         │ (1 loop)  │        │ (1 loop)  │
//! └─────┬─────┘        └─────┬─────┘         └─────┬─────┘        └─────┬─────┘
//!       │ monitored sites    │ every outcome       │ tail of           │ subscribers
//!       ▼                    ▼                     ▼ results           ▼ for url
//! ┌─────────────────────────── Repository ────────────────────────────────────┐
//! │                 sites · check_results · chats · chat_to_site              │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flows strictly forward; the alerter keeps no health state in
//! memory, so every stage is independently restartable and the
//! checker and alerter scale horizontally.

pub mod alerter;
pub mod api;
pub mod broker;
pub mod checker;
pub mod config;
pub mod model;
pub mod notifier;
pub mod repository;
pub mod scheduler;
pub mod url;

pub use model::{Chat, CheckResult, Notification, NullableInt, Site};
