//! Page auto-responder: replies to page comments from keyword rules.

pub mod config;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod orchestrator;
pub mod rules;
pub mod store;
