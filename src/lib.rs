//! Vehicle auction scraper: drives a headless browser through an auction
//! site, turns result pages into listing records with a language model, and
//! merges them into PostgreSQL keyed by VIN.

pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod scrapers;
pub mod storage;

pub use error::{Result, ScoutError};
