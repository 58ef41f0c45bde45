//! Library surface for `poi-crawler`: every module the binary wires
//! together, exposed for integration tests that exercise the crawler
//! worker state machine against in-memory fakes.

pub use anyhow::Result;

pub mod akmanager;
pub mod aoi;
pub mod config;
pub mod coords;
pub mod crawler;
pub mod geohash;
pub mod monitor;
pub mod persistence;
pub mod poi;
pub mod rehydrator;
pub mod seeder;
pub mod store;
pub mod upstream;
