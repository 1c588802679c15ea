pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod intake;
pub mod output;
pub mod prompt;
pub mod reconcile;
pub mod registry;
pub mod rules;
pub mod schema;
pub mod storage;
pub mod table;
