pub mod ai;
pub mod app;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod monitoring;
pub mod prompting;
pub mod replies;
pub mod resolver;
pub mod session_store;
pub mod streak;
pub mod types;
pub mod webhook;
