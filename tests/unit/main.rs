//! Unit tests for individual components

mod config_test;
mod error_test;
mod sheets_test;
mod trigger_test;
