//! Integration tests for the harvester
//!
//! These tests use wiremock to serve listing and detail pages and run the
//! full fetch → extract → gate → persist pipeline against SQLite storage.

mod common;
mod pipeline_tests;
mod retry_tests;
