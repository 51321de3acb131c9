//! Integration tests for the gateway API.
//!
//! These tests drive the full router against in-memory and scripted
//! backends: searches, partial failures, correlation and cache control.

mod integration_tests {
    mod admin_tests;
    mod common;
    mod correlate_tests;
    mod health_tests;
    mod query_tests;
    mod services_tests;
}
