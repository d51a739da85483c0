//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod fake_session;
pub mod socket_guard;
