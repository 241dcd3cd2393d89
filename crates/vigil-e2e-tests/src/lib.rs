//! End-to-end integration tests for Vigil.
//!
//! These tests exercise the full stack:
//! - Rule creation and validation through the service
//! - Scans with cooldowns and per-tenant single flight
//! - Fan-out delivery with partial failures and timeouts
//! - Alert lifecycle and history
//! - Tenant isolation
//! - A node wired from a JSON config with file-backed context

#![cfg(test)]
