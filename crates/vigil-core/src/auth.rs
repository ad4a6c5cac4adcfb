// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Authentication contract consumed by the management console.
//!
//! The console's login flow lives outside this workspace; the core only
//! fixes the surface it relies on.  Tokens are opaque; lifetime policy is
//! the implementation's business.

pub trait AuthStore: Send + Sync {
    /// Whether an admin password has been set at all.
    fn is_configured(&self) -> bool;
    /// Verify a password; on success returns a session token.
    fn verify(&self, password: &str) -> Option<String>;
    /// Verify a previously issued token.
    fn verify_token(&self, token: &str) -> bool;
}
