//! Site credential and login boundary library
//!
//! Defines the two external collaborators the token pool talks to:
//!
//! - `CredentialStore`: lists the accounts configured for a site and persists
//!   the per-account success/failure counters the selector maintains.
//! - `LoginExecutor`: performs an interactive login for one credential and
//!   returns a bearer token. The mechanics (browser automation, challenge
//!   solving) live behind this trait.
//!
//! Concrete implementations:
//! 1. `FileCredentialStore` keeps credentials in a JSON file (atomic writes)
//! 2. `MemoryCredentialStore` keeps them in process (embedding, tests)
//! 3. `HttpLoginExecutor` delegates logins to a login sidecar over HTTP

pub mod credentials;
pub mod error;
pub mod login;

pub use credentials::{
    Credential, CredentialStats, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{Error, Result};
pub use login::{HttpLoginExecutor, LoginExecutor, LoginGrant};
