//! Credential storage and token types for the gym member API
//!
//! Holds everything the access layer needs to remember between runs: the
//! access/refresh token pair (secure namespace) and the cached user profile
//! (plain namespace). The crate performs no HTTP itself; the `gym-api` crate
//! drives refresh and retry on top of the store.
//!
//! Session lifecycle:
//! 1. Login/register response parsed into a `TokenResponse`
//! 2. Converted to a `TokenPair` and persisted via `CredentialStore::save_tokens()`
//! 3. Every request reads the access token via `CredentialStore::access_token()`
//! 4. A 401 triggers one refresh; the new pair replaces the old one
//! 5. A failed refresh wipes the session via `CredentialStore::clear_session()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialStore, Namespace};
pub use error::{Error, Result};
pub use token::{RefreshRequest, TokenPair, TokenResponse};
