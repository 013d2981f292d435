//! Token pair and the wire shapes of the auth endpoints
//!
//! Login, register and refresh all answer with the same token fields, but
//! the backend is inconsistent about naming the access token: it arrives as
//! `token` from login/register and may arrive as `accessToken` from refresh.
//! Both spellings deserialize into `TokenResponse::token`.

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The session credentials. Either both tokens exist or there is no session.
///
/// `expires_in` is the delta in seconds reported by the server when the pair
/// was issued; it is not persisted, so pairs read back from storage carry
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_in: Option<u64>,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access.into()),
            refresh_token: Secret::new(refresh.into()),
            expires_in: None,
        }
    }
}

/// Token fields as returned by `auth/login`, `auth/register` and `auth/refresh`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(alias = "accessToken")]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Convert a login/register response. Both tokens are mandatory here:
    /// a session cannot start without a refresh token.
    pub fn into_session_pair(self) -> Result<TokenPair> {
        let refresh = self.refresh_token.ok_or_else(|| {
            Error::CredentialParse("auth response is missing refreshToken".into())
        })?;
        if self.token.is_empty() || refresh.is_empty() {
            return Err(Error::CredentialParse(
                "auth response carries an empty token".into(),
            ));
        }
        Ok(TokenPair {
            access_token: Secret::new(self.token),
            refresh_token: Secret::new(refresh),
            expires_in: self.expires_in,
        })
    }

    /// Convert a refresh response, keeping `previous_refresh` when the server
    /// did not rotate the refresh token.
    pub fn into_rotated_pair(self, previous_refresh: &Secret<String>) -> TokenPair {
        let refresh_token = match self.refresh_token {
            Some(rotated) if !rotated.is_empty() => Secret::new(rotated),
            _ => previous_refresh.clone(),
        };
        TokenPair {
            access_token: Secret::new(self.token),
            refresh_token,
            expires_in: self.expires_in,
        }
    }
}

/// Body of `POST auth/refresh`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}
