//! Token refresh call
//!
//! Posts the stored refresh token to `auth/refresh` and returns the new pair.
//! The call is sent straight through the dispatcher: it carries no bearer
//! credential and never re-enters the interceptor, so a 401 from the refresh
//! endpoint is a plain failure rather than another refresh.

use common::Secret;
use gym_auth::{REFRESH_PATH, RefreshRequest, TokenPair, TokenResponse};
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::error::{ApiError, Result};
use crate::request::ApiRequest;

/// Exchange a refresh token for a new token pair.
///
/// When the server does not rotate the refresh token, the returned pair
/// keeps `refresh_token`.
pub async fn refresh_session(
    dispatcher: &dyn Dispatcher,
    refresh_token: &Secret<String>,
) -> Result<TokenPair> {
    let request = ApiRequest::post(REFRESH_PATH)
        .anonymous()
        .json(&RefreshRequest {
            refresh_token: refresh_token.expose().clone(),
        })?;

    let response = dispatcher.dispatch(&request).await?.into_success()?;
    let tokens: TokenResponse = response.decode()?;
    if tokens.token.is_empty() {
        return Err(ApiError::InvalidResponse(
            "refresh response carries an empty access token".into(),
        ));
    }
    let rotated = tokens.refresh_token.is_some();
    debug!(rotated, "refresh endpoint issued new tokens");
    Ok(tokens.into_rotated_pair(refresh_token))
}
