//! Backend endpoint paths and credential storage keys
//!
//! Paths are relative to the configured API base URL and carry no leading
//! slash; the dispatcher joins them onto the base.

pub const LOGIN_PATH: &str = "auth/login";
pub const REGISTER_PATH: &str = "auth/register";
/// Token refresh endpoint. Called without a bearer credential.
pub const REFRESH_PATH: &str = "auth/refresh";
pub const PROFILE_PATH: &str = "auth/me";

pub const CHECK_IN_PATH: &str = "check/in";
pub const CHECK_OUT_PATH: &str = "check/out";
pub const CONCURRENCY_PATH: &str = "check/concurrency";
pub const CHECK_STATUS_PATH: &str = "check/status";

/// Heart-rate collection for a user; `{user_id}` is substituted by callers.
pub const HEART_RATE_PATH: &str = "heart-rate/{user_id}";

/// Secure-namespace key holding the bearer access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Secure-namespace key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Plain-namespace key holding the cached user profile record.
pub const USER_DATA_KEY: &str = "user_data";

/// Build the heart-rate path for a specific user.
pub fn heart_rate_path(user_id: u64) -> String {
    HEART_RATE_PATH.replace("{user_id}", &user_id.to_string())
}
