//! Session facade
//!
//! Login and register are sent anonymously: a 401 there means bad
//! credentials, so it must not trigger a token refresh or a forced logout.

use std::sync::Arc;

use gym_api::{ApiClient, ApiError, ApiRequest, Result};
use gym_auth::{CredentialStore, LOGIN_PATH, PROFILE_PATH, REGISTER_PATH, TokenPair, USER_DATA_KEY};
use tracing::{debug, info, instrument, warn};

use crate::model::{AuthPayload, AuthSession, LoginRequest, RegisterData, User};
use crate::validation::{validate_login, validate_register};

#[derive(Debug, Clone)]
pub struct SessionFacade {
    client: ApiClient,
}

impl SessionFacade {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.client.store()
    }

    /// Authenticate and persist the new session.
    #[instrument(skip_all)]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        validate_login(email, password)?;
        let request = ApiRequest::post(LOGIN_PATH)
            .anonymous()
            .json(&LoginRequest {
                email: email.trim(),
                password,
            })?;
        let session = self.start_session(request).await?;
        info!(user_id = session.user.id, "logged in");
        Ok(session)
    }

    /// Create an account and persist the new session, as `login` does.
    #[instrument(skip_all)]
    pub async fn register(&self, data: &RegisterData) -> Result<AuthSession> {
        let data = data.normalized();
        validate_register(&data)?;
        let request = ApiRequest::post(REGISTER_PATH).anonymous().json(&data)?;
        let session = self.start_session(request).await?;
        info!(user_id = session.user.id, "registered");
        Ok(session)
    }

    /// Refresh the stored session and return the new pair.
    ///
    /// Joins the interceptor's single-flight cycle, so a call racing with
    /// 401-triggered refreshes still costs one refresh request. A failure
    /// clears the session and returns `AuthExpired`.
    pub async fn refresh_session(&self) -> Result<TokenPair> {
        self.client.interceptor().fresh_token().await?;
        self.store()
            .tokens()
            .await
            .ok_or_else(|| ApiError::AuthExpired("session was cleared".into()))
    }

    /// Cached profile, else `auth/me` (cached on success). `None` when
    /// neither is available; fetch failures are not reported.
    pub async fn get_current_user(&self) -> Option<User> {
        if let Some(user) = self.store().get::<User>(USER_DATA_KEY).await {
            return Some(user);
        }
        match self.client.get::<User>(PROFILE_PATH).await {
            Ok(user) => {
                if let Err(e) = self.store().set(USER_DATA_KEY, &user).await {
                    warn!(error = %e, "failed to cache user profile");
                }
                Some(user)
            }
            Err(e) => {
                debug!(error = %e, "no current user");
                None
            }
        }
    }

    /// True iff both tokens are stored.
    pub async fn has_active_session(&self) -> bool {
        self.store().tokens().await.is_some()
    }

    /// Remove both tokens and the cached profile. Idempotent.
    pub async fn clear_session(&self) -> Result<()> {
        self.store().clear_session().await?;
        info!("session cleared");
        Ok(())
    }

    async fn start_session(&self, request: ApiRequest) -> Result<AuthSession> {
        let payload: AuthPayload = self.client.send_json(request).await?;
        let tokens = payload
            .tokens
            .into_session_pair()
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        self.store().save_tokens(&tokens).await?;
        self.store().set(USER_DATA_KEY, &payload.user).await?;
        Ok(AuthSession {
            user: payload.user,
            tokens,
        })
    }
}
