//! Domain records exchanged with the backend
//!
//! Field names are camelCase on the wire. Enumerations tolerate values this
//! client doesn't know about (`Unknown`) so a backend adding a membership
//! tier doesn't break profile loading.

use std::fmt;

use gym_auth::{TokenPair, TokenResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Membership {
    Basico,
    Premium,
    #[serde(other)]
    Unknown,
}

/// Membership standing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Activo,
    Retirado,
    SinPagar,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Server-side user record, cached locally after login/register/fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<Membership>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_hour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    /// Centimetres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    /// "Name LastName", or just the name.
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.name, last),
            _ => self.name.clone(),
        }
    }
}

/// Sign-up form. `height` is in centimetres, `weight` in kilograms.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    pub name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
    pub gender: String,
    pub age: u32,
    pub birthday: String,
    pub emergency_contact: String,
    pub height: f64,
    pub weight: f64,
}

impl RegisterData {
    /// Copy with the email trimmed and lowercased before sending.
    pub fn normalized(&self) -> Self {
        let mut data = self.clone();
        data.email = data.email.trim().to_lowercase();
        data
    }
}

impl fmt::Debug for RegisterData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterData")
            .field("name", &self.name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("age", &self.age)
            .field("height", &self.height)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Body of `POST auth/login`.
#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Response of `auth/login` and `auth/register`: the user plus token fields
/// at the top level.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthPayload {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenResponse,
}

/// Result of a successful login or registration.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub tokens: TokenPair,
}

/// One stored heart-rate sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRate {
    pub id: u64,
    pub bpm: u32,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
}
