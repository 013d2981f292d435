//! Local input checks
//!
//! Every check runs before any I/O and fails with `ApiError::Validation`.

use std::ops::RangeInclusive;

use gym_api::{ApiError, Result};

use crate::model::RegisterData;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const AGE_RANGE: RangeInclusive<u32> = 13..=120;
/// Centimetres
pub const HEIGHT_RANGE: RangeInclusive<f64> = 50.0..=300.0;
/// Kilograms
pub const WEIGHT_RANGE: RangeInclusive<f64> = 20.0..=500.0;

/// `local@domain.tld` shape: one `@`, no whitespace, and a dot inside the
/// domain with something on both sides of it.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

pub fn validate_login(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(invalid("email and password are required"));
    }
    if !is_valid_email(email.trim()) {
        return Err(invalid("invalid email"));
    }
    Ok(())
}

/// Checks a normalized sign-up form.
pub fn validate_register(data: &RegisterData) -> Result<()> {
    let required = [
        ("name", &data.name),
        ("lastName", &data.last_name),
        ("email", &data.email),
        ("password", &data.password),
        ("phone", &data.phone),
        ("gender", &data.gender),
        ("birthday", &data.birthday),
        ("emergencyContact", &data.emergency_contact),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(invalid(format!("{field} is required")));
    }
    if !is_valid_email(&data.email) {
        return Err(invalid("invalid email"));
    }
    if data.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if !AGE_RANGE.contains(&data.age) {
        return Err(invalid(format!(
            "age must be between {} and {}",
            AGE_RANGE.start(),
            AGE_RANGE.end()
        )));
    }
    if !HEIGHT_RANGE.contains(&data.height) {
        return Err(invalid(format!(
            "height must be between {} and {} cm",
            HEIGHT_RANGE.start(),
            HEIGHT_RANGE.end()
        )));
    }
    if !WEIGHT_RANGE.contains(&data.weight) {
        return Err(invalid(format!(
            "weight must be between {} and {} kg",
            WEIGHT_RANGE.start(),
            WEIGHT_RANGE.end()
        )));
    }
    Ok(())
}

pub fn validate_user_id(user_id: u64) -> Result<()> {
    if user_id == 0 {
        return Err(invalid("user id is required"));
    }
    Ok(())
}

pub fn validate_heart_rate(user_id: u64, bpm: u32) -> Result<()> {
    validate_user_id(user_id)?;
    if bpm == 0 {
        return Err(invalid("bpm must be greater than zero"));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError::Validation(message.into())
}
