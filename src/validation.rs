//! Input validation for product and account writes.
//!
//! Product creation and update share [`validate_product`]; an update merges
//! the request onto the stored product first (see
//! [`ProductParams::merged_onto`]) so both paths apply identical rules.
//! Validators accumulate every failing rule rather than stopping at the
//! first, and return messages ready for the `errors` array of a 422.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::models::{ProductAttributes, ProductParams, ProductStatus, SignupParams};

// =============================================================================
// Validation Constants
// =============================================================================

/// Minimum product name length, in characters.
pub const MIN_NAME_LENGTH: usize = 2;

/// Maximum product name length, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Minimum account password length, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Validate raw product attributes and apply creation defaults.
///
/// Rules:
/// - `name` is required and 2 to 255 characters after trimming
/// - `price` is required, numeric (a JSON number or numeric string) and
///   not negative
/// - `status`, when given and not blank, is `active` or `archived`
/// - `stock_quantity`, when given, is a non-negative integer (a JSON
///   integer or integer string)
///
/// Absent `status` defaults to `active` and absent `stock_quantity` to 0.
/// An explicit `null` counts as blank.
pub fn validate_product(params: &ProductParams) -> Result<ProductAttributes, Vec<String>> {
    let mut errors = Vec::new();

    let name = match params.name.as_ref() {
        None | Some(Value::Null) => Some(String::new()),
        Some(Value::String(name)) => Some(name.trim().to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(_) => None,
    };
    match name.as_deref().map(|name| name.chars().count()) {
        None => errors.push("Name must be a string".to_string()),
        Some(0) => errors.push("Name is required".to_string()),
        Some(length) if length < MIN_NAME_LENGTH => errors.push(format!(
            "Name is too short (minimum is {MIN_NAME_LENGTH} characters)"
        )),
        Some(length) if length > MAX_NAME_LENGTH => errors.push(format!(
            "Name is too long (maximum is {MAX_NAME_LENGTH} characters)"
        )),
        Some(_) => {}
    }

    let price = match params.price.as_ref().map(decimal_value) {
        None | Some(Field::Blank) => {
            errors.push("Price is required".to_string());
            None
        }
        Some(Field::Invalid) => {
            errors.push("Price is not a number".to_string());
            None
        }
        Some(Field::Valid(price)) if price < Decimal::ZERO => {
            errors.push("Price must be greater than or equal to 0".to_string());
            None
        }
        Some(Field::Valid(price)) => Some(price),
    };

    // Blank status is treated as absent
    let status = match params.status.as_ref() {
        None | Some(Value::Null) => Some(ProductStatus::default()),
        Some(Value::String(raw)) if raw.trim().is_empty() => Some(ProductStatus::default()),
        Some(Value::String(raw)) => ProductStatus::from_str(raw.trim()).ok(),
        Some(_) => None,
    };
    if status.is_none() {
        errors.push("Status must be 'active' or 'archived'".to_string());
    }

    let stock_quantity = match params.stock_quantity.as_ref().map(integer_value) {
        None => Some(0),
        Some(Field::Blank) => {
            errors.push("Stock quantity is required".to_string());
            None
        }
        Some(Field::Invalid) => {
            errors.push("Stock quantity must be an integer".to_string());
            None
        }
        Some(Field::Valid(quantity)) if quantity < 0 => {
            errors.push("Stock quantity must be a non-negative integer".to_string());
            None
        }
        Some(Field::Valid(quantity)) => Some(quantity),
    };

    match (errors.is_empty(), name, price, status, stock_quantity) {
        (true, Some(name), Some(price), Some(status), Some(stock_quantity)) => {
            Ok(ProductAttributes {
                name,
                price,
                status,
                stock_quantity,
            })
        }
        _ => Err(errors),
    }
}

/// Outcome of coercing one raw JSON field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field<T> {
    /// `null` or a blank string
    Blank,
    Invalid,
    Valid(T),
}

/// Coerce a JSON number or numeric string to a `Decimal`.
fn decimal_value(value: &Value) -> Field<Decimal> {
    let raw = match value {
        Value::Null => return Field::Blank,
        Value::Number(number) => number.to_string(),
        Value::String(raw) if raw.trim().is_empty() => return Field::Blank,
        Value::String(raw) => raw.trim().to_string(),
        _ => return Field::Invalid,
    };

    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_or(Field::Invalid, Field::Valid)
}

/// Coerce a JSON integer or integer string to an `i64`. Fractions such as
/// `1.5` or `5.0` are not integers.
fn integer_value(value: &Value) -> Field<i64> {
    match value {
        Value::Null => Field::Blank,
        Value::Number(number) => number.as_i64().map_or(Field::Invalid, Field::Valid),
        Value::String(raw) if raw.trim().is_empty() => Field::Blank,
        Value::String(raw) => raw.trim().parse().map_or(Field::Invalid, Field::Valid),
        _ => Field::Invalid,
    }
}

/// Validated signup input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSignup {
    /// Lower-cased, trimmed email
    pub email: String,
    pub password: String,
}

/// Validate signup attributes.
///
/// Email uniqueness is enforced by the user repository, not here.
pub fn validate_signup(params: &SignupParams) -> Result<ValidSignup, Vec<String>> {
    let mut errors = Vec::new();

    let email = params
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    if email.is_empty() {
        errors.push("Email can't be blank".to_string());
    } else if !is_valid_email(&email) {
        errors.push("Email is invalid".to_string());
    }

    let password = params.password.clone().unwrap_or_default();
    if password.is_empty() {
        errors.push("Password can't be blank".to_string());
    } else if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "Password is too short (minimum is {MIN_PASSWORD_LENGTH} characters)"
        ));
    }

    if let Some(confirmation) = params.password_confirmation.as_deref()
        && confirmation != password
    {
        errors.push("Password confirmation doesn't match Password".to_string());
    }

    if errors.is_empty() {
        Ok(ValidSignup { email, password })
    } else {
        Err(errors)
    }
}

/// One `@` with a non-empty local part and domain, and no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
