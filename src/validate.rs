//! Argument validators.
//!
//! Each validator returns `Ok(())` or an [`ArgumentError`]. Use [`check`] to
//! run several and collect every failure into [`Error::Validation`].

use std::fmt;

use validator::{Validate, ValidateEmail, ValidationErrors};

use crate::error::{Error, Fault, Result};

/// An illegal argument reported by a validator.
#[derive(Debug, Clone)]
pub struct ArgumentError(Fault);

impl ArgumentError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(Fault::new(msg))
    }

    pub fn stack(&self) -> Option<&str> {
        self.0.stack()
    }

    pub(crate) fn into_fault(self) -> Fault {
        self.0
    }
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ArgumentError {}

/// Outcome of a single validator.
pub type Check = std::result::Result<(), ArgumentError>;

/// Collect the failures of several validators.
///
/// ```ignore
/// validate::check([
///     validate::not_zero_string(&req.name),
///     validate::is_email(&req.email),
/// ])?;
/// ```
pub fn check<I>(checks: I) -> Result<()>
where
    I: IntoIterator<Item = Check>,
{
    let errors: Vec<ArgumentError> = checks.into_iter().filter_map(|c| c.err()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

/// Run `validator` derive rules on a struct and convert the failures.
pub fn validate_struct<T: Validate>(value: &T) -> Result<()> {
    value.validate().map_err(from_validation_errors)
}

fn from_validation_errors(errors: ValidationErrors) -> Error {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    for (field, errs) in fields {
        for e in errs {
            let msg = match &e.message {
                Some(m) => format!("{field}: {m}"),
                None => format!("{field} does not validate as {}.", e.code),
            };
            out.push(ArgumentError::new(msg));
        }
    }
    Error::Validation(out)
}

fn not_validate_msg(value: impl fmt::Display, validator: &str) -> String {
    format!("{value} does not validate as {validator}.")
}

/// The value must be one of `choices`. Zero or an empty choice list passes;
/// pair with [`not_zero`] when the value is required.
pub fn eq_choice_int(value: i64, choices: &[i64]) -> Check {
    if value == 0 || choices.is_empty() || choices.contains(&value) {
        return Ok(());
    }
    let mut sorted = choices.to_vec();
    sorted.sort_unstable();
    let options = sorted
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");
    Err(ArgumentError::new(not_validate_msg(
        value,
        &format!("option(int:{options})"),
    )))
}

/// String counterpart of [`eq_choice_int`].
pub fn eq_choice_string(value: &str, choices: &[&str]) -> Check {
    if value.is_empty() || choices.is_empty() || choices.contains(&value) {
        return Ok(());
    }
    let mut sorted = choices.to_vec();
    sorted.sort_unstable();
    Err(ArgumentError::new(not_validate_msg(
        value,
        &format!("option(str:{})", sorted.join(",")),
    )))
}

pub fn not_zero_string(value: &str) -> Check {
    if value.chars().count() == 0 {
        return Err(ArgumentError::new("Non zero string required."));
    }
    Ok(())
}

/// Types with a notion of an empty or zero value.
pub trait IsZero {
    fn is_zero(&self) -> bool;
}

macro_rules! impl_is_zero_num {
    ($($t:ty),*) => {
        $(impl IsZero for $t {
            fn is_zero(&self) -> bool {
                *self == 0 as $t
            }
        })*
    };
}

impl_is_zero_num!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

impl IsZero for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
}

impl IsZero for str {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl IsZero for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for [T] {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

impl<K, V, S> IsZero for std::collections::HashMap<K, V, S> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T: IsZero + ?Sized> IsZero for &T {
    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }
}

pub fn not_zero<T: IsZero + ?Sized>(value: &T) -> Check {
    if value.is_zero() {
        return Err(ArgumentError::new("Non zero value required."));
    }
    Ok(())
}

pub fn is_email(value: &str) -> Check {
    if !value.to_string().validate_email() {
        return Err(ArgumentError::new(not_validate_msg(value, "email")));
    }
    Ok(())
}

pub fn is_json(value: &str) -> Check {
    if serde_json::from_str::<serde_json::Value>(value).is_err() {
        return Err(ArgumentError::new(not_validate_msg(value, "json")));
    }
    Ok(())
}

/// Length is counted in characters, not bytes.
pub fn min_str_length(value: &str, min: usize) -> Check {
    if value.chars().count() < min {
        return Err(ArgumentError::new(not_validate_msg(
            value,
            &format!("length(min:{min})"),
        )));
    }
    Ok(())
}
