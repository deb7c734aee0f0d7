//! Field-level rules shared by every write payload.
//!
//! The helpers are pure: they take the raw optional input and return either
//! the normalized value or a [`FieldProblem`] whose `Display` text is the
//! message returned to API clients.

use std::fmt;

pub const CATEGORY_NAME_MAX: usize = 50;
pub const SUBCATEGORY_NAME_MAX: usize = 50;
pub const MATERIAL_MAX: usize = 100;
pub const PRODUCT_CODE_MAX: usize = 50;
pub const CONTACT_NAME_MAX: usize = 200;
pub const CONTACT_SUBJECT_MAX: usize = 200;
pub const EMAIL_MAX: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    Blank,
    TooLong { max: usize },
    InvalidEmail,
    InvalidIdentifier { raw: String },
    UnknownReference { id: String },
    InvalidImage,
    WrongType { expected: &'static str },
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => f.write_str("This field is required."),
            FieldProblem::Blank => f.write_str("This field may not be blank."),
            FieldProblem::TooLong { max } => {
                write!(f, "Ensure this field has no more than {max} characters.")
            }
            FieldProblem::InvalidEmail => f.write_str("Enter a valid email address."),
            FieldProblem::InvalidIdentifier { raw } => write!(f, "\"{raw}\" is not a valid UUID."),
            FieldProblem::UnknownReference { id } => {
                write!(f, "Invalid pk \"{id}\" - object does not exist.")
            }
            FieldProblem::InvalidImage => f.write_str(
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
            ),
            FieldProblem::WrongType { expected } => write!(f, "Expected {expected}."),
        }
    }
}

/// Trim and bound a required text value.
pub fn required_text(value: Option<&str>, max: usize) -> Result<String, FieldProblem> {
    let value = value.ok_or(FieldProblem::Missing)?;
    bounded_text(value, max)
}

/// Trim and bound a supplied text value, rejecting blanks.
pub fn bounded_text(value: &str, max: usize) -> Result<String, FieldProblem> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldProblem::Blank);
    }
    if trimmed.chars().count() > max {
        return Err(FieldProblem::TooLong { max });
    }
    Ok(trimmed.to_string())
}

/// Trim a required free-form body; no upper bound.
pub fn required_body(value: Option<&str>) -> Result<String, FieldProblem> {
    let value = value.ok_or(FieldProblem::Missing)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldProblem::Blank);
    }
    Ok(trimmed.to_string())
}

/// Normalize an email address, applying a structural check only.
pub fn email_address(value: Option<&str>) -> Result<String, FieldProblem> {
    let candidate = required_text(value, EMAIL_MAX)?;
    let (local, domain) = candidate
        .rsplit_once('@')
        .ok_or(FieldProblem::InvalidEmail)?;

    let domain_ok = !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && domain
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '.');
    let local_ok = !local.is_empty()
        && !local.chars().any(|ch| ch.is_whitespace() || ch == '@');

    if !(domain_ok && local_ok) {
        return Err(FieldProblem::InvalidEmail);
    }

    Ok(format!("{local}@{}", domain.to_ascii_lowercase()))
}
