use thiserror::Error;

/// Token matching exactly one subject token.
pub const WILDCARD_ANY: &str = "*";

/// Token matching every remaining subject token (at least one).
pub const WILDCARD_ALL: &str = ">";

/// Errors raised when validating subjects.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubjectError {
    /// The subject is empty.
    #[error("subject must not be empty")]
    Empty,

    /// A token between two dots is empty.
    #[error("subject '{0}' contains an empty token")]
    EmptyToken(String),

    /// The subject contains whitespace.
    #[error("subject '{0}' contains whitespace")]
    Whitespace(String),

    /// `>` appears anywhere but the last token.
    #[error("subject '{0}' uses '>' before the last token")]
    MisplacedWildcard(String),

    /// A wildcard was used where a concrete subject is required.
    #[error("subject '{0}' contains a wildcard and cannot be published to")]
    NotPublishable(String),
}

/// Validates a subject that may contain wildcards (a subscription pattern).
///
/// # Errors
///
/// Returns a `SubjectError` describing the first rule the subject breaks.
pub fn validate_pattern(subject: &str) -> Result<(), SubjectError> {
    if subject.is_empty() {
        return Err(SubjectError::Empty);
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(SubjectError::Whitespace(subject.to_string()));
    }

    let tokens: Vec<&str> = subject.split('.').collect();
    for (index, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(SubjectError::EmptyToken(subject.to_string()));
        }
        if *token == WILDCARD_ALL && index != tokens.len() - 1 {
            return Err(SubjectError::MisplacedWildcard(subject.to_string()));
        }
    }

    Ok(())
}

/// Validates a concrete subject that messages can be published to.
///
/// # Errors
///
/// Returns a `SubjectError` if the subject is malformed or contains a wildcard token.
pub fn validate_publishable(subject: &str) -> Result<(), SubjectError> {
    validate_pattern(subject)?;

    if subject
        .split('.')
        .any(|token| token == WILDCARD_ANY || token == WILDCARD_ALL)
    {
        return Err(SubjectError::NotPublishable(subject.to_string()));
    }

    Ok(())
}

/// Whether a concrete `subject` is matched by a subscription `pattern`.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(WILDCARD_ALL), Some(_)) => return true,
            (Some(WILDCARD_ANY), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
