use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Two fields hold values that cannot be used together.
    #[error("`{first}` and `{second}` must differ")]
    ConflictingFields { first: String, second: String },
}
