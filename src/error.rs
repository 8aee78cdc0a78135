use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("vars: cannot contain non-primitives (key '{0}')")]
    NonPrimitiveVariable(String),
    #[error("Syntax Error at offset {offset}: {message}")]
    SyntaxError { offset: usize, message: String },
    #[error("Undefined Variable: {0}")]
    UndefinedVariable(String),
    #[error("Unknown Function: {0}")]
    UnknownFunction(String),
    #[error("Arity Mismatch: {name} expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("Type Mismatch: {0}")]
    TypeMismatch(String),
    #[error("Arithmetic Error: {0}")]
    Arithmetic(String),
    #[error("Invalid Argument: {name}: {message}")]
    InvalidArgument { name: String, message: String },
    #[error("Serialization Error: {0}")]
    SerializationError(String),
    #[error("{error} (at offset {offset})")]
    Located {
        offset: usize,
        error: Box<TemplateError>,
    },
}

/// Flat classification of a [`TemplateError`], looking through position
/// annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NonPrimitiveVariable,
    SyntaxError,
    UndefinedVariable,
    UnknownFunction,
    ArityMismatch,
    TypeMismatch,
    Arithmetic,
    InvalidArgument,
    SerializationError,
}

impl TemplateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TemplateError::NonPrimitiveVariable(_) => ErrorKind::NonPrimitiveVariable,
            TemplateError::SyntaxError { .. } => ErrorKind::SyntaxError,
            TemplateError::UndefinedVariable(_) => ErrorKind::UndefinedVariable,
            TemplateError::UnknownFunction(_) => ErrorKind::UnknownFunction,
            TemplateError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            TemplateError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            TemplateError::Arithmetic(_) => ErrorKind::Arithmetic,
            TemplateError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            TemplateError::SerializationError(_) => ErrorKind::SerializationError,
            TemplateError::Located { error, .. } => error.kind(),
        }
    }

    /// Byte offset into the template source, when the error is tied to one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            TemplateError::SyntaxError { offset, .. } | TemplateError::Located { offset, .. } => {
                Some(*offset)
            }
            _ => None,
        }
    }

    /// Attaches a source offset unless the error already carries one.
    pub(crate) fn at(self, offset: usize) -> Self {
        if self.offset().is_some() {
            return self;
        }
        TemplateError::Located {
            offset,
            error: Box::new(self),
        }
    }

    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        TemplateError::SyntaxError {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(expected: &str, got: &str) -> Self {
        TemplateError::TypeMismatch(format!("expected {}, got {}", expected, got))
    }

    pub(crate) fn invalid_argument(name: &str, message: impl Into<String>) -> Self {
        TemplateError::InvalidArgument {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

impl serde::ser::Error for TemplateError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        TemplateError::SerializationError(msg.to_string())
    }
}
