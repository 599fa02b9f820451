//! Error types for template parsing and rendering.

use std::fmt;
use thiserror::Error;

/// File/line/token context attached to every parse or render failure.
///
/// Mirrors the `In file "F", line L, around "TOKEN"` annotation the
/// original implementation stitches onto every raised exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: usize,
    pub token: String,
}

impl SourceLocation {
    pub fn new(file: Option<String>, line: usize, token: impl Into<String>) -> Self {
        Self {
            file,
            line,
            token: token.into(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            file: None,
            line: 0,
            token: String::new(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "In file \"{}\", line {}, around \"{}\"", file, self.line, self.token),
            None => write!(f, "Line {}, around \"{}\"", self.line, self.token),
        }
    }
}

/// The three error kinds distinguished by the engine, each carrying
/// [`SourceLocation`] context.
#[derive(Debug, Error)]
pub enum MextError {
    #[error("SyntaxError: {message}\n{location}")]
    Syntax {
        message: String,
        location: SourceLocation,
    },

    #[error("RuntimeError: {message}\n{location}")]
    Runtime {
        message: String,
        location: SourceLocation,
    },

    #[error("FileNotFoundError: {message}\n{location}")]
    FileNotFound {
        message: String,
        location: SourceLocation,
    },

    #[error("failed to read \"{path}\": {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config \"{path}\": {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unsupported config extension \"{extension}\" for \"{path}\"")]
    UnsupportedConfigExtension { path: String, extension: String },
}

impl MextError {
    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        MextError::Syntax {
            message: message.into(),
            location,
        }
    }

    pub fn runtime(message: impl Into<String>, location: SourceLocation) -> Self {
        MextError::Runtime {
            message: message.into(),
            location,
        }
    }

    pub fn file_not_found(message: impl Into<String>, location: SourceLocation) -> Self {
        MextError::FileNotFound {
            message: message.into(),
            location,
        }
    }

    /// True for the kind the original calls `RuntimeError`, used by the
    /// `undefined`/`novalue` conditional tests to swallow the error.
    pub fn is_runtime(&self) -> bool {
        matches!(self, MextError::Runtime { .. })
    }
}

pub type MextResult<T> = Result<T, MextError>;
