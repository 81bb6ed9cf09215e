use crate::ast::Location;

pub type HashlateResult<T> = std::result::Result<T, HashlateError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected end of input{expected_what}")]
    UnexpectedEof {
        /// Describes what was expected, e.g. " (expected '#end')"
        expected_what: String,
    },
    #[error("Unterminated {what}")]
    Unterminated { what: String },
    #[error("Directive not defined: #{name}")]
    UnknownDirective { name: String },
    #[error("Illegal map key '{key}', a map key must be an identifier or a constant")]
    IllegalMapKey { key: String },
    #[error("Malformed number '{literal}': {reason}")]
    InvalidNumber { literal: String, reason: String },
    #[error("Unexpected character '{at_char}'")]
    InvalidCharacter { at_char: char },
    #[error("Expected {description}")]
    Expected { description: String },
    #[error("{0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<&str>) -> Self {
        Self::UnexpectedEof {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{e}')")),
        }
    }

    pub fn unterminated<T: Into<String>>(what: T) -> Self {
        Self::Unterminated { what: what.into() }
    }
}

/// A lexing or parsing failure. Always fatal to compiling the template it
/// occurred in.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Parse error {location}: {kind}")]
pub struct ParseError {
    pub location: Location,
    #[source]
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) const fn new(location: Location, kind: ParseErrorKind) -> Self {
        Self { location, kind }
    }

    pub const fn row(&self) -> usize {
        self.location.row()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.location.file_name()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashlateError {
    #[error("Template not found: {template_name}")]
    MissingTemplate { template_name: String },
    #[error("Template error {location}: {message}")]
    Template { message: String, location: Location },
    #[error("Configuration error: {message}")]
    Config { message: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HashlateError {
    pub(crate) fn template<M: Into<String>>(message: M, location: &Location) -> Self {
        Self::Template {
            message: message.into(),
            location: location.clone(),
        }
    }

    pub(crate) fn config<M: Into<String>>(message: M) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn missing_template(name: &str) -> Self {
        Self::MissingTemplate {
            template_name: name.to_owned(),
        }
    }

    /// The template location of a runtime or parse error, if it has one.
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Template { location, .. } => Some(location),
            Self::Parse(parse_error) => Some(&parse_error.location),
            Self::MissingTemplate { .. } | Self::Config { .. } | Self::Io(_) => None,
        }
    }
}

impl From<std::fmt::Error> for HashlateError {
    fn from(_: std::fmt::Error) -> Self {
        Self::Io(std::io::Error::other("formatter error"))
    }
}
