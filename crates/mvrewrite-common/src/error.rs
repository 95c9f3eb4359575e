use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub enum Error {
    ParseError(String),
    TableNotFound(String),
    UnsupportedFeature(String),
    Internal(String),
}

impl Error {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Error::ParseError(msg.into())
    }

    pub fn table_not_found(name: impl Into<String>) -> Self {
        Error::TableNotFound(name.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedFeature(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ParseError(msg) => write!(f, "Parse error: {}", msg),
            Error::TableNotFound(name) => write!(f, "Table not found: {}", name),
            Error::UnsupportedFeature(msg) => write!(f, "Unsupported feature: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let err = Error::parse_error("unexpected token");
        assert_eq!(err.to_string(), "Parse error: unexpected token");
        let err = Error::internal("literal class mismatch");
        assert_eq!(err.to_string(), "Internal error: literal class mismatch");
    }

    #[test]
    fn constructors_accept_string_and_str() {
        let _ = Error::table_not_found(String::from("t"));
        let _ = Error::unsupported("join");
    }
}
