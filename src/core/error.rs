use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    Encode,
    Decode,
    QuotaExceeded,
    Unavailable,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    key: Option<String>,
    path: Option<PathBuf>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            key: None,
            path: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(key) = &self.key {
            write!(f, " (key: {key})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Encode => 4,
        ErrorKind::Decode => 5,
        ErrorKind::QuotaExceeded => 6,
        ErrorKind::Unavailable => 7,
        ErrorKind::Io => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::Encode, 4),
            (ErrorKind::Decode, 5),
            (ErrorKind::QuotaExceeded, 6),
            (ErrorKind::Unavailable, 7),
            (ErrorKind::Io, 8),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_key_context() {
        let err = Error::new(ErrorKind::QuotaExceeded)
            .with_message("write exceeds quota")
            .with_key("peers");
        assert_eq!(
            err.to_string(),
            "QuotaExceeded: write exceeds quota (key: peers)"
        );
        assert_eq!(err.key(), Some("peers"));
    }
}
