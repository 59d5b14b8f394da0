use std::fmt;
use std::io::Error as IoError;

#[derive(Debug)]
pub enum CascadeError {
    Task(String),
    Dependency(String),
    Compile(String),
    Server(String),
    Watch(notify::Error),
    Io(IoError),
    Parse(String),
}

impl fmt::Display for CascadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeError::Task(msg) => write!(f, "Task error: {}", msg),
            CascadeError::Dependency(msg) => write!(f, "Dependency error: {}", msg),
            CascadeError::Compile(msg) => write!(f, "Compile error: {}", msg),
            CascadeError::Server(msg) => write!(f, "Server error: {}", msg),
            CascadeError::Watch(err) => write!(f, "Watch error: {}", err),
            CascadeError::Io(err) => write!(f, "IO error: {}", err),
            CascadeError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for CascadeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CascadeError::Watch(err) => Some(err),
            CascadeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IoError> for CascadeError {
    fn from(err: IoError) -> Self {
        CascadeError::Io(err)
    }
}

impl From<notify::Error> for CascadeError {
    fn from(err: notify::Error) -> Self {
        CascadeError::Watch(err)
    }
}

impl From<toml::de::Error> for CascadeError {
    fn from(err: toml::de::Error) -> Self {
        CascadeError::Parse(err.to_string())
    }
}

impl From<glob::PatternError> for CascadeError {
    fn from(err: glob::PatternError) -> Self {
        CascadeError::Compile(format!("invalid glob pattern: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
