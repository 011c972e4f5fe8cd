use std::fmt;

/// Result type used throughout the crate.
pub type CResult<T> = std::result::Result<T, Error>;

/// All failures the engine can surface. Domain preconditions (node exists,
/// type rules, environment membership) are checked before any mutation and
/// reported here; storage-level failures are passed through from the KV
/// backend unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Requested node key not present at the requested version.
    NodeNotFound(String),

    /// Requested edge not present.
    EdgeNotFound(String),

    /// Tag key not present on a node at the requested version.
    KeyNotFound(String),

    /// Operation applied to a node whose type violates the operation's
    /// precondition. Carries "<name> has type <actual>, should be <expected>".
    IncorrectNodeType(String),

    /// Create requested on an existing node, or add requested on an
    /// already-present edge or tag value.
    NodeExists(String),

    /// Operation crosses environment boundaries without an explicit
    /// ext_dependency, or a host's pre-existing parent cluster lives in
    /// another environment.
    InvalidEnvironment(String),

    /// Dependency topological sort encountered a back-edge.
    GraphCycle(String),

    /// The parser or evaluator rejected a range expression.
    InvalidRangeExpression(String),

    /// KV-level lock acquisition failure or deadlock.
    DatabaseLocking(String),

    /// KV environment failure (open, I/O, corruption).
    DatabaseEnvironment(String),

    /// A transaction handle was used outside its registration.
    UnknownTransaction(String),

    /// The changelog disagrees with the recorded graph version.
    DatabaseVersioning(String),

    /// Forwarding-daemon framing or timeout failure.
    Mqueue(String),

    /// Write-API argument arity mismatch.
    IncorrectNumberOfArguments(String),

    /// Record encode/decode failure.
    Serialization(String),

    /// Catch-all for internal invariant violations.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NodeNotFound(s) => write!(f, "node not found: {}", s),
            Error::EdgeNotFound(s) => write!(f, "edge not found: {}", s),
            Error::KeyNotFound(s) => write!(f, "key not found: {}", s),
            Error::IncorrectNodeType(s) => write!(f, "incorrect node type: {}", s),
            Error::NodeExists(s) => write!(f, "node exists: {}", s),
            Error::InvalidEnvironment(s) => write!(f, "invalid environment: {}", s),
            Error::GraphCycle(s) => write!(f, "graph cycle: {}", s),
            Error::InvalidRangeExpression(s) => write!(f, "invalid range expression: {}", s),
            Error::DatabaseLocking(s) => write!(f, "database locking: {}", s),
            Error::DatabaseEnvironment(s) => write!(f, "database environment: {}", s),
            Error::UnknownTransaction(s) => write!(f, "unknown transaction: {}", s),
            Error::DatabaseVersioning(s) => write!(f, "database versioning: {}", s),
            Error::Mqueue(s) => write!(f, "message queue: {}", s),
            Error::IncorrectNumberOfArguments(s) => {
                write!(f, "incorrect number of arguments: {}", s)
            }
            Error::Serialization(s) => write!(f, "serialization: {}", s),
            Error::Internal(s) => write!(f, "internal: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::DatabaseEnvironment(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::InvalidRangeExpression(err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = Error::NodeNotFound("env#web1".to_string());
        assert_eq!(err.to_string(), "node not found: env#web1");

        let err = Error::IncorrectNumberOfArguments("add_host: expected 1, got 3".to_string());
        assert_eq!(
            err.to_string(),
            "incorrect number of arguments: add_host: expected 1, got 3"
        );
    }

    #[test]
    fn converts_storage_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        match Error::from(io) {
            Error::DatabaseEnvironment(msg) => assert!(msg.contains("disk gone")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
