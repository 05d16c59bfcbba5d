//! Error handling for topology, affinity and locality queries.

use std::io;
use std::result;

/// A specialized `Result` type for NUMA operations.
pub type Result<T> = result::Result<T, Error>;

/// Errors that can occur while querying or changing NUMA state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operating system query failed.
    ///
    /// Carries the name of the failing call together with the
    /// platform-reported error code and message.
    #[error("{call} failed (os error {code}): {message}")]
    PlatformQuery {
        /// The OS call that reported the failure.
        call: &'static str,
        /// Platform error code (`errno` or `GetLastError`).
        code: i32,
        /// Platform error message.
        message: String,
    },

    /// The topology catalog contains no node with an active processor.
    #[error("no NUMA node with an active processor was discovered")]
    NoNodes,

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No native backend exists for this platform.
    #[error("NUMA queries are not supported on this platform")]
    Unsupported,

    /// A unit of work reported a failure.
    #[error("workload failed: {0}")]
    Workload(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build a [`Error::PlatformQuery`] from the calling thread's last OS error.
    pub fn last_os_error(call: &'static str) -> Error {
        Error::from_os_error(call, &io::Error::last_os_error())
    }

    /// Build a [`Error::PlatformQuery`] from an OS error value.
    pub fn from_os_error(call: &'static str, err: &io::Error) -> Error {
        Error::PlatformQuery {
            call,
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }

    /// Build a [`Error::PlatformQuery`] from a raw error code.
    pub fn from_code(call: &'static str, code: i32) -> Error {
        Error::from_os_error(call, &io::Error::from_raw_os_error(code))
    }

    /// Returns `true` if this error came from a failed OS query.
    pub fn is_platform_query(&self) -> bool {
        matches!(self, Error::PlatformQuery { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_query_carries_code() {
        let err = Error::from_code("sched_setaffinity", 22);
        match &err {
            Error::PlatformQuery { call, code, message } => {
                assert_eq!(*call, "sched_setaffinity");
                assert_eq!(*code, 22);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_platform_query());
        assert!(err.to_string().starts_with("sched_setaffinity failed (os error 22)"));
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "cpulist").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_platform_query());
    }
}
