use {
    std::{fmt, io::Error as IoError, process::ExitStatus},
    thiserror::Error,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Timestamped wrapper around the actual error kind.
///
/// Carrying the time on the envelope rather than on every variant keeps
/// `Err` focused on what went wrong and leaves "when" to a single place.
#[derive(Debug)]
pub struct Error {
    time: i64,
    inner: Err,
}

impl Error {
    pub fn kind(&self) -> &Err {
        &self.inner
    }

    pub fn time(&self) -> i64 {
        self.time
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl<F> From<F> for Error
where
    F: Into<Err>,
{
    fn from(f: F) -> Self {
        Self {
            time: chrono::Utc::now().timestamp_nanos(),
            inner: f.into(),
        }
    }
}

/// The six error kinds pinned by the supervision contract.
#[derive(Debug, Error)]
pub enum Err {
    #[error("{}", .source)]
    Io {
        #[from]
        source: IoError,
    },
    #[error("worker failed: {}", .0)]
    Worker(#[source] Box<Error>),
    #[error("supervisor wait was interrupted")]
    Interrupted,
    #[error("child exited with non-zero status: {}", display_status(.0))]
    NonZeroExit(ExitStatus),
    #[error("child exited cleanly but produced no parseable result")]
    NoResult,
    #[error("illegal state: {}", .0)]
    IllegalState(&'static str),
}

fn display_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    }
}

impl Err {
    pub fn worker(cause: Error) -> Self {
        Self::Worker(Box::new(cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wraps_inner() {
        let e: Error = Err::NoResult.into();
        assert_eq!(e.to_string(), "child exited cleanly but produced no parseable result");
    }

    #[test]
    fn io_error_converts() {
        let io = IoError::new(std::io::ErrorKind::Other, "boom");
        let e: Error = io.into();
        assert!(matches!(e.kind(), Err::Io { .. }));
    }
}
