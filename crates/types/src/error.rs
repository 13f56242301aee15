use thiserror::Error;

/// Error kinds surfaced by kernel, driver and file-system operations.
///
/// These are deliberately coarse: user programs see them as a status code
/// plus a per-thread last-error, and kernel callers usually only branch on
/// the kind. Anything finer-grained (which sector, which name) travels in
/// debug output instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    #[error("already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("busy")]
    Busy,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("out of space")]
    OutOfSpace,
    #[error("I/O error")]
    IoError,
    #[error("not owner")]
    NotOwner,
    #[error("not empty")]
    NotEmpty,
    #[error("internal invariant violated")]
    InternalInvariant,
}

pub type SysResult<T> = Result<T, SysError>;
