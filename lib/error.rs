use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a labdock-related operation.
pub type LabdockResult<T> = Result<T, LabdockError>;

/// An error that occurred while managing sandboxes or reservations.
#[derive(Debug, Error)]
pub enum LabdockError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An error returned by the database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while running database migrations.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error returned by the container runtime.
    #[error("container runtime error: {0}")]
    ContainerRuntime(#[from] bollard::errors::Error),

    /// The container runtime could not be reached. Every operation fails fast
    /// while the manager is in this state; there is no reconnect loop.
    #[error("container runtime unavailable")]
    RuntimeUnavailable,

    /// No sandbox exists for the given user or identifier.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// No user exists with the given id.
    #[error("user not found: {0}")]
    UserNotFound(i64),

    /// A requested resource profile exceeds the configured caps or is
    /// internally inconsistent. Rejected before any runtime call is made.
    #[error("resource limit violation: {0}")]
    ResourceLimitExceeded(String),

    /// A reservation failed validation.
    #[error("invalid reservation: {0}")]
    InvalidReservation(String),

    /// Provisioning failed partway; the runtime side has been cleaned up.
    #[error("provisioning failed: {0}")]
    ProvisionFailed(String),

    /// The daemon reported an error while building an image.
    #[error("image build failed: {0}")]
    ImageBuildFailed(String),

    /// An unknown sandbox status string was read back from the store.
    #[error("unknown sandbox status: {0}")]
    UnknownSandboxStatus(String),

    /// An unknown user role string was read back from the store.
    #[error("unknown user role: {0}")]
    UnknownUserRole(String),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LabdockError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> LabdockError {
        LabdockError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `LabdockResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> LabdockResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
