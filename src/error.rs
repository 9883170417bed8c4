// Error taxonomy for the backend gateway surface.
// Nothing here is fatal to the process: every failure degrades to
// "no update this cycle" for the affected entity or category.

/// Errors surfaced by backend gateway calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The entity was destroyed between listing and lookup. Treated as
    /// absent by the reconciler, never surfaced to callers as a failure.
    #[error("entity not found")]
    NotFound,

    /// The backend connection is not usable right now.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Any other backend API failure.
    #[error("backend call failed: {0}")]
    Api(String),
}

pub type BackendResult<T> = Result<T, BackendError>;
