use std::fmt;

use uuid::Uuid;

/// Per-call context threaded through every component of a token acquisition
///
/// The correlation ID is sent to the authority with each request and recorded
/// on every span, tying client and server logs together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallState {
    correlation_id: Uuid,
}

impl Default for CallState {
    fn default() -> Self {
        Self::new()
    }
}

impl CallState {
    /// A call state with a fresh random correlation ID
    #[must_use]
    pub fn new() -> Self {
        Self::with_correlation_id(Uuid::new_v4())
    }

    /// A call state with a caller-chosen correlation ID
    #[must_use]
    pub fn with_correlation_id(correlation_id: Uuid) -> Self {
        Self { correlation_id }
    }

    /// The correlation ID
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.correlation_id, f)
    }
}
