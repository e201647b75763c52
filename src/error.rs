//! Error types and handling for Trieste

/// Result type alias for Trieste operations
pub type Result<T> = std::result::Result<T, TriesteError>;

/// Error taxonomy of the application registry and the nexus machinery
#[derive(Debug, thiserror::Error)]
pub enum TriesteError {
    /// An app, thread or nexus name collides with an existing one
    #[error("Duplicate {kind} name: '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    /// Unknown app, thread or nexus
    #[error("{kind} not found: '{name}'")]
    NotFound { kind: &'static str, name: String },

    /// The deadline elapsed while waiting
    #[error("App '{app}': thread '{caller}' timed out waiting for {target}")]
    Timeout {
        app: String,
        caller: String,
        target: String,
    },

    /// A cycle of waiters was detected before blocking
    #[error("App '{app}': deadlock detected, thread '{caller}' waiting for '{target}' closes the chain {chain}")]
    Deadlock {
        app: String,
        caller: String,
        target: String,
        chain: String,
    },

    /// The nexus connectivity graph contains a loop of one direction
    #[error("App '{app}' has a topology loop in the {direction} nexuses: {description}")]
    TopologyCycle {
        app: String,
        direction: &'static str,
        description: String,
    },

    /// The application has been aborted
    #[error("App '{app}' has been aborted by thread '{by}': {message}")]
    Aborted {
        app: String,
        by: String,
        message: String,
    },

    /// A second definition of a nexus disagrees with the first one
    #[error("Nexus '{nexus}' schema mismatch: {message}")]
    SchemaMismatch { nexus: String, message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// The call is not allowed in the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// A harvested thread failed to join cleanly
    #[error("Join of thread '{thread}' failed: {message}")]
    Join { thread: String, message: String },

    /// Serialization/deserialization errors of tray payloads
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Readiness notification failures
    #[error("Notification error: {message}")]
    Notification { message: String },
}

impl TriesteError {
    /// Create a duplicate name error
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(
        app: impl Into<String>,
        caller: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::Timeout {
            app: app.into(),
            caller: caller.into(),
            target: target.into(),
        }
    }

    /// Create an aborted error
    pub fn aborted(
        app: impl Into<String>,
        by: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Aborted {
            app: app.into(),
            by: by.into(),
            message: message.into(),
        }
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(nexus: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            nexus: nexus.into(),
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a join error
    pub fn join(thread: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Join {
            thread: thread.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a notification error
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    /// Timeouts and aborts mean the application will not finish starting;
    /// retrying the call cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Aborted { .. })
    }
}

impl From<bincode::Error> for TriesteError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(format!("Bincode error: {}", err))
    }
}
