//! Error kinds surfaced by the daemon core (see design notes on error
//! handling: every in-loop error is trapped and logged at the handler
//! boundary — none of these propagate to loop shutdown).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A wire frame failed schema validation: missing/unknown `api` or
    /// `type` tag, or a required field missing or mistyped.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The `api`/`type` tag pair does not name any known message.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A downstream event or RPC named a container uuid the registry has
    /// never seen.
    #[error("unknown container: {0}")]
    UnknownContainer(String),

    /// A downstream event named an application uuid the registry has
    /// never seen.
    #[error("unknown application: {0}")]
    UnknownApplication(String),

    /// The ACI manifest failed validation (missing required field, bad
    /// enum value, malformed isolator).
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// The resource manager could not satisfy a `run` request.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The container runtime driver failed to create, execute, or delete
    /// a container.
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),

    /// A sensor snapshot was missing required fields; the publish for
    /// that tick is suppressed.
    #[error("sensor malformed: {0}")]
    SensorMalformed(String),

    /// The DDCM policy's preconditions were not met (incomplete phase
    /// contexts, mismatched aggregation counters).
    #[error("policy precondition unmet: {0}")]
    PolicyPreconditionUnmet(String),

    /// Serialization/deserialization errors from the JSON wire codec.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors (socket, subprocess, manifest file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else — reserved for genuinely unexpected conditions, not
    /// a catch-all for the kinds above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn schema_violation(msg: impl Into<String>) -> Self {
        Self::SchemaViolation(msg.into())
    }

    pub fn unknown_message_type(msg: impl Into<String>) -> Self {
        Self::UnknownMessageType(msg.into())
    }

    pub fn unknown_container(msg: impl Into<String>) -> Self {
        Self::UnknownContainer(msg.into())
    }

    pub fn unknown_application(msg: impl Into<String>) -> Self {
        Self::UnknownApplication(msg.into())
    }

    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::ManifestInvalid(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn runtime_failure(msg: impl Into<String>) -> Self {
        Self::RuntimeFailure(msg.into())
    }

    pub fn sensor_malformed(msg: impl Into<String>) -> Self {
        Self::SensorMalformed(msg.into())
    }

    pub fn policy_precondition_unmet(msg: impl Into<String>) -> Self {
        Self::PolicyPreconditionUnmet(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// A coarse errno carried in `run` replies: 0 means success, every
    /// error kind below maps to a distinct non-zero value so a client can
    /// at least distinguish failure classes without parsing the message.
    pub fn errno(&self) -> i32 {
        match self {
            Error::SchemaViolation(_) => 1,
            Error::UnknownMessageType(_) => 2,
            Error::UnknownContainer(_) => 3,
            Error::UnknownApplication(_) => 4,
            Error::ManifestInvalid(_) => 5,
            Error::ResourceExhausted(_) => 6,
            Error::RuntimeFailure(_) => 7,
            Error::SensorMalformed(_) => 8,
            Error::PolicyPreconditionUnmet(_) => 9,
            Error::Serialization(_) => 10,
            Error::Io(_) => 11,
            Error::Internal(_) => 127,
        }
    }
}
