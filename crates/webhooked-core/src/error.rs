//! Error types for webhooked-core

use thiserror::Error;

/// Result type alias for webhooked-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in webhooked-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    ConfigNotFound {
        /// Path that was searched
        path: String,
    },

    /// Failed to parse YAML configuration
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// A raw configuration value cannot be turned into a `Valuable`
    #[error("unimplemented valuable type: {found}")]
    InvalidValuable {
        /// Short description of the rejected input
        found: String,
    },

    /// No registered step carries this name
    #[error("step \"{name}\" is not a registered step")]
    UnknownStep {
        /// Requested step name
        name: String,
    },

    /// A step with the same name is already registered
    #[error("step {name} already exists")]
    DuplicateStep {
        /// Step name
        name: String,
    },

    /// A slot name is not declared by the step
    #[error("variable {slot} is not registered for {step}")]
    UnknownSlot {
        /// Step name
        step: String,
        /// Slot name
        slot: String,
    },

    /// A value was assigned to a slot of another type
    #[error("invalid type for {slot} expected {expected}, got {found}")]
    TypeMismatch {
        /// Slot name
        slot: String,
        /// Declared slot type
        expected: String,
        /// Type of the rejected value
        found: String,
    },

    /// A step could not read one of its inputs
    #[error("missing input {0}")]
    MissingInput(String),

    /// Step-internal failure
    #[error("step error in '{step}': {message}")]
    StepFailed {
        /// Step name
        step: String,
        /// Description of the failure
        message: String,
    },

    /// The validation pipeline aborted on a failing step
    #[error("pipeline failed at step '{step}': {message}")]
    PipelineFailed {
        /// Identifier of the failing step
        step: String,
        /// Error reported by the step
        message: String,
    },

    /// The validation pipeline ran but its verdict was negative
    #[error("security check failed")]
    SecurityFailed,

    /// No webhook spec matches the request
    #[error("spec not found")]
    SpecNotFound,

    /// The inbound request carries no body
    #[error("request body is missing")]
    RequestBodyMissing,

    /// The formatter was asked to render without a template
    #[error("no template defined")]
    NoTemplate,

    /// Template could not be parsed
    #[error("error in your template: {0}")]
    TemplateSyntax(String),

    /// Template failed during evaluation
    #[error("error while filling your template: {0}")]
    TemplateRender(String),

    /// Template rendered to the missing-value placeholder
    #[error("template cannot be rendered, check your template")]
    TemplateUnrendered,

    /// Sink error
    #[error("sink '{sink}' error: {message}")]
    SinkError {
        /// Name of the sink
        sink: String,
        /// Description of the error
        message: String,
    },

    /// The transport reported a closed connection
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The bounded publish loop gave up
    #[error("max attempts reached ({attempts}) while publishing to '{sink}'")]
    MaxAttemptsReached {
        /// Name of the sink
        sink: String,
        /// Number of attempts made
        attempts: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::ConfigInvalid`] from any message
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Build a [`Error::SinkError`]
    pub fn sink(sink: impl Into<String>, message: impl ToString) -> Self {
        Self::SinkError {
            sink: sink.into(),
            message: message.to_string(),
        }
    }
}
