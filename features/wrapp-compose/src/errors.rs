use std::{any::Any, sync::Arc};

use thiserror::Error;

use crate::types::DynError;

/// Errors while resolving a binding or descriptor
///
/// All errors must be Clone, a single in-flight resolution is observed by every waiter.
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// The name is bound in neither the registry nor the default registry
    #[error("'{name}' is not bound{}", required_by_suffix(required_by))]
    UnresolvedDependency {
        name: String,
        required_by: Option<String>,
    },

    /// A name re-entered its own chain of in-flight resolutions
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    /// A user supplied provider or transform failed
    #[error("Provider for '{name}' failed - error: {source}")]
    Provider {
        name: String,
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// The blocking bridge was used while a resolution is running on this thread
    #[error("Blocking resolution requested from within a running async context")]
    BlockingBridgeMisuse,

    /// More than one branch of a concurrent group failed
    #[error("{} concurrent branches failed: [{}]", .0.len(), join_errors(.0))]
    Group(Vec<ResolveError>),

    /// The resolution of the name was cancelled before it completed
    #[error("Resolution of '{name}' was cancelled")]
    Cancelled { name: String },

    /// The session has been destructed
    #[error("Session was destructed, did you try resolving after teardown?")]
    SessionClosed,

    /// Resolution timed out
    #[error("Resolution timed out")]
    Timeout,

    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },

    /// A provider asked for an argument it was not handed
    #[error("Argument '{0}' was not provided")]
    MissingArgument(String),

    /// The declared dependency names don't match the provider function's parameters
    #[error("Provider '{provider}' expects {expected} parameters but declares {received:?}")]
    Signature {
        provider: &'static str,
        expected: usize,
        received: Vec<String>,
    },

    /// Off-loading work to the blocking pool failed
    #[error("Failed to off-load blocking work: {0}")]
    Offload(String),
}

impl ResolveError {
    /// Wraps a provider failure, passing resolution errors through unmodified
    pub fn provider(name: impl Into<String>, error: DynError) -> Self {
        match error.downcast::<ResolveError>() {
            Ok(resolve_error) => *resolve_error,
            Err(error) => ResolveError::Provider {
                name: name.into(),
                source: Arc::from(error),
            },
        }
    }

    /// Collapses the errors of a concurrent group
    ///
    /// A single failure is returned as is, otherwise all causes are retained.
    pub fn group(mut errors: Vec<ResolveError>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            ResolveError::Group(errors)
        }
    }

    /// The error raised by user code, if this is a provider failure
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            ResolveError::Provider { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Downcasts the user error of a provider failure
    pub fn cause_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.cause().and_then(|cause| cause.downcast_ref::<E>())
    }
}

/// A provider or transform panicked, carried as the cause of [ResolveError::Provider]
#[derive(Error, Debug, Clone)]
#[error("panicked: {message}")]
pub struct Panicked {
    pub message: String,
}

impl Panicked {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => message.to_string(),
                Err(_) => "unknown panic payload".to_string(),
            },
        };
        Panicked { message }
    }
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(parent) => format!(" (required by '{parent}')"),
        None => String::new(),
    }
}

fn join_errors(errors: &[ResolveError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
