use thiserror::Error;

/// Unified error type for the jobmap library
///
/// The coordinator itself has no fallible decision points once it is running,
/// so everything here comes from building or loading a configuration.
#[derive(Debug, Error)]
pub enum JobMapError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// IO errors while reading configuration files
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl JobMapError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, JobMapError>;

impl From<std::io::Error> for JobMapError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for JobMapError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for JobMapError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

/// Why a non-blocking submission was not accepted
///
/// Returned only by `JobMapHandle::try_submit`. The awaiting `submit` treats
/// both cases as a silent drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Intake queue full: capacity {capacity} reached")]
    Full { capacity: usize },

    #[error("Coordinator has shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = JobMapError::configuration_field("must be greater than 0", "intake_capacity");
        assert_eq!(err.category(), "configuration");
        if let JobMapError::Configuration { field, .. } = err {
            assert_eq!(field.as_deref(), Some("intake_capacity"));
        } else {
            panic!("Expected configuration error");
        }
    }

    #[test]
    fn test_from_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(JobMapError::from(io).category(), "io");

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            JobMapError::from(json),
            JobMapError::Serialization { ref format, .. } if format == "json"
        ));
    }

    #[test]
    fn test_submit_error_display() {
        assert_eq!(
            SubmitError::Full { capacity: 64 }.to_string(),
            "Intake queue full: capacity 64 reached"
        );
        assert_eq!(SubmitError::Closed.to_string(), "Coordinator has shut down");
    }
}
