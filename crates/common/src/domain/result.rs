use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Pipeline already exists: {0}")]
    PipelineAlreadyExists(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid thing ID: {0}")]
    InvalidThingId(String),

    #[error("Twin write failed: {0}")]
    TwinWrite(String),

    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

/// Failure to turn a thing into endpoints, a mapping or a property type.
///
/// Resolution is all-or-nothing: any of these aborts the whole lookup.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("required field '{field}' missing in {context}")]
    MissingField { field: String, context: String },

    #[error("{resource} unreachable: {source}")]
    Unreachable {
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid document at {resource}: {reason}")]
    InvalidDocument { resource: String, reason: String },

    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ResolutionError {
    pub fn missing(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn unreachable(resource: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Unreachable {
            resource: resource.into(),
            source,
        }
    }

    /// Whether retrying the same lookup later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl DomainError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Resolution(e) => e.is_transient(),
            Self::External(_) | Self::TwinWrite(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message_names_field() {
        let err = ResolutionError::missing("subprotocol", "form 0 of event 'temperature'");
        assert_eq!(
            err.to_string(),
            "required field 'subprotocol' missing in form 0 of event 'temperature'"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unreachable_is_transient() {
        let err = ResolutionError::unreachable("thing test:test", anyhow::anyhow!("timeout"));
        assert!(err.is_transient());

        let domain: DomainError = err.into();
        assert!(domain.is_transient());
    }

    #[test]
    fn test_parse_error_is_not_transient() {
        assert!(!DomainError::Parse("abc is not an integer".to_string()).is_transient());
    }
}
