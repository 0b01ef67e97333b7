//! Error types for relmap operations.

use std::fmt;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed caller input (unknown property, wrong value type, read-only write)
    InvalidArgument(String),
    /// A value could not be converted between adapter and entity representation
    Mapping(MappingError),
    /// Illegal query construction or a violated execution precondition
    Query(QueryError),
    /// Persistence-level failure, usually wrapping the error that caused it
    Repository(RepositoryError),
    /// Entity failed validation before a write
    Validation(ValidationError),
    /// Failure raised by an adapter implementation
    Adapter(AdapterError),
    /// Invalid entity or association definition
    Definition(String),
}

#[derive(Debug)]
pub struct MappingError {
    pub entity: Option<String>,
    pub property: Option<String>,
    pub message: String,
}

impl MappingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            entity: None,
            property: None,
            message: message.into(),
        }
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub query: Option<&'static str>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Property unknown, computed or an association where a column is required
    Property,
    /// Order direction other than asc/desc
    Direction,
    /// Adapter not registered or entity without adapter
    Adapter,
    /// Caching requested without a cache backend
    Cache,
    /// Query shape not allowed (e.g. delete without conditions)
    Precondition,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            query: None,
            message: message.into(),
        }
    }

    pub fn query(mut self, name: &'static str) -> Self {
        self.query = Some(name);
        self
    }
}

#[derive(Debug)]
pub struct RepositoryError {
    pub entity: String,
    pub message: String,
    pub source: Option<Box<Error>>,
}

impl RepositoryError {
    pub fn new(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

#[derive(Debug)]
pub struct AdapterError {
    pub adapter: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AdapterError {
    pub fn new(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            message: message.into(),
            source: None,
        }
    }
}

/// Validation failures collected for a single entity.
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    /// Entity the errors belong to
    pub entity: String,
    /// One entry per failed rule
    pub errors: Vec<FieldValidationError>,
}

/// A single failed rule.
#[derive(Debug, Clone)]
pub struct FieldValidationError {
    /// Property name, or "_entity" for entity-level rules
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// The type of rule that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    Required,
    Pattern,
    MinLength,
    MaxLength,
    Min,
    Max,
    Custom,
}

impl ValidationError {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            errors: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    /// Errors reported for one property.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldValidationError> {
        self.errors.iter().filter(move |e| e.field == field)
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl Error {
    /// Shorthand for a property-level query error.
    pub fn query_property(message: impl Into<String>) -> Self {
        Error::Query(QueryError::new(QueryErrorKind::Property, message))
    }

    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError::new(kind, message))
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Error::Mapping(MappingError::new(message))
    }

    pub fn adapter(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Adapter(AdapterError::new(adapter, message))
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Error::Query(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Error::Mapping(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Mapping(e) => match (&e.entity, &e.property) {
                (Some(entity), Some(property)) => write!(
                    f,
                    "Mapping error on {}.{}: {}",
                    entity, property, e.message
                ),
                (Some(entity), None) => write!(f, "Mapping error on {}: {}", entity, e.message),
                _ => write!(f, "Mapping error: {}", e.message),
            },
            Error::Query(e) => {
                if let Some(query) = e.query {
                    write!(f, "Query error in {}: {}", query, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Repository(e) => write!(f, "Repository error on {}: {}", e.entity, e.message),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Adapter(e) => write!(f, "Adapter '{}' error: {}", e.adapter, e.message),
            Error::Definition(msg) => write!(f, "Definition error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Repository(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Adapter(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "{} is invalid", self.entity);
        }
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{} is invalid ({})", self.entity, messages.join("; "))
    }
}

impl std::error::Error for ValidationError {}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        Error::Repository(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<AdapterError> for Error {
    fn from(err: AdapterError) -> Self {
        Error::Adapter(err)
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;
