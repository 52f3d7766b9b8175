use std::fmt::Debug;

use uuid::Uuid;

/// Source of opaque random identifiers.
pub trait IdGenerator: Debug + Send + Sync + 'static {
    /// Returns a new identifier.
    fn generate(&self) -> String;
}

/// Generates lower-case UUID v4 strings without hyphens.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Execution context propagated with published messages.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TraceContext {
    trace_id: String,
}

impl TraceContext {
    /// Wraps an existing trace id.
    #[must_use]
    pub fn new<S>(trace_id: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            trace_id: trace_id.into(),
        }
    }

    /// Starts a new trace using the given generator.
    #[must_use]
    pub fn generate(ids: &dyn IdGenerator) -> Self {
        Self::new(ids.generate())
    }

    /// Context without a trace id.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The trace id (empty if absent).
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}
