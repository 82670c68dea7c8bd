use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, Span};

/// Context information for logging
///
/// Identifies the component (and optionally the operation) a span belongs
/// to, plus free-form fields such as the monitored target.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component that is generating the log
    pub component: String,
    /// Operation or action being performed
    pub operation: Option<String>,
    /// Additional contextual fields
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context with just the component name
    pub fn new<S: Into<String>>(component: S) -> Self {
        LogContext {
            component: component.into(),
            operation: None,
            fields: BTreeMap::new(),
        }
    }

    /// Create a new log context with component and operation
    pub fn with_operation<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        LogContext {
            component: component.into(),
            operation: Some(operation.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field to the context
    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Create a span carrying this context
    ///
    /// Span levels must be known at compile time, hence the match.
    pub fn span(&self, level: Level) -> Span {
        let operation = self.operation.as_deref().unwrap_or("-");
        let fields = self.fields_string();
        match level {
            Level::TRACE => tracing::trace_span!("callwatch", component = %self.component, operation = %operation, ctx = %fields),
            Level::DEBUG => tracing::debug_span!("callwatch", component = %self.component, operation = %operation, ctx = %fields),
            Level::INFO => tracing::info_span!("callwatch", component = %self.component, operation = %operation, ctx = %fields),
            Level::WARN => tracing::warn_span!("callwatch", component = %self.component, operation = %operation, ctx = %fields),
            Level::ERROR => tracing::error_span!("callwatch", component = %self.component, operation = %operation, ctx = %fields),
        }
    }

    fn fields_string(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;

        if let Some(op) = &self.operation {
            write!(f, "[{}]", op)?;
        }

        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }

        Ok(())
    }
}
