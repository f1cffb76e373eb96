//! Per-request inputs for execution.

use crate::json_ext::Object;

/// Execution-level configuration.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionConfig {
    /// Whether `@defer` and `@stream` produce incremental payloads. When
    /// disabled, deferred fragments execute inline and streams drain eagerly.
    pub incremental_delivery: bool,

    /// Maximum nesting depth of value completion before a field error is
    /// raised instead of recursing further.
    pub recursion_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            incremental_delivery: true,
            recursion_limit: 512,
        }
    }
}

/// A GraphQL request: which operation to run and with which variables.
#[derive(Clone, Debug, Default)]
pub struct Request {
    /// The name of the operation to run, required when the document contains
    /// more than one.
    pub operation_name: Option<String>,

    /// The variable values provided with the request, not yet coerced.
    pub variables: Object,

    pub config: ExecutionConfig,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variables(mut self, variables: Object) -> Self {
        self.variables = variables;
        self
    }

    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }
}
