//! Tool descriptors and results.

use super::ToolError;
use crate::model::ToolSpec;
use futures::FutureExt;
use futures::future::BoxFuture;
use policy::{CatalogTool, ToolGroup};
use serde_json::{Map, Value, json};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a tool produced.
///
/// Expected failures are values, not errors: a tool never panics or
/// propagates an `Err` for bad input or a missing file.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Error(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Wire form: `{"success": true, ...fields}` or
    /// `{"success": false, "error": "..."}`.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Success(Value::Object(fields)) => {
                let mut payload = Map::with_capacity(fields.len() + 1);
                payload.insert("success".into(), Value::Bool(true));
                payload.extend(fields.clone());
                Value::Object(payload)
            }
            Self::Success(output) => json!({ "success": true, "output": output }),
            Self::Error(error) => json!({ "success": false, "error": error }),
        }
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

pub type ToolFuture = BoxFuture<'static, ToolOutcome>;

type Executor = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A tool the model may call: identity, group, input contract, and the
/// function that runs it.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    pub group: ToolGroup,
    pub description: String,
    pub input_schema: Value,
    execute: Executor,
}

impl ToolDescriptor {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        group: ToolGroup,
        description: impl Into<String>,
        input_schema: Value,
        execute: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutcome> + Send + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            group,
            description: description.into(),
            input_schema,
            execute: Arc::new(move |input| execute(input).boxed()),
        }
    }

    /// Set a display name different from the id.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The definition sent to the model.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.id.clone(),
            description: self.description.clone(),
            schema: self.input_schema.clone(),
        }
    }

    /// Check `input` against the input schema.
    pub fn validate(&self, input: &Value) -> Result<(), ToolError> {
        super::validate::validate_input(&self.input_schema, input)
    }

    /// Run the tool. Input is assumed to be validated.
    pub fn execute(&self, input: Value) -> ToolFuture {
        (self.execute)(input)
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("group", &self.group.id)
            .finish_non_exhaustive()
    }
}

impl CatalogTool for ToolDescriptor {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn group(&self) -> &ToolGroup {
        &self.group
    }
}
