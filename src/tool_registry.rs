//! Name to handler table behind `tools/list` and `tools/call`.
//!
//! Each tool declares its argument type; the JSON schema advertised to
//! clients is generated from that type and incoming arguments are decoded
//! into it before the handler runs.

use rmcp::schemars::{self, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

/// Payload of a completed tool call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolResult {
    pub text: Option<String>,
    pub is_error: bool,
}

impl ToolResult {
    /// Success without payload
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: Some(message.into()),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for tool {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Arc<Map<String, Value>>,
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolResult>> + Send>>;
type ErasedHandler =
    Arc<dyn Fn(Value) -> std::result::Result<ToolFuture, ToolError> + Send + Sync>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ErasedHandler,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn schema_object<P: JsonSchema>() -> Map<String, Value> {
    match serde_json::to_value(schemars::schema_for!(P)) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("type".to_string(), Value::String("object".to_string()));
            map
        }
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. A second registration of the same
    /// name replaces the first.
    pub fn register<P, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        let name = name.into();
        let definition = ToolDefinition {
            name: name.clone(),
            description: description.into(),
            input_schema: Arc::new(schema_object::<P>()),
        };

        let tool = name.clone();
        let handler: ErasedHandler = Arc::new(move |arguments: Value| {
            let params: P = serde_json::from_value(arguments).map_err(|e| {
                ToolError::InvalidArguments {
                    tool: tool.clone(),
                    message: e.to_string(),
                }
            })?;
            Ok(Box::pin(handler(params)) as ToolFuture)
        });

        let registered = RegisteredTool {
            definition,
            handler,
        };
        match self.tools.iter_mut().find(|t| t.definition.name == name) {
            Some(existing) => {
                warn!("Tool '{}' registered twice, replacing", name);
                *existing = registered;
            }
            None => self.tools.push(registered),
        }
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.definition.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Decode `arguments` for `name` and run its handler.
    ///
    /// Handler failures come back as a result with `is_error` set, never as
    /// an `Err`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition.name == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        // Absent arguments mean an empty object.
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let future = (tool.handler)(arguments)?;
        debug!("Invoking tool '{}'", name);
        match future.await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Tool '{}' failed: {}", name, e);
                Ok(ToolResult::error(e.to_string()))
            }
        }
    }
}
