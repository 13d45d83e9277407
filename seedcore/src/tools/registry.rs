//! Tool Registry (C7): built-in and MCP-discovered tool definitions, with
//! conflict resolution when two sources register the same name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a tool definition came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolOrigin {
    BuiltIn,
    Mcp { server_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExample {
    pub name: String,
    pub input: Value,
    pub expected_output: String,
}

/// A single tool's definition: name, schema, and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub requires_confirmation: bool,
    pub category: Option<String>,
    pub examples: Vec<ToolExample>,
    pub origin: ToolOrigin,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, origin: ToolOrigin) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Value::Object(Default::default()),
            requires_confirmation: false,
            category: None,
            examples: Vec::new(),
            origin,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn requires_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_example(mut self, example: ToolExample) -> Self {
        self.examples.push(example);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_built_in(&self) -> bool {
        matches!(self.origin, ToolOrigin::BuiltIn)
    }
}

pub type ToolHandler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A name collision observed at registration time: `winner` is what the
/// registry kept, `shadowed` is what lost.
#[derive(Debug, Clone)]
pub struct ToolConflict {
    pub name: String,
    pub winner: ToolOrigin,
    pub shadowed: ToolOrigin,
}

/// Holds every known tool and its handler. Built-in tools always win a name
/// collision against an MCP-discovered tool; among MCP servers, the first to
/// register a name wins (mirroring first-match-wins server lookup).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, ToolHandler)>,
    conflicts: Vec<ToolConflict>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, resolving a name conflict per the precedence rule.
    /// Returns `true` if the tool was installed (no conflict, or it won
    /// one), `false` if it lost and was shadowed.
    pub fn register(&mut self, tool: ToolDefinition, handler: ToolHandler) -> bool {
        match self.tools.get(&tool.name) {
            Some((existing, _)) if existing.is_built_in() && !tool.is_built_in() => {
                self.conflicts.push(ToolConflict {
                    name: tool.name.clone(),
                    winner: existing.origin.clone(),
                    shadowed: tool.origin.clone(),
                });
                false
            }
            Some((existing, _)) if !existing.is_built_in() && tool.is_built_in() => {
                self.conflicts.push(ToolConflict {
                    name: tool.name.clone(),
                    winner: tool.origin.clone(),
                    shadowed: existing.origin.clone(),
                });
                self.tools.insert(tool.name.clone(), (tool, handler));
                true
            }
            Some((existing, _)) => {
                // Same kind of origin already present (built-in vs built-in,
                // or MCP vs MCP): first registration wins.
                self.conflicts.push(ToolConflict {
                    name: tool.name.clone(),
                    winner: existing.origin.clone(),
                    shadowed: tool.origin.clone(),
                });
                false
            }
            None => {
                self.tools.insert(tool.name.clone(), (tool, handler));
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|(def, _)| def)
    }

    pub fn tools(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|(def, _)| def).collect()
    }

    pub fn tools_by_category(&self, category: &str) -> Vec<&ToolDefinition> {
        self.tools()
            .into_iter()
            .filter(|t| t.category.as_deref() == Some(category))
            .collect()
    }

    pub fn conflicts(&self) -> &[ToolConflict] {
        &self.conflicts
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Invoke a tool's handler. Timeout enforcement is the caller's job
    /// (`tokio::time::timeout` wrapping this call), since this method is
    /// synchronous and handlers are plain functions, not futures.
    pub fn execute(&self, name: &str, input: Value) -> Result<Value> {
        let (_, handler) = self
            .tools
            .get(name)
            .ok_or_else(|| crate::error::Error::tool(name, "tool not found", false))?;
        handler(input)
    }

    pub fn export_schema(&self) -> Value {
        Value::Array(
            self.tools()
                .into_iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ToolHandler {
        Arc::new(|input| Ok(input))
    }

    #[test]
    fn built_in_shadows_mcp_tool_of_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new("search", "built-in search", ToolOrigin::BuiltIn),
            handler(),
        );
        let installed = registry.register(
            ToolDefinition::new(
                "search",
                "mcp search",
                ToolOrigin::Mcp {
                    server_name: "srv1".to_string(),
                },
            ),
            handler(),
        );
        assert!(!installed);
        assert_eq!(registry.get("search").unwrap().description, "built-in search");
        assert_eq!(registry.conflicts().len(), 1);
    }

    #[test]
    fn mcp_tool_registered_before_built_in_is_shadowed_afterward() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new(
                "search",
                "mcp search",
                ToolOrigin::Mcp {
                    server_name: "srv1".to_string(),
                },
            ),
            handler(),
        );
        let installed = registry.register(
            ToolDefinition::new("search", "built-in search", ToolOrigin::BuiltIn),
            handler(),
        );
        assert!(installed);
        assert_eq!(registry.get("search").unwrap().description, "built-in search");
    }

    #[test]
    fn first_mcp_server_wins_among_peers() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new(
                "search",
                "from srv1",
                ToolOrigin::Mcp {
                    server_name: "srv1".to_string(),
                },
            ),
            handler(),
        );
        let installed = registry.register(
            ToolDefinition::new(
                "search",
                "from srv2",
                ToolOrigin::Mcp {
                    server_name: "srv2".to_string(),
                },
            ),
            handler(),
        );
        assert!(!installed);
        assert_eq!(registry.get("search").unwrap().description, "from srv1");
    }

    #[test]
    fn execute_runs_registered_handler() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new("echo", "echoes input", ToolOrigin::BuiltIn),
            Arc::new(|input| Ok(input)),
        );
        let result = registry.execute("echo", serde_json::json!({"x": 1})).unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[test]
    fn execute_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        assert!(registry.execute("nope", Value::Null).is_err());
    }
}
