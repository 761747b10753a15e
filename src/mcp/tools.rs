//! Per-request tool set offered to the model.
//!
//! Tools are namespaced by server id: `<server>__<tool>`, sanitized for
//! function-calling APIs (e.g. `time__now`, `search__web_search`). The set
//! keeps a route from every namespaced name back to the server and the
//! server's own tool name.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::warn;

use crate::mcp::types::ToolDescriptor;

/// Where a namespaced tool name is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRoute {
    pub server_id: String,
    pub tool_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: Vec<(String, ToolDescriptor)>,
    routes: HashMap<String, ToolRoute>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tool` from `server_id`, returning its namespaced name.
    ///
    /// A name that sanitizes onto an existing entry is skipped.
    pub fn insert(&mut self, server_id: &str, tool: ToolDescriptor) -> Option<String> {
        let namespaced = sanitize_tool_name(&format!("{server_id}__{}", tool.name));
        if self.routes.contains_key(&namespaced) {
            warn!(name: "mcp.tool.name_collision", tool = %namespaced, server_id, "Skipping tool with colliding name");
            return None;
        }

        self.routes.insert(
            namespaced.clone(),
            ToolRoute {
                server_id: server_id.to_string(),
                tool_name: tool.name.clone(),
            },
        );
        self.tools.push((namespaced.clone(), tool));
        Some(namespaced)
    }

    pub fn route(&self, namespaced: &str) -> Option<&ToolRoute> {
        self.routes.get(namespaced)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function declarations in the Chat Completions `tools` format.
    pub fn openai_tools_json(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|(name, tool)| {
                let params = tool
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));

                json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.description.as_deref().unwrap_or(""),
                        "parameters": params
                    }
                })
            })
            .collect()
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            title: None,
            description: Some(format!("{name} tool")),
            input_schema: None,
        }
    }

    #[test]
    fn sanitizes_dots_and_colons() {
        assert_eq!(sanitize_tool_name("git.hub__repo::list"), "git_hub__repo__list");
        assert_eq!(sanitize_tool_name("a-b_c9"), "a-b_c9");
    }

    #[test]
    fn routes_back_to_server_and_raw_name() {
        let mut set = ToolSet::new();
        let name = set.insert("time", tool("get.now")).unwrap();
        assert_eq!(name, "time__get_now");
        assert_eq!(
            set.route(&name),
            Some(&ToolRoute {
                server_id: "time".to_string(),
                tool_name: "get.now".to_string(),
            })
        );
    }

    #[test]
    fn colliding_names_keep_the_first() {
        let mut set = ToolSet::new();
        assert!(set.insert("s", tool("a.b")).is_some());
        assert!(set.insert("s", tool("a:b")).is_none());
        assert_eq!(set.len(), 1);
        assert_eq!(set.route("s__a_b").unwrap().tool_name, "a.b");
    }

    #[test]
    fn declarations_default_missing_schema() {
        let mut set = ToolSet::new();
        set.insert("time", tool("now"));
        let decls = set.openai_tools_json();
        assert_eq!(decls[0]["function"]["name"], "time__now");
        assert_eq!(decls[0]["function"]["parameters"]["type"], "object");
        assert_eq!(decls[0]["function"]["description"], "now tool");
    }
}
