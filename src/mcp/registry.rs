use crate::mcp::catalog::{ServerToolSet, ToolDescriptor, ToolSource};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

/// A tool implemented in-process and exposed next to the remote ones.
#[async_trait]
pub trait NativeTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> serde_json::Value;
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// Shared mapping from server (or plugin) name to its current tool set.
///
/// Each server's set is swapped in with a single map insert, so readers see
/// either the previous set or the new one, never a mix. Replacing one server
/// never touches another server's entry.
#[derive(Default)]
pub struct ToolRegistry {
    sets: RwLock<BTreeMap<String, Arc<ServerToolSet>>>,
    // (plugin, tool) -> handler
    native_tools: RwLock<HashMap<(String, String), Arc<dyn NativeTool>>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("ToolRegistry")
            .field("server_count", &snapshot.len())
            .field("tool_count", &snapshot.tool_count())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `set` as the tool set of `set.server`, replacing any previous one.
    ///
    /// Namespaced names stay unique across the registry: a tool whose
    /// `server__tool` name is already taken by another entry, or repeated
    /// within `set`, is left out and logged. Returns the installed set.
    pub fn replace_server(&self, mut set: ServerToolSet) -> Arc<ServerToolSet> {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);

        let taken: HashSet<String> = sets
            .values()
            .filter(|other| other.server != set.server)
            .flat_map(|other| {
                other
                    .tools
                    .iter()
                    .map(|tool| namespaced_name(&other.server, &tool.name))
            })
            .collect();
        let mut seen = HashSet::new();
        let mut collisions = Vec::new();
        let server = set.server.clone();
        set.tools.retain(|tool| {
            let ns_name = namespaced_name(&server, &tool.name);
            if taken.contains(&ns_name) || !seen.insert(ns_name.clone()) {
                collisions.push(ns_name);
                false
            } else {
                true
            }
        });

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        set.generation = generation;
        let set = Arc::new(set);
        let previous = sets.insert(server.clone(), Arc::clone(&set));
        drop(sets);

        for ns_name in &collisions {
            tracing::warn!(
                name: "mcp.registry.name_collision",
                server = %server,
                tool = %ns_name,
                "Skipping tool whose namespaced name is already taken"
            );
        }
        tracing::debug!(
            name: "mcp.registry.replaced",
            server = %server,
            generation,
            had_previous = previous.is_some(),
            "Replaced server tool set"
        );
        set
    }

    /// Remove a server's entries, returning what was there.
    pub fn remove_server(&self, server: &str) -> Option<Arc<ServerToolSet>> {
        let removed = self
            .sets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(server);
        if removed.as_ref().is_some_and(|set| set.source == ToolSource::Native) {
            self.native_tools
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(plugin, _), _| plugin != server);
        }
        removed
    }

    pub fn get(&self, server: &str) -> Option<Arc<ServerToolSet>> {
        self.sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server)
            .cloned()
    }

    pub fn contains(&self, server: &str) -> bool {
        self.get(server).is_some()
    }

    /// Consistent view of every server's current tool set.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            sets: self
                .sets
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Register a local plugin as one more entry of the registry.
    ///
    /// Its tools are addressed exactly like remote ones: `plugin__tool`.
    pub fn register_native_plugin(&self, plugin: &str, tools: Vec<Arc<dyn NativeTool>>) {
        let descriptors = tools
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.schema(),
            })
            .collect();

        {
            let mut handlers = self
                .native_tools
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            handlers.retain(|(owner, _), _| owner != plugin);
            for tool in tools {
                handlers.insert((plugin.to_string(), tool.name().to_string()), tool);
            }
        }

        self.replace_server(ServerToolSet::new(plugin, ToolSource::Native, descriptors));
    }

    pub fn native_tool(&self, plugin: &str, tool: &str) -> Option<Arc<dyn NativeTool>> {
        self.native_tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(plugin.to_string(), tool.to_string()))
            .cloned()
    }
}

/// A tool addressed by its namespaced name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTool {
    pub server: String,
    pub tool: String,
    pub source: ToolSource,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    sets: BTreeMap<String, Arc<ServerToolSet>>,
}

impl RegistrySnapshot {
    pub fn servers(&self) -> impl Iterator<Item = &ServerToolSet> {
        self.sets.values().map(AsRef::as_ref)
    }

    pub fn get(&self, server: &str) -> Option<&ServerToolSet> {
        self.sets.get(server).map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn tool_count(&self) -> usize {
        self.sets.values().map(|set| set.len()).sum()
    }

    /// Every tool as `(namespaced_name, owning set, descriptor)`.
    pub fn tools(&self) -> impl Iterator<Item = (String, &ServerToolSet, &ToolDescriptor)> {
        self.servers().flat_map(|set| {
            set.tools
                .iter()
                .map(move |tool| (namespaced_name(&set.server, &tool.name), set, tool))
        })
    }

    /// Look up a namespaced tool, e.g. `time__now`.
    pub fn resolve(&self, namespaced_tool: &str) -> Option<ResolvedTool> {
        self.tools()
            .find(|(ns_name, _, _)| ns_name == namespaced_tool)
            .map(|(_, set, tool)| ResolvedTool {
                server: set.server.clone(),
                tool: tool.name.clone(),
                source: set.source,
            })
    }

    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.tools()
            .map(|(ns_name, _, t)| {
                let params = if t.input_schema.is_object() {
                    t.input_schema.clone()
                } else {
                    serde_json::json!({"type":"object","properties":{}})
                };

                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": ns_name,
                        "description": t.description,
                        "parameters": params
                    }
                })
            })
            .collect()
    }
}

/// Namespaced tool name, e.g. `time__now`.
pub fn namespaced_name(server: &str, tool: &str) -> String {
    sanitize_tool_name(&format!("{server}__{tool}"))
}

/// Sanitize tool names for `OpenAI` API compatibility.
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
    use crate::mcp::test_support::tool;

    #[derive(Debug)]
    struct Upper;

    #[async_trait]
    impl NativeTool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase a string"
        }

        fn schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }

        async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            let text = args["text"].as_str().unwrap_or_default();
            Ok(serde_json::json!(text.to_uppercase()))
        }
    }

    fn remote(server: &str, tools: &[&str]) -> ServerToolSet {
        ServerToolSet::new(
            server,
            ToolSource::Remote,
            tools.iter().map(|name| tool(name)).collect(),
        )
    }

    #[test]
    fn test_replace_is_wholesale() {
        let registry = ToolRegistry::new();
        registry.replace_server(remote("beta", &["search", "list"]));
        registry.replace_server(remote("beta", &["search"]));

        let beta = registry.get("beta").unwrap();
        assert_eq!(beta.len(), 1);
        assert!(beta.tool("list").is_none());
    }

    #[test]
    fn test_replace_leaves_other_servers_alone() {
        let registry = ToolRegistry::new();
        registry.replace_server(remote("alpha", &["a1", "a2"]));
        let alpha_before = registry.get("alpha").unwrap();

        registry.replace_server(remote("gamma", &["g1"]));

        assert!(Arc::ptr_eq(&alpha_before, &registry.get("alpha").unwrap()));
        assert_eq!(registry.snapshot().tool_count(), 3);
    }

    #[test]
    fn test_generation_increases() {
        let registry = ToolRegistry::new();
        let first = registry.replace_server(remote("alpha", &["a1"])).generation;
        let second = registry.replace_server(remote("alpha", &["a1"])).generation;
        assert!(second > first);
        assert_eq!(registry.get("alpha").unwrap().generation, second);
    }

    #[test]
    fn test_snapshot_is_stable_across_writes() {
        let registry = ToolRegistry::new();
        registry.replace_server(remote("alpha", &["a1", "a2"]));
        let snapshot = registry.snapshot();

        registry.replace_server(remote("alpha", &["a3"]));
        registry.remove_server("alpha");

        assert_eq!(snapshot.get("alpha").unwrap().len(), 2);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_resolve_namespaced_tool() {
        let registry = ToolRegistry::new();
        registry.replace_server(remote("time", &["now"]));
        registry.replace_server(remote("web.search", &["query"]));

        let snapshot = registry.snapshot();
        let resolved = snapshot.resolve("time__now").unwrap();
        assert_eq!(resolved.server, "time");
        assert_eq!(resolved.tool, "now");
        assert_eq!(resolved.source, ToolSource::Remote);

        let sanitized = snapshot.resolve("web_search__query").unwrap();
        assert_eq!(sanitized.server, "web.search");
        assert!(snapshot.resolve("time__later").is_none());
    }

    #[test]
    fn test_openai_tools_json_shape() {
        let registry = ToolRegistry::new();
        registry.replace_server(remote("time", &["now"]));

        let tools = registry.snapshot().openai_tools_json();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "time__now");
        assert_eq!(tools[0]["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn test_native_plugin_is_registry_entry() {
        let registry = ToolRegistry::new();
        registry.register_native_plugin("text", vec![Arc::new(Upper)]);

        let snapshot = registry.snapshot();
        let resolved = snapshot.resolve("text__upper").unwrap();
        assert_eq!(resolved.source, ToolSource::Native);

        let handler = registry.native_tool("text", "upper").unwrap();
        let out = handler
            .call(serde_json::json!({ "text": "hi" }))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("HI"));

        registry.remove_server("text");
        assert!(registry.native_tool("text", "upper").is_none());
    }

    #[test]
    fn test_colliding_namespaced_names_are_skipped() {
        let registry = ToolRegistry::new();
        registry.replace_server(remote("a", &["b__c", "d"]));
        let installed = registry.replace_server(remote("a__b", &["c", "e"]));
        registry.replace_server(remote("web.search", &["query"]));
        registry.replace_server(remote("web_search", &["query", "list"]));

        assert_eq!(installed.len(), 1);
        assert!(installed.tool("c").is_none());

        let snapshot = registry.snapshot();
        let names: Vec<String> = snapshot.tools().map(|(ns, _, _)| ns).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(names.len(), unique.len());

        let resolved = snapshot.resolve("a__b__c").unwrap();
        assert_eq!(resolved.server, "a");
        assert_eq!(resolved.tool, "b__c");
        assert_eq!(snapshot.resolve("web_search__query").unwrap().server, "web.search");
        assert_eq!(snapshot.resolve("web_search__list").unwrap().server, "web_search");
        assert_eq!(snapshot.openai_tools_json().len(), names.len());
    }

    #[test]
    fn test_resync_of_same_server_keeps_its_names() {
        let registry = ToolRegistry::new();
        registry.replace_server(remote("alpha", &["a1", "a2"]));
        let installed = registry.replace_server(remote("alpha", &["a1", "a2", "a1"]));
        assert_eq!(installed.len(), 2);
    }

    #[test]
    fn test_sanitize_tool_name() {
        assert_eq!(sanitize_tool_name("time::now"), "time__now");
        assert_eq!(sanitize_tool_name("a.b-c_d"), "a_b-c_d");
    }
}
