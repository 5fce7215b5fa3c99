//! Tool registry and dispatch.
//!
//! The registry maps a tool name plus a configuration digest to an
//! implementation, so the same tool under different configs is a distinct
//! entry. It is read-only after construction. Three build modes: stub
//! (deterministic canned data), real (fails to register when credentials
//! or dependencies are absent -- no real backends ship with the core), and
//! hybrid (real where possible, stubs elsewhere).
//!
//! Timeouts are mandatory: every dispatch runs under `tokio::time::timeout`
//! and an overrun yields `RuntimeError::Timeout` (AXON_006).

pub mod stubs;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use axon_interchange::ToolDecl;

use crate::error::{ErrorContext, RuntimeError};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ToolResult {
    pub ok: bool,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(value: serde_json::Value) -> Self {
        ToolResult {
            ok: true,
            value,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            ok: false,
            value: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: BTreeMap::new(),
        }
    }
}

/// A runtime tool implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn is_stub(&self) -> bool {
        false
    }

    async fn invoke(&self, argument: &str, config: &ToolDecl) -> ToolResult;
}

/// How the registry sources implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Stub,
    Real,
    Hybrid,
}

/// Deterministic digest of a tool configuration, used in registry keys.
pub fn config_digest(config: &ToolDecl) -> String {
    let canonical = serde_json::to_vec(config).expect("tool config serializes");
    let digest = Sha256::digest(&canonical);
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

struct Entry {
    tool: Arc<dyn Tool>,
    config: ToolDecl,
}

/// Name+config-keyed registry, read-only after construction.
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn empty() -> Self {
        ToolRegistry {
            entries: HashMap::new(),
        }
    }

    /// Build a registry covering every declared tool.
    ///
    /// Real mode fails by design: concrete backends are external
    /// collaborators, so a real registration has nothing to bind against
    /// here and reports the missing dependency instead of silently
    /// stubbing.
    pub fn from_declarations(
        declarations: &BTreeMap<String, ToolDecl>,
        mode: RegistryMode,
    ) -> Result<Self, RuntimeError> {
        let mut registry = ToolRegistry::empty();
        for (name, decl) in declarations {
            match mode {
                RegistryMode::Stub | RegistryMode::Hybrid => {
                    registry.register(stubs::stub_for(name), decl.clone());
                }
                RegistryMode::Real => {
                    return Err(RuntimeError::Runtime {
                        message: format!(
                            "no real backend available for tool '{}' (provider: {})",
                            name,
                            decl.provider.as_deref().unwrap_or("unspecified")
                        ),
                        context: ErrorContext::default(),
                    });
                }
            }
        }
        Ok(registry)
    }

    /// Register an implementation under its name and config digest.
    pub fn register(&mut self, tool: Arc<dyn Tool>, config: ToolDecl) {
        let key = format!("{}:{}", tool.name(), config_digest(&config));
        self.entries.insert(key, Entry { tool, config });
    }

    pub fn has(&self, name: &str, config: &ToolDecl) -> bool {
        self.entries
            .contains_key(&format!("{}:{}", name, config_digest(config)))
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .map(|e| e.tool.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Dispatch an invocation under the tool's mandatory timeout.
    pub async fn dispatch(
        &self,
        name: &str,
        config: &ToolDecl,
        argument: &str,
        context: ErrorContext,
    ) -> Result<ToolResult, RuntimeError> {
        let key = format!("{}:{}", name, config_digest(config));
        let entry = self.entries.get(&key).ok_or_else(|| RuntimeError::Runtime {
            message: format!(
                "tool '{}' is not registered (known: {})",
                name,
                self.tool_names().join(", ")
            ),
            context: context.clone(),
        })?;

        let timeout_ms = entry.config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

        if entry.tool.is_stub() {
            tracing::warn!(tool = name, "using stub tool; data is simulated");
        }

        let invocation = entry.tool.invoke(argument, &entry.config);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), invocation).await {
            Ok(mut result) => {
                result
                    .metadata
                    .entry("tool_name".to_string())
                    .or_insert_with(|| serde_json::json!(name));
                result
                    .metadata
                    .entry("is_stub".to_string())
                    .or_insert_with(|| serde_json::json!(entry.tool.is_stub()));
                Ok(result)
            }
            Err(_) => Err(RuntimeError::Timeout {
                timeout_ms,
                message: format!("tool '{}' exceeded its {}ms budget", name, timeout_ms),
                context,
            }),
        }
    }
}
