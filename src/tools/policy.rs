//! Layered allow/deny tool policy.
//!
//! Three layers compose left-to-right: Global → Agent → Binding. Deny
//! always wins. `"*"` in an allow list means every tool; an effective
//! allow set that ends up empty permits nothing. Group aliases
//! (`group:fs_read` → member tools) expand before evaluation. Lower
//! layers may only narrow: a layer's allow list replaces a wildcard base
//! or intersects a named one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::registry::ToolRegistry;
use super::traits::{ToolEntry, ToolSource};

// ─── Layers ───────────────────────────────────────────────────────────────────

/// One layer's lists. `allow: None` means "no opinion" (inherit).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyLayer {
    #[serde(default)]
    pub allow: Option<Vec<String>>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PolicyLayer {
    pub fn allow_all() -> Self {
        Self {
            allow: Some(vec!["*".to_string()]),
            deny: Vec::new(),
        }
    }

    pub fn allow_only(names: &[&str]) -> Self {
        Self {
            allow: Some(names.iter().map(|s| s.to_string()).collect()),
            deny: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowSet {
    All,
    Named(HashSet<String>),
}

/// The resolved policy for one dispatch.
#[derive(Debug, Clone)]
pub struct EffectivePolicy {
    allow: AllowSet,
    deny: HashSet<String>,
}

impl EffectivePolicy {
    /// Permits nothing; the base for an unconfigured system.
    pub fn deny_all() -> Self {
        Self {
            allow: AllowSet::Named(HashSet::new()),
            deny: HashSet::new(),
        }
    }

    pub fn is_allowed(&self, tool: &str) -> bool {
        if self.deny.contains(tool) {
            return false;
        }
        match &self.allow {
            AllowSet::All => true,
            AllowSet::Named(named) => named.contains(tool),
        }
    }
}

// ─── Audit trail ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tool: String,
    pub decision: String,
    pub reason: Option<String>,
}

// ─── Engine ───────────────────────────────────────────────────────────────────

pub struct PolicyEngine {
    global: PolicyLayer,
    groups: HashMap<String, Vec<String>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl PolicyEngine {
    pub fn new(global: PolicyLayer, groups: HashMap<String, Vec<String>>) -> Self {
        Self {
            global,
            groups,
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Expand group aliases; returns the wildcard marker separately.
    fn expand(&self, names: &[String]) -> (bool, HashSet<String>) {
        let mut wildcard = false;
        let mut set = HashSet::new();
        for name in names {
            if name == "*" {
                wildcard = true;
            } else if let Some(members) = self.groups.get(name) {
                set.extend(members.iter().cloned());
            } else {
                set.insert(name.clone());
            }
        }
        (wildcard, set)
    }

    fn expand_allow(&self, names: &[String]) -> AllowSet {
        let (wildcard, set) = self.expand(names);
        if wildcard {
            AllowSet::All
        } else {
            AllowSet::Named(set)
        }
    }

    fn narrow(&self, base: AllowSet, layer: Option<&Vec<String>>) -> AllowSet {
        let Some(names) = layer else {
            return base;
        };
        match (base, self.expand_allow(names)) {
            // A wildcard base is replaced by the explicit set.
            (AllowSet::All, layer_set) => layer_set,
            // A named base can only shrink.
            (named @ AllowSet::Named(_), AllowSet::All) => named,
            (AllowSet::Named(base), AllowSet::Named(layer_set)) => {
                AllowSet::Named(base.intersection(&layer_set).cloned().collect())
            }
        }
    }

    /// Compose Global → Agent → Binding into an effective policy.
    pub fn resolve(
        &self,
        agent: Option<&PolicyLayer>,
        binding: Option<&PolicyLayer>,
    ) -> EffectivePolicy {
        let mut allow = match &self.global.allow {
            Some(names) => self.expand_allow(names),
            None => AllowSet::Named(HashSet::new()),
        };
        allow = self.narrow(allow, agent.and_then(|l| l.allow.as_ref()));
        allow = self.narrow(allow, binding.and_then(|l| l.allow.as_ref()));

        let mut deny = self.expand(&self.global.deny).1;
        if let Some(layer) = agent {
            deny.extend(self.expand(&layer.deny).1);
        }
        if let Some(layer) = binding {
            deny.extend(self.expand(&layer.deny).1);
        }

        EffectivePolicy { allow, deny }
    }

    /// The tool entries an agent may see this dispatch. MCP-sourced tools
    /// are held back behind the `use_mcp_tool` meta-tool unless pinned.
    pub fn effective_tools(
        &self,
        registry: &ToolRegistry,
        effective: &EffectivePolicy,
        mcp_pinned: &[String],
    ) -> Vec<Arc<ToolEntry>> {
        registry
            .entries()
            .into_iter()
            .filter(|entry| match entry.source {
                ToolSource::Mcp => mcp_pinned.iter().any(|p| p == entry.name()),
                _ => true,
            })
            .filter(|entry| effective.is_allowed(entry.name()))
            .collect()
    }

    pub fn log_decision(&self, tool: &str, decision: &str, reason: Option<&str>) {
        self.audit.lock().push(AuditEntry {
            timestamp: chrono::Utc::now(),
            tool: tool.to_string(),
            decision: decision.to_string(),
            reason: reason.map(str::to_string),
        });
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }
}
