//! Binding resolution: routing an inbound channel message to an agent.
//!
//! A binding optionally filters on peer (sender ID), channel, team, and
//! account, and names the agent that handles matching traffic. Resolution
//! scores every matching binding — `priority + 4·peer + 2·team +
//! 2·account-present + 1·channel` — and the highest score wins, ties
//! broken by registration order. The binding whose channel is
//! `"default"` is the fallback when nothing matches.

use serde::{Deserialize, Serialize};

use crate::tools::PolicyLayer;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Binding {
    /// Sender ID filter.
    #[serde(default)]
    pub peer: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub priority: i64,
    /// Binding-level tool policy (may only narrow the agent's).
    #[serde(default)]
    pub tools: Option<PolicyLayer>,
}

/// The attributes of an inbound message that bindings match on.
#[derive(Debug, Clone, Default)]
pub struct BindingQuery {
    pub peer: Option<String>,
    pub channel: Option<String>,
    pub team: Option<String>,
    pub account: Option<String>,
}

/// A resolved binding plus its registration index (stable handle).
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub index: usize,
    pub binding: Binding,
    pub score: i64,
}

pub struct BindingRegistry {
    bindings: Vec<Binding>,
}

impl BindingRegistry {
    pub fn new(bindings: Vec<Binding>) -> Self {
        Self { bindings }
    }

    pub fn get(&self, index: usize) -> Option<&Binding> {
        self.bindings.get(index)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Score one binding against a query. `None` when a set filter
    /// contradicts the query.
    fn score(binding: &Binding, query: &BindingQuery) -> Option<i64> {
        let mut score = binding.priority;

        match (&binding.peer, &query.peer) {
            (Some(expected), Some(actual)) if expected == actual => score += 4,
            (Some(_), _) => return None,
            (None, _) => {}
        }
        match (&binding.team, &query.team) {
            (Some(expected), Some(actual)) if expected == actual => score += 2,
            (Some(_), _) => return None,
            (None, _) => {}
        }
        if binding.account.is_some() {
            match (&binding.account, &query.account) {
                (Some(expected), Some(actual)) if expected == actual => score += 2,
                _ => return None,
            }
        }
        match (&binding.channel, &query.channel) {
            (Some(expected), Some(actual)) if expected == actual => score += 1,
            // The "default" channel binding matches anything as fallback
            // but earns no channel points.
            (Some(expected), _) if expected == "default" => {}
            (Some(_), _) => return None,
            (None, _) => {}
        }

        Some(score)
    }

    /// Resolve the best binding for a query.
    pub fn resolve(&self, query: &BindingQuery) -> Option<ResolvedBinding> {
        let mut best: Option<ResolvedBinding> = None;
        for (index, binding) in self.bindings.iter().enumerate() {
            // Hold the fallback out of normal scoring.
            if binding.channel.as_deref() == Some("default") {
                continue;
            }
            if let Some(score) = Self::score(binding, query) {
                let better = match &best {
                    Some(current) => score > current.score,
                    None => true,
                };
                if better {
                    best = Some(ResolvedBinding {
                        index,
                        binding: binding.clone(),
                        score,
                    });
                }
            }
        }

        best.or_else(|| {
            self.bindings
                .iter()
                .enumerate()
                .find(|(_, b)| b.channel.as_deref() == Some("default"))
                .map(|(index, binding)| ResolvedBinding {
                    index,
                    binding: binding.clone(),
                    score: binding.priority,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(agent: &str) -> Binding {
        Binding {
            agent_id: agent.to_string(),
            ..Binding::default()
        }
    }

    fn query(peer: Option<&str>, channel: Option<&str>) -> BindingQuery {
        BindingQuery {
            peer: peer.map(str::to_string),
            channel: channel.map(str::to_string),
            team: None,
            account: None,
        }
    }

    #[test]
    fn peer_match_outscores_channel_match() {
        let registry = BindingRegistry::new(vec![
            Binding {
                channel: Some("telegram".into()),
                ..binding("channel-agent")
            },
            Binding {
                peer: Some("alice".into()),
                ..binding("peer-agent")
            },
        ]);
        let resolved = registry
            .resolve(&query(Some("alice"), Some("telegram")))
            .unwrap();
        assert_eq!(resolved.binding.agent_id, "peer-agent");
        assert_eq!(resolved.score, 4);
    }

    #[test]
    fn priority_adds_to_score() {
        let registry = BindingRegistry::new(vec![
            Binding {
                peer: Some("alice".into()),
                ..binding("low")
            },
            Binding {
                channel: Some("ws".into()),
                priority: 10,
                ..binding("high")
            },
        ]);
        let resolved = registry.resolve(&query(Some("alice"), Some("ws"))).unwrap();
        assert_eq!(resolved.binding.agent_id, "high", "10+1 beats 0+4");
    }

    #[test]
    fn mismatched_filter_disqualifies() {
        let registry = BindingRegistry::new(vec![Binding {
            peer: Some("bob".into()),
            ..binding("bob-agent")
        }]);
        assert!(registry.resolve(&query(Some("alice"), None)).is_none());
    }

    #[test]
    fn ties_break_by_registration_order() {
        let registry = BindingRegistry::new(vec![
            Binding {
                channel: Some("ws".into()),
                ..binding("first")
            },
            Binding {
                channel: Some("ws".into()),
                ..binding("second")
            },
        ]);
        let resolved = registry.resolve(&query(None, Some("ws"))).unwrap();
        assert_eq!(resolved.binding.agent_id, "first");
    }

    #[test]
    fn default_channel_is_the_fallback() {
        let registry = BindingRegistry::new(vec![
            Binding {
                channel: Some("default".into()),
                ..binding("fallback")
            },
            Binding {
                peer: Some("alice".into()),
                ..binding("alice-agent")
            },
        ]);
        // Nothing matches bob, so the fallback takes it.
        let resolved = registry.resolve(&query(Some("bob"), Some("ws")));
        assert!(resolved.is_none(), "peer filter disqualifies; no other candidate");

        let resolved = registry.resolve(&query(None, Some("ws"))).unwrap();
        assert_eq!(resolved.binding.agent_id, "fallback");
    }

    #[test]
    fn account_present_scores_two() {
        let registry = BindingRegistry::new(vec![
            Binding {
                channel: Some("ws".into()),
                ..binding("plain")
            },
            Binding {
                channel: Some("ws".into()),
                account: Some("acme".into()),
                ..binding("with-account")
            },
        ]);
        let q = BindingQuery {
            peer: None,
            channel: Some("ws".into()),
            team: None,
            account: Some("acme".into()),
        };
        let resolved = registry.resolve(&q).unwrap();
        assert_eq!(resolved.binding.agent_id, "with-account");
        assert_eq!(resolved.score, 3);
    }
}
