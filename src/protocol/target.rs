//! Target URI parsing and bus subject derivation.
//!
//! A target URI is `scheme://path`. Two schemes route: `agent://<id>` lands
//! on the agent's durable inbox workqueue, `topic://<name>` on a broadcast
//! interest stream. Everything else is rejected.

use crate::error::{Error, Result};

/// A parsed routing target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Agent(String),
    Topic(String),
}

/// Delivery semantics attached to a derived subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectClass {
    /// Durable workqueue: bounded redelivery with an ack window.
    Workqueue { max_deliver: u32, ack_wait_secs: u64 },
    /// Broadcast interest stream.
    Interest,
}

/// A derived bus subject plus its delivery class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub class: SubjectClass,
}

/// Split `scheme://path` and validate the scheme.
pub fn parse_target(uri: &str) -> Result<Target> {
    let (scheme, path) = uri
        .split_once("://")
        .ok_or_else(|| Error::InvalidTarget(uri.to_string()))?;
    if path.is_empty() {
        return Err(Error::InvalidTarget(uri.to_string()));
    }
    match scheme {
        "agent" => Ok(Target::Agent(path.to_string())),
        "topic" => Ok(Target::Topic(path.to_string())),
        _ => Err(Error::InvalidTarget(uri.to_string())),
    }
}

/// Derive the bus subject for a target URI.
pub fn subject_for(uri: &str) -> Result<Subject> {
    Ok(match parse_target(uri)? {
        Target::Agent(id) => Subject {
            name: agent_inbox(&id),
            class: SubjectClass::Workqueue {
                max_deliver: 5,
                ack_wait_secs: 30,
            },
        },
        Target::Topic(name) => Subject {
            name: format!("events.agent.{name}"),
            class: SubjectClass::Interest,
        },
    })
}

/// The inbox workqueue subject for an agent.
pub fn agent_inbox(agent_id: &str) -> String {
    format!("agent.{agent_id}.inbox")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_target_maps_to_inbox() {
        let subject = subject_for("agent://researcher").unwrap();
        assert_eq!(subject.name, "agent.researcher.inbox");
        assert!(matches!(
            subject.class,
            SubjectClass::Workqueue { max_deliver: 5, ack_wait_secs: 30 }
        ));
    }

    #[test]
    fn topic_target_maps_to_interest_stream() {
        let subject = subject_for("topic://deploys").unwrap();
        assert_eq!(subject.name, "events.agent.deploys");
        assert_eq!(subject.class, SubjectClass::Interest);
    }

    #[test]
    fn unknown_scheme_fails() {
        assert!(matches!(subject_for("mailto://x"), Err(Error::InvalidTarget(_))));
    }

    #[test]
    fn missing_scheme_fails() {
        assert!(matches!(parse_target("no-scheme"), Err(Error::InvalidTarget(_))));
    }

    #[test]
    fn empty_path_fails() {
        assert!(matches!(parse_target("agent://"), Err(Error::InvalidTarget(_))));
    }
}
