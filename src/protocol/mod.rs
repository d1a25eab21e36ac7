//! Wire-level building blocks: the message envelope and target routing.

pub mod envelope;
pub mod target;

pub use envelope::{MessageEnvelope, kind};
pub use target::{Subject, SubjectClass, Target, agent_inbox, parse_target, subject_for};
