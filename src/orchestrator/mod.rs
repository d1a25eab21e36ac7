//! Cross-agent orchestration: registry, federated dispatch, the
//! push→pull event queue, and the coordination tool set.

pub mod event_queue;
pub mod registry;
pub mod remote;
pub mod tools;

pub use event_queue::AsyncEventQueue;
pub use registry::{AgentEntry, LocalAgentEntry, OrchestratorRegistry};
pub use remote::{DEFAULT_REMOTE_TIMEOUT, RemoteAgentEntry};
pub use tools::coordination_tools;
