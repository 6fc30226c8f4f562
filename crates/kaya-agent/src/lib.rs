//! Action interpretation engine: descriptors, authorization policy, the
//! handler registry, and the orchestrator that turns model output into an
//! authorized, chained, recoverable sequence of side effects.

pub mod actions;
pub mod context;
pub mod descriptor;
pub mod orchestrator;
pub mod policy;
pub mod registry;

pub use context::{resolve_output_refs, resolve_value_refs, ExecutionContext};
pub use descriptor::{
    parse_action_value, ActionDescriptor, ActionKind, ArchiveKind, ErrorCode, ParsedAction,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use policy::ActionPolicy;
pub use registry::{
    ActionError, ActionHandler, ActionOutcome, ActionRegistry, HostControl, ReplySink,
};
