//! flowline: an interpreter runtime for a declarative conversational-flow
//! language.
//!
//! Flow authors describe a directed graph of nodes containing actions (side
//! effects) and routers (branching and waits). The engine hosts a session
//! that walks the graph for one contact, firing actions, evaluating routing
//! expressions, suspending at waits, resuming from external events, and
//! recording every observable change on an append-only event log.

pub mod actions;
pub mod assets;
pub mod contacts;
pub mod context;
pub mod definition;
pub mod engine;
pub mod envs;
pub mod error;
pub mod events;
pub mod modifiers;
pub mod routers;
pub mod runs;
pub mod services;
pub mod template;
pub mod triggers;
pub mod utils;
pub mod values;
pub mod waits;

pub use crate::actions::{Action, ActionRegistry};
pub use crate::assets::{Dependency, Reference, SessionAssets};
pub use crate::contacts::{Contact, Urn};
pub use crate::definition::{read_flow, Flow, FlowType};
pub use crate::engine::{
    Engine, EngineBuilder, EngineConfig, FakeTimeProvider, FakeUuidGenerator, RealTimeProvider,
    RealUuidGenerator, Session, SessionStatus, TimeProvider, UuidGenerator,
};
pub use crate::envs::Environment;
pub use crate::error::{ActionError, ReadError, SessionError};
pub use crate::events::{read_event, Event, EventPayload};
pub use crate::runs::{Run, RunResult, RunStatus, Step};
pub use crate::triggers::{read_trigger, Trigger};
pub use crate::values::Value;
pub use crate::waits::Wait;
