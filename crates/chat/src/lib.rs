//! Conversation core: sessions, per-turn middleware, command dispatch and
//! streaming replies through the render pipeline.
//!
//! Platform adapters call [`Orchestrator::handle_message`] with an
//! [`InboundMessage`] and a [`ReplySink`]; everything else is internal
//! wiring exposed for tests and embedding.

pub mod commands;
pub mod context;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod orchestrator;
pub mod presets;
pub mod registry;
pub mod responder;
pub mod retry;
pub mod turn;

pub use {
    commands::{Command, Triggers},
    context::{ConversationContext, DEFAULT_PRESET, RenderFactory},
    directory::{ContextSlot, SessionDirectory, SessionHandle},
    dispatch::Dispatcher,
    error::{Error, Result},
    gate::{Admission, ConcurrencyGate},
    middleware::{Middleware, MiddlewareChain, Next, TurnHandler},
    orchestrator::{Orchestrator, OrchestratorBuilder},
    presets::DirPresetStore,
    registry::{BackendFactory, BackendRegistry, ContextFactory},
    responder::{ReplySink, Responder},
    retry::Backoff,
    turn::{InboundMessage, RejectReason, Turn, TurnOutcome},
};
