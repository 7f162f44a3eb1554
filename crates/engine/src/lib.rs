// Path: crates/engine/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # NDID Engine
//!
//! Request consensus and consent orchestration for RP, IdP and AS nodes.
//!
//! A node reconciles three asynchronous sources per request: peer messages
//! from other nodes, transactions it submitted itself, and block commits it
//! observes later. All three are funnelled into one dispatcher task per
//! node; work on a single request is serialised by a per-request lock.
//!
//! Start a node with [`Engine::start`] and drive it through the returned
//! [`EngineHandle`].

mod as_node;
pub mod callback;
mod context;
mod continuation;
pub mod dispatcher;
pub mod engine;
pub mod error;
mod gate;
mod idp;
pub mod lock;
pub mod params;
pub mod request;
mod rp;
pub mod timeout;
mod verify;

pub use dispatcher::EngineEvent;
pub use engine::{Engine, EngineDeps, EngineHandle};
pub use error::EngineError;
pub use request::{derive_status, RequestStatusReport};
