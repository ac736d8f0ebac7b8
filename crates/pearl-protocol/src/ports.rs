//! Boundary ports of the session core.
//!
//! - [`Connector`] / [`Transport`]: the duplex channel to a compute instance.
//! - [`Dispatch`]: where checkpoint, prediction, AOI-patch and notice events go.
//! - [`WorkspaceView`]: read accessors for UI-owned state.
//!
//! Object-safety note: async methods use `async-trait`; transport events are
//! a boxed stream ([`TransportEventStream`]).

use crate::checkpoint::Checkpoint;
use crate::error::TransportError;
use crate::event::SessionEvent;
use crate::geo::Bounds;
use crate::ids::ModelId;
use crate::message::ClientMessage;
use crate::rest::Project;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// Lifecycle and data events of one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    Close,
}

pub type TransportEventStream = BoxStream<'static, TransportEvent>;

/// Sending half of an open (or opening) connection.
pub trait Transport: Send + Sync {
    /// Queue a message for delivery. Never blocks.
    fn send(&self, message: &ClientMessage) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    fn close(&self);
}

/// A transport plus the events it will emit, starting with `Open` or `Error`.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: TransportEventStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, token: &str) -> Result<Connection, TransportError>;
}

pub trait Dispatch: Send + Sync {
    fn dispatch(&self, event: SessionEvent);
}

/// The AOI currently drawn on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct AoiSelection {
    pub name: Option<String>,
    pub bounds: Option<Bounds>,
}

pub trait WorkspaceView: Send + Sync {
    fn current_project(&self) -> Option<Project>;
    fn current_checkpoint(&self) -> Option<Checkpoint>;
    fn aoi(&self) -> Option<AoiSelection>;
    fn selected_model(&self) -> Option<ModelId>;
}
