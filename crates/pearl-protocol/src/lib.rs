//! # pearl-protocol — PEARL inference session contract
//!
//! Shared types for driving a remote GPU inference instance: the websocket
//! wire vocabulary, the instance status value object, the downstream state
//! the session core reports into, and the ports it talks to.
//!
//! It carries no runtime dependencies (no tokio, no HTTP, no websocket
//! stack) so UI shells and test doubles can depend on it directly.
//!
//! ## Module Overview
//!
//! - [`ids`] — Typed numeric ids (ProjectId, InstanceId, CheckpointId, ...) and PatchRequestId
//! - [`geo`] — Minimal GeoJSON geometry plus AOI bounds conversion
//! - [`message`] — Client → server actions and server → client messages
//! - [`status`] — InstanceStatus, GpuStatus, StatusUpdate
//! - [`checkpoint`] — Checkpoint state, CheckpointAction and its reducer
//! - [`predictions`] — PredictionState, PredictionsAction and its reducer
//! - [`aoi_patch`] — AoiPatch records, AoiPatchAction and its reducer
//! - [`event`] — SessionEvent and user-facing Notice
//! - [`rest`] — REST collaborator port and its records
//! - [`ports`] — Transport, connector, dispatch and workspace ports
//! - [`error`] — SessionError, TransportError, RestError

pub mod aoi_patch;
pub mod checkpoint;
pub mod error;
pub mod event;
pub mod geo;
pub mod ids;
pub mod message;
pub mod ports;
pub mod predictions;
pub mod rest;
pub mod status;

pub use aoi_patch::{AoiPatch, AoiPatchAction, AoiPatchState, PatchPhase};
pub use checkpoint::{
    Checkpoint, CheckpointAction, CheckpointBrush, CheckpointMode, CheckpointPatch,
    CheckpointSummary, ClassSample, reduce_checkpoint,
};
pub use error::{RestError, SessionError, SessionResult, TransportError};
pub use event::{Notice, SessionEvent};
pub use geo::{Bounds, Geometry, LngLat};
pub use ids::{AoiId, CheckpointId, InstanceId, ModelId, PatchId, PatchRequestId, ProjectId};
pub use message::{
    AoiLoaded, AoiRef, CheckpointRef, ClassGeometry, ClientMessage, PatchRequest, PatchTarget,
    PredictionRequest, PredictionTile, RetrainRequest, ServerMessage, StatusReport,
    parse_server_message,
};
pub use ports::{
    AoiSelection, Connection, Connector, Dispatch, Transport, TransportEvent,
    TransportEventStream, WorkspaceView,
};
pub use predictions::{PredictionData, PredictionState, PredictionsAction};
pub use rest::{
    ActiveInstances, ApiLimits, ApiMeta, AoiRecord, CheckpointRecord, InstanceRecord,
    InstanceSummary, ModelClass, ModelRecord, NewInstance, NewProject, Project, RestApi,
};
pub use status::{GpuStatus, InstanceStatus, StatusOrigin, StatusTransition, StatusUpdate};
