//! Inbound dispatch table: one arm per server tag.

use pearl_protocol::{
    AoiPatchAction, CheckpointAction, CheckpointId, CheckpointMode, CheckpointPatch, Notice,
    PredictionsAction, ServerMessage, SessionEvent, StatusOrigin, StatusUpdate,
};
use tracing::{debug, warn};

use crate::state::SessionCore;

pub(crate) const LOADING_CHECKPOINT: &str = "Loading checkpoint...";
const WORKER_ERROR: &str = "The instance reported an error.";

/// Work the router cannot do under the session lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FollowUp {
    FetchCheckpoint {
        id: CheckpointId,
        mode: Option<CheckpointMode>,
    },
    SettlePrediction,
}

/// Side effects produced while routing one message.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub events: Vec<SessionEvent>,
    pub follow_ups: Vec<FollowUp>,
}

impl Outbox {
    fn emit(&mut self, event: impl Into<SessionEvent>) {
        self.events.push(event.into());
    }

    fn fetch(&mut self, id: Option<CheckpointId>, mode: Option<CheckpointMode>) {
        if let Some(id) = id {
            self.follow_ups.push(FollowUp::FetchCheckpoint { id, mode });
        }
    }
}

pub(crate) fn route(core: &mut SessionCore, message: ServerMessage) -> Outbox {
    let mut out = Outbox::default();
    debug!(tag = message.tag(), "routing server message");

    match message {
        ServerMessage::Status(report) => {
            core.apply_status(
                StatusUpdate::gpu_status(report.gpu_status()),
                StatusOrigin::Remote,
            );
        }
        ServerMessage::Connected => {
            core.apply_status(
                StatusUpdate::default().with_gpu_connected(true),
                StatusOrigin::Remote,
            );
            core.probe();
        }
        ServerMessage::Disconnected => {
            core.apply_status(
                StatusUpdate::default().with_gpu_connected(false),
                StatusOrigin::Remote,
            );
        }
        ServerMessage::Aborted => {
            debug!("previous run aborted");
            out.emit(PredictionsAction::Clear);
            out.emit(CheckpointAction::Reset);
            out.emit(Notice::HideLoading);
            core.probe();
        }
        ServerMessage::AoiLoaded(aoi) => {
            out.emit(CheckpointAction::Set(CheckpointPatch {
                id: aoi.checkpoint_id,
                name: aoi.name,
                classes: None,
            }));
            out.emit(PredictionsAction::ReceiveAoiMeta { id: aoi.id });
        }
        ServerMessage::AoiComplete => {
            out.emit(Notice::HideLoading);
            core.probe();
        }
        ServerMessage::Error(data) => {
            warn!(data = ?data, "worker reported an error");
            core.queue.clear();
            core.restore_checkpoint = None;
            out.emit(PredictionsAction::Clear);
            core.probe();
            out.emit(Notice::HideLoading);
            out.emit(Notice::error(error_text(data.as_ref())));
        }
        ServerMessage::Checkpoint { id } => {
            out.fetch(id, None);
            core.apply_status(StatusUpdate::message(LOADING_CHECKPOINT), StatusOrigin::Remote);
            core.probe();
        }
        ServerMessage::CheckpointProgress(_) => {
            out.emit(Notice::loading(LOADING_CHECKPOINT));
        }
        ServerMessage::CheckpointComplete { id } => {
            out.fetch(id, Some(CheckpointMode::Retrain));
            out.emit(Notice::HideLoading);
            core.probe();
        }
        ServerMessage::RetrainComplete { id } => {
            core.restore_checkpoint = None;
            out.fetch(id, Some(CheckpointMode::Retrain));
            core.apply_status(StatusUpdate::message(LOADING_CHECKPOINT), StatusOrigin::Remote);
            core.probe();
        }
        ServerMessage::Prediction(tile) => {
            out.emit(PredictionsAction::Receive(tile));
        }
        ServerMessage::PredictionComplete => {
            out.emit(PredictionsAction::Complete);
            out.emit(CheckpointAction::SetMode(CheckpointMode::Retrain));
            core.probe();
            out.emit(Notice::HideLoading);
            out.follow_ups.push(FollowUp::SettlePrediction);
        }
        ServerMessage::Patch { id } => {
            out.emit(AoiPatchAction::Start { id });
            core.probe();
        }
        ServerMessage::PatchProgress(data) => {
            out.emit(AoiPatchAction::Receive(data));
        }
        ServerMessage::PatchComplete => {
            out.emit(AoiPatchAction::Complete);
            out.emit(Notice::HideLoading);
            core.probe();
        }
        ServerMessage::Unknown { tag } => {
            warn!(%tag, "ignoring unknown server message");
        }
    }

    out
}

fn error_text(data: Option<&serde_json::Value>) -> String {
    match data {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(value) => value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| WORKER_ERROR.to_owned()),
        None => WORKER_ERROR.to_owned(),
    }
}
