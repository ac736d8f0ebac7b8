//! Everything the session core reports to the outside.

use crate::aoi_patch::AoiPatchAction;
use crate::checkpoint::CheckpointAction;
use crate::predictions::PredictionsAction;
use crate::rest::Project;
use crate::status::InstanceStatus;

/// User-facing side effects (toasts, loading overlay, navigation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ShowLoading { message: String, abortable: bool },
    HideLoading,
    Error(String),
    /// A project was created on the fly; the UI should adopt it.
    ProjectCreated(Project),
    /// The completed prediction overlay may be cleared.
    ClearPredictionOverlay,
}

impl Notice {
    pub fn loading(message: impl Into<String>) -> Self {
        Self::ShowLoading {
            message: message.into(),
            abortable: false,
        }
    }

    pub fn abortable(message: impl Into<String>) -> Self {
        Self::ShowLoading {
            message: message.into(),
            abortable: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(InstanceStatus),
    Checkpoint(CheckpointAction),
    Predictions(PredictionsAction),
    AoiPatch(AoiPatchAction),
    Notice(Notice),
}

impl From<CheckpointAction> for SessionEvent {
    fn from(action: CheckpointAction) -> Self {
        Self::Checkpoint(action)
    }
}

impl From<PredictionsAction> for SessionEvent {
    fn from(action: PredictionsAction) -> Self {
        Self::Predictions(action)
    }
}

impl From<AoiPatchAction> for SessionEvent {
    fn from(action: AoiPatchAction) -> Self {
        Self::AoiPatch(action)
    }
}

impl From<Notice> for SessionEvent {
    fn from(notice: Notice) -> Self {
        Self::Notice(notice)
    }
}
