//! Streamed prediction state.

use crate::checkpoint::CheckpointMode;
use crate::ids::AoiId;
use crate::message::PredictionTile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionData {
    pub predictions: Vec<PredictionTile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionState {
    pub fetching: bool,
    pub mode: Option<CheckpointMode>,
    pub aoi_id: Option<AoiId>,
    pub data: PredictionData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionsAction {
    /// A run or retrain was requested; drop tiles of the previous job.
    Start { mode: CheckpointMode },
    ReceiveAoiMeta { id: AoiId },
    Receive(PredictionTile),
    Complete,
    Clear,
}

impl PredictionState {
    pub fn reduce(self, action: PredictionsAction) -> Self {
        match action {
            PredictionsAction::Start { mode } => Self {
                fetching: true,
                mode: Some(mode),
                aoi_id: self.aoi_id,
                data: PredictionData::default(),
            },
            PredictionsAction::ReceiveAoiMeta { id } => Self {
                aoi_id: Some(id),
                ..self
            },
            PredictionsAction::Receive(tile) => {
                let mut next = self;
                next.fetching = true;
                next.data.predictions.push(tile);
                next
            }
            PredictionsAction::Complete => Self {
                fetching: false,
                ..self
            },
            PredictionsAction::Clear => Self::default(),
        }
    }
}
