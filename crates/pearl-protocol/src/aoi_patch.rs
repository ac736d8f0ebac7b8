//! AOI patch records.
//!
//! Each refine submission creates one record in `Init`. The worker handles
//! patches one at a time, so `model#patch` binds its id to the oldest record
//! still waiting, and progress/complete messages address the active one.

use crate::ids::{PatchId, PatchRequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchPhase {
    Init,
    Started,
    Receiving,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiPatch {
    pub request_id: PatchRequestId,
    pub name: String,
    pub id: Option<PatchId>,
    pub phase: PatchPhase,
    pub received: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AoiPatchAction {
    Init {
        request_id: PatchRequestId,
        name: String,
    },
    Start {
        id: PatchId,
    },
    Receive(Value),
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AoiPatchState {
    pub patches: Vec<AoiPatch>,
}

impl AoiPatchState {
    pub fn get(&self, request_id: PatchRequestId) -> Option<&AoiPatch> {
        self.patches.iter().find(|p| p.request_id == request_id)
    }

    fn active_mut(&mut self) -> Option<&mut AoiPatch> {
        self.patches
            .iter_mut()
            .find(|p| matches!(p.phase, PatchPhase::Started | PatchPhase::Receiving))
    }

    pub fn reduce(mut self, action: AoiPatchAction) -> Self {
        match action {
            AoiPatchAction::Init { request_id, name } => {
                self.patches.push(AoiPatch {
                    request_id,
                    name,
                    id: None,
                    phase: PatchPhase::Init,
                    received: Vec::new(),
                });
            }
            AoiPatchAction::Start { id } => {
                if self.patches.iter().any(|p| p.id == Some(id)) {
                    debug!(patch_id = %id, "duplicate patch start ignored");
                } else if let Some(patch) =
                    self.patches.iter_mut().find(|p| p.phase == PatchPhase::Init)
                {
                    patch.id = Some(id);
                    patch.phase = PatchPhase::Started;
                } else {
                    debug!(patch_id = %id, "patch start without pending request");
                }
            }
            AoiPatchAction::Receive(data) => {
                let by_id = data
                    .get("id")
                    .and_then(Value::as_u64)
                    .map(PatchId::new)
                    .and_then(|id| {
                        self.patches
                            .iter()
                            .position(|p| p.id == Some(id) && p.phase != PatchPhase::Complete)
                    });
                let target = match by_id {
                    Some(index) => self.patches.get_mut(index),
                    None => self.active_mut(),
                };
                match target {
                    Some(patch) => {
                        patch.phase = PatchPhase::Receiving;
                        patch.received.push(data);
                    }
                    None => debug!("patch progress without active patch"),
                }
            }
            AoiPatchAction::Complete => match self.active_mut() {
                Some(patch) => patch.phase = PatchPhase::Complete,
                None => debug!("patch complete without active patch"),
            },
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_init_start_receive_complete() {
        let first = PatchRequestId::new_v4();
        let second = PatchRequestId::new_v4();
        let state = AoiPatchState::default()
            .reduce(AoiPatchAction::Init {
                request_id: first,
                name: "Water".to_owned(),
            })
            .reduce(AoiPatchAction::Init {
                request_id: second,
                name: "Baseline (3)".to_owned(),
            })
            .reduce(AoiPatchAction::Start { id: PatchId::new(11) })
            .reduce(AoiPatchAction::Receive(json!({ "id": 11, "image": "x" })))
            .reduce(AoiPatchAction::Receive(json!({ "image": "y" })))
            .reduce(AoiPatchAction::Complete);

        let done = state.get(first).unwrap();
        assert_eq!(done.id, Some(PatchId::new(11)));
        assert_eq!(done.phase, PatchPhase::Complete);
        assert_eq!(done.received.len(), 2);

        let waiting = state.get(second).unwrap();
        assert_eq!(waiting.phase, PatchPhase::Init);
        assert!(waiting.id.is_none());
    }

    #[test]
    fn late_messages_are_ignored() {
        let state = AoiPatchState::default()
            .reduce(AoiPatchAction::Complete)
            .reduce(AoiPatchAction::Receive(json!({ "image": "z" })))
            .reduce(AoiPatchAction::Start { id: PatchId::new(1) });
        assert!(state.patches.is_empty());
    }

    #[test]
    fn duplicate_start_does_not_bind_next_request() {
        let request = PatchRequestId::new_v4();
        let other = PatchRequestId::new_v4();
        let state = AoiPatchState::default()
            .reduce(AoiPatchAction::Init {
                request_id: request,
                name: "a".to_owned(),
            })
            .reduce(AoiPatchAction::Init {
                request_id: other,
                name: "b".to_owned(),
            })
            .reduce(AoiPatchAction::Start { id: PatchId::new(4) })
            .reduce(AoiPatchAction::Start { id: PatchId::new(4) });
        assert_eq!(state.get(other).unwrap().phase, PatchPhase::Init);
    }
}
