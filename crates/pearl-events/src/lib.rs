use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pearl_protocol::{
    AoiPatchState, AoiSelection, Bounds, Checkpoint, Dispatch, InstanceStatus, ModelId, Notice,
    PredictionState, Project, SessionEvent, WorkspaceView, reduce_checkpoint,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// A dispatched event stamped with its position in the session's history.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: SessionEvent,
}

#[derive(Clone, Debug)]
pub struct EventHub {
    sender: broadcast::Sender<EventRecord>,
    sequence: Arc<AtomicU64>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, event: SessionEvent) -> EventRecord {
        let record = EventRecord {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            event,
        };
        let _ = self.sender.send(record.clone());
        record
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<EventRecord> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Dispatch for EventHub {
    fn dispatch(&self, event: SessionEvent) {
        self.publish(event);
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceState {
    pub project: Option<Project>,
    pub model: Option<ModelId>,
    pub aoi: Option<AoiSelection>,
    pub status: InstanceStatus,
    pub checkpoint: Option<Checkpoint>,
    pub predictions: PredictionState,
    pub aoi_patches: AoiPatchState,
    pub loading: Option<String>,
    pub last_error: Option<String>,
}

/// UI-side state a session reports into and reads back from.
///
/// Every dispatched event is reduced into [`WorkspaceState`] first and
/// then published on the hub, so subscribers never observe an event the
/// store has not applied yet.
#[derive(Debug)]
pub struct Workspace {
    state: Mutex<WorkspaceState>,
    hub: EventHub,
}

impl Workspace {
    pub fn new(hub: EventHub) -> Self {
        Self {
            state: Mutex::new(WorkspaceState::default()),
            hub,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn snapshot(&self) -> WorkspaceState {
        self.state.lock().clone()
    }

    pub fn set_project(&self, project: Option<Project>) {
        self.state.lock().project = project;
    }

    pub fn select_model(&self, model: ModelId) {
        self.state.lock().model = Some(model);
    }

    pub fn set_aoi(&self, name: impl Into<String>, bounds: Bounds) {
        self.state.lock().aoi = Some(AoiSelection {
            name: Some(name.into()),
            bounds: Some(bounds),
        });
    }

    /// Apply a checkpoint edit made by the user (sample drawing).
    pub fn edit_checkpoint(&self, action: pearl_protocol::CheckpointAction) {
        self.dispatch(SessionEvent::Checkpoint(action));
    }

    fn apply(state: &mut WorkspaceState, event: &SessionEvent) {
        match event {
            SessionEvent::Status(status) => state.status = status.clone(),
            SessionEvent::Checkpoint(action) => {
                state.checkpoint = reduce_checkpoint(state.checkpoint.take(), action.clone());
            }
            SessionEvent::Predictions(action) => {
                state.predictions = std::mem::take(&mut state.predictions).reduce(action.clone());
            }
            SessionEvent::AoiPatch(action) => {
                state.aoi_patches = std::mem::take(&mut state.aoi_patches).reduce(action.clone());
            }
            SessionEvent::Notice(notice) => match notice {
                Notice::ShowLoading { message, .. } => state.loading = Some(message.clone()),
                Notice::HideLoading => state.loading = None,
                Notice::Error(message) => {
                    warn!(%message, "session error notice");
                    state.last_error = Some(message.clone());
                }
                Notice::ProjectCreated(project) => state.project = Some(project.clone()),
                Notice::ClearPredictionOverlay => {
                    debug!("prediction overlay cleared");
                }
            },
        }
    }
}

impl Dispatch for Workspace {
    fn dispatch(&self, event: SessionEvent) {
        Self::apply(&mut self.state.lock(), &event);
        self.hub.publish(event);
    }
}

impl WorkspaceView for Workspace {
    fn current_project(&self) -> Option<Project> {
        self.state.lock().project.clone()
    }

    fn current_checkpoint(&self) -> Option<Checkpoint> {
        self.state.lock().checkpoint.clone()
    }

    fn aoi(&self) -> Option<AoiSelection> {
        self.state.lock().aoi.clone()
    }

    fn selected_model(&self) -> Option<ModelId> {
        self.state.lock().model
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use futures_util::StreamExt;
    use pearl_protocol::{
        AoiId, CheckpointAction, CheckpointMode, CheckpointPatch, Dispatch, ModelClass, Notice,
        PredictionTile, PredictionsAction, ProjectId, SessionEvent, WorkspaceView,
    };
    use serde_json::json;

    use crate::{EventHub, Workspace};

    #[tokio::test]
    async fn hub_sequences_records() -> Result<()> {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe();
        hub.publish(Notice::HideLoading.into());
        hub.publish(Notice::loading("Fetching classes...").into());

        let first = rx.recv().await?;
        let second = rx.recv().await?;
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.timestamp >= first.timestamp);
        Ok(())
    }

    #[tokio::test]
    async fn workspace_reduces_before_publishing() -> Result<()> {
        let workspace = Workspace::new(EventHub::new(16));
        let mut stream = workspace.hub().subscribe_stream();

        workspace.dispatch(SessionEvent::Checkpoint(CheckpointAction::Set(CheckpointPatch {
            classes: Some(vec![ModelClass {
                name: "Water".to_owned(),
                color: "#00F".to_owned(),
            }]),
            ..CheckpointPatch::default()
        })));
        workspace.dispatch(PredictionsAction::Start {
            mode: CheckpointMode::Run,
        }
        .into());
        workspace.dispatch(PredictionsAction::ReceiveAoiMeta { id: AoiId::new(4) }.into());
        let tile = PredictionTile(json!({ "image": "a" }));
        workspace.dispatch(PredictionsAction::Receive(tile).into());

        let record = stream.next().await.expect("stream open")?;
        assert_eq!(record.sequence, 1);

        let state = workspace.snapshot();
        assert_eq!(state.predictions.data.predictions.len(), 1);
        assert_eq!(state.predictions.aoi_id, Some(AoiId::new(4)));
        let checkpoint = workspace.current_checkpoint().expect("checkpoint set");
        assert_eq!(checkpoint.classes.len(), 1);
        Ok(())
    }

    #[test]
    fn notices_update_loading_and_project() {
        let workspace = Workspace::new(EventHub::new(4));
        workspace.dispatch(Notice::loading("Creating project...").into());
        assert_eq!(workspace.snapshot().loading.as_deref(), Some("Creating project..."));

        workspace.dispatch(
            Notice::ProjectCreated(pearl_protocol::Project {
                id: ProjectId::new(1),
                name: "Untitled".to_owned(),
                model_id: None,
            })
            .into(),
        );
        workspace.dispatch(Notice::HideLoading.into());
        workspace.dispatch(Notice::error("Could not create instance").into());

        let state = workspace.snapshot();
        assert!(state.loading.is_none());
        assert_eq!(state.last_error.as_deref(), Some("Could not create instance"));
        assert_eq!(workspace.current_project().map(|p| p.id), Some(ProjectId::new(1)));
    }
}
