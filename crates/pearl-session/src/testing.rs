//! In-memory collaborators for session tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use pearl_protocol::{
    ActiveInstances, AoiId, AoiRecord, ApiLimits, ApiMeta, CheckpointId, CheckpointRecord,
    ClientMessage, Connection, Connector, InstanceId, InstanceRecord, InstanceSummary, ModelClass,
    ModelId, ModelRecord, NewInstance, NewProject, Project, ProjectId, RestApi, RestError,
    Transport, TransportError, TransportEvent,
};
use tokio::sync::mpsc;

#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<ClientMessage>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// One opened connection: the transport handed to the session and the
/// sender that feeds its event stream.
#[derive(Clone)]
pub(crate) struct ScriptedLink {
    pub token: String,
    pub transport: Arc<RecordingTransport>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl ScriptedLink {
    pub fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn server(&self, frame: serde_json::Value) {
        self.push(TransportEvent::Message(frame.to_string()));
    }
}

/// Connector whose connections open (or fail) immediately.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    links: Mutex<Vec<ScriptedLink>>,
    refuse: AtomicBool,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn links(&self) -> Vec<ScriptedLink> {
        self.links.lock().clone()
    }

    pub fn last_link(&self) -> Option<ScriptedLink> {
        self.links.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, token: &str) -> Result<Connection, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transport = RecordingTransport::new();
        if self.refuse.load(Ordering::SeqCst) {
            let _ = sender.send(TransportEvent::Error("connection refused".to_owned()));
            let _ = sender.send(TransportEvent::Close);
        } else {
            let _ = sender.send(TransportEvent::Open);
        }
        self.links.lock().push(ScriptedLink {
            token: token.to_owned(),
            transport: transport.clone(),
            events: sender,
        });
        let events = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        })
        .boxed();
        Ok(Connection { transport, events })
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryRestState {
    pub limits: ApiLimits,
    pub active: Vec<InstanceRecord>,
    pub created: Vec<NewInstance>,
    pub projects: Vec<NewProject>,
    pub checkpoints: HashMap<CheckpointId, CheckpointRecord>,
    pub aois: Vec<AoiRecord>,
    pub fail_instances: bool,
    pub fail_projects: bool,
    pub calls: Vec<&'static str>,
}

pub(crate) struct MemoryRest {
    pub state: Mutex<MemoryRestState>,
}

impl MemoryRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemoryRestState {
                limits: ApiLimits {
                    total_gpus: 2,
                    active_gpus: 0,
                },
                ..MemoryRestState::default()
            }),
        })
    }

    pub fn with_checkpoint(self: Arc<Self>, id: u64, name: &str) -> Arc<Self> {
        let record = CheckpointRecord {
            id: CheckpointId::new(id),
            name: name.to_owned(),
            parent: None,
            bookmarked: false,
            classes: model_classes(),
        };
        self.state.lock().checkpoints.insert(record.id, record);
        self
    }

    pub fn with_active_instance(self: Arc<Self>, checkpoint: Option<u64>) -> Arc<Self> {
        self.state.lock().active.push(InstanceRecord {
            id: InstanceId::new(77),
            token: "active-token".to_owned(),
            checkpoint_id: checkpoint.map(CheckpointId::new),
        });
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    fn record(&self, call: &'static str) {
        self.state.lock().calls.push(call);
    }
}

pub(crate) fn model_classes() -> Vec<ModelClass> {
    vec![
        ModelClass {
            name: "Water".to_owned(),
            color: "#0000FF".to_owned(),
        },
        ModelClass {
            name: "Forest".to_owned(),
            color: "#00FF00".to_owned(),
        },
    ]
}

#[async_trait]
impl RestApi for MemoryRest {
    async fn get_api_meta(&self) -> Result<ApiMeta, RestError> {
        self.record("get_api_meta");
        Ok(ApiMeta {
            version: "test".to_owned(),
            limits: self.state.lock().limits,
        })
    }

    async fn get_active_instances(
        &self,
        _project_id: ProjectId,
    ) -> Result<ActiveInstances, RestError> {
        self.record("get_active_instances");
        let state = self.state.lock();
        Ok(ActiveInstances {
            total: state.active.len() as u64,
            instances: state
                .active
                .iter()
                .map(|instance| InstanceSummary { id: instance.id })
                .collect(),
        })
    }

    async fn get_instance(
        &self,
        _project_id: ProjectId,
        instance_id: InstanceId,
    ) -> Result<InstanceRecord, RestError> {
        self.record("get_instance");
        self.state
            .lock()
            .active
            .iter()
            .find(|instance| instance.id == instance_id)
            .cloned()
            .ok_or(RestError::Http {
                status: 404,
                body: "instance not found".to_owned(),
            })
    }

    async fn create_instance(
        &self,
        _project_id: ProjectId,
        request: NewInstance,
    ) -> Result<InstanceRecord, RestError> {
        self.record("create_instance");
        let mut state = self.state.lock();
        if state.fail_instances {
            return Err(RestError::Http {
                status: 500,
                body: "no capacity".to_owned(),
            });
        }
        let checkpoint_id = request.checkpoint_id;
        state.created.push(request);
        Ok(InstanceRecord {
            id: InstanceId::new(state.created.len() as u64),
            token: format!("token-{}", state.created.len()),
            checkpoint_id,
        })
    }

    async fn get_model(&self, model_id: ModelId) -> Result<ModelRecord, RestError> {
        self.record("get_model");
        Ok(ModelRecord {
            id: model_id,
            name: "NAIP land cover".to_owned(),
            classes: model_classes(),
        })
    }

    async fn create_project(&self, request: NewProject) -> Result<Project, RestError> {
        self.record("create_project");
        let mut state = self.state.lock();
        if state.fail_projects {
            return Err(RestError::Request {
                message: "connection reset".to_owned(),
            });
        }
        let project = Project {
            id: ProjectId::new(100 + state.projects.len() as u64),
            name: request.name.clone(),
            model_id: Some(request.model_id),
        };
        state.projects.push(request);
        Ok(project)
    }

    async fn get_checkpoint(
        &self,
        _project_id: ProjectId,
        checkpoint_id: CheckpointId,
    ) -> Result<CheckpointRecord, RestError> {
        self.record("get_checkpoint");
        self.state
            .lock()
            .checkpoints
            .get(&checkpoint_id)
            .cloned()
            .ok_or(RestError::Http {
                status: 404,
                body: "checkpoint not found".to_owned(),
            })
    }

    async fn get_aois(&self, _project_id: ProjectId) -> Result<Vec<AoiRecord>, RestError> {
        self.record("get_aois");
        Ok(self.state.lock().aois.clone())
    }

    async fn delete_aoi(&self, _project_id: ProjectId, aoi_id: AoiId) -> Result<(), RestError> {
        self.record("delete_aoi");
        self.state.lock().aois.retain(|aoi| aoi.id != aoi_id);
        Ok(())
    }
}

/// Poll `check` until it holds or a second elapses.
pub(crate) async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
