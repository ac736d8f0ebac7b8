use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use parking_lot::Mutex;
use pearl_protocol::{
    AoiId, AoiPatchAction, CheckpointAction, CheckpointId, CheckpointMode, CheckpointPatch,
    ClientMessage, Connection, Connector, Dispatch, GpuStatus, InstanceRecord, InstanceStatus,
    ModelId, NewInstance, NewProject, Notice, PatchRequest, PatchRequestId, PatchTarget,
    PredictionRequest, PredictionsAction, Project, ProjectId, RestApi, RetrainRequest,
    ServerMessage, SessionError, SessionEvent, SessionResult, StatusOrigin, StatusUpdate,
    TransportError, TransportEvent, TransportEventStream, WorkspaceView, parse_server_message,
};
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::queue::QueuedMessage;
use crate::router::{self, FollowUp};
use crate::state::SessionCore;

const NO_INSTANCE_AVAILABLE: &str =
    "No instance available to run the model, please try again later.";
const PROJECT_FAILED: &str = "Could not create project, please try again later.";
const CLASSES_FAILED: &str = "Could not fetch model classes, please try again later.";
const INSTANCE_FAILED: &str = "Could not create instance, please try again later.";
const CHECKPOINT_FAILED: &str = "Could not load checkpoint, please try again later.";
const NOT_LOGGED_IN: &str = "You must be logged in to run the model.";

pub struct SessionBuilder {
    config: SessionConfig,
    rest: Option<Arc<dyn RestApi>>,
    connector: Arc<dyn Connector>,
    dispatch: Arc<dyn Dispatch>,
    workspace: Arc<dyn WorkspaceView>,
}

impl SessionBuilder {
    pub fn new(
        connector: Arc<dyn Connector>,
        dispatch: Arc<dyn Dispatch>,
        workspace: Arc<dyn WorkspaceView>,
    ) -> Self {
        Self {
            config: SessionConfig::default(),
            rest: None,
            connector,
            dispatch,
            workspace,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Authenticated REST client. Without one, provisioning intents fail
    /// with [`SessionError::Unauthenticated`].
    pub fn rest_api(mut self, rest: Arc<dyn RestApi>) -> Self {
        self.rest = Some(rest);
        self
    }

    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                config: self.config,
                rest: self.rest,
                connector: self.connector,
                dispatch: self.dispatch,
                workspace: self.workspace,
                core: Mutex::new(SessionCore::default()),
                init_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

struct SessionInner {
    config: SessionConfig,
    rest: Option<Arc<dyn RestApi>>,
    connector: Arc<dyn Connector>,
    dispatch: Arc<dyn Dispatch>,
    workspace: Arc<dyn WorkspaceView>,
    core: Mutex<SessionCore>,
    init_lock: tokio::sync::Mutex<()>,
}

/// Orchestrates one GPU instance session.
///
/// Owns the outbound queue, the instance status and the single active
/// transport. Downstream state is only ever touched through the dispatch
/// port; reads go through the workspace view.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn instance_status(&self) -> InstanceStatus {
        self.inner.core.lock().status.clone()
    }

    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.inner.core.lock().queue.messages()
    }

    pub fn has_transport(&self) -> bool {
        self.inner.core.lock().has_transport()
    }

    /// Mutate the core under its lock, then publish the status if it changed.
    fn update<R>(&self, f: impl FnOnce(&mut SessionCore) -> R) -> R {
        let (result, changed) = {
            let mut core = self.inner.core.lock();
            let before = core.status.clone();
            let result = f(&mut core);
            let changed = (core.status != before).then(|| core.status.clone());
            (result, changed)
        };
        if let Some(status) = changed {
            self.emit(SessionEvent::Status(status));
        }
        result
    }

    fn emit(&self, event: impl Into<SessionEvent>) {
        self.inner.dispatch.dispatch(event.into());
    }

    fn rest(&self) -> SessionResult<Arc<dyn RestApi>> {
        self.inner.rest.clone().ok_or(SessionError::Unauthenticated)
    }

    fn reject(&self, message: impl Into<String>) -> SessionError {
        let message = message.into();
        debug!(%message, "intent rejected");
        self.emit(Notice::error(message.clone()));
        SessionError::Precondition(message)
    }

    fn report(&self, error: SessionError, notice: &str) -> SessionError {
        warn!(%error, "session operation failed");
        self.emit(Notice::HideLoading);
        self.emit(Notice::error(notice));
        error
    }

    pub fn set_instance_status_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|core| core.apply_status(StatusUpdate::message(message), StatusOrigin::Local));
    }

    /// Provision or reuse an instance for `project_id` and connect to it.
    ///
    /// Resolves once the transport reports open; fails if it reports an
    /// error or closes first. Calls are serialized.
    #[instrument(skip(self), fields(project_id = %project_id, checkpoint_id = ?checkpoint_id))]
    pub async fn init_instance(
        &self,
        project_id: ProjectId,
        checkpoint_id: Option<CheckpointId>,
    ) -> SessionResult<InstanceRecord> {
        let rest = self.rest()?;
        let _serialized = self.inner.init_lock.lock().await;

        let generation = self.update(|core| {
            let generation = core.begin_connection();
            core.project_id = Some(project_id);
            core.apply_status(
                StatusUpdate::gpu_status(GpuStatus::Initializing)
                    .with_ws_connected(false)
                    .with_gpu_connected(false),
                StatusOrigin::Local,
            );
            generation
        });

        let active = rest.get_active_instances(project_id).await?;
        let mut hide_loading = true;
        let reusable = active.instances.first().filter(|_| active.total > 0);

        let instance = if let Some(summary) = reusable {
            let instance = rest.get_instance(project_id, summary.id).await?;
            info!(instance_id = %instance.id, "reusing active instance");
            if let Some(checkpoint_id) = checkpoint_id {
                if instance.checkpoint_id != Some(checkpoint_id) {
                    // loading stays up until the worker reports the checkpoint
                    hide_loading = false;
                    self.update(|core| {
                        core.queue.enqueue(ClientMessage::checkpoint(checkpoint_id))
                    });
                } else {
                    self.spawn_fetch(project_id, checkpoint_id, Some(CheckpointMode::Retrain));
                }
            }
            instance
        } else {
            self.set_instance_status_message("Creating Instance...");
            let instance = rest
                .create_instance(project_id, NewInstance { checkpoint_id })
                .await?;
            info!(instance_id = %instance.id, "created instance");
            if let Some(checkpoint_id) = checkpoint_id {
                self.spawn_fetch(project_id, checkpoint_id, Some(CheckpointMode::Retrain));
            }
            instance
        };

        let Connection {
            transport,
            mut events,
        } = self.inner.connector.open(&instance.token).await?;

        loop {
            match events.next().await {
                Some(TransportEvent::Open) => break,
                Some(TransportEvent::Message(text)) => {
                    debug!(len = text.len(), "dropping frame received before open");
                }
                Some(TransportEvent::Error(reason)) => {
                    self.mark_disconnected(generation);
                    return Err(TransportError::WebSocket(reason).into());
                }
                Some(TransportEvent::Close) | None => {
                    self.mark_disconnected(generation);
                    return Err(TransportError::ClosedBeforeOpen.into());
                }
            }
        }

        let installed = self.update(|core| {
            if !core.install_transport(generation, transport) {
                return false;
            }
            core.apply_status(
                StatusUpdate::default().with_ws_connected(true),
                StatusOrigin::Local,
            );
            core.advance();
            true
        });
        if !installed {
            return Err(SessionError::InvalidState(
                "connection superseded before it opened".to_owned(),
            ));
        }

        if hide_loading {
            self.emit(Notice::HideLoading);
        }
        spawn_driver(Arc::downgrade(&self.inner), generation, events);
        info!(instance_id = %instance.id, generation, "instance connected");
        Ok(instance)
    }

    /// Feed one transport event of connection `generation`. Returns false
    /// once the connection is finished or superseded.
    pub fn handle_transport_event(&self, generation: u64, event: TransportEvent) -> bool {
        let current = match event {
            TransportEvent::Open => self.inner.core.lock().is_current(generation),
            TransportEvent::Message(text) => match parse_server_message(&text) {
                Ok(message) => self.route_message(Some(generation), message),
                Err(error) => {
                    warn!(%error, "discarding malformed server frame");
                    self.inner.core.lock().is_current(generation)
                }
            },
            TransportEvent::Error(reason) => {
                warn!(%reason, "transport error");
                self.mark_disconnected(generation)
            }
            TransportEvent::Close => {
                info!(generation, "transport closed");
                self.mark_disconnected(generation);
                return false;
            }
        };
        if !current {
            debug!(generation, "dropping event from superseded connection");
        }
        current
    }

    /// Force `disconnected` if `generation` is still the active connection.
    fn mark_disconnected(&self, generation: u64) -> bool {
        self.update(|core| {
            let current = core.release_transport(generation);
            if current {
                core.apply_status(
                    StatusUpdate::gpu_status(GpuStatus::Disconnected)
                        .with_ws_connected(false)
                        .with_gpu_connected(false),
                    StatusOrigin::Local,
                );
            }
            current
        })
    }

    pub fn handle_raw_message(&self, text: &str) {
        match parse_server_message(text) {
            Ok(message) => self.handle_server_message(message),
            Err(error) => warn!(%error, "discarding malformed server frame"),
        }
    }

    pub fn handle_server_message(&self, message: ServerMessage) {
        self.route_message(None, message);
    }

    /// Route one frame. With a `generation`, the frame is dropped unless that
    /// connection is still current when the lock is taken.
    fn route_message(&self, generation: Option<u64>, message: ServerMessage) -> bool {
        let routed = self.update(|core| {
            if let Some(generation) = generation
                && !core.is_current(generation)
            {
                return None;
            }
            let out = router::route(core, message);
            core.advance();
            Some((out, core.project_id))
        });
        let Some((out, project_id)) = routed else {
            return false;
        };
        for event in out.events {
            self.emit(event);
        }
        for follow_up in out.follow_ups {
            match follow_up {
                FollowUp::FetchCheckpoint { id, mode } => match project_id {
                    Some(project_id) => self.spawn_fetch(project_id, id, mode),
                    None => warn!(checkpoint_id = %id, "no project to fetch checkpoint from"),
                },
                FollowUp::SettlePrediction => self.spawn_settle(),
            }
        }
        true
    }

    /// Fetch a checkpoint and hand it to the checkpoint reducer.
    pub async fn fetch_checkpoint(
        &self,
        project_id: ProjectId,
        checkpoint_id: CheckpointId,
        mode: Option<CheckpointMode>,
    ) -> SessionResult<()> {
        let record = self.rest()?.get_checkpoint(project_id, checkpoint_id).await?;
        debug!(checkpoint_id = %record.id, name = %record.name, "checkpoint fetched");
        self.emit(CheckpointAction::Receive { record, mode });
        Ok(())
    }

    fn spawn_fetch(
        &self,
        project_id: ProjectId,
        checkpoint_id: CheckpointId,
        mode: Option<CheckpointMode>,
    ) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(error) = session.fetch_checkpoint(project_id, checkpoint_id, mode).await {
                warn!(%error, checkpoint_id = %checkpoint_id, "checkpoint fetch failed");
            }
        });
    }

    fn spawn_settle(&self) {
        let dispatch = self.inner.dispatch.clone();
        let delay = self.inner.config.prediction_settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            dispatch.dispatch(Notice::ClearPredictionOverlay.into());
        });
    }

    /// Run the selected model over the current AOI.
    #[instrument(skip(self))]
    pub async fn run_inference(&self) -> SessionResult<()> {
        let workspace = &self.inner.workspace;
        let aoi = workspace.aoi();
        let Some(name) = aoi.as_ref().and_then(|aoi| aoi.name.clone()) else {
            return Err(self.reject("AOI Name must be set before running inference"));
        };
        let Some(bounds) = aoi.and_then(|aoi| aoi.bounds) else {
            return Err(self.reject("An AOI must be drawn before running inference"));
        };
        let Some(model_id) = workspace.selected_model() else {
            return Err(self.reject("A model must be selected before running inference"));
        };
        let rest = match self.rest() {
            Ok(rest) => rest,
            Err(error) => return Err(self.report(error, NOT_LOGGED_IN)),
        };

        let project = workspace.current_project();
        self.ensure_gpu_available(rest.as_ref(), project.as_ref()).await?;

        let project = match project {
            Some(project) => project,
            None => self.create_project(rest.as_ref(), model_id).await?,
        };

        self.emit(Notice::loading("Fetching classes..."));
        let model = match rest.get_model(model_id).await {
            Ok(model) => model,
            Err(error) => return Err(self.report(error.into(), CLASSES_FAILED)),
        };
        self.emit(CheckpointAction::Set(CheckpointPatch {
            classes: Some(model.classes),
            ..CheckpointPatch::default()
        }));

        if let Err(error) = self.init_instance(project.id, None).await {
            return Err(self.report(error, INSTANCE_FAILED));
        }

        self.emit(Notice::abortable("Running model and loading class predictions..."));
        self.emit(PredictionsAction::Start {
            mode: CheckpointMode::Run,
        });
        let request = ClientMessage::Prediction(PredictionRequest {
            name,
            polygon: bounds.to_polygon(),
        });
        self.update(|core| {
            core.restore_checkpoint = None;
            core.queue.enqueue(request);
            core.advance();
        });
        info!(project_id = %project.id, "prediction queued");
        Ok(())
    }

    async fn ensure_gpu_available(
        &self,
        rest: &dyn RestApi,
        project: Option<&Project>,
    ) -> SessionResult<()> {
        if let Some(project) = project {
            match rest.get_active_instances(project.id).await {
                Ok(active) if active.total > 0 => return Ok(()),
                Ok(_) => {}
                Err(error) => warn!(%error, "could not list active instances"),
            }
        }
        match rest.get_api_meta().await {
            Ok(meta) if !meta.limits.has_free_gpu() => {
                info!(
                    total_gpus = meta.limits.total_gpus,
                    active_gpus = meta.limits.active_gpus,
                    "no free gpu"
                );
                self.emit(Notice::error(NO_INSTANCE_AVAILABLE));
                Err(SessionError::Precondition(NO_INSTANCE_AVAILABLE.to_owned()))
            }
            Ok(_) => Ok(()),
            Err(error) => {
                warn!(%error, "could not read api limits");
                Ok(())
            }
        }
    }

    async fn create_project(
        &self,
        rest: &dyn RestApi,
        model_id: ModelId,
    ) -> SessionResult<Project> {
        self.emit(Notice::loading("Creating project..."));
        let request = NewProject {
            model_id,
            mosaic: self.inner.config.project_mosaic.clone(),
            name: self.inner.config.project_name.clone(),
        };
        match rest.create_project(request).await {
            Ok(project) => {
                info!(project_id = %project.id, "project created");
                self.emit(Notice::ProjectCreated(project.clone()));
                Ok(project)
            }
            Err(error) => Err(self.report(error.into(), PROJECT_FAILED)),
        }
    }

    /// Retrain the current checkpoint with the drawn samples.
    #[instrument(skip(self))]
    pub fn retrain(&self) -> SessionResult<()> {
        let checkpoint = self.inner.workspace.current_checkpoint();
        let sample_count = checkpoint
            .as_ref()
            .map(|checkpoint| checkpoint.retrain_sample_count())
            .unwrap_or(0);
        if sample_count < self.inner.config.min_sample_count {
            return Err(self.reject(self.inner.config.not_enough_samples_message()));
        }
        let Some(checkpoint) = checkpoint else {
            return Err(self.reject(self.inner.config.not_enough_samples_message()));
        };
        let name = self.inner.workspace.aoi().and_then(|aoi| aoi.name);

        self.emit(Notice::abortable(
            "Retraining model and loading updated predictions...",
        ));
        self.emit(PredictionsAction::Start {
            mode: CheckpointMode::Retrain,
        });
        let request = ClientMessage::Retrain(RetrainRequest {
            name,
            classes: checkpoint
                .classes
                .values()
                .map(|class| class.to_class_geometry())
                .collect(),
        });
        self.update(|core| {
            core.restore_checkpoint = checkpoint.id;
            core.queue.enqueue(request);
            core.advance();
        });
        info!(sample_count, "retrain queued");
        Ok(())
    }

    /// Request one AOI patch per drawn brush and class polygon.
    #[instrument(skip(self))]
    pub fn refine(&self) -> SessionResult<()> {
        let checkpoint = self
            .inner
            .workspace
            .current_checkpoint()
            .filter(|checkpoint| checkpoint.refine_sample_count() > 0);
        let Some(checkpoint) = checkpoint else {
            return Err(self.reject("At least one sample must be provided for refinement"));
        };

        self.emit(Notice::loading("Requesting AOI patch..."));

        let mut patches = Vec::new();
        for brush in checkpoint.checkpoint_brushes.values() {
            for polygon in &brush.polygons {
                patches.push((
                    brush.checkpoint.label(),
                    PatchTarget::Brush {
                        checkpoint_id: brush.checkpoint.id,
                    },
                    polygon.clone(),
                ));
            }
        }
        for (index, class) in checkpoint.classes.values().enumerate() {
            for polygon in &class.polygons {
                patches.push((
                    class.name.clone(),
                    PatchTarget::Class { class: index },
                    polygon.clone(),
                ));
            }
        }

        let count = patches.len();
        let mut messages = Vec::with_capacity(count);
        for (name, target, polygon) in patches {
            self.emit(AoiPatchAction::Init {
                request_id: PatchRequestId::new_v4(),
                name,
            });
            messages.push(ClientMessage::Patch(PatchRequest { target, polygon }));
        }
        self.update(|core| {
            for message in messages {
                core.queue.enqueue(message);
            }
            core.advance();
        });
        self.emit(CheckpointAction::ClearSamples);
        info!(patches = count, "refinement queued");
        Ok(())
    }

    /// Switch the instance to a saved checkpoint, connecting first if needed.
    #[instrument(skip(self), fields(project_id = %project_id, checkpoint_id = %checkpoint_id))]
    pub async fn apply_checkpoint(
        &self,
        project_id: ProjectId,
        checkpoint_id: CheckpointId,
    ) -> SessionResult<()> {
        let result = async {
            if !self.has_transport() {
                self.init_instance(project_id, None).await?;
            }
            self.emit(PredictionsAction::Clear);
            self.fetch_checkpoint(project_id, checkpoint_id, Some(CheckpointMode::Retrain))
                .await?;
            self.update(|core| {
                core.queue.enqueue(ClientMessage::checkpoint(checkpoint_id));
                core.advance();
            });
            Ok(())
        }
        .await;
        result.map_err(|error| self.report(error, CHECKPOINT_FAILED))
    }

    /// Abort the running job, then queue `queue_next` in place of anything
    /// still pending.
    ///
    /// Local predictions and checkpoint are reset right away, without
    /// waiting for `model#aborted`. Aborting a retrain fetches the checkpoint
    /// it started from again.
    #[instrument(skip(self, queue_next), fields(continuation = queue_next.len()))]
    pub fn abort_job(&self, queue_next: Vec<ClientMessage>) {
        let restore = self.update(|core| {
            if core.status.gpu_connected {
                core.queue.enqueue_abort(queue_next);
                core.advance();
            } else {
                debug!("worker not attached; clearing queue instead of aborting");
                core.queue.clear();
            }
            core.restore_checkpoint.take().zip(core.project_id)
        });
        self.emit(PredictionsAction::Clear);
        self.emit(CheckpointAction::Reset);
        if let Some((checkpoint_id, project_id)) = restore {
            self.emit(Notice::loading("Aborting..."));
            self.spawn_fetch(project_id, checkpoint_id, None);
        }
    }

    pub fn load_aoi_on_instance(&self, id: AoiId) {
        self.emit(Notice::loading("Loading AOI on Instance..."));
        self.update(|core| {
            core.queue.enqueue_express(ClientMessage::load_aoi(id));
            core.advance();
        });
    }

    /// Close the transport and forget the instance, e.g. on project change.
    pub fn close(&self) {
        info!("closing session");
        self.update(SessionCore::reset);
    }
}

fn spawn_driver(inner: Weak<SessionInner>, generation: u64, mut events: TransportEventStream) {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let session = Session { inner };
            if !session.handle_transport_event(generation, event) {
                break;
            }
        }
        debug!(generation, "transport driver finished");
    });
}
