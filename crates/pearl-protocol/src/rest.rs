//! REST collaborator port.
//!
//! CRUD for projects, instances, models, checkpoints and AOIs lives behind
//! the PEARL HTTP API; the session only consumes the calls below.

use crate::error::RestError;
use crate::ids::{AoiId, CheckpointId, InstanceId, ModelId, ProjectId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub model_id: Option<ModelId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub model_id: ModelId,
    pub mosaic: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveInstances {
    pub total: u64,
    #[serde(default)]
    pub instances: Vec<InstanceSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    /// Token that authorizes the websocket connection to this instance.
    pub token: String,
    #[serde(default)]
    pub checkpoint_id: Option<CheckpointId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelClass {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: ModelId,
    #[serde(default)]
    pub name: String,
    pub classes: Vec<ModelClass>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: CheckpointId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<CheckpointId>,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub classes: Vec<ModelClass>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoiRecord {
    pub id: AoiId,
    pub name: String,
    #[serde(default)]
    pub checkpoint_id: Option<CheckpointId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiLimits {
    pub total_gpus: u64,
    pub active_gpus: u64,
}

impl ApiLimits {
    pub fn has_free_gpu(&self) -> bool {
        self.active_gpus < self.total_gpus
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMeta {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub limits: ApiLimits,
}

#[async_trait]
pub trait RestApi: Send + Sync {
    async fn get_api_meta(&self) -> Result<ApiMeta, RestError>;
    async fn get_active_instances(&self, project_id: ProjectId)
    -> Result<ActiveInstances, RestError>;
    async fn get_instance(
        &self,
        project_id: ProjectId,
        instance_id: InstanceId,
    ) -> Result<InstanceRecord, RestError>;
    async fn create_instance(
        &self,
        project_id: ProjectId,
        request: NewInstance,
    ) -> Result<InstanceRecord, RestError>;
    async fn get_model(&self, model_id: ModelId) -> Result<ModelRecord, RestError>;
    async fn create_project(&self, request: NewProject) -> Result<Project, RestError>;
    async fn get_checkpoint(
        &self,
        project_id: ProjectId,
        checkpoint_id: CheckpointId,
    ) -> Result<CheckpointRecord, RestError>;
    async fn get_aois(&self, project_id: ProjectId) -> Result<Vec<AoiRecord>, RestError>;
    async fn delete_aoi(&self, project_id: ProjectId, aoi_id: AoiId) -> Result<(), RestError>;
}
