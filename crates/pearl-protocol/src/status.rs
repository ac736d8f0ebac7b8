//! Instance status value object.
//!
//! Tracks the lifecycle of the remote GPU worker separately from the
//! liveness of the socket: a websocket can be open while the worker has not
//! attached yet, which is why `ws_connected` and `gpu_connected` are
//! independent flags.

use serde::{Deserialize, Serialize};

pub const INITIAL_GPU_MESSAGE: &str = "Loading...";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuStatus {
    #[default]
    NotStarted,
    Initializing,
    Ready,
    Processing,
    Aborting,
    Disconnected,
}

impl GpuStatus {
    /// Display message implied by entering this state, if any.
    pub fn display_message(self) -> Option<&'static str> {
        match self {
            Self::Aborting => Some("Aborting..."),
            Self::Ready => Some("Ready to go"),
            _ => None,
        }
    }
}

/// Who reported a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOrigin {
    /// Bookkeeping by the session itself (connect/close, send marks).
    Local,
    /// A `model#status` report from the worker.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub gpu_status: GpuStatus,
    /// Status before the last actual `gpu_status` change.
    pub previous_gpu_status: Option<GpuStatus>,
    pub ws_connected: bool,
    pub gpu_connected: bool,
    pub gpu_message: String,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self {
            gpu_status: GpuStatus::NotStarted,
            previous_gpu_status: None,
            ws_connected: false,
            gpu_connected: false,
            gpu_message: INITIAL_GPU_MESSAGE.to_owned(),
        }
    }
}

/// Partial status change; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub gpu_status: Option<GpuStatus>,
    pub ws_connected: Option<bool>,
    pub gpu_connected: Option<bool>,
    pub gpu_message: Option<String>,
}

impl StatusUpdate {
    pub fn gpu_status(status: GpuStatus) -> Self {
        Self {
            gpu_status: Some(status),
            ..Self::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            gpu_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_ws_connected(mut self, connected: bool) -> Self {
        self.ws_connected = Some(connected);
        self
    }

    pub fn with_gpu_connected(mut self, connected: bool) -> Self {
        self.gpu_connected = Some(connected);
        self
    }
}

/// An actual change of `gpu_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: GpuStatus,
    pub to: GpuStatus,
    pub origin: StatusOrigin,
}

impl StatusTransition {
    /// A freshly attached session found the worker already busy with a job
    /// from an earlier session.
    pub fn is_stale_job_takeover(&self) -> bool {
        self.origin == StatusOrigin::Remote
            && self.from == GpuStatus::Initializing
            && self.to == GpuStatus::Processing
    }
}

impl InstanceStatus {
    /// Apply a partial update. Returns the transition when `gpu_status`
    /// actually changed.
    pub fn apply(
        &mut self,
        update: StatusUpdate,
        origin: StatusOrigin,
    ) -> Option<StatusTransition> {
        let mut transition = None;
        if let Some(next) = update.gpu_status
            && next != self.gpu_status
        {
            transition = Some(StatusTransition {
                from: self.gpu_status,
                to: next,
                origin,
            });
            self.previous_gpu_status = Some(self.gpu_status);
            self.gpu_status = next;
        }
        if let Some(ws_connected) = update.ws_connected {
            self.ws_connected = ws_connected;
        }
        if let Some(gpu_connected) = update.gpu_connected {
            self.gpu_connected = gpu_connected;
        }
        if let Some(message) = update.gpu_message {
            self.gpu_message = message;
        }
        if let Some(message) = update.gpu_status.and_then(GpuStatus::display_message) {
            self.gpu_message = message.to_owned();
        }
        transition
    }

    pub fn is_ready(&self) -> bool {
        self.gpu_status == GpuStatus::Ready
    }

    /// Socket open and worker attached.
    pub fn is_linked(&self) -> bool {
        self.ws_connected && self.gpu_connected
    }
}
