//! Websocket wire vocabulary.
//!
//! Client frames are `{"action": <tag>, "data": <payload>?}`; server frames
//! are `{"message": <tag>, "data": <payload>?}`. Server tags this crate does
//! not know decode into [`ServerMessage::Unknown`] instead of failing.

use crate::geo::Geometry;
use crate::ids::{AoiId, CheckpointId, PatchId};
use crate::status::GpuStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Intent sent to the GPU worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "model#status")]
    Status,
    #[serde(rename = "model#abort")]
    Abort,
    #[serde(rename = "model#checkpoint")]
    Checkpoint(CheckpointRef),
    #[serde(rename = "model#aoi")]
    LoadAoi(AoiRef),
    #[serde(rename = "model#prediction")]
    Prediction(PredictionRequest),
    #[serde(rename = "model#retrain")]
    Retrain(RetrainRequest),
    #[serde(rename = "model#patch")]
    Patch(PatchRequest),
}

impl ClientMessage {
    pub fn checkpoint(id: CheckpointId) -> Self {
        Self::Checkpoint(CheckpointRef { id })
    }

    pub fn load_aoi(id: AoiId) -> Self {
        Self::LoadAoi(AoiRef { id })
    }

    /// Wire tag, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Status => "model#status",
            Self::Abort => "model#abort",
            Self::Checkpoint(_) => "model#checkpoint",
            Self::LoadAoi(_) => "model#aoi",
            Self::Prediction(_) => "model#prediction",
            Self::Retrain(_) => "model#retrain",
            Self::Patch(_) => "model#patch",
        }
    }

    pub fn is_status_probe(&self) -> bool {
        matches!(self, Self::Status)
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub id: CheckpointId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoiRef {
    pub id: AoiId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub name: String,
    pub polygon: Geometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainRequest {
    /// AOI name, omitted while the AOI is unnamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub classes: Vec<ClassGeometry>,
}

/// One class worth of retraining samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassGeometry {
    pub name: String,
    pub color: String,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    #[serde(flatten)]
    pub target: PatchTarget,
    pub polygon: Geometry,
}

/// What an AOI patch repaints a polygon with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PatchTarget {
    /// Predictions of another checkpoint.
    Brush { checkpoint_id: CheckpointId },
    /// A single class, by index into the checkpoint's class list.
    Class { class: usize },
}

/// Payload of `model#status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "isAborting", default)]
    pub is_aborting: bool,
    #[serde(default)]
    pub processing: bool,
}

impl StatusReport {
    pub fn gpu_status(&self) -> GpuStatus {
        if self.is_aborting {
            GpuStatus::Aborting
        } else if self.processing {
            GpuStatus::Processing
        } else {
            GpuStatus::Ready
        }
    }
}

/// Payload of `model#aoi`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoiLoaded {
    pub id: AoiId,
    #[serde(default)]
    pub checkpoint_id: Option<CheckpointId>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One streamed prediction tile. The payload is opaque to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionTile(pub Value);

/// Push message received from the GPU worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Status(StatusReport),
    Connected,
    Disconnected,
    Aborted,
    AoiLoaded(AoiLoaded),
    AoiComplete,
    Error(Option<Value>),
    Checkpoint { id: Option<CheckpointId> },
    CheckpointProgress(Option<Value>),
    CheckpointComplete { id: Option<CheckpointId> },
    RetrainComplete { id: Option<CheckpointId> },
    Prediction(PredictionTile),
    PredictionComplete,
    Patch { id: PatchId },
    PatchProgress(Value),
    PatchComplete,
    Unknown { tag: String },
}

impl ServerMessage {
    pub fn tag(&self) -> &str {
        match self {
            Self::Status(_) => "model#status",
            Self::Connected => "info#connected",
            Self::Disconnected => "info#disconnected",
            Self::Aborted => "model#aborted",
            Self::AoiLoaded(_) => "model#aoi",
            Self::AoiComplete => "model#aoi#complete",
            Self::Error(_) => "error",
            Self::Checkpoint { .. } => "model#checkpoint",
            Self::CheckpointProgress(_) => "model#checkpoint#progress",
            Self::CheckpointComplete { .. } => "model#checkpoint#complete",
            Self::RetrainComplete { .. } => "model#retrain#complete",
            Self::Prediction(_) => "model#prediction",
            Self::PredictionComplete => "model#prediction#complete",
            Self::Patch { .. } => "model#patch",
            Self::PatchProgress(_) => "model#patch#progress",
            Self::PatchComplete => "model#patch#complete",
            Self::Unknown { tag } => tag,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PatchStarted {
    id: PatchId,
}

/// Parse a server text frame into a typed message.
pub fn parse_server_message(text: &str) -> serde_json::Result<ServerMessage> {
    let Envelope { message, data } = serde_json::from_str(text)?;

    let parsed = match message.as_str() {
        "model#status" => ServerMessage::Status(decode(data)?),
        "info#connected" => ServerMessage::Connected,
        "info#disconnected" => ServerMessage::Disconnected,
        "model#aborted" => ServerMessage::Aborted,
        "model#aoi" => ServerMessage::AoiLoaded(decode(data)?),
        "model#aoi#complete" => ServerMessage::AoiComplete,
        "error" => ServerMessage::Error(data),
        "model#checkpoint" => ServerMessage::Checkpoint {
            id: checkpoint_ref(data.as_ref()),
        },
        "model#checkpoint#progress" => ServerMessage::CheckpointProgress(data),
        "model#checkpoint#complete" => ServerMessage::CheckpointComplete {
            id: checkpoint_ref(data.as_ref()),
        },
        "model#retrain#complete" => ServerMessage::RetrainComplete {
            id: checkpoint_ref(data.as_ref()),
        },
        "model#prediction" => ServerMessage::Prediction(PredictionTile(data.unwrap_or_default())),
        "model#prediction#complete" => ServerMessage::PredictionComplete,
        "model#patch" => {
            let started: PatchStarted = decode(data)?;
            ServerMessage::Patch { id: started.id }
        }
        "model#patch#progress" => ServerMessage::PatchProgress(data.unwrap_or_default()),
        "model#patch#complete" => ServerMessage::PatchComplete,
        _ => ServerMessage::Unknown { tag: message },
    };
    Ok(parsed)
}

fn decode<T: serde::de::DeserializeOwned>(data: Option<Value>) -> serde_json::Result<T> {
    serde_json::from_value(data.unwrap_or_default())
}

// The worker reports checkpoints as either `{id}` or `{checkpoint}`.
fn checkpoint_ref(data: Option<&Value>) -> Option<CheckpointId> {
    let data = data?;
    data.get("id")
        .or_else(|| data.get("checkpoint"))
        .and_then(Value::as_u64)
        .map(CheckpointId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_probe_has_no_data_field() {
        let value = serde_json::to_value(ClientMessage::Status).unwrap();
        assert_eq!(value, json!({ "action": "model#status" }));
    }

    #[test]
    fn checkpoint_switch_encodes_id() {
        let value = serde_json::to_value(ClientMessage::checkpoint(CheckpointId::new(12))).unwrap();
        assert_eq!(value, json!({ "action": "model#checkpoint", "data": { "id": 12 } }));
    }

    #[test]
    fn patch_request_flattens_target() {
        let polygon = crate::geo::Bounds::new([0.0, 0.0], [1.0, 1.0]).to_polygon();
        let brush = ClientMessage::Patch(PatchRequest {
            target: PatchTarget::Brush {
                checkpoint_id: CheckpointId::new(3),
            },
            polygon: polygon.clone(),
        });
        let value = serde_json::to_value(&brush).unwrap();
        assert_eq!(value["data"]["type"], "brush");
        assert_eq!(value["data"]["checkpoint_id"], 3);
        assert_eq!(value["data"]["polygon"]["type"], "Polygon");

        let class = ClientMessage::Patch(PatchRequest {
            target: PatchTarget::Class { class: 2 },
            polygon,
        });
        let value = serde_json::to_value(&class).unwrap();
        assert_eq!(value["data"]["type"], "class");
        assert_eq!(value["data"]["class"], 2);
    }

    #[test]
    fn parse_status_maps_to_gpu_status() {
        let cases = [
            (json!({ "isAborting": true, "processing": true }), GpuStatus::Aborting),
            (json!({ "isAborting": false, "processing": true }), GpuStatus::Processing),
            (json!({ "isAborting": false, "processing": false }), GpuStatus::Ready),
        ];
        for (data, expected) in cases {
            let text = json!({ "message": "model#status", "data": data }).to_string();
            match parse_server_message(&text).unwrap() {
                ServerMessage::Status(report) => assert_eq!(report.gpu_status(), expected),
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    #[test]
    fn parse_checkpoint_accepts_id_or_checkpoint_key() {
        let by_id = json!({ "message": "model#checkpoint#complete", "data": { "id": 5 } });
        let by_key = json!({ "message": "model#retrain#complete", "data": { "checkpoint": 6 } });
        assert_eq!(
            parse_server_message(&by_id.to_string()).unwrap(),
            ServerMessage::CheckpointComplete {
                id: Some(CheckpointId::new(5))
            }
        );
        assert_eq!(
            parse_server_message(&by_key.to_string()).unwrap(),
            ServerMessage::RetrainComplete {
                id: Some(CheckpointId::new(6))
            }
        );
        assert_eq!(
            parse_server_message(r#"{"message":"model#checkpoint"}"#).unwrap(),
            ServerMessage::Checkpoint { id: None }
        );
    }

    #[test]
    fn parse_unknown_tag_is_not_an_error() {
        let parsed = parse_server_message(r#"{"message":"model#telemetry","data":{}}"#).unwrap();
        assert_eq!(
            parsed,
            ServerMessage::Unknown {
                tag: "model#telemetry".to_owned()
            }
        );
        assert_eq!(parsed.tag(), "model#telemetry");
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        assert!(parse_server_message("not json").is_err());
        assert!(parse_server_message(r#"{"data":{}}"#).is_err());
        assert!(parse_server_message(r#"{"message":"model#status"}"#).is_err());
        assert!(parse_server_message(r#"{"message":"model#patch","data":{}}"#).is_err());
    }

    #[test]
    fn parse_aoi_loaded() {
        let text = json!({
            "message": "model#aoi",
            "data": { "id": 9, "checkpoint_id": 4, "name": "Seattle" }
        })
        .to_string();
        assert_eq!(
            parse_server_message(&text).unwrap(),
            ServerMessage::AoiLoaded(AoiLoaded {
                id: AoiId::new(9),
                checkpoint_id: Some(CheckpointId::new(4)),
                name: Some("Seattle".to_owned()),
            })
        );
    }
}
