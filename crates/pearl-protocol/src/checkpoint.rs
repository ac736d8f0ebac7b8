//! Checkpoint state and its reducer.
//!
//! A checkpoint is a saved model state plus the training samples drawn on
//! top of it. `mode` decides which samples may be drawn: points only while
//! retraining, class polygons while retraining or refining, brush polygons
//! (repaint with another checkpoint) only while refining.

use crate::geo::{Geometry, LngLat};
use crate::ids::CheckpointId;
use crate::message::ClassGeometry;
use crate::rest::{CheckpointRecord, ModelClass};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointMode {
    #[default]
    Run,
    Retrain,
    Refine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSample {
    pub name: String,
    pub color: String,
    pub points: Vec<LngLat>,
    pub polygons: Vec<Geometry>,
}

impl ClassSample {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            points: Vec::new(),
            polygons: Vec::new(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.points.len() + self.polygons.len()
    }

    /// Points merged with polygons into a single collection.
    pub fn to_class_geometry(&self) -> ClassGeometry {
        let mut geometries = Vec::with_capacity(self.polygons.len() + 1);
        geometries.push(Geometry::MultiPoint {
            coordinates: self.points.clone(),
        });
        geometries.extend(self.polygons.iter().cloned());
        ClassGeometry {
            name: self.name.clone(),
            color: self.color.clone(),
            geometry: Geometry::GeometryCollection { geometries },
        }
    }
}

impl From<&ModelClass> for ClassSample {
    fn from(class: &ModelClass) -> Self {
        Self::new(&class.name, &class.color)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: CheckpointId,
    pub name: String,
}

impl CheckpointSummary {
    /// Label used for AOI patch records, e.g. `Wetlands v2 (14)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}

/// Polygons to repaint with predictions from another checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBrush {
    pub checkpoint: CheckpointSummary,
    pub polygons: Vec<Geometry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Option<CheckpointId>,
    pub name: Option<String>,
    pub parent: Option<CheckpointId>,
    pub bookmarked: bool,
    pub mode: CheckpointMode,
    pub classes: IndexMap<String, ClassSample>,
    pub checkpoint_brushes: IndexMap<CheckpointId, CheckpointBrush>,
    pub active_item: Option<String>,
    pub sample_count: usize,
}

impl Checkpoint {
    /// Points and polygons across all classes.
    pub fn retrain_sample_count(&self) -> usize {
        self.classes.values().map(ClassSample::sample_count).sum()
    }

    /// Polygons across all classes and brushes.
    pub fn refine_sample_count(&self) -> usize {
        let class_polygons: usize = self.classes.values().map(|c| c.polygons.len()).sum();
        let brush_polygons: usize = self
            .checkpoint_brushes
            .values()
            .map(|b| b.polygons.len())
            .sum();
        class_polygons + brush_polygons
    }

    fn recount(&mut self) {
        let brush_polygons: usize = self
            .checkpoint_brushes
            .values()
            .map(|b| b.polygons.len())
            .sum();
        self.sample_count = self.retrain_sample_count() + brush_polygons;
    }

    fn clear_samples(&mut self) {
        for class in self.classes.values_mut() {
            class.points.clear();
            class.polygons.clear();
        }
        self.checkpoint_brushes.clear();
        self.sample_count = 0;
    }

    fn replace_classes(&mut self, classes: &[ModelClass]) {
        self.classes = classes
            .iter()
            .map(|class| (class.name.clone(), ClassSample::from(class)))
            .collect();
        self.recount();
    }
}

/// Fields to merge into the current checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPatch {
    pub id: Option<CheckpointId>,
    pub name: Option<String>,
    pub classes: Option<Vec<ModelClass>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointAction {
    Set(CheckpointPatch),
    /// A checkpoint fetched from the API replaces the current one.
    Receive {
        record: CheckpointRecord,
        mode: Option<CheckpointMode>,
    },
    SetMode(CheckpointMode),
    AddPoint {
        class: String,
        point: LngLat,
    },
    AddPolygon {
        class: String,
        polygon: Geometry,
    },
    AddBrushPolygon {
        checkpoint: CheckpointSummary,
        polygon: Geometry,
    },
    SetActiveItem(Option<String>),
    ClearSamples,
    /// Back to the baseline: no checkpoint.
    Reset,
}

pub fn reduce_checkpoint(
    state: Option<Checkpoint>,
    action: CheckpointAction,
) -> Option<Checkpoint> {
    match action {
        CheckpointAction::Reset => None,
        CheckpointAction::Set(patch) => {
            let mut checkpoint = state.unwrap_or_default();
            if let Some(id) = patch.id {
                checkpoint.id = Some(id);
            }
            if let Some(name) = patch.name {
                checkpoint.name = Some(name);
            }
            if let Some(classes) = patch.classes {
                checkpoint.replace_classes(&classes);
            }
            Some(checkpoint)
        }
        CheckpointAction::Receive { record, mode } => {
            let previous_mode = state.as_ref().map(|c| c.mode).unwrap_or_default();
            let mut checkpoint = Checkpoint {
                id: Some(record.id),
                name: Some(record.name),
                parent: record.parent,
                bookmarked: record.bookmarked,
                mode: mode.unwrap_or(previous_mode),
                ..Checkpoint::default()
            };
            checkpoint.replace_classes(&record.classes);
            Some(checkpoint)
        }
        CheckpointAction::SetMode(mode) => state.map(|mut c| {
            c.mode = mode;
            c
        }),
        CheckpointAction::SetActiveItem(item) => state.map(|mut c| {
            c.active_item = item;
            c
        }),
        CheckpointAction::ClearSamples => state.map(|mut c| {
            c.clear_samples();
            c
        }),
        CheckpointAction::AddPoint { class, point } => state.map(|mut c| {
            if c.mode != CheckpointMode::Retrain {
                debug!(mode = ?c.mode, "point samples require retrain mode");
                return c;
            }
            if let Some(sample) = c.classes.get_mut(&class) {
                sample.points.push(point);
                c.recount();
            }
            c
        }),
        CheckpointAction::AddPolygon { class, polygon } => state.map(|mut c| {
            if c.mode == CheckpointMode::Run {
                debug!("polygon samples require retrain or refine mode");
                return c;
            }
            if let Some(sample) = c.classes.get_mut(&class) {
                sample.polygons.push(polygon);
                c.recount();
            }
            c
        }),
        CheckpointAction::AddBrushPolygon {
            checkpoint,
            polygon,
        } => state.map(|mut c| {
            if c.mode != CheckpointMode::Refine {
                debug!(mode = ?c.mode, "brush samples require refine mode");
                return c;
            }
            c.checkpoint_brushes
                .entry(checkpoint.id)
                .or_insert_with(|| CheckpointBrush {
                    checkpoint,
                    polygons: Vec::new(),
                })
                .polygons
                .push(polygon);
            c.recount();
            c
        }),
    }
}
