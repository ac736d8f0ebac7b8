use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Points plus polygons required across all classes before retraining.
    pub min_sample_count: usize,
    /// Wait before clearing a completed prediction overlay.
    pub prediction_settle_delay: Duration,
    /// Imagery mosaic for projects created on first inference.
    pub project_mosaic: String,
    pub project_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_sample_count: 10,
            prediction_settle_delay: Duration::from_secs(1),
            project_mosaic: "naip.latest".to_owned(),
            project_name: "Untitled".to_owned(),
        }
    }
}

impl SessionConfig {
    pub fn min_sample_count(mut self, count: usize) -> Self {
        self.min_sample_count = count;
        self
    }

    pub fn prediction_settle_delay(mut self, delay: Duration) -> Self {
        self.prediction_settle_delay = delay;
        self
    }

    pub fn project_mosaic(mut self, mosaic: impl Into<String>) -> Self {
        self.project_mosaic = mosaic.into();
        self
    }

    pub fn project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// Error text shown when retraining is attempted with too few samples.
    pub(crate) fn not_enough_samples_message(&self) -> String {
        let plural = if self.min_sample_count == 1 { "" } else { "s" };
        format!(
            "At least {} sample{plural} should be provided for retraining.",
            self.min_sample_count
        )
    }
}
