use std::sync::Arc;

use ratchet_engine::ModelQueue;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown model label `{0}`")]
    UnknownLabel(String),
}

/// The process-wide list of model types a runner can schedule.
///
/// Built explicitly at startup and passed into the runner; there is no
/// hidden global registration.
#[derive(Default)]
pub struct ModelRegistry {
    models: Vec<Arc<dyn ModelQueue>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    pub fn register(&mut self, model: Arc<dyn ModelQueue>) {
        self.models.push(model);
    }

    pub fn labels(&self) -> Vec<String> {
        self.models
            .iter()
            .map(|model| model.label().to_string())
            .collect()
    }

    /// Select the models to run: every registered model when `labels` is
    /// empty, otherwise the named ones, minus `exclude` either way. Unknown
    /// labels in either list are an error rather than a silent no-op.
    pub fn resolve(
        &self,
        labels: &[String],
        exclude: &[String],
    ) -> Result<Vec<Arc<dyn ModelQueue>>, RegistryError> {
        for label in labels.iter().chain(exclude) {
            if !self.models.iter().any(|model| model.label() == *label) {
                return Err(RegistryError::UnknownLabel(label.clone()));
            }
        }
        let selected = self
            .models
            .iter()
            .filter(|model| labels.is_empty() || labels.iter().any(|l| l == model.label()))
            .filter(|model| !exclude.iter().any(|l| l == model.label()))
            .map(Arc::clone)
            .collect();
        Ok(selected)
    }
}
