use std::collections::BTreeMap;

use crate::{
    errors::{ConfigError, ErrorKind, RelayFailure},
    models::BackendEndpoint,
};

#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, BackendEndpoint>,
}

impl BackendRegistry {
    pub fn new<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, BackendEndpoint)>,
        S: Into<String>,
    {
        let mut backends = BTreeMap::new();
        for (model, endpoint) in entries {
            let model = model.into();
            if model.trim().is_empty() {
                return Err(ConfigError::InvalidEntry {
                    entry: format!("={endpoint}"),
                    reason: "model identifier is empty".to_owned(),
                });
            }
            if backends.insert(model.clone(), endpoint).is_some() {
                return Err(ConfigError::InvalidEntry {
                    entry: model,
                    reason: "model is mapped more than once".to_owned(),
                });
            }
        }

        if backends.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        Ok(Self { backends })
    }

    pub fn lookup(&self, model: &str) -> Result<&BackendEndpoint, RelayFailure> {
        self.backends.get(model).ok_or_else(|| {
            RelayFailure::new(
                ErrorKind::UnknownModel,
                format!(
                    "unknown model `{model}`; known models: [{}]",
                    self.models().join(", ")
                ),
            )
        })
    }

    pub fn models(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &BackendEndpoint)> {
        self.backends
            .iter()
            .map(|(model, endpoint)| (model.as_str(), endpoint))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
