//! Name → model lookup.
//!
//! Built once at startup and read-only afterwards; lookups hand out shared
//! `Arc`s so many fits can use the same model instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::ball_stick::BallStick;
use crate::models::model::ForwardModel;
use crate::models::s0::S0;
use crate::models::tensor::Tensor;

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn ForwardModel>>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `S0`, `BallStick_r1..r3` and `Tensor`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn ForwardModel>> = vec![
            Arc::new(S0),
            Arc::new(BallStick::new(1)),
            Arc::new(BallStick::new(2)),
            Arc::new(BallStick::new(3)),
            Arc::new(Tensor),
        ];
        for model in builtins {
            // Built-in names are distinct.
            let _ = registry.register(model);
        }
        registry
    }

    pub fn register(&mut self, model: Arc<dyn ForwardModel>) -> Result<()> {
        let name = model.name().to_string();
        if self.models.contains_key(&name) {
            return Err(Error::DuplicateModel(name));
        }
        self.models.insert(name, model);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ForwardModel>> {
        self.models.get(name).cloned().ok_or_else(|| Error::UnknownModel {
            name: name.to_string(),
            available: self.names().join(", "),
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_addressable_by_name() {
        let registry = ModelRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec!["BallStick_r1", "BallStick_r2", "BallStick_r3", "S0", "Tensor"]
        );
        assert_eq!(registry.get("Tensor").unwrap().n_params(), 7);
        assert_eq!(registry.get("BallStick_r2").unwrap().name(), "BallStick_r2");
    }

    #[test]
    fn unknown_model_lists_alternatives() {
        let err = ModelRegistry::with_defaults().get("NODDI").unwrap_err();
        match err {
            Error::UnknownModel { name, available } => {
                assert_eq!(name, "NODDI");
                assert!(available.contains("Tensor"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ModelRegistry::with_defaults();
        let err = registry.register(Arc::new(Tensor)).unwrap_err();
        assert!(matches!(err, Error::DuplicateModel(_)));
    }
}
