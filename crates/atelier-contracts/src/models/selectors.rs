use crate::requests::OperationKind;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub capability: String,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        self.select_preferring(requested, capability, None)
    }

    pub fn select_for(
        &self,
        requested: Option<&str>,
        operation: OperationKind,
        preferred_provider: Option<&str>,
    ) -> Result<ModelSelection, String> {
        self.select_preferring(requested, operation.capability(), preferred_provider)
    }

    /// Resolves `requested`, falling back to the first capable model. When a provider is
    /// preferred, its first capable model wins over the registry-wide default.
    pub fn select_preferring(
        &self,
        requested: Option<&str>,
        capability: &str,
        preferred_provider: Option<&str>,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        capability: capability.to_string(),
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let candidates = self.registry.by_capability(capability);
        let preferred = preferred_provider.and_then(|provider| {
            candidates
                .iter()
                .find(|model| model.provider == provider)
                .cloned()
        });
        let Some(model) = preferred.or_else(|| candidates.first().cloned()) else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            capability: capability.to_string(),
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}
