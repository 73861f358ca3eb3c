use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn new(name: &str, provider: &str, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: capabilities
                .iter()
                .map(|item| (*item).to_string())
                .collect(),
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known models in preference order; the first capable model is the default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn from_specs(specs: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: specs
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    [
        ModelSpec::new("gemini-2.5-flash-image-preview", "gemini", &["image"]),
        ModelSpec::new("gemini-2.5-flash", "gemini", &["text"]),
        ModelSpec::new("gemini-2.5-flash-image", "gemini", &["image"]),
        ModelSpec::new("dryrun-image-1", "dryrun", &["image"]),
        ModelSpec::new("dryrun-text-1", "dryrun", &["text"]),
    ]
    .into_iter()
    .map(|spec| (spec.name.clone(), spec))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, ModelSpec};

    #[test]
    fn default_registry_prefers_gemini_per_capability() {
        let registry = ModelRegistry::new(None);
        let image = registry.by_capability("image");
        let text = registry.by_capability("text");
        assert_eq!(image[0].name, "gemini-2.5-flash-image-preview");
        assert_eq!(text[0].name, "gemini-2.5-flash");
        assert!(image.iter().all(|spec| spec.supports("image")));
    }

    #[test]
    fn ensure_checks_capability() {
        let registry = ModelRegistry::from_specs([ModelSpec::new("m", "scripted", &["text"])]);
        assert!(registry.ensure("m", "text").is_some());
        assert!(registry.ensure("m", "image").is_none());
        assert!(registry.ensure("missing", "text").is_none());
    }
}
