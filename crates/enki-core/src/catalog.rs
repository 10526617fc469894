//! Static model catalog, grouped by category.
//!
//! Selection lists are flattened as a category header followed by its models.
//! Headers are explicit [`CatalogEntry::Category`] values and never resolve to
//! a model.

use serde::Serialize;

use crate::error::ChatError;
use crate::types::Provider;

/// One row of a flattened selection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum CatalogEntry {
    Category(String),
    Model(String),
}

impl CatalogEntry {
    pub fn is_selectable(&self) -> bool {
        matches!(self, CatalogEntry::Model(_))
    }
}

impl std::fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogEntry::Category(label) => write!(f, "🔹 {label}"),
            CatalogEntry::Model(id) => write!(f, "  {id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelGroup {
    pub label: String,
    pub provider: Provider,
    pub vision: bool,
    pub models: Vec<String>,
}

impl ModelGroup {
    fn new(label: &str, provider: Provider, vision: bool, models: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            provider,
            vision,
            models: models.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// A resolved, selectable model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: Provider,
    pub vision: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCatalog {
    groups: Vec<ModelGroup>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    pub fn new(groups: Vec<ModelGroup>) -> Self {
        Self { groups }
    }

    /// The models offered out of the box.
    pub fn builtin() -> Self {
        Self::new(vec![
            ModelGroup::new(
                "OpenAI Chat Completion Models",
                Provider::OpenAi,
                false,
                &[
                    "gpt-4.1", "gpt-4.1-mini", "gpt-4.1-nano", "o4-mini", "o3-mini", "o3",
                    "o1-mini", "o1-preview", "gpt-4o-mini", "gpt-4o-mini-2024-07-18",
                    "gpt-4o", "gpt-4o-2024-08-06", "gpt-4o-2024-05-13", "gpt-4-turbo",
                    "gpt-4-turbo-preview", "gpt-4-0125-preview", "gpt-4-1106-preview",
                    "gpt-3.5-turbo-1106", "gpt-3.5-turbo", "gpt-3.5-turbo-0301",
                    "gpt-3.5-turbo-0613", "gpt-3.5-turbo-16k", "gpt-3.5-turbo-16k-0613",
                    "gpt-4", "gpt-4-0314", "gpt-4-0613", "gpt-4-32k", "gpt-4-32k-0314",
                    "gpt-4-32k-0613",
                ],
            ),
            ModelGroup::new(
                "OpenAI Vision Models",
                Provider::OpenAi,
                true,
                &["gpt-4o", "gpt-4-turbo", "gpt-4-vision-preview"],
            ),
            ModelGroup::new(
                "Anthropic Chat Models",
                Provider::Anthropic,
                true,
                &[
                    "claude-sonnet-4-5",
                    "claude-opus-4-1",
                    "claude-3-7-sonnet-latest",
                    "claude-3-5-haiku-latest",
                ],
            ),
        ])
    }

    pub fn groups(&self) -> &[ModelGroup] {
        &self.groups
    }

    /// Every group as a header followed by its models.
    pub fn flatten(&self) -> Vec<CatalogEntry> {
        self.flatten_groups(|_| true)
    }

    /// Like [`flatten`](Self::flatten), limited to one provider's groups.
    pub fn flatten_for(&self, provider: Provider) -> Vec<CatalogEntry> {
        self.flatten_groups(|g| g.provider == provider)
    }

    fn flatten_groups(&self, keep: impl Fn(&ModelGroup) -> bool) -> Vec<CatalogEntry> {
        let mut out = Vec::new();
        for group in self.groups.iter().filter(|g| keep(g)) {
            out.push(CatalogEntry::Category(group.label.clone()));
            out.extend(group.models.iter().cloned().map(CatalogEntry::Model));
        }
        out
    }

    /// Resolve a row of [`flatten`](Self::flatten).
    pub fn resolve(&self, index: usize) -> Result<ModelInfo, ChatError> {
        self.resolve_in(&self.flatten(), index)
    }

    /// Resolve a row of [`flatten_for`](Self::flatten_for).
    pub fn resolve_for(&self, provider: Provider, index: usize) -> Result<ModelInfo, ChatError> {
        self.resolve_in(&self.flatten_for(provider), index)
    }

    fn resolve_in(&self, entries: &[CatalogEntry], index: usize) -> Result<ModelInfo, ChatError> {
        let entry = entries
            .get(index)
            .ok_or_else(|| ChatError::UnknownModel(format!("#{index}")))?;
        self.resolve_entry(entry)
    }

    pub fn resolve_entry(&self, entry: &CatalogEntry) -> Result<ModelInfo, ChatError> {
        match entry {
            CatalogEntry::Category(label) => Err(ChatError::CategorySelected(label.clone())),
            CatalogEntry::Model(id) => self.resolve_id(id),
        }
    }

    /// Resolve a model by id. Category labels are rejected, not matched.
    pub fn resolve_id(&self, id: &str) -> Result<ModelInfo, ChatError> {
        let id = id.trim();
        if let Some(group) = self.groups.iter().find(|g| g.label == id) {
            return Err(ChatError::CategorySelected(group.label.clone()));
        }
        let provider = self
            .provider_of(id)
            .ok_or_else(|| ChatError::UnknownModel(id.to_string()))?;
        Ok(ModelInfo {
            id: id.to_string(),
            provider,
            vision: self.supports_vision(id),
        })
    }

    /// Distinct model ids for a provider, in catalog order.
    pub fn models_for(&self, provider: Provider) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for group in self.groups.iter().filter(|g| g.provider == provider) {
            for model in &group.models {
                if !out.contains(&model.as_str()) {
                    out.push(model);
                }
            }
        }
        out
    }

    /// First model offered for a provider.
    pub fn default_for(&self, provider: Provider) -> Option<ModelInfo> {
        let id = self.models_for(provider).first()?.to_string();
        self.resolve_id(&id).ok()
    }

    pub fn supports_vision(&self, id: &str) -> bool {
        self.groups
            .iter()
            .any(|g| g.vision && g.models.iter().any(|m| m == id))
    }

    pub fn provider_of(&self, id: &str) -> Option<Provider> {
        self.groups
            .iter()
            .find(|g| g.models.iter().any(|m| m == id))
            .map(|g| g.provider)
    }
}
