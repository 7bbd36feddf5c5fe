use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use cswitch_common::ClientKind;

pub type ProviderId = i64;

/// One configured upstream endpoint for the claude or codex family.
///
/// Field names follow the on-disk JSON written by the configuration UI.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub official_site: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub accent: String,
    #[serde(default)]
    pub enabled: bool,
    /// Whitelist of model patterns. Only keys mapped to `true` count.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub supported_models: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "ModelMapping::is_empty")]
    pub model_mapping: ModelMapping,
    /// Priority tier; unset or non-positive means 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
}

impl Provider {
    pub fn effective_level(&self) -> i32 {
        match self.level {
            Some(level) if level > 0 => level,
            _ => 1,
        }
    }

    pub fn supported_patterns(&self) -> impl Iterator<Item = &str> {
        self.supported_models
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(pattern, _)| pattern.as_str())
    }

    pub fn has_whitelist(&self) -> bool {
        self.supported_patterns().next().is_some()
    }

    pub fn has_mapping(&self) -> bool {
        !self.model_mapping.is_empty()
    }

    pub fn is_routable(&self) -> bool {
        self.enabled && !self.api_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

/// Built-in list used when a kind has no provider file (or an empty one).
pub fn default_providers(kind: ClientKind) -> Vec<Provider> {
    let api_url = match kind {
        ClientKind::Codex => "https://api.openai.com/v1",
        _ => "https://api.anthropic.com",
    };
    vec![Provider {
        id: 1,
        name: "default".to_string(),
        api_url: api_url.to_string(),
        enabled: true,
        level: Some(1),
        ..Default::default()
    }]
}

/// Requested-model pattern to internal-model pattern, kept in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelMapping(Vec<(String, String)>);

impl ModelMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Inserts or replaces, keeping the original position of an existing key.
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        if let Some((_, value)) = self.0.iter_mut().find(|(key, _)| *key == from) {
            *value = to;
            return;
        }
        self.0.push((from, to));
    }

    pub fn get(&self, from: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == from)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ModelMapping {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut mapping = ModelMapping::new();
        for (k, v) in iter {
            mapping.insert(k, v);
        }
        mapping
    }
}

impl Serialize for ModelMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ModelMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = ModelMapping;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of model name to model name")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(ModelMapping::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut mapping = ModelMapping::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    mapping.insert(k, v);
                }
                Ok(mapping)
            }
        }

        deserializer.deserialize_any(MappingVisitor)
    }
}

/// Entry of the gemini family. Only the first enabled entry with a base URL is used.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiProvider {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub website_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default)]
    pub enabled: bool,
}

pub fn default_gemini_providers() -> Vec<GeminiProvider> {
    vec![GeminiProvider {
        id: "google-official".to_string(),
        name: "Google Official".to_string(),
        website_url: "https://ai.google.dev".to_string(),
        api_key_url: "https://aistudio.google.com/apikey".to_string(),
        base_url: "https://generativelanguage.googleapis.com".to_string(),
        category: "official".to_string(),
        enabled: false,
        ..Default::default()
    }]
}

pub fn active_gemini_provider(providers: &[GeminiProvider]) -> Option<&GeminiProvider> {
    providers
        .iter()
        .find(|provider| provider.enabled && !provider.base_url.trim().is_empty())
}
