use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use cswitch_common::ClientKind;

use crate::errors::{ProviderFindings, RegistryError, RegistryResult, ValidationReport};
use crate::provider::{
    GeminiProvider, Provider, ProviderId, default_gemini_providers, default_providers,
};

const DUPLICATE_SUFFIX: &str = " (copy)";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProviderEnvelope {
    #[serde(default)]
    providers: Vec<Provider>,
}

/// File-backed provider lists, one JSON file per client kind under `dir`.
///
/// Reads are lock-free and hit the disk every time; writers are serialized and
/// replace files atomically (temp file + rename).
#[derive(Debug)]
pub struct ProviderStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ProviderStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: ClientKind) -> PathBuf {
        self.dir.join(kind.provider_file_name())
    }

    /// Missing or empty files yield the built-in default list.
    pub async fn load(&self, kind: ClientKind) -> RegistryResult<Vec<Provider>> {
        ensure_relay_kind(kind)?;
        let path = self.path_for(kind);
        let Some(data) = read_optional(&path).await? else {
            return Ok(default_providers(kind));
        };
        let envelope: ProviderEnvelope =
            serde_json::from_slice(&data).map_err(|source| RegistryError::Parse {
                path: path.clone(),
                source,
            })?;
        if envelope.providers.is_empty() {
            return Ok(default_providers(kind));
        }
        Ok(envelope.providers)
    }

    /// Rejects the whole list if any provider has a validation finding.
    pub async fn save(&self, kind: ClientKind, providers: &[Provider]) -> RegistryResult<()> {
        ensure_relay_kind(kind)?;
        let _guard = self.write_lock.lock().await;
        self.save_locked(kind, providers).await
    }

    /// Clones `source_id` under `max(id) + 1`, disabled, and persists the list.
    pub async fn duplicate(
        &self,
        kind: ClientKind,
        source_id: ProviderId,
    ) -> RegistryResult<Provider> {
        ensure_relay_kind(kind)?;
        let _guard = self.write_lock.lock().await;
        let mut providers = self.load(kind).await?;
        let source = providers
            .iter()
            .find(|provider| provider.id == source_id)
            .ok_or(RegistryError::NotFound(source_id))?;

        let next_id = providers.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let mut cloned = source.clone();
        cloned.id = next_id;
        cloned.name = format!("{}{}", source.name, DUPLICATE_SUFFIX);
        cloned.enabled = false;

        providers.push(cloned.clone());
        self.save_locked(kind, &providers).await?;
        Ok(cloned)
    }

    pub async fn load_gemini(&self) -> RegistryResult<Vec<GeminiProvider>> {
        let path = self.path_for(ClientKind::Gemini);
        let Some(data) = read_optional(&path).await? else {
            return Ok(default_gemini_providers());
        };
        let providers: Vec<GeminiProvider> =
            serde_json::from_slice(&data).map_err(|source| RegistryError::Parse {
                path: path.clone(),
                source,
            })?;
        if providers.is_empty() {
            return Ok(default_gemini_providers());
        }
        Ok(providers)
    }

    pub async fn save_gemini(&self, providers: &[GeminiProvider]) -> RegistryResult<()> {
        let _guard = self.write_lock.lock().await;
        let data = serde_json::to_vec_pretty(providers).map_err(|source| RegistryError::Parse {
            path: self.path_for(ClientKind::Gemini),
            source,
        })?;
        write_atomic(&self.path_for(ClientKind::Gemini), &data).await
    }

    async fn save_locked(&self, kind: ClientKind, providers: &[Provider]) -> RegistryResult<()> {
        let report = validate_all(providers);
        if !report.is_empty() {
            return Err(RegistryError::Invalid(report));
        }
        let path = self.path_for(kind);
        let envelope = ProviderEnvelope {
            providers: providers.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&envelope).map_err(|source| RegistryError::Parse {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &data).await
    }
}

pub fn validate_all(providers: &[Provider]) -> ValidationReport {
    let providers = providers
        .iter()
        .filter_map(|provider| {
            let findings = provider.validate_configuration();
            if findings.is_empty() {
                None
            } else {
                Some(ProviderFindings {
                    provider: provider.name.clone(),
                    findings,
                })
            }
        })
        .collect();
    ValidationReport { providers }
}

fn ensure_relay_kind(kind: ClientKind) -> RegistryResult<()> {
    match kind {
        ClientKind::Claude | ClientKind::Codex => Ok(()),
        ClientKind::Gemini => Err(RegistryError::UnsupportedKind(kind)),
    }
}

async fn read_optional(path: &Path) -> RegistryResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Ok(None),
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RegistryError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> RegistryResult<()> {
    let io_err = |source: std::io::Error| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)
}
