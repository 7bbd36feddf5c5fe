use std::fmt;
use std::path::PathBuf;

use cswitch_common::ClientKind;

use crate::model::ValidationFinding;
use crate::provider::ProviderId;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid provider file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("provider configuration rejected:\n{0}")]
    Invalid(ValidationReport),
    #[error("no provider with id {0}")]
    NotFound(ProviderId),
    #[error("operation not supported for client kind {0}")]
    UnsupportedKind(ClientKind),
}

/// Findings grouped per provider name, produced when a save is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ValidationReport {
    pub providers: Vec<ProviderFindings>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProviderFindings {
    pub provider: String,
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.providers {
            for finding in &entry.findings {
                writeln!(f, "  - [{}] {}", entry.provider, finding.message)?;
            }
        }
        Ok(())
    }
}
