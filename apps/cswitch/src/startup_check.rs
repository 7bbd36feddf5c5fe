use std::fmt;

use cswitch_common::ClientKind;
use cswitch_provider_core::{ProviderStore, Severity};

/// Configuration problem worth telling the operator about before serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StartupWarning {
    LoadFailed { kind: ClientKind, error: String },
    InvalidProvider { kind: ClientKind, provider: String, message: String },
    Unrestricted { kind: ClientKind, provider: String },
    NoEnabledProvider { kind: ClientKind },
}

impl fmt::Display for StartupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupWarning::LoadFailed { kind, error } => {
                write!(f, "{kind}: failed to load providers: {error}")
            }
            StartupWarning::InvalidProvider {
                kind,
                provider,
                message,
            } => write!(f, "{kind}/{provider}: {message}; provider is skipped at runtime"),
            StartupWarning::Unrestricted { kind, provider } => write!(
                f,
                "{kind}/{provider}: neither supportedModels nor modelMapping is set; every model is forwarded as-is"
            ),
            StartupWarning::NoEnabledProvider { kind } => {
                write!(f, "{kind}: no enabled provider; requests will be answered with 404")
            }
        }
    }
}

pub(crate) async fn check_providers(registry: &ProviderStore) -> Vec<StartupWarning> {
    let mut warnings = Vec::new();
    for kind in [ClientKind::Claude, ClientKind::Codex] {
        let providers = match registry.load(kind).await {
            Ok(providers) => providers,
            Err(err) => {
                warnings.push(StartupWarning::LoadFailed {
                    kind,
                    error: err.to_string(),
                });
                continue;
            }
        };

        let enabled: Vec<_> = providers.iter().filter(|p| p.enabled).collect();
        if enabled.is_empty() {
            warnings.push(StartupWarning::NoEnabledProvider { kind });
        }
        for provider in enabled {
            for finding in provider.validate_configuration() {
                if finding.severity() == Severity::Error {
                    warnings.push(StartupWarning::InvalidProvider {
                        kind,
                        provider: provider.name.clone(),
                        message: finding.message,
                    });
                }
            }
            if !provider.has_whitelist() && !provider.has_mapping() {
                warnings.push(StartupWarning::Unrestricted {
                    kind,
                    provider: provider.name.clone(),
                });
            }
        }
    }
    warnings
}

pub(crate) fn log_warnings(warnings: &[StartupWarning]) {
    for warning in warnings {
        tracing::warn!(event = "startup.provider_config", "{warning}");
    }
}
