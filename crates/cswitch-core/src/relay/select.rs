use std::collections::{BTreeMap, HashMap};

use time::OffsetDateTime;

use cswitch_provider_core::Provider;

#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub provider: &'a Provider,
    pub level: i32,
    pub candidates: usize,
    pub levels: usize,
}

/// Why no provider could serve a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no providers available")]
    NoProviders,
    #[error("{}", no_compatible_message(.model.as_deref(), *.skipped))]
    NoCompatible { model: Option<String>, skipped: usize },
    #[error("{}", all_blacklisted_message(.model.as_deref(), *.blacklisted, *.skipped))]
    AllBlacklisted {
        model: Option<String>,
        blacklisted: usize,
        skipped: usize,
    },
}

fn no_compatible_message(model: Option<&str>, skipped: usize) -> String {
    match model {
        Some(model) => format!(
            "no provider supports model '{model}' ({skipped} incompatible or misconfigured provider(s) skipped)"
        ),
        None => format!("no providers available ({skipped} misconfigured provider(s) skipped)"),
    }
}

fn all_blacklisted_message(model: Option<&str>, blacklisted: usize, skipped: usize) -> String {
    let subject = match model {
        Some(model) => format!("all providers supporting model '{model}'"),
        None => "all providers".to_string(),
    };
    format!("{subject} are blacklisted ({blacklisted} blacklisted, {skipped} skipped in total)")
}

/// Filters `providers` down to usable candidates and picks the first one of
/// the lowest level. Single-shot: the caller never falls through to another.
pub fn select_provider<'a>(
    providers: &'a [Provider],
    model: Option<&str>,
    blacklisted: &HashMap<String, OffsetDateTime>,
) -> Result<Selection<'a>, SelectionError> {
    let mut routable = 0usize;
    let mut incompatible = 0usize;
    let mut blocked = 0usize;
    let mut groups: BTreeMap<i32, Vec<&'a Provider>> = BTreeMap::new();

    for provider in providers {
        if !provider.is_routable() {
            continue;
        }
        routable += 1;

        if provider.has_blocking_findings() {
            tracing::warn!(
                event = "relay.provider_skipped",
                provider = %provider.name,
                reason = "invalid_configuration",
            );
            incompatible += 1;
            continue;
        }
        if let Some(model) = model
            && !provider.is_model_supported(model)
        {
            tracing::debug!(
                event = "relay.provider_skipped",
                provider = %provider.name,
                model,
                reason = "model_unsupported",
            );
            incompatible += 1;
            continue;
        }
        if let Some(until) = blacklisted.get(&provider.name) {
            tracing::info!(
                event = "relay.provider_skipped",
                provider = %provider.name,
                reason = "blacklisted",
                until = %until,
            );
            blocked += 1;
            continue;
        }

        groups
            .entry(provider.effective_level())
            .or_default()
            .push(provider);
    }

    let candidates = groups.values().map(Vec::len).sum();
    let levels = groups.len();
    let Some((&level, group)) = groups.iter().next() else {
        let model = model.map(str::to_string);
        return Err(if routable == 0 {
            SelectionError::NoProviders
        } else if blocked > 0 {
            SelectionError::AllBlacklisted {
                model,
                blacklisted: blocked,
                skipped: blocked + incompatible,
            }
        } else {
            SelectionError::NoCompatible {
                model,
                skipped: incompatible,
            }
        });
    };

    Ok(Selection {
        provider: group[0],
        level,
        candidates,
        levels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: i64, name: &str, level: Option<i32>, models: &[&str]) -> Provider {
        Provider {
            id,
            name: name.to_string(),
            api_url: "https://upstream.test".to_string(),
            api_key: "sk".to_string(),
            enabled: true,
            level,
            supported_models: models.iter().map(|m| (m.to_string(), true)).collect(),
            ..Default::default()
        }
    }

    fn until() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::days(30_000)
    }

    #[test]
    fn lowest_level_first_provider_wins() {
        let providers = vec![
            provider(1, "b", Some(2), &[]),
            provider(2, "a", Some(1), &[]),
            provider(3, "c", Some(1), &[]),
        ];
        let selected = select_provider(&providers, Some("any"), &HashMap::new()).unwrap();
        assert_eq!(selected.provider.name, "a");
        assert_eq!(selected.level, 1);
        assert_eq!(selected.candidates, 3);
        assert_eq!(selected.levels, 2);
    }

    #[test]
    fn unset_and_non_positive_levels_share_level_one() {
        let providers = vec![
            provider(1, "explicit", Some(2), &[]),
            provider(2, "zero", Some(0), &[]),
            provider(3, "unset", None, &[]),
        ];
        let selected = select_provider(&providers, None, &HashMap::new()).unwrap();
        assert_eq!(selected.provider.name, "zero");
        assert_eq!(selected.level, 1);
    }

    #[test]
    fn blacklisted_level_one_falls_to_level_two() {
        let providers = vec![
            provider(1, "p1", Some(1), &["claude-sonnet-4"]),
            provider(2, "p2", Some(1), &["claude-sonnet-4"]),
            provider(3, "q", Some(2), &["claude-sonnet-4"]),
        ];
        let blacklisted = HashMap::from([
            ("p1".to_string(), until()),
            ("p2".to_string(), until()),
        ]);
        let selected = select_provider(&providers, Some("claude-sonnet-4"), &blacklisted).unwrap();
        assert_eq!(selected.provider.name, "q");
        assert_eq!(selected.level, 2);
    }

    #[test]
    fn unroutable_providers_are_not_counted() {
        let mut disabled = provider(1, "off", None, &[]);
        disabled.enabled = false;
        let mut keyless = provider(2, "keyless", None, &[]);
        keyless.api_key = " ".to_string();
        assert_eq!(
            select_provider(&[disabled, keyless], Some("m"), &HashMap::new()).unwrap_err(),
            SelectionError::NoProviders
        );
        assert_eq!(
            select_provider(&[], None, &HashMap::new()).unwrap_err(),
            SelectionError::NoProviders
        );
    }

    #[test]
    fn diagnostics_distinguish_incompatible_from_blacklisted() {
        let providers = vec![
            provider(1, "a", None, &["gpt-5"]),
            provider(2, "b", None, &["claude-*"]),
        ];
        let err = select_provider(&providers, Some("gemini-2.5-pro"), &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            SelectionError::NoCompatible {
                model: Some("gemini-2.5-pro".to_string()),
                skipped: 2
            }
        );
        assert!(err.to_string().contains("gemini-2.5-pro"));

        let blacklisted = HashMap::from([("b".to_string(), until())]);
        let err = select_provider(&providers, Some("claude-opus-4"), &blacklisted).unwrap_err();
        assert_eq!(
            err,
            SelectionError::AllBlacklisted {
                model: Some("claude-opus-4".to_string()),
                blacklisted: 1,
                skipped: 2
            }
        );
        assert!(err.to_string().contains("blacklisted"));
    }

    #[test]
    fn error_class_findings_are_skipped_but_warnings_are_not() {
        let mut broken = provider(1, "broken", None, &["gpt-5"]);
        broken.model_mapping.insert("gpt-4", "gpt-4o");
        let mut advisory = provider(2, "advisory", Some(3), &[]);
        advisory.model_mapping.insert("gpt-4", "gpt-4");

        let providers = vec![broken, advisory];
        let selected = select_provider(&providers, Some("gpt-4"), &HashMap::new()).unwrap();
        assert_eq!(selected.provider.name, "advisory");
    }

    #[test]
    fn missing_model_skips_model_filtering() {
        let providers = vec![provider(1, "narrow", None, &["only-this"])];
        let selected = select_provider(&providers, None, &HashMap::new()).unwrap();
        assert_eq!(selected.provider.name, "narrow");
    }
}
