//! Model compatibility: wildcard matching, support checks, effective-model
//! rewriting and configuration validation.

use serde::Serialize;

use crate::provider::Provider;

/// Matches `text` against a pattern holding zero or one `*`.
///
/// Patterns with two or more `*` never match. Prefix and suffix may not overlap.
pub fn match_wildcard(pattern: &str, text: &str) -> bool {
    match split_wildcard(pattern) {
        WildcardPattern::Exact => pattern == text,
        WildcardPattern::Single { prefix, suffix } => {
            text.len() >= prefix.len() + suffix.len()
                && text.starts_with(prefix)
                && text.ends_with(suffix)
        }
        WildcardPattern::Unsupported => false,
    }
}

/// Substitutes the segment of `input` captured by `pattern`'s `*` into
/// `replacement`'s `*`. Without a capture on either side the replacement is
/// returned as-is.
pub fn apply_wildcard_mapping(pattern: &str, replacement: &str, input: &str) -> String {
    if !replacement.contains('*') {
        return replacement.to_string();
    }
    let WildcardPattern::Single { prefix, suffix } = split_wildcard(pattern) else {
        return replacement.to_string();
    };
    if !match_wildcard(pattern, input) {
        return replacement.to_string();
    }
    let captured = &input[prefix.len()..input.len() - suffix.len()];
    replacement.replacen('*', captured, 1)
}

enum WildcardPattern<'a> {
    Exact,
    Single { prefix: &'a str, suffix: &'a str },
    Unsupported,
}

fn split_wildcard(pattern: &str) -> WildcardPattern<'_> {
    let mut parts = pattern.split('*');
    let prefix = parts.next().unwrap_or_default();
    match (parts.next(), parts.next()) {
        (None, _) => WildcardPattern::Exact,
        (Some(suffix), None) => WildcardPattern::Single { prefix, suffix },
        (Some(_), Some(_)) => WildcardPattern::Unsupported,
    }
}

impl Provider {
    /// Whether this provider can serve `model`, natively or through a mapping.
    ///
    /// A provider without whitelist and mapping supports everything.
    pub fn is_model_supported(&self, model: &str) -> bool {
        if !self.has_whitelist() && !self.has_mapping() {
            return true;
        }
        if self
            .supported_patterns()
            .any(|pattern| match_wildcard(pattern, model))
        {
            return true;
        }
        self.model_mapping
            .iter()
            .any(|(from, _)| match_wildcard(from, model))
    }

    /// Model name to send upstream. Exact mapping keys win over wildcard keys;
    /// wildcard keys are tried in mapping order.
    pub fn effective_model(&self, requested: &str) -> String {
        if let Some(target) = self.model_mapping.get(requested) {
            return target.to_string();
        }
        for (from, to) in self.model_mapping.iter() {
            if from.contains('*') && match_wildcard(from, requested) {
                return apply_wildcard_mapping(from, to, requested);
            }
        }
        requested.to_string()
    }

    pub fn validate_configuration(&self) -> Vec<ValidationFinding> {
        let mut findings = Vec::new();

        if self.has_whitelist() {
            for (from, to) in self.model_mapping.iter() {
                if to.contains('*') {
                    continue;
                }
                let supported = self
                    .supported_patterns()
                    .any(|pattern| match_wildcard(pattern, to));
                if !supported {
                    findings.push(ValidationFinding {
                        kind: FindingKind::UnsupportedMappingTarget,
                        field: "modelMapping",
                        key: from.to_string(),
                        message: format!(
                            "mapping '{from}' -> '{to}' targets a model missing from supportedModels"
                        ),
                    });
                }
            }
        }

        if self.has_mapping() && !self.has_whitelist() {
            findings.push(ValidationFinding {
                kind: FindingKind::MappingWithoutWhitelist,
                field: "supportedModels",
                key: String::new(),
                message: "modelMapping is set without supportedModels; targets cannot be verified"
                    .to_string(),
            });
        }

        for (from, to) in self.model_mapping.iter() {
            if from == to {
                findings.push(ValidationFinding {
                    kind: FindingKind::SelfMapping,
                    field: "modelMapping",
                    key: from.to_string(),
                    message: format!("model '{from}' maps to itself"),
                });
            }
        }

        findings
    }

    pub fn has_blocking_findings(&self) -> bool {
        self.validate_configuration()
            .iter()
            .any(|finding| finding.severity() == Severity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    UnsupportedMappingTarget,
    MappingWithoutWhitelist,
    SelfMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl FindingKind {
    pub fn severity(&self) -> Severity {
        match self {
            FindingKind::UnsupportedMappingTarget => Severity::Error,
            FindingKind::MappingWithoutWhitelist | FindingKind::SelfMapping => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFinding {
    pub kind: FindingKind,
    /// Provider field the finding is about.
    pub field: &'static str,
    /// Offending mapping key, empty when the finding concerns the whole field.
    pub key: String,
    pub message: String,
}

impl ValidationFinding {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelMapping;

    fn provider(supported: &[&str], mapping: &[(&str, &str)]) -> Provider {
        Provider {
            id: 1,
            name: "p".to_string(),
            api_url: "https://example.invalid".to_string(),
            api_key: "k".to_string(),
            enabled: true,
            supported_models: supported.iter().map(|m| (m.to_string(), true)).collect(),
            model_mapping: mapping.iter().copied().collect::<ModelMapping>(),
            ..Default::default()
        }
    }

    #[test]
    fn wildcard_matches_prefix_and_suffix() {
        assert!(match_wildcard("claude-*", "claude-sonnet-4"));
        assert!(match_wildcard("*-latest", "gpt-5-latest"));
        assert!(match_wildcard("gpt-*-mini", "gpt-4o-mini"));
        assert!(match_wildcard("*", "anything"));
        assert!(!match_wildcard("claude-*", "gpt-4"));
        assert!(match_wildcard("exact", "exact"));
        assert!(!match_wildcard("exact", "exact-not"));
    }

    #[test]
    fn overlapping_prefix_and_suffix_do_not_match() {
        assert!(!match_wildcard("ab*ba", "aba"));
        assert!(match_wildcard("ab*ba", "abba"));
    }

    #[test]
    fn two_wildcards_never_match() {
        for text in ["", "a", "claude-3-opus", "**"] {
            assert!(!match_wildcard("*-*", text));
            assert!(!match_wildcard("claude-*-*", text));
        }
    }

    #[test]
    fn unconfigured_provider_supports_everything() {
        let p = provider(&[], &[]);
        for model in ["", "claude-sonnet-4", "gpt-5", "***"] {
            assert!(p.is_model_supported(model));
        }
    }

    #[test]
    fn adding_whitelist_entries_keeps_existing_support() {
        let mut p = provider(&["claude-sonnet-4"], &[("claude-*", "claude-sonnet-4")]);
        let models = ["claude-sonnet-4", "claude-opus-4", "gpt-5", "gemini-2.5-pro"];
        let before: Vec<bool> = models.iter().map(|m| p.is_model_supported(m)).collect();
        p.supported_models.insert("gpt-*".to_string(), true);
        for (model, was) in models.iter().zip(before) {
            if was {
                assert!(p.is_model_supported(model), "{model} lost support");
            }
        }
        assert!(p.is_model_supported("gpt-5"));
    }

    #[test]
    fn support_through_mapping_key() {
        let p = provider(&["anthropic/claude-*"], &[("claude-*", "anthropic/claude-*")]);
        assert!(p.is_model_supported("claude-opus-4"));
        assert!(!p.is_model_supported("gpt-5"));
    }

    #[test]
    fn wildcard_mapping_substitutes_captured_segment() {
        let p = provider(&["anthropic/claude-*"], &[("claude-*", "anthropic/claude-*")]);
        assert_eq!(p.effective_model("claude-opus-4"), "anthropic/claude-opus-4");
        assert_eq!(p.effective_model("gpt-5"), "gpt-5");
    }

    #[test]
    fn exact_mapping_beats_wildcard_and_is_stable() {
        let p = provider(
            &["x", "y"],
            &[("claude-*", "x"), ("claude-opus-4", "y")],
        );
        for _ in 0..3 {
            assert_eq!(p.effective_model("claude-opus-4"), "y");
            assert_eq!(p.effective_model("claude-haiku"), "x");
        }
    }

    #[test]
    fn literal_replacement_ignores_capture() {
        assert_eq!(apply_wildcard_mapping("claude-*", "fixed", "claude-x"), "fixed");
        assert_eq!(apply_wildcard_mapping("exact", "out-*", "exact"), "out-*");
    }

    #[test]
    fn unsupported_target_is_error_class() {
        let p = provider(&["a"], &[("req", "b")]);
        let findings = p.validate_configuration();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::UnsupportedMappingTarget);
        assert_eq!(findings[0].key, "req");
        assert!(p.has_blocking_findings());
    }

    #[test]
    fn wildcard_targets_are_not_checked() {
        let p = provider(&["a"], &[("claude-*", "vendor/*")]);
        assert!(p.validate_configuration().is_empty());
    }

    #[test]
    fn advisory_findings_do_not_block() {
        let p = provider(&[], &[("m", "m")]);
        let kinds: Vec<FindingKind> = p.validate_configuration().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![FindingKind::MappingWithoutWhitelist, FindingKind::SelfMapping]
        );
        assert!(!p.has_blocking_findings());
    }
}
