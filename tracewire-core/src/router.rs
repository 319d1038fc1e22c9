use regex::Regex;

use crate::config::{ProviderCfg, ProviderRule};
use crate::error::{CoreResult, TracewireError};

/// Compiled identification rule
#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    provider: String,
}

/// Resolves a client's base URL to the provider identity reported on spans.
///
/// Rules are tried in order and the first match wins; no match yields the default.
#[derive(Debug)]
pub struct ProviderResolver {
    rules: Vec<CompiledRule>,
    default_provider: String,
}

impl ProviderResolver {
    /// Build a resolver by compiling regexes from config.
    pub fn new(cfg: &ProviderCfg) -> CoreResult<Self> {
        let mut rules = Vec::new();
        for ProviderRule { base_url, provider } in &cfg.rules {
            let regex = Regex::new(base_url).map_err(|e| {
                TracewireError::Configuration(format!("invalid provider regex '{base_url}': {e}"))
            })?;
            rules.push(CompiledRule {
                regex,
                provider: provider.clone(),
            });
        }
        Ok(Self {
            rules,
            default_provider: cfg.default.clone(),
        })
    }

    /// Provider identity for `base_url`. A missing URL resolves to the default.
    pub fn resolve<'a>(&'a self, base_url: Option<&str>) -> &'a str {
        if let Some(url) = base_url {
            for r in &self.rules {
                if r.regex.is_match(url) {
                    return &r.provider;
                }
            }
        }
        &self.default_provider
    }
}

impl Default for ProviderResolver {
    fn default() -> Self {
        let cfg = ProviderCfg::default();
        Self {
            rules: cfg
                .rules
                .into_iter()
                .filter_map(|ProviderRule { base_url, provider }| {
                    Regex::new(&base_url)
                        .ok()
                        .map(|regex| CompiledRule { regex, provider })
                })
                .collect(),
            default_provider: cfg.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with_rules(default: &str, rules: Vec<(&str, &str)>) -> ProviderCfg {
        ProviderCfg {
            default: default.into(),
            rules: rules
                .into_iter()
                .map(|(base_url, provider)| ProviderRule {
                    base_url: base_url.into(),
                    provider: provider.into(),
                })
                .collect(),
        }
    }

    #[test]
    fn default_rules_detect_azure() {
        let resolver = ProviderResolver::default();
        assert_eq!(
            resolver.resolve(Some("https://contoso.openai.azure.com/openai/deployments/gpt4")),
            "Azure"
        );
        assert_eq!(resolver.resolve(Some("https://api.openai.com/v1")), "OpenAI");
        assert_eq!(resolver.resolve(None), "OpenAI");
    }

    #[test]
    fn first_match_wins_rule_order() {
        let cfg = cfg_with_rules(
            "OpenAI",
            vec![("groq", "Groq"), ("api\\.groq\\.com", "GroqCloud")],
        );
        let resolver = ProviderResolver::new(&cfg).expect("should build resolver");
        assert_eq!(resolver.resolve(Some("https://api.groq.com/openai/v1")), "Groq");
    }

    #[test]
    fn no_match_falls_back_to_default() {
        let cfg = cfg_with_rules("Custom", vec![("azure", "Azure")]);
        let resolver = ProviderResolver::new(&cfg).expect("should build resolver");
        assert_eq!(resolver.resolve(Some("http://localhost:8080")), "Custom");
    }

    #[test]
    fn invalid_regex_yields_configuration_error() {
        let cfg = cfg_with_rules("OpenAI", vec![("(", "Broken")]);
        let err = ProviderResolver::new(&cfg).unwrap_err();
        match err {
            TracewireError::Configuration(msg) => assert!(msg.contains("invalid provider regex")),
            other => panic!("expected Configuration error, got {other:?}"),
        }
    }
}
