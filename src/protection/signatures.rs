use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::settings::SignatureRule;

/// Result of inspecting one content blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub clean: bool,
    /// Violation category of the first matching rule or structural check.
    pub category: Option<String>,
}

impl Inspection {
    fn pass() -> Self {
        Self {
            clean: true,
            category: None,
        }
    }

    fn violation(category: &str) -> Self {
        Self {
            clean: false,
            category: Some(category.to_string()),
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    category: String,
    regex: Regex,
}

/// Compiled content-inspection rules plus two structural checks that run even
/// when the rule list is empty: HTML-tag-like syntax / `javascript:` schemes,
/// and directory-traversal sequences.
///
/// Compilation happens once per (re)configuration; a malformed pattern fails
/// the configuration instead of surfacing during request handling.
#[derive(Debug)]
pub struct SignatureStore {
    rules: Vec<CompiledRule>,
    markup: Regex,
    traversal: Regex,
}

impl SignatureStore {
    pub fn compile(rules: &[SignatureRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| {
                    format!(
                        "Invalid signature pattern for category {}: {}",
                        rule.category, rule.pattern
                    )
                })?;
            compiled.push(CompiledRule {
                category: rule.category.clone(),
                regex,
            });
        }

        let markup = RegexBuilder::new(r"<[^>]*>|javascript:")
            .case_insensitive(true)
            .build()
            .context("Failed to compile markup check")?;
        let traversal =
            Regex::new(r"\.\./|\.\.\\").context("Failed to compile traversal check")?;

        Ok(Self {
            rules: compiled,
            markup,
            traversal,
        })
    }

    /// Classify a content blob. The first matching rule short-circuits; the
    /// structural checks run afterwards so they catch what a trimmed-down rule
    /// list would miss. Matches are logged with a truncated content digest so
    /// events can be correlated without retaining payloads.
    pub fn inspect(&self, content: &str) -> Inspection {
        for rule in &self.rules {
            if rule.regex.is_match(content) {
                warn!(
                    category = %rule.category,
                    hash = %content_digest(content),
                    "Attack pattern matched"
                );
                return Inspection::violation(&rule.category);
            }
        }

        if self.markup.is_match(content) {
            warn!(
                category = "script_injection",
                hash = %content_digest(content),
                "Markup injection attempt"
            );
            return Inspection::violation("script_injection");
        }

        if self.traversal.is_match(content) {
            warn!(
                category = "path_traversal",
                hash = %content_digest(content),
                "Path traversal attempt"
            );
            return Inspection::violation("path_traversal");
        }

        Inspection::pass()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// First 8 hex characters of the SHA-256 digest, for log correlation only.
fn content_digest(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;

    fn default_store() -> SignatureStore {
        SignatureStore::compile(&defaults::default_rules()).unwrap()
    }

    #[test]
    fn test_clean_content_passes() {
        let store = default_store();
        assert_eq!(store.rule_count(), 6);
        let inspection = store.inspect(r#"{"user":"alice","page":3}"#);
        assert!(inspection.clean);
        assert!(inspection.category.is_none());
    }

    #[test]
    fn test_sql_injection_detected_case_insensitive() {
        let store = default_store();
        let inspection = store.inspect("id=1 UNION ALL SELECT password FROM users");
        assert_eq!(inspection.category.as_deref(), Some("sql_injection"));
    }

    #[test]
    fn test_code_execution_detected() {
        let store = default_store();
        let inspection = store.inspect("q=system('cat+/etc/shadow')");
        assert_eq!(inspection.category.as_deref(), Some("code_execution"));
    }

    #[test]
    fn test_traversal_hits_rule_before_structural_check() {
        let store = default_store();
        let inspection = store.inspect("file=../../etc/passwd");
        assert_eq!(inspection.category.as_deref(), Some("path_traversal"));
    }

    #[test]
    fn test_encoded_payload_marker_detected() {
        let store = default_store();
        let inspection = store.inspect("data=base64,SGVsbG8=");
        assert_eq!(inspection.category.as_deref(), Some("encoded_payload"));
    }

    #[test]
    fn test_structural_markup_check_without_rules() {
        let store = SignatureStore::compile(&[]).unwrap();
        assert_eq!(
            store.inspect("<img src=x onerror=alert(1)>").category.as_deref(),
            Some("script_injection")
        );
        assert_eq!(
            store.inspect("href=JaVaScRiPt:void(0)").category.as_deref(),
            Some("script_injection")
        );
    }

    #[test]
    fn test_structural_traversal_check_without_rules() {
        let store = SignatureStore::compile(&[]).unwrap();
        assert_eq!(
            store.inspect(r"path=..\windows\system32").category.as_deref(),
            Some("path_traversal")
        );
        assert!(store.inspect("version 2.0.1").clean);
    }

    #[test]
    fn test_rule_order_decides_category() {
        let rules = vec![
            SignatureRule {
                category: "first".to_string(),
                pattern: "attack".to_string(),
            },
            SignatureRule {
                category: "second".to_string(),
                pattern: "attack".to_string(),
            },
        ];
        let store = SignatureStore::compile(&rules).unwrap();
        assert_eq!(store.inspect("attack").category.as_deref(), Some("first"));
    }

    #[test]
    fn test_malformed_pattern_fails_compilation() {
        let rules = vec![SignatureRule {
            category: "broken".to_string(),
            pattern: "([".to_string(),
        }];
        let err = SignatureStore::compile(&rules).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_digest_is_stable_prefix() {
        assert_eq!(content_digest("hello"), "2cf24dba");
        assert_eq!(content_digest("hello").len(), 8);
    }
}
