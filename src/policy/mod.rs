//! Deterministic policy gate over proposed patch sets.
//!
//! `evaluate` is a pure function: identical patch-set content always yields an
//! identical violation list, and each evaluation fully replaces the prior one.
//! The orchestrator consults a single boolean (`has_blocking_violations`) to
//! conditionally refuse approval at the policy stage.

use crate::domain::types::RepoKey;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Severity of a rule finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Block,
    Warn,
}

/// A rule-evaluation finding against a patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub rule: String,
    pub severity: Severity,
    pub file: String,
    pub message: String,
}

/// Declared risk for a single patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// One proposed file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub path: String,
    pub diff: String,
    #[serde(default)]
    pub risk: RiskLevel,
}

/// A versioned set of proposed changes for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub repo: RepoKey,
    pub version: u32,
    pub patches: Vec<Patch>,
}

/// A policy rule: a name plus an independently evaluable check.
struct Rule {
    name: &'static str,
    check: fn(&PatchSet) -> Vec<PolicyViolation>,
}

const RULES: &[Rule] = &[
    Rule {
        name: "sensitive-file",
        check: check_sensitive_files,
    },
    Rule {
        name: "high-risk",
        check: check_high_risk,
    },
];

/// Evaluates every registered rule against the patch set.
///
/// The result fully replaces any previously recorded violation set for this
/// patch set; callers must not merge it with earlier findings.
pub fn evaluate(patch_set: &PatchSet) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();
    for rule in RULES {
        violations.extend((rule.check)(patch_set));
    }
    violations
}

/// True when any violation carries BLOCK severity.
pub fn has_blocking_violations(violations: &[PolicyViolation]) -> bool {
    violations.iter().any(|v| v.severity == Severity::Block)
}

fn sensitive_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Matches credential-bearing paths: .env files, secret/credential
        // prefixes, private keys, and password stores.
        Regex::new(
            r"(?i)(^|/)\.env(\.|$)|secret\.|credential\.|private[_-]?key|\.pem$|\.key$|password",
        )
        .unwrap_or_else(|e| panic!("sensitive-file pattern must compile: {}", e))
    })
}

fn check_sensitive_files(patch_set: &PatchSet) -> Vec<PolicyViolation> {
    patch_set
        .patches
        .iter()
        .filter(|patch| sensitive_path_pattern().is_match(&patch.path))
        .map(|patch| PolicyViolation {
            rule: "sensitive-file".to_string(),
            severity: Severity::Block,
            file: patch.path.clone(),
            message: format!("change touches a sensitive path: {}", patch.path),
        })
        .collect()
}

fn check_high_risk(patch_set: &PatchSet) -> Vec<PolicyViolation> {
    patch_set
        .patches
        .iter()
        .filter(|patch| patch.risk == RiskLevel::High)
        .map(|patch| PolicyViolation {
            rule: "high-risk".to_string(),
            severity: Severity::Warn,
            file: patch.path.clone(),
            message: "patch declares high risk; review carefully".to_string(),
        })
        .collect()
}

/// Lists the registered rule names, in evaluation order.
pub fn rule_names() -> Vec<&'static str> {
    RULES.iter().map(|r| r.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(path: &str, risk: RiskLevel) -> Patch {
        Patch {
            path: path.to_string(),
            diff: "--- a\n+++ b\n".to_string(),
            risk,
        }
    }

    fn patch_set(patches: Vec<Patch>) -> PatchSet {
        PatchSet {
            repo: RepoKey::from("acme/service"),
            version: 1,
            patches,
        }
    }

    #[test]
    fn clean_patch_set_has_no_violations() {
        let set = patch_set(vec![patch("src/main.rs", RiskLevel::Low)]);
        assert!(evaluate(&set).is_empty());
    }

    #[test]
    fn env_file_is_blocking() {
        let set = patch_set(vec![patch(".env", RiskLevel::Low)]);
        let violations = evaluate(&set);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "sensitive-file");
        assert_eq!(violations[0].severity, Severity::Block);
        assert!(has_blocking_violations(&violations));
    }

    #[test]
    fn nested_env_and_key_files_are_blocking() {
        for path in [
            "config/.env.production",
            "deploy/secret.yaml",
            "certs/server.pem",
            "certs/tls.key",
            "ops/private_key.txt",
            "ops/private-key.txt",
            "auth/password_rotation.md",
            "infra/credential.json",
        ] {
            let set = patch_set(vec![patch(path, RiskLevel::Low)]);
            assert!(
                has_blocking_violations(&evaluate(&set)),
                "expected {} to block",
                path
            );
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        let set = patch_set(vec![patch("Certs/Server.PEM", RiskLevel::Low)]);
        assert!(has_blocking_violations(&evaluate(&set)));
    }

    #[test]
    fn environment_module_is_not_sensitive() {
        // "environment.rs" must not trip the .env pattern.
        let set = patch_set(vec![patch("src/environment.rs", RiskLevel::Low)]);
        assert!(evaluate(&set).is_empty());
    }

    #[test]
    fn high_risk_patch_warns_without_blocking() {
        let set = patch_set(vec![patch("src/db/migration.rs", RiskLevel::High)]);
        let violations = evaluate(&set);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "high-risk");
        assert_eq!(violations[0].severity, Severity::Warn);
        assert!(!has_blocking_violations(&violations));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let set = patch_set(vec![
            patch(".env", RiskLevel::Low),
            patch("src/api.rs", RiskLevel::High),
            patch("src/lib.rs", RiskLevel::Low),
        ]);
        let first = evaluate(&set);
        let second = evaluate(&set);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn rule_registry_is_stable() {
        assert_eq!(rule_names(), vec!["sensitive-file", "high-risk"]);
    }
}
