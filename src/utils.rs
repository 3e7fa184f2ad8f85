use std::collections::BTreeMap;

use anyhow::bail;

/// Check whether the name matches the pattern. A pattern containing a `*` is
/// evaluated with shell glob semantics, everything else is compared verbatim.
/// A glob that does not compile matches nothing.
fn name_matches(name: &str, pattern: &str) -> bool {
    if pattern.contains('*') {
        match glob::Pattern::new(pattern) {
            Ok(compiled) => compiled.matches(name),
            Err(_) => false,
        }
    } else {
        name == pattern
    }
}

/// Check the needle against every pattern, succeeding on the first match.
pub fn needle_matches_patterns(needle: &str, patterns: &[String]) -> bool {
    // no patterns given, so everything matches
    if patterns.is_empty() {
        return true;
    }

    patterns.iter().any(|pattern| name_matches(needle, pattern))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelRequirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    Exists { key: String },
}

/// A parsed label selector expression, matched against pod labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    /// Parse a comma-separated list of `key=value`, `key==value`, `key!=value`
    /// and bare `key` (existence) requirements.
    pub fn parse(selector: &str) -> anyhow::Result<Self> {
        let mut requirements = Vec::new();

        for part in selector.split(',') {
            let part = part.trim();
            if part.is_empty() {
                bail!("invalid label selector {:?}: empty requirement", selector);
            }

            let requirement = if let Some((key, value)) = part.split_once("!=") {
                LabelRequirement::NotEquals {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }
            } else if let Some((key, value)) = part.split_once("==") {
                LabelRequirement::Equals {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }
            } else if let Some((key, value)) = part.split_once('=') {
                LabelRequirement::Equals {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }
            } else {
                LabelRequirement::Exists {
                    key: part.to_string(),
                }
            };

            let key = match &requirement {
                LabelRequirement::Equals { key, .. }
                | LabelRequirement::NotEquals { key, .. }
                | LabelRequirement::Exists { key } => key,
            };
            if key.is_empty() {
                bail!("invalid label selector {:?}: requirement without a key", selector);
            }

            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    /// All requirements have to hold for the labels to match.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|requirement| match requirement {
            LabelRequirement::Equals { key, value } => labels.get(key) == Some(value),
            LabelRequirement::NotEquals { key, value } => labels.get(key) != Some(value),
            LabelRequirement::Exists { key } => labels.contains_key(key),
        })
    }
}
