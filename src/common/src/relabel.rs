//! Relabeling rules
//!
//! Same configuration shape as Prometheus' `relabel_configs`. A server group
//! applies them to the labels of each discovered backend target, which both
//! filters the group's hosts (`keep` / `drop`) and derives labels that are
//! stamped onto every series from that target.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::LabelSet;

fn default_separator() -> String {
    ";".to_string()
}

fn default_regex() -> String {
    "(.*)".to_string()
}

fn default_replacement() -> String {
    "$1".to_string()
}

/// Action taken by a relabel rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelabelAction {
    #[default]
    Replace,
    Keep,
    Drop,
    LabelMap,
    LabelDrop,
    LabelKeep,
}

/// A single relabel rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelabelConfig {
    pub source_labels: Vec<String>,
    pub separator: String,
    pub regex: String,
    pub target_label: String,
    pub replacement: String,
    pub action: RelabelAction,
}

impl Default for RelabelConfig {
    fn default() -> Self {
        Self {
            source_labels: Vec::new(),
            separator: default_separator(),
            regex: default_regex(),
            target_label: String::new(),
            replacement: default_replacement(),
            action: RelabelAction::Replace,
        }
    }
}

/// Errors in a relabel rule
#[derive(Debug, thiserror::Error)]
pub enum RelabelError {
    #[error("invalid relabel regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("relabel action {0:?} requires a target_label")]
    MissingTargetLabel(RelabelAction),
    #[error("relabel action {0:?} requires source_labels")]
    MissingSourceLabels(RelabelAction),
}

impl RelabelConfig {
    /// Check the rule is usable, compiling its regex
    pub fn validate(&self) -> Result<(), RelabelError> {
        self.compiled_regex()?;
        match self.action {
            RelabelAction::Replace if self.target_label.is_empty() => {
                Err(RelabelError::MissingTargetLabel(self.action))
            }
            RelabelAction::Keep | RelabelAction::Drop if self.source_labels.is_empty() => {
                Err(RelabelError::MissingSourceLabels(self.action))
            }
            _ => Ok(()),
        }
    }

    fn compiled_regex(&self) -> Result<Regex, RelabelError> {
        Regex::new(&format!("^(?:{})$", self.regex)).map_err(|source| RelabelError::InvalidRegex {
            pattern: self.regex.clone(),
            source,
        })
    }

    fn source_value(&self, labels: &LabelSet) -> String {
        self.source_labels
            .iter()
            .map(|name| labels.get(name).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(&self.separator)
    }

    /// Apply this rule; `None` means the label set was dropped
    fn apply(&self, mut labels: LabelSet) -> Result<Option<LabelSet>, RelabelError> {
        let re = self.compiled_regex()?;
        match self.action {
            RelabelAction::Keep => {
                if !re.is_match(&self.source_value(&labels)) {
                    return Ok(None);
                }
            }
            RelabelAction::Drop => {
                if re.is_match(&self.source_value(&labels)) {
                    return Ok(None);
                }
            }
            RelabelAction::Replace => {
                let value = self.source_value(&labels);
                if let Some(captures) = re.captures(&value) {
                    let mut target = String::new();
                    captures.expand(&self.target_label, &mut target);
                    let mut replacement = String::new();
                    captures.expand(&self.replacement, &mut replacement);
                    if target.is_empty() {
                        return Ok(Some(labels));
                    }
                    if replacement.is_empty() {
                        labels.remove(&target);
                    } else {
                        labels.insert(target, replacement);
                    }
                }
            }
            RelabelAction::LabelMap => {
                let mut mapped = labels.clone();
                for (name, value) in labels.iter() {
                    if let Some(captures) = re.captures(name) {
                        let mut target = String::new();
                        captures.expand(&self.replacement, &mut target);
                        mapped.insert(target, value);
                    }
                }
                labels = mapped;
            }
            RelabelAction::LabelDrop => labels.retain(|name, _| !re.is_match(name)),
            RelabelAction::LabelKeep => labels.retain(|name, _| re.is_match(name)),
        }
        Ok(Some(labels))
    }
}

/// Run `labels` through `rules` in order. Returns `None` once any rule drops it.
pub fn process(labels: LabelSet, rules: &[RelabelConfig]) -> Result<Option<LabelSet>, RelabelError> {
    let mut current = labels;
    for rule in rules {
        match rule.apply(current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}
