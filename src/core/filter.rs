//! Trigger refs and branch/tag filters

use crate::core::error::SchemaError;
use regex::Regex;

/// The ref that triggered a run. The kind is always known at trigger
/// time; a branch is never evaluated against tag rules or vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerRef {
    Branch(String),
    Tag(String),
}

impl TriggerRef {
    /// The ref value (branch name or tag string).
    pub fn name(&self) -> &str {
        match self {
            TriggerRef::Branch(name) | TriggerRef::Tag(name) => name,
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, TriggerRef::Tag(_))
    }
}

impl std::fmt::Display for TriggerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerRef::Branch(name) => write!(f, "branch {}", name),
            TriggerRef::Tag(name) => write!(f, "tag {}", name),
        }
    }
}

/// Allow/deny pattern rules for one ref kind.
///
/// Patterns are implicitly anchored: a rule matches only when the whole
/// ref string matches.
#[derive(Debug, Clone, Default)]
pub struct PatternRules {
    only: Vec<Regex>,
    ignore: Vec<Regex>,
}

impl PatternRules {
    /// Compile allow/deny pattern lists, anchoring each pattern.
    pub fn compile(only: &[String], ignore: &[String]) -> Result<Self, SchemaError> {
        Ok(Self {
            only: compile_all(only)?,
            ignore: compile_all(ignore)?,
        })
    }

    /// Pure allow/deny decision for a ref value. With an `only` list the
    /// value must match at least one pattern; with an `ignore` list it
    /// must match none. Both lists present means both conditions hold.
    pub fn allows(&self, value: &str) -> bool {
        if !self.only.is_empty() && !self.only.iter().any(|re| re.is_match(value)) {
            return false;
        }
        !self.ignore.iter().any(|re| re.is_match(value))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, SchemaError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
                SchemaError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                }
            })
        })
        .collect()
}

/// Filter attached to a job in a workflow. Rules apply per ref kind; a
/// kind with no rules always passes, and a job with no filter at all
/// runs whenever its dependencies succeed.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub branches: Option<PatternRules>,
    pub tags: Option<PatternRules>,
}

impl JobFilter {
    /// Decide whether the triggering ref passes this filter.
    pub fn accepts(&self, trigger: &TriggerRef) -> bool {
        let rules = match trigger {
            TriggerRef::Branch(_) => self.branches.as_ref(),
            TriggerRef::Tag(_) => self.tags.as_ref(),
        };
        match rules {
            Some(rules) => rules.allows(trigger.name()),
            None => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_none() && self.tags.is_none()
    }
}
