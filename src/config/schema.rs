use crate::error::PatchError;
use crate::patch_set::PatchSet;
use crate::rule::{Matcher, PatternOptions, Replacement, RuleOptions, Scope, SubstitutionRule};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// One patch file: metadata plus the ordered rules for a single target.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.meta.target.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                rule_id: None,
                field: "meta.target",
            });
        }
        if let Some(output) = &self.meta.output {
            if output.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: None,
                    field: "meta.output",
                });
            }
        }

        if self.rules.is_empty() {
            issues.push(ValidationIssue::EmptyRuleList);
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: None,
                    field: "id",
                });
            } else if !seen.insert(rule.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    rule_id: rule.id.clone(),
                });
            }

            match &rule.matcher {
                MatcherDef::Literal { text } => {
                    if text.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            rule_id: Some(rule.id.clone()),
                            field: "matcher.text",
                        });
                    }
                }
                MatcherDef::Regex { pattern, .. } => {
                    if pattern.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            rule_id: Some(rule.id.clone()),
                            field: "matcher.pattern",
                        });
                    }
                }
            }

            match &rule.operation {
                Operation::InsertBefore { text } | Operation::InsertAfter { text } => {
                    if text.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            rule_id: Some(rule.id.clone()),
                            field: "operation.text",
                        });
                    }
                }
                Operation::Replace { .. } | Operation::Delete => {}
            }

            if rule.applied_marker.as_deref() == Some("") {
                issues.push(ValidationIssue::InvalidCombo {
                    rule_id: Some(rule.id.clone()),
                    message: "applied_marker cannot be empty".to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Compile every rule. Pattern errors and unresolved capture references
    /// surface here, before any file is read.
    pub fn to_patch_set(&self) -> Result<PatchSet, PatchError> {
        let rules = self
            .rules
            .iter()
            .map(RuleDefinition::compile)
            .collect::<Result<Vec<_>, _>>()?;
        PatchSet::new(self.meta.display_name(), rules)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// File the rules read, relative to the workspace root
    #[serde(default)]
    pub target: String,
    /// File the result is written to; defaults to `target`
    #[serde(default)]
    pub output: Option<String>,
}

impl Metadata {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.target
        } else {
            &self.name
        }
    }
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Absence of a match aborts the run (fail-closed by default)
    #[serde(default = "default_required")]
    pub required: bool,
    /// Has no default: every rule states whether it is single- or global-scoped
    pub scope: Scope,
    pub matcher: MatcherDef,
    pub operation: Operation,
    #[serde(default)]
    pub applied_marker: Option<String>,
}

impl RuleDefinition {
    pub fn compile(&self) -> Result<SubstitutionRule, PatchError> {
        let matcher = match &self.matcher {
            MatcherDef::Literal { text } => Matcher::literal(text.clone()),
            MatcherDef::Regex {
                pattern,
                case_insensitive,
                multi_line,
                dot_matches_new_line,
            } => Matcher::pattern_with(
                pattern,
                PatternOptions {
                    case_insensitive: *case_insensitive,
                    multi_line: *multi_line,
                    dot_matches_new_line: *dot_matches_new_line,
                },
            )
            .map_err(|e| PatchError::MalformedRule {
                rule: self.id.clone(),
                reason: e.to_string(),
            })?,
        };

        let replacement = match &self.operation {
            Operation::Replace { text } => Replacement::Text(text.clone()),
            Operation::Delete => Replacement::Delete,
            Operation::InsertBefore { text } => Replacement::InsertBefore(text.clone()),
            Operation::InsertAfter { text } => Replacement::InsertAfter(text.clone()),
        };

        SubstitutionRule::with_options(
            self.id.clone(),
            matcher,
            replacement,
            self.scope,
            RuleOptions {
                required: self.required,
                applied_marker: self.applied_marker.clone(),
            },
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MatcherDef {
    /// Exact substring match
    Literal { text: String },
    /// Regular expression with capture groups
    Regex {
        pattern: String,
        #[serde(default)]
        case_insensitive: bool,
        #[serde(default)]
        multi_line: bool,
        #[serde(default)]
        dot_matches_new_line: bool,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    Replace { text: String },
    Delete,
    InsertBefore { text: String },
    InsertAfter { text: String },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyRuleList,
    MissingField {
        rule_id: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        rule_id: String,
    },
    InvalidCombo {
        rule_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyRuleList => write!(f, "patch config contains no rules"),
            ValidationIssue::MissingField { rule_id, field } => match rule_id {
                Some(id) => write!(f, "rule '{id}' missing required field '{field}'"),
                None => write!(f, "missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { rule_id } => {
                write!(f, "rule id '{rule_id}' is used more than once")
            }
            ValidationIssue::InvalidCombo { rule_id, message } => match rule_id {
                Some(id) => write!(f, "rule '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
