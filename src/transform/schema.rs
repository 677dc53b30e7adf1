use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// A named bundle of transformation rules, typically loaded from TOML.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RuleSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One transformation rule: how to locate matches and what to put in
/// their place.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleDef {
    pub name: String,
    pub matcher: RuleKind,
    /// Replacement text; for regex rules `$n`/`${name}` expand to
    /// captures, for structural rules `$name` expands to the capture
    /// of that name.
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Rules applied to each expanded replacement before staging.
    #[serde(default)]
    pub subrules: Vec<RuleDef>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Byte-exact occurrences of `search`.
    Literal { search: String },
    /// Regex matches of `pattern`.
    Regex { pattern: String },
    /// Tree-sitter query matches (needs a parser at staging time).
    Structural { query: String },
}

impl RuleKind {
    fn pattern_field(&self) -> (&str, &'static str) {
        match self {
            RuleKind::Literal { search } => (search, "search"),
            RuleKind::Regex { pattern } => (pattern, "pattern"),
            RuleKind::Structural { query } => (query, "query"),
        }
    }
}

impl RuleSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.rules.is_empty() {
            issues.push(ValidationIssue::EmptyRuleList);
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule: None,
                    field: "name",
                });
            } else if !seen.insert(rule.name.clone()) {
                issues.push(ValidationIssue::DuplicateName {
                    name: rule.name.clone(),
                });
            }
            validate_rule(rule, &mut issues);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

fn validate_rule(rule: &RuleDef, issues: &mut Vec<ValidationIssue>) {
    let (value, field) = rule.matcher.pattern_field();
    if value.trim().is_empty() {
        issues.push(ValidationIssue::MissingField {
            rule: Some(rule.name.clone()),
            field,
        });
    }

    for sub in &rule.subrules {
        if matches!(sub.matcher, RuleKind::Structural { .. }) {
            issues.push(ValidationIssue::StructuralSubrule {
                rule: rule.name.clone(),
            });
        }
        validate_rule(sub, issues);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyRuleList,
    MissingField {
        rule: Option<String>,
        field: &'static str,
    },
    DuplicateName {
        name: String,
    },
    StructuralSubrule {
        rule: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyRuleList => write!(f, "rule list is empty"),
            ValidationIssue::MissingField { rule, field } => match rule {
                Some(rule) => write!(f, "rule '{rule}' is missing '{field}'"),
                None => write!(f, "a rule is missing '{field}'"),
            },
            ValidationIssue::DuplicateName { name } => {
                write!(f, "duplicate rule name '{name}'")
            }
            ValidationIssue::StructuralSubrule { rule } => {
                write!(f, "rule '{rule}' has a structural subrule")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
