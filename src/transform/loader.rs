use crate::transform::schema::{RuleSet, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum RuleError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl RuleError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            RuleError::Io { .. } => self,
            RuleError::Toml { path: None, source } => RuleError::Toml {
                path: Some(path),
                source,
            },
            RuleError::Validation { path: None, source } => RuleError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::Io { path, source } => {
                write!(
                    f,
                    "failed to read rule set from {}: {}",
                    path.display(),
                    source
                )
            }
            RuleError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse rule set TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse rule set TOML: {}", source),
            },
            RuleError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid rule set ({}): {}", path.display(), source),
                None => write!(f, "invalid rule set: {}", source),
            },
        }
    }
}

impl std::error::Error for RuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuleError::Io { source, .. } => Some(source),
            RuleError::Toml { source, .. } => Some(source),
            RuleError::Validation { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<RuleSet, RuleError> {
    let rules: RuleSet = toml_edit::de::from_str(input)
        .map_err(|source| RuleError::Toml { path: None, source })?;
    rules
        .validate()
        .map_err(|source| RuleError::Validation { path: None, source })?;
    Ok(rules)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RuleSet, RuleError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| RuleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::schema::RuleKind;

    const SAMPLE: &str = r#"
[meta]
name = "cleanup"
description = "rename legacy identifiers"

[[rules]]
name = "rename-endpoint"
template = "new_endpoint"

[rules.matcher]
kind = "literal"
search = "old_endpoint"

[[rules]]
name = "bump-versions"
template = "v$1.$2-patched"

[rules.matcher]
kind = "regex"
pattern = 'v(\d+)\.(\d+)'

[[rules.subrules]]
name = "strip-zero"
template = "-patched"

[rules.subrules.matcher]
kind = "literal"
search = ".0-patched"
"#;

    #[test]
    fn loads_rule_set_from_toml() {
        let set = load_from_str(SAMPLE).unwrap();
        assert_eq!(set.meta.name, "cleanup");
        assert_eq!(set.rules.len(), 2);
        assert!(matches!(set.rules[0].matcher, RuleKind::Literal { .. }));
        assert!(matches!(set.rules[1].matcher, RuleKind::Regex { .. }));
        assert_eq!(set.rules[1].subrules.len(), 1);
    }

    #[test]
    fn rejects_unknown_kind() {
        let input = r#"
[[rules]]
name = "bad"

[rules.matcher]
kind = "telepathy"
search = "x"
"#;
        assert!(matches!(
            load_from_str(input),
            Err(RuleError::Toml { .. })
        ));
    }

    #[test]
    fn rejects_invalid_set() {
        let input = r#"
[[rules]]
name = ""

[rules.matcher]
kind = "literal"
search = "x"
"#;
        assert!(matches!(
            load_from_str(input),
            Err(RuleError::Validation { .. })
        ));
    }

    #[test]
    fn load_from_path_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        fs::write(&path, SAMPLE).unwrap();

        let set = load_from_path(&path).unwrap();
        assert_eq!(set.rules.len(), 2);

        let err = load_from_path(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, RuleError::Io { .. }));
    }
}
