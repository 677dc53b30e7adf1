use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::cache;
use crate::reader::{FileReader, ReaderError, SearchOptions};
use crate::syntax::{QueryEngine, SyntaxError, SyntaxParser};
use crate::transform::schema::{RuleDef, RuleKind};
use crate::writer::FileWriter;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("structural rule '{rule}' needs a parser; use stage_structural")]
    NeedsParser { rule: String },

    #[error("structural subrules are not supported (rule '{rule}')")]
    StructuralSubrule { rule: String },

    #[error("staged changes overlap: [{a_start}, {a_end}) and [{b_start}, {b_end})")]
    Overlap {
        a_start: usize,
        a_end: usize,
        b_start: usize,
        b_end: usize,
    },
}

/// Verification of the text a staged change expects to replace.
///
/// Short spans keep the exact text; anything over 1 KiB keeps an xxh3
/// hash instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeVerification {
    ExactMatch(String),
    Hash(u64),
}

impl ChangeVerification {
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            ChangeVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            ChangeVerification::ExactMatch(text.to_string())
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            ChangeVerification::ExactMatch(expected) => text == expected,
            ChangeVerification::Hash(expected) => xxh3_64(text.as_bytes()) == *expected,
        }
    }

    pub fn hash(&self) -> u64 {
        match self {
            ChangeVerification::Hash(h) => *h,
            ChangeVerification::ExactMatch(text) => xxh3_64(text.as_bytes()),
        }
    }
}

/// One pending edit produced by staging a rule against a file.
#[derive(Debug, Clone)]
pub struct StagedChange {
    /// Name of the rule that produced this change.
    pub rule: String,
    pub byte_start: usize,
    pub byte_end: usize,
    /// What the span held when the change was staged.
    pub expected: ChangeVerification,
    pub replacement: String,
    /// Set when the rule's validator rejected the change; application
    /// skips it.
    pub invalid: bool,
}

type ChangeFilter = dyn Fn(&StagedChange) -> bool + Send + Sync;
type ChangeHook = dyn Fn(&StagedChange) + Send + Sync;

/// Optional behavior attached to a rule at runtime.
#[derive(Default)]
pub struct RuleHooks {
    /// Drops a candidate change entirely when it returns false.
    pub predicate: Option<Box<ChangeFilter>>,
    /// Marks a candidate change invalid when it returns false.
    pub validate: Option<Box<ChangeFilter>>,
    pub before_apply: Option<Box<ChangeHook>>,
    pub after_apply: Option<Box<ChangeHook>>,
    /// Rewrites each structural capture before template interpolation;
    /// receives the capture name and text.
    pub map_param: Option<Box<dyn Fn(&str, &str) -> String + Send + Sync>>,
    /// Rewrites the fully expanded replacement.
    pub map_raw: Option<Box<dyn Fn(String) -> String + Send + Sync>>,
}

/// A rule definition paired with its runtime hooks.
pub struct Rule {
    pub def: RuleDef,
    pub hooks: RuleHooks,
}

impl Rule {
    pub fn new(def: RuleDef) -> Self {
        Self {
            def,
            hooks: RuleHooks::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn with_predicate(
        mut self,
        f: impl Fn(&StagedChange) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.predicate = Some(Box::new(f));
        self
    }

    pub fn with_validator(
        mut self,
        f: impl Fn(&StagedChange) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.validate = Some(Box::new(f));
        self
    }

    pub fn with_before_apply(mut self, f: impl Fn(&StagedChange) + Send + Sync + 'static) -> Self {
        self.hooks.before_apply = Some(Box::new(f));
        self
    }

    pub fn with_after_apply(mut self, f: impl Fn(&StagedChange) + Send + Sync + 'static) -> Self {
        self.hooks.after_apply = Some(Box::new(f));
        self
    }

    pub fn with_map_param(
        mut self,
        f: impl Fn(&str, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.hooks.map_param = Some(Box::new(f));
        self
    }

    pub fn with_map_raw(mut self, f: impl Fn(String) -> String + Send + Sync + 'static) -> Self {
        self.hooks.map_raw = Some(Box::new(f));
        self
    }
}

/// What happened to one staged change during application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { rule: String, bytes_changed: usize },
    /// The span already holds the replacement text.
    AlreadyApplied { rule: String },
    /// The change was invalid or no longer matches the buffer.
    Rejected { rule: String, reason: String },
}

/// Stage a literal or regex rule against a file.
///
/// Structural rules need a parser; use [`stage_structural`].
pub fn stage(rule: &Rule, reader: &mut FileReader) -> Result<Vec<StagedChange>, TransformError> {
    let content = reader.sync()?.to_vec();

    match &rule.def.matcher {
        RuleKind::Literal { search } => {
            let options = SearchOptions::default();
            let matches = reader.find(search, false, options)?;
            let mut changes = Vec::new();
            for m in matches {
                let (start, end) = (m.range.start_byte, m.range.end_byte);
                let original = String::from_utf8_lossy(&content[start..end]).into_owned();
                if let Some(change) =
                    finalize(rule, start, end, &original, rule.def.template.clone())?
                {
                    changes.push(change);
                }
            }
            Ok(changes)
        }
        RuleKind::Regex { pattern } => {
            let re = cache::get_or_compile(pattern, rule.def.case_insensitive)?;
            let matches = reader.find_with(&re);
            let mut changes = Vec::new();
            for m in matches {
                let (start, end) = (m.range.start_byte, m.range.end_byte);
                let original = String::from_utf8_lossy(&content[start..end]).into_owned();
                let expanded = re
                    .replace(&content[start..end], rule.def.template.as_bytes())
                    .into_owned();
                let expanded = String::from_utf8_lossy(&expanded).into_owned();
                if let Some(change) = finalize(rule, start, end, &original, expanded)? {
                    changes.push(change);
                }
            }
            Ok(changes)
        }
        RuleKind::Structural { .. } => Err(TransformError::NeedsParser {
            rule: rule.def.name.clone(),
        }),
    }
}

/// Stage any rule, driving structural matchers through a parser.
pub fn stage_structural(
    rule: &Rule,
    reader: &mut FileReader,
    parser: &mut SyntaxParser,
) -> Result<Vec<StagedChange>, TransformError> {
    let query = match &rule.def.matcher {
        RuleKind::Structural { query } => query,
        _ => return stage(rule, reader),
    };

    let engine = QueryEngine::new(parser.language(), query)?;
    let tree = parser.parse_reader(reader)?;
    let content = reader.sync()?.to_vec();
    let matches = engine.find_all(tree.root_node(), &content);

    let mut changes = Vec::new();
    for m in matches {
        let original = String::from_utf8_lossy(&content[m.byte_start..m.byte_end]).into_owned();
        let expanded = interpolate(&rule.def.template, &m, rule);
        if let Some(change) = finalize(rule, m.byte_start, m.byte_end, &original, expanded)? {
            changes.push(change);
        }
    }
    Ok(changes)
}

/// Apply staged changes through a writer, bottom-to-top so earlier
/// splices do not invalidate later offsets. Overlapping spans are an
/// error; invalid or out-of-date changes are reported as `Rejected`
/// without aborting the batch. Outcomes follow the application order
/// (descending start offset).
pub fn apply_staged(
    rule: &Rule,
    changes: Vec<StagedChange>,
    writer: &mut FileWriter,
) -> Result<Vec<ApplyOutcome>, TransformError> {
    if changes.is_empty() {
        return Ok(Vec::new());
    }

    let mut changes = changes;
    changes.sort_by(|a, b| b.byte_start.cmp(&a.byte_start));

    for window in changes.windows(2) {
        let (later, earlier) = (&window[0], &window[1]);
        if earlier.byte_end > later.byte_start {
            return Err(TransformError::Overlap {
                a_start: earlier.byte_start,
                a_end: earlier.byte_end,
                b_start: later.byte_start,
                b_end: later.byte_end,
            });
        }
    }

    let mut outcomes = Vec::with_capacity(changes.len());
    for change in &changes {
        if change.invalid {
            outcomes.push(ApplyOutcome::Rejected {
                rule: change.rule.clone(),
                reason: "invalidated at staging".to_string(),
            });
            continue;
        }
        if change.byte_start > change.byte_end || change.byte_end > writer.content().len() {
            outcomes.push(ApplyOutcome::Rejected {
                rule: change.rule.clone(),
                reason: "span out of range".to_string(),
            });
            continue;
        }

        let current = match std::str::from_utf8(&writer.content()[change.byte_start..change.byte_end])
        {
            Ok(text) => text.to_string(),
            Err(_) => {
                outcomes.push(ApplyOutcome::Rejected {
                    rule: change.rule.clone(),
                    reason: "span is not valid UTF-8".to_string(),
                });
                continue;
            }
        };

        if current == change.replacement {
            outcomes.push(ApplyOutcome::AlreadyApplied {
                rule: change.rule.clone(),
            });
            continue;
        }
        if !change.expected.matches(&current) {
            outcomes.push(ApplyOutcome::Rejected {
                rule: change.rule.clone(),
                reason: "before-text mismatch".to_string(),
            });
            continue;
        }

        if let Some(hook) = &rule.hooks.before_apply {
            hook(change);
        }
        writer
            .delete_range(change.byte_start, change.byte_end)
            .insert(change.byte_start, change.replacement.as_bytes());
        if let Some(hook) = &rule.hooks.after_apply {
            hook(change);
        }

        outcomes.push(ApplyOutcome::Applied {
            rule: change.rule.clone(),
            bytes_changed: change.replacement.len(),
        });
    }

    Ok(outcomes)
}

fn finalize(
    rule: &Rule,
    start: usize,
    end: usize,
    original: &str,
    replacement: String,
) -> Result<Option<StagedChange>, TransformError> {
    let mut replacement = replacement;
    for sub in &rule.def.subrules {
        replacement = apply_subrule(sub, &replacement)?;
    }
    if let Some(map) = &rule.hooks.map_raw {
        replacement = map(replacement);
    }

    let mut change = StagedChange {
        rule: rule.def.name.clone(),
        byte_start: start,
        byte_end: end,
        expected: ChangeVerification::from_text(original),
        replacement,
        invalid: false,
    };

    if let Some(predicate) = &rule.hooks.predicate {
        if !predicate(&change) {
            return Ok(None);
        }
    }
    if let Some(validate) = &rule.hooks.validate {
        if !validate(&change) {
            change.invalid = true;
        }
    }

    Ok(Some(change))
}

fn apply_subrule(sub: &RuleDef, text: &str) -> Result<String, TransformError> {
    match &sub.matcher {
        RuleKind::Literal { search } => Ok(text.replace(search, &sub.template)),
        RuleKind::Regex { pattern } => {
            let re = cache::get_or_compile(pattern, sub.case_insensitive)?;
            let replaced = re.replace_all(text.as_bytes(), sub.template.as_bytes());
            Ok(String::from_utf8_lossy(&replaced).into_owned())
        }
        RuleKind::Structural { .. } => Err(TransformError::StructuralSubrule {
            rule: sub.name.clone(),
        }),
    }
}

/// Expand `$name` references in a structural template from the match's
/// captures. Unknown names are left as written.
fn interpolate(template: &str, m: &crate::syntax::QueryMatch, rule: &Rule) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(&(_, next)) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        match m.captures.get(&name) {
            Some(node) => match &rule.hooks.map_param {
                Some(map) => out.push_str(&map(&name, &node.text)),
                None => out.push_str(&node.text),
            },
            None => {
                out.push('$');
                out.push_str(&name);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::loader::load_from_str;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn literal_rule(search: &str, template: &str) -> Rule {
        Rule::new(RuleDef {
            name: "test-rule".to_string(),
            matcher: RuleKind::Literal {
                search: search.to_string(),
            },
            template: template.to_string(),
            case_insensitive: false,
            subrules: Vec::new(),
        })
    }

    fn regex_rule(pattern: &str, template: &str) -> Rule {
        Rule::new(RuleDef {
            name: "test-rule".to_string(),
            matcher: RuleKind::Regex {
                pattern: pattern.to_string(),
            },
            template: template.to_string(),
            case_insensitive: false,
            subrules: Vec::new(),
        })
    }

    fn reader_for(dir: &Path, name: &str, content: &[u8]) -> FileReader {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        FileReader::open(&path)
    }

    #[test]
    fn stages_literal_matches_with_verification() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader_for(dir.path(), "lit.txt", b"old code, old habits");

        let rule = literal_rule("old", "new");
        let changes = stage(&rule, &mut reader).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].byte_start, 0);
        assert_eq!(changes[1].byte_start, 10);
        assert!(changes[0].expected.matches("old"));
        assert_eq!(changes[0].replacement, "new");
    }

    #[test]
    fn stages_regex_with_capture_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader_for(dir.path(), "re.txt", b"port=80 port=443");

        let rule = regex_rule(r"port=(\d+)", "listen :$1");
        let changes = stage(&rule, &mut reader).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].replacement, "listen :80");
        assert_eq!(changes[1].replacement, "listen :443");
    }

    #[test]
    fn subrules_rewrite_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader_for(dir.path(), "sub.txt", b"value");

        let mut rule = literal_rule("value", "draft-result");
        rule.def.subrules.push(RuleDef {
            name: "strip-draft".to_string(),
            matcher: RuleKind::Literal {
                search: "draft-".to_string(),
            },
            template: String::new(),
            case_insensitive: false,
            subrules: Vec::new(),
        });

        let changes = stage(&rule, &mut reader).unwrap();
        assert_eq!(changes[0].replacement, "result");
    }

    #[test]
    fn predicate_filters_and_validator_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader_for(dir.path(), "hooks.txt", b"aa ab");

        let rule = literal_rule("a", "X").with_predicate(|c| c.byte_start != 0);
        let changes = stage(&rule, &mut reader).unwrap();
        assert_eq!(changes.len(), 2); // offsets 1 and 3 survive

        let rule = literal_rule("a", "X").with_validator(|c| c.byte_start != 1);
        let changes = stage(&rule, &mut reader).unwrap();
        assert!(!changes[0].invalid);
        assert!(changes[1].invalid);
        assert_eq!(changes[1].byte_start, 1);
    }

    #[test]
    fn map_raw_transforms_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader_for(dir.path(), "raw.txt", b"x");

        let rule = literal_rule("x", "y").with_map_raw(|r| r.to_uppercase());
        let changes = stage(&rule, &mut reader).unwrap();
        assert_eq!(changes[0].replacement, "Y");
    }

    #[test]
    fn apply_splices_bottom_to_top() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apply.txt");
        fs::write(&path, b"old code, old habits").unwrap();

        let rule = literal_rule("old", "brand-new");
        let mut reader = FileReader::open(&path);
        let changes = stage(&rule, &mut reader).unwrap();

        let mut writer = FileWriter::new(reader.snapshot().unwrap());
        let outcomes = apply_staged(&rule, changes, &mut writer).unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, ApplyOutcome::Applied { .. })));
        assert_eq!(writer.content(), b"brand-new code, brand-new habits");
    }

    #[test]
    fn apply_rejects_stale_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.txt");
        fs::write(&path, b"old text").unwrap();

        let rule = literal_rule("old", "new");
        let mut reader = FileReader::open(&path);
        let changes = stage(&rule, &mut reader).unwrap();

        // The file moves on underneath the staged change.
        let mut writer = FileWriter::new(reader.snapshot().unwrap());
        writer.write("different entirely");

        let outcomes = apply_staged(&rule, changes, &mut writer).unwrap();
        assert!(matches!(
            &outcomes[0],
            ApplyOutcome::Rejected { reason, .. } if reason.contains("mismatch")
        ));
        assert_eq!(writer.content(), b"different entirely");
    }

    #[test]
    fn apply_detects_already_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idem.txt");
        fs::write(&path, b"same").unwrap();

        let rule = literal_rule("same", "same");
        let mut reader = FileReader::open(&path);
        let changes = stage(&rule, &mut reader).unwrap();

        let mut writer = FileWriter::new(reader.snapshot().unwrap());
        let outcomes = apply_staged(&rule, changes, &mut writer).unwrap();
        assert!(matches!(outcomes[0], ApplyOutcome::AlreadyApplied { .. }));
    }

    #[test]
    fn apply_rejects_overlap() {
        let rule = literal_rule("x", "y");
        let changes = vec![
            StagedChange {
                rule: "test-rule".to_string(),
                byte_start: 0,
                byte_end: 5,
                expected: ChangeVerification::from_text("aaaaa"),
                replacement: "b".to_string(),
                invalid: false,
            },
            StagedChange {
                rule: "test-rule".to_string(),
                byte_start: 3,
                byte_end: 8,
                expected: ChangeVerification::from_text("aaaaa"),
                replacement: "c".to_string(),
                invalid: false,
            },
        ];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ovl.txt");
        fs::write(&path, b"aaaaaaaa").unwrap();
        let mut writer = FileWriter::open(&path);

        assert!(matches!(
            apply_staged(&rule, changes, &mut writer),
            Err(TransformError::Overlap { .. })
        ));
    }

    #[test]
    fn hooks_fire_around_each_splice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooked.txt");
        fs::write(&path, b"a b a").unwrap();

        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let b = Arc::clone(&before);
        let a = Arc::clone(&after);

        let rule = literal_rule("a", "z")
            .with_before_apply(move |_| {
                b.fetch_add(1, Ordering::Relaxed);
            })
            .with_after_apply(move |_| {
                a.fetch_add(1, Ordering::Relaxed);
            });

        let mut reader = FileReader::open(&path);
        let changes = stage(&rule, &mut reader).unwrap();
        let mut writer = FileWriter::new(reader.snapshot().unwrap());
        apply_staged(&rule, changes, &mut writer).unwrap();

        assert_eq!(before.load(Ordering::Relaxed), 2);
        assert_eq!(after.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn staged_rules_round_trip_from_toml() {
        let toml = r#"
[[rules]]
name = "swap"
template = "$2-$1"

[rules.matcher]
kind = "regex"
pattern = '(\w+):(\w+)'
"#;
        let set = load_from_str(toml).unwrap();
        let rule = Rule::new(set.rules[0].clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.txt");
        fs::write(&path, b"key:value").unwrap();

        let mut reader = FileReader::open(&path);
        let changes = stage(&rule, &mut reader).unwrap();
        assert_eq!(changes[0].replacement, "value-key");

        let mut writer = FileWriter::new(reader.snapshot().unwrap());
        apply_staged(&rule, changes, &mut writer).unwrap();
        writer.commit().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"value-key");
    }

    #[test]
    fn structural_rule_requires_parser() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader_for(dir.path(), "s.rs", b"fn main() {}");

        let rule = Rule::new(RuleDef {
            name: "structural".to_string(),
            matcher: RuleKind::Structural {
                query: "(function_item) @f".to_string(),
            },
            template: String::new(),
            case_insensitive: false,
            subrules: Vec::new(),
        });

        assert!(matches!(
            stage(&rule, &mut reader),
            Err(TransformError::NeedsParser { .. })
        ));
    }

    #[test]
    fn structural_staging_renames_function() {
        let dir = tempfile::tempdir().unwrap();
        let source = "fn old_name() {}\n";
        let path = dir.path().join("rename.rs");
        fs::write(&path, source).unwrap();

        let mut parser = SyntaxParser::new(tree_sitter_rust::LANGUAGE.into()).unwrap();
        let rule = Rule::new(RuleDef {
            name: "rename".to_string(),
            matcher: RuleKind::Structural {
                query: "(function_item name: (identifier) @name)".to_string(),
            },
            template: "renamed_$name".to_string(),
            case_insensitive: false,
            subrules: Vec::new(),
        });

        let mut reader = FileReader::open(&path);
        let changes = stage_structural(&rule, &mut reader, &mut parser).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].replacement, "renamed_old_name");

        let mut writer = FileWriter::new(reader.snapshot().unwrap());
        apply_staged(&rule, changes, &mut writer).unwrap();
        assert_eq!(writer.content(), b"fn renamed_old_name() {}\n");
    }
}
