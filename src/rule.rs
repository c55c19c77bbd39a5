//! Substitution rules: the single primitive every patch compiles down to.
//!
//! A rule pairs a [`Matcher`] with a [`Replacement`] and a [`Scope`]. Rules are
//! validated once, when they are built. Applying a rule never fails for a
//! reason that could have been caught at construction: the only runtime
//! failure is a required rule finding nothing to replace.

use crate::error::PatchError;
use log::debug;
use regex::{Captures, Regex, RegexBuilder};
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;

/// How many occurrences of the matcher a single application rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Only the first occurrence; later ones are left untouched
    First,
    /// Every non-overlapping occurrence
    All,
}

impl Scope {
    /// Replacement limit in the regex crate's convention (0 = unlimited).
    fn limit(self) -> usize {
        match self {
            Scope::First => 1,
            Scope::All => 0,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::First => write!(f, "first"),
            Scope::All => write!(f, "all"),
        }
    }
}

/// Flags for pattern matchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternOptions {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

/// What a rule looks for in the document.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact substring
    Literal(String),
    /// Regular expression; replacements may reference its capture groups
    Pattern(Regex),
}

impl Matcher {
    pub fn literal(text: impl Into<String>) -> Self {
        Matcher::Literal(text.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Self::pattern_with(pattern, PatternOptions::default())
    }

    pub fn pattern_with(pattern: &str, options: PatternOptions) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(options.case_insensitive)
            .multi_line(options.multi_line)
            .dot_matches_new_line(options.dot_matches_new_line)
            .size_limit(10 * (1 << 20))
            .build()
            .map(Matcher::Pattern)
    }

    /// Source text of the matcher, as written.
    pub fn as_str(&self) -> &str {
        match self {
            Matcher::Literal(text) => text,
            Matcher::Pattern(re) => re.as_str(),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Matcher::Pattern(_))
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        match self {
            Matcher::Literal(text) => haystack.contains(text.as_str()),
            Matcher::Pattern(re) => re.is_match(haystack),
        }
    }

    /// Number of non-overlapping occurrences in `haystack`.
    pub fn count(&self, haystack: &str) -> usize {
        match self {
            Matcher::Literal(text) => haystack.matches(text.as_str()).count(),
            Matcher::Pattern(re) => re.find_iter(haystack).count(),
        }
    }
}

/// What a rule puts in place of each match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Replace the match. For patterns the text is a capture template
    /// (`$1`, `${1}`, `$name`, `${name}`, `$$` for a literal dollar).
    Text(String),
    /// Remove the match
    Delete,
    /// Keep the match and put text in front of it
    InsertBefore(String),
    /// Keep the match and put text after it
    InsertAfter(String),
}

impl Replacement {
    fn template(&self) -> Option<&str> {
        match self {
            Replacement::Text(text)
            | Replacement::InsertBefore(text)
            | Replacement::InsertAfter(text) => Some(text),
            Replacement::Delete => None,
        }
    }
}

/// Behavior switches that affect rule validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOptions {
    /// A missing match is an error rather than a no-op
    pub required: bool,
    /// Text whose presence proves the rule already ran. Without one, only a
    /// rule whose literal output contains its own match recognises a re-run.
    pub applied_marker: Option<String>,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            required: true,
            applied_marker: None,
        }
    }
}

/// A validated search/replace rule.
#[derive(Debug, Clone)]
pub struct SubstitutionRule {
    id: String,
    matcher: Matcher,
    replacement: Replacement,
    scope: Scope,
    required: bool,
    /// Explicit applied marker, or the literal text the rule writes
    evidence: Option<String>,
    /// Output of the rule contains its own matcher
    reintroduces_matcher: bool,
}

impl SubstitutionRule {
    /// Create a required rule with no applied marker.
    pub fn new(
        id: impl Into<String>,
        matcher: Matcher,
        replacement: Replacement,
        scope: Scope,
    ) -> Result<Self, PatchError> {
        Self::with_options(id, matcher, replacement, scope, RuleOptions::default())
    }

    /// Required literal search/replace.
    pub fn literal(
        id: impl Into<String>,
        search: impl Into<String>,
        replace: impl Into<String>,
        scope: Scope,
    ) -> Result<Self, PatchError> {
        Self::new(
            id,
            Matcher::literal(search),
            Replacement::Text(replace.into()),
            scope,
        )
    }

    /// Required regex search/replace with a capture template.
    pub fn pattern(
        id: impl Into<String>,
        pattern: &str,
        template: impl Into<String>,
        scope: Scope,
    ) -> Result<Self, PatchError> {
        let id = id.into();
        let matcher =
            Matcher::pattern(pattern).map_err(|e| PatchError::malformed(&id, e.to_string()))?;
        Self::new(id, matcher, Replacement::Text(template.into()), scope)
    }

    /// Create a rule, checking everything that can be checked without a document.
    pub fn with_options(
        id: impl Into<String>,
        matcher: Matcher,
        replacement: Replacement,
        scope: Scope,
        options: RuleOptions,
    ) -> Result<Self, PatchError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PatchError::malformed("<unnamed>", "rule id is empty"));
        }

        match &matcher {
            Matcher::Literal(text) if text.is_empty() => {
                return Err(PatchError::malformed(&id, "literal matcher is empty"));
            }
            Matcher::Pattern(re) if re.is_match("") => {
                return Err(PatchError::malformed(
                    &id,
                    format!("pattern /{}/ matches empty text", re.as_str()),
                ));
            }
            _ => {}
        }

        if let Replacement::InsertBefore(text) | Replacement::InsertAfter(text) = &replacement {
            if text.is_empty() {
                return Err(PatchError::malformed(&id, "insert text is empty"));
            }
        }

        if let (Matcher::Pattern(re), Some(template)) = (&matcher, replacement.template()) {
            for cap in capture_refs(template) {
                let known = match cap {
                    CaptureRef::Index(index) => index < re.captures_len(),
                    CaptureRef::Named(name) => re.capture_names().flatten().any(|n| n == name),
                };
                if !known {
                    return Err(PatchError::malformed(
                        &id,
                        format!("replacement references undefined capture {cap}"),
                    ));
                }
            }
        }

        if options.applied_marker.as_deref() == Some("") {
            return Err(PatchError::malformed(&id, "applied marker is empty"));
        }

        let output = literal_output(&matcher, &replacement);
        let reintroduces_matcher = match (&matcher, &replacement) {
            (_, Replacement::Delete) => false,
            (
                Matcher::Pattern(_),
                Replacement::InsertBefore(_) | Replacement::InsertAfter(_),
            ) => true,
            // The expansion depends on what was captured, so it may match again.
            (Matcher::Pattern(_), Replacement::Text(template))
                if !capture_refs(template).is_empty() =>
            {
                true
            }
            (matcher, _) => output.as_deref().is_some_and(|out| matcher.is_match(out)),
        };

        // Derived output only counts as evidence when it contains the match
        // itself; replacement text alone can occur anywhere in a document.
        let evidence = match options.applied_marker {
            Some(marker) => Some(marker),
            None if reintroduces_matcher => output.filter(|out| !out.is_empty()),
            None => None,
        };

        if reintroduces_matcher && evidence.is_none() {
            return Err(PatchError::malformed(
                &id,
                "replacement may re-introduce the matcher; an applied marker is required",
            ));
        }

        Ok(Self {
            id,
            matcher,
            replacement,
            scope,
            required: options.required,
            evidence,
            reintroduces_matcher,
        })
    }

    /// Turn this rule into one whose missing match is a no-op.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn replacement(&self) -> &Replacement {
        &self.replacement
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Text whose presence means the rule has already run, if known.
    pub fn applied_evidence(&self) -> Option<&str> {
        self.evidence.as_deref()
    }

    /// Whether the rule's own output would match it again.
    pub fn reintroduces_matcher(&self) -> bool {
        self.reintroduces_matcher
    }

    fn evidence_in(&self, document: &str) -> bool {
        self.evidence
            .as_deref()
            .is_some_and(|evidence| document.contains(evidence))
    }

    fn substitute(&self, document: &str) -> String {
        match &self.matcher {
            Matcher::Literal(search) => {
                let output: Cow<'_, str> = match &self.replacement {
                    Replacement::Text(text) => Cow::Borrowed(text.as_str()),
                    Replacement::Delete => Cow::Borrowed(""),
                    Replacement::InsertBefore(text) => Cow::Owned(format!("{text}{search}")),
                    Replacement::InsertAfter(text) => Cow::Owned(format!("{search}{text}")),
                };
                match self.scope {
                    Scope::First => document.replacen(search.as_str(), &output, 1),
                    Scope::All => document.replace(search.as_str(), &output),
                }
            }
            Matcher::Pattern(re) => re
                .replacen(document, self.scope.limit(), |caps: &Captures<'_>| {
                    self.render(caps)
                })
                .into_owned(),
        }
    }

    fn render(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        match &self.replacement {
            Replacement::Text(template) => caps.expand(template, &mut out),
            Replacement::Delete => {}
            Replacement::InsertBefore(template) => {
                caps.expand(template, &mut out);
                out.push_str(&caps[0]);
            }
            Replacement::InsertAfter(template) => {
                out.push_str(&caps[0]);
                caps.expand(template, &mut out);
            }
        }
        out
    }
}

/// Per-rule result within a patch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    /// Matcher found and replaced
    Applied { occurrences: usize },
    /// Matcher absent but the rule's output is already in the document
    AlreadyApplied,
    /// Optional rule, matcher absent
    Skipped,
    /// Required rule, matcher absent
    Failed,
    /// An earlier required rule failed
    NotAttempted,
}

impl RuleStatus {
    pub fn matched(&self) -> bool {
        matches!(self, RuleStatus::Applied { .. })
    }

    pub fn occurrences(&self) -> usize {
        match self {
            RuleStatus::Applied { occurrences } => *occurrences,
            _ => 0,
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStatus::Applied { occurrences: 1 } => {
                write!(f, "matched, 1 occurrence replaced")
            }
            RuleStatus::Applied { occurrences } => {
                write!(f, "matched, {occurrences} occurrences replaced")
            }
            RuleStatus::AlreadyApplied => write!(f, "not matched (already applied)"),
            RuleStatus::Skipped => write!(f, "not matched (optional, skipped)"),
            RuleStatus::Failed => write!(f, "not matched (required)"),
            RuleStatus::NotAttempted => write!(f, "not attempted"),
        }
    }
}

/// Result of applying one rule to one document version.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RuleOutcome carries the patched document"]
pub struct RuleOutcome<'a> {
    pub document: Cow<'a, str>,
    pub status: RuleStatus,
}

impl RuleOutcome<'_> {
    pub fn matched(&self) -> bool {
        self.status.matched()
    }

    pub fn occurrences(&self) -> usize {
        self.status.occurrences()
    }
}

fn unchanged(document: &str, status: RuleStatus) -> RuleOutcome<'_> {
    RuleOutcome {
        document: Cow::Borrowed(document),
        status,
    }
}

/// Apply a single rule to `document`.
///
/// Pure: no I/O happens here. The document is borrowed back unchanged when
/// nothing matched. A required rule with no match and no applied evidence
/// yields [`PatchError::RuleNotMatched`].
pub fn apply_rule<'a>(
    document: &'a str,
    rule: &SubstitutionRule,
) -> Result<RuleOutcome<'a>, PatchError> {
    // A rule that rewrites into its own matcher must be guarded before matching.
    if rule.reintroduces_matcher && rule.evidence_in(document) {
        debug!("rule '{}': applied evidence present", rule.id);
        return Ok(unchanged(document, RuleStatus::AlreadyApplied));
    }

    let found = rule.matcher.count(document);
    if found == 0 {
        if rule.evidence_in(document) {
            debug!("rule '{}': no match, already applied", rule.id);
            return Ok(unchanged(document, RuleStatus::AlreadyApplied));
        }
        if rule.required {
            return Err(PatchError::RuleNotMatched {
                rule: rule.id.clone(),
            });
        }
        debug!("rule '{}': no match, optional", rule.id);
        return Ok(unchanged(document, RuleStatus::Skipped));
    }

    let occurrences = match rule.scope {
        Scope::First => 1,
        Scope::All => found,
    };
    debug!(
        "rule '{}': replacing {} of {} occurrence(s)",
        rule.id, occurrences, found
    );

    Ok(RuleOutcome {
        document: Cow::Owned(rule.substitute(document)),
        status: RuleStatus::Applied { occurrences },
    })
}

/// Text a rule writes when that text is known without a match.
fn literal_output(matcher: &Matcher, replacement: &Replacement) -> Option<String> {
    match (matcher, replacement) {
        (_, Replacement::Delete) => None,
        (Matcher::Literal(_), Replacement::Text(text)) => Some(text.clone()),
        (Matcher::Literal(search), Replacement::InsertBefore(text)) => {
            Some(format!("{text}{search}"))
        }
        (Matcher::Literal(search), Replacement::InsertAfter(text)) => {
            Some(format!("{search}{text}"))
        }
        (Matcher::Pattern(_), Replacement::Text(template)) if capture_refs(template).is_empty() => {
            Some(template.replace("$$", "$"))
        }
        (Matcher::Pattern(_), _) => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureRef<'a> {
    Index(usize),
    Named(&'a str),
}

impl<'a> CaptureRef<'a> {
    fn parse(name: &'a str) -> Self {
        match name.parse::<usize>() {
            Ok(index) => CaptureRef::Index(index),
            Err(_) => CaptureRef::Named(name),
        }
    }
}

impl fmt::Display for CaptureRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureRef::Index(index) => write!(f, "${index}"),
            CaptureRef::Named(name) => write!(f, "${{{name}}}"),
        }
    }
}

/// Capture references in a replacement template.
///
/// Follows the regex crate's expansion rules: `$$` is an escaped dollar,
/// `${...}` runs to the closing brace, and a bare `$` takes the longest run
/// of `[_0-9A-Za-z]`. A `$` that starts no reference is literal.
fn capture_refs(template: &str) -> Vec<CaptureRef<'_>> {
    let bytes = template.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'$') => i += 2,
            Some(b'{') => match template[i + 2..].find('}') {
                Some(len) => {
                    refs.push(CaptureRef::parse(&template[i + 2..i + 2 + len]));
                    i += len + 3;
                }
                None => i += 1,
            },
            _ => {
                let len = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
                if len > 0 {
                    refs.push(CaptureRef::parse(&template[i + 1..i + 1 + len]));
                }
                i += 1 + len;
            }
        }
    }

    refs
}
