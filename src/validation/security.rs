//! Two-layer template security checks
//!
//! Layer 1 is a static scan of the template text that runs before anything
//! is compiled. It looks only inside mustache tags, where executable syntax
//! lives; prompt prose around the tags is free text and may mention `import`
//! or `/etc` without consequence. Layer 2 runs on the compiled AST and
//! rejects every helper, partial or decorator outside the sandbox allow-list.
//! A template that fails layer 1 never reaches layer 2, so one offending
//! construct produces one violation.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use super::result::{IssueKind, Layer, Location, ValidationIssue};
use crate::error::ResourceLimit;
use crate::spec::SpecDocument;
use crate::template::{TemplateFacts, is_allowed_helper};

/// Deny-list rule matched by the static scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticRule {
    DynamicCode,
    FilesystemAccess,
    ProcessInvocation,
    PartialOrDecorator,
}

impl StaticRule {
    pub const ALL: [StaticRule; 4] = [
        StaticRule::DynamicCode,
        StaticRule::FilesystemAccess,
        StaticRule::ProcessInvocation,
        StaticRule::PartialOrDecorator,
    ];

    pub fn describe(&self) -> &'static str {
        match self {
            StaticRule::DynamicCode => "dynamic code loading",
            StaticRule::FilesystemAccess => "filesystem access",
            StaticRule::ProcessInvocation => "process invocation",
            StaticRule::PartialOrDecorator => "partial or decorator syntax",
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            StaticRule::DynamicCode => &DYNAMIC_CODE_RE,
            StaticRule::FilesystemAccess => &FILESYSTEM_RE,
            StaticRule::ProcessInvocation => &PROCESS_RE,
            StaticRule::PartialOrDecorator => &PARTIAL_RE,
        }
    }
}

impl fmt::Display for StaticRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("tag regex is valid"));

static DYNAMIC_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(__import__|import|require|eval|exec)\b|\bcompile\s*\(").expect("dynamic code regex is valid")
});

static FILESYSTEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(open|fopen)\s*\(|\b(read_file|write_file|readfile|include_str|include_bytes)\b|std::fs|file://|(^|[\s'\x22=(])/(etc|proc|sys|dev|root|boot)(/|\b)",
    )
    .expect("filesystem regex is valid")
});

static PROCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(subprocess|popen|spawn)\b|os\.system|\bsystem\s*\(|std::process|\$\(|`")
        .expect("process regex is valid")
});

static PARTIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{~?\s*#?\s*[>*]").expect("partial regex is valid"));

/// Static deny-list scan; each matched rule is reported once
pub fn scan_static(source: &str) -> Vec<StaticRule> {
    let tags: Vec<&str> = TAG_RE
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();

    StaticRule::ALL
        .into_iter()
        .filter(|rule| match rule {
            StaticRule::PartialOrDecorator => rule.pattern().is_match(source),
            _ => tags.iter().any(|tag| rule.pattern().is_match(tag)),
        })
        .collect()
}

/// Layer 1: template size and static scan
pub fn check_static(doc: &SpecDocument, source: &str, max_template_bytes: usize) -> Vec<ValidationIssue> {
    debug!(path = ?doc.path, len = source.len(), "security::check_static: called");
    let mut issues = Vec::new();

    if source.len() > max_template_bytes {
        let limit = ResourceLimit::TemplateTooLarge {
            size: source.len(),
            limit: max_template_bytes,
        };
        issues.push(ValidationIssue::error(
            Layer::Security,
            IssueKind::ResourceLimitExceeded,
            format!("Resource limit exceeded: {limit}"),
            doc.locate("template.source"),
        ));
    }

    for rule in scan_static(source) {
        debug!(?rule, "security::check_static: deny-list match");
        issues.push(ValidationIssue::error(
            Layer::Security,
            IssueKind::SecurityViolation,
            format!("Template contains {rule}"),
            doc.locate("template.source"),
        ));
    }
    issues
}

/// Layer 2: sandbox capability check against the compiled template
pub fn check_capabilities(doc: &SpecDocument, facts: &TemplateFacts) -> Vec<ValidationIssue> {
    debug!(path = ?doc.path, helpers = facts.helpers.len(), "security::check_capabilities: called");
    let violation = |message: String, line: usize, column: usize| -> ValidationIssue {
        let location = if line > 0 {
            doc.template_location(line, column)
        } else {
            Location::at("template.source")
        };
        ValidationIssue::error(Layer::Security, IssueKind::SecurityViolation, message, location)
    };

    let mut issues = Vec::new();
    let mut reported: Vec<&str> = Vec::new();
    for helper in &facts.helpers {
        if is_allowed_helper(&helper.name) || reported.contains(&helper.name.as_str()) {
            continue;
        }
        reported.push(&helper.name);
        issues.push(violation(
            format!("Helper '{}' is not available in the sandbox", helper.name),
            helper.span.line,
            helper.span.column,
        ));
    }
    for partial in &facts.partials {
        issues.push(violation(
            format!("Partial '{}' is not available in the sandbox", partial.name),
            partial.span.line,
            partial.span.column,
        ));
    }
    for decorator in &facts.decorators {
        issues.push(violation(
            format!("Decorator '{}' is not available in the sandbox", decorator.name),
            decorator.span.line,
            decorator.span.column,
        ));
    }
    issues
}
