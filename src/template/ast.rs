//! Static analysis of compiled templates
//!
//! Walks the handlebars AST once and records what the template touches:
//! top-scope variable references, helper calls, partials, decorators and
//! literal values. The semantic, security and quality layers all work from
//! these facts instead of re-parsing the source.

use handlebars::Template;
use handlebars::template::{DecoratorTemplate, HelperTemplate, Parameter, TemplateElement};
use serde_json::Value as Json;

/// Helpers that open a new context scope for their block body
const SCOPING_HELPERS: [&str; 2] = ["each", "with"];

/// Helpers whose literal arguments count as comparisons against a variable
const COMPARISON_HELPERS: [&str; 2] = ["eq", "ne"];

/// Position inside the template source (1-based)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

/// A reference to a root-context variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    /// First path segment, i.e. the parameter name
    pub name: String,
    /// Path as written
    pub raw: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperUse {
    pub name: String,
    pub block: bool,
    pub span: Span,
}

/// `eq`/`ne` between a root variable and a literal
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub variable: String,
    pub literal: Json,
}

/// Everything the validation layers need to know about a template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateFacts {
    pub variables: Vec<VariableRef>,
    pub helpers: Vec<HelperUse>,
    pub partials: Vec<HelperUse>,
    pub decorators: Vec<HelperUse>,
    pub literals: Vec<Json>,
    pub comparisons: Vec<Comparison>,
}

impl TemplateFacts {
    /// Distinct root variable names in first-use order
    pub fn variable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for v in &self.variables {
            if !names.contains(&v.name.as_str()) {
                names.push(&v.name);
            }
        }
        names
    }

    pub fn references(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }

    /// Whether any literal in the template equals `value`
    pub fn mentions_literal(&self, value: &Json) -> bool {
        self.literals.iter().any(|l| literal_matches(l, value))
    }

    pub fn compared(&self, variable: &str) -> bool {
        self.comparisons.iter().any(|c| c.variable == variable)
    }
}

fn literal_matches(literal: &Json, value: &Json) -> bool {
    if literal == value {
        return true;
    }
    match (literal, value) {
        (Json::String(s), other) | (other, Json::String(s)) if !other.is_string() => *s == other.to_string(),
        _ => false,
    }
}

/// Analyze a compiled template
pub fn analyze(template: &Template) -> TemplateFacts {
    let mut walker = Walker::default();
    walker.template(template, 0);
    walker.facts
}

#[derive(Default)]
struct Walker {
    facts: TemplateFacts,
}

impl Walker {
    fn template(&mut self, template: &Template, depth: usize) {
        for (i, element) in template.elements.iter().enumerate() {
            let span = template
                .mapping
                .get(i)
                .map(|m| Span {
                    line: m.0,
                    column: m.1,
                })
                .unwrap_or_default();
            self.element(element, depth, span);
        }
    }

    fn element(&mut self, element: &TemplateElement, depth: usize, span: Span) {
        match element {
            TemplateElement::Expression(ht) | TemplateElement::HtmlExpression(ht) => {
                if is_name_only(ht) {
                    self.parameter(&ht.name, depth, span);
                } else {
                    self.helper(ht, depth, span);
                }
            }
            TemplateElement::HelperBlock(ht) => self.helper(ht, depth, span),
            TemplateElement::DecoratorExpression(dt) | TemplateElement::DecoratorBlock(dt) => {
                let use_ = self.decorator_use(dt, depth, span);
                self.facts.decorators.push(use_);
            }
            TemplateElement::PartialExpression(dt) | TemplateElement::PartialBlock(dt) => {
                let use_ = self.decorator_use(dt, depth, span);
                self.facts.partials.push(use_);
            }
            _ => {}
        }
    }

    fn helper(&mut self, ht: &HelperTemplate, depth: usize, span: Span) {
        let name = match &ht.name {
            Parameter::Subexpression(sub) => {
                self.element(sub.as_element(), depth, span);
                String::new()
            }
            other => other.as_name().unwrap_or_default().to_string(),
        };
        if !name.is_empty() {
            self.facts.helpers.push(HelperUse {
                name: name.clone(),
                block: ht.block,
                span,
            });
        }

        for param in &ht.params {
            self.parameter(param, depth, span);
        }
        for param in ht.hash.values() {
            self.parameter(param, depth, span);
        }

        if COMPARISON_HELPERS.contains(&name.as_str()) && ht.params.len() == 2 {
            self.comparison(&ht.params[0], &ht.params[1], depth);
            self.comparison(&ht.params[1], &ht.params[0], depth);
        }

        let inner = if SCOPING_HELPERS.contains(&name.as_str()) { depth + 1 } else { depth };
        if let Some(body) = &ht.template {
            self.template(body, inner);
        }
        if let Some(inverse) = &ht.inverse {
            self.template(inverse, depth);
        }
    }

    fn decorator_use(&mut self, dt: &DecoratorTemplate, depth: usize, span: Span) -> HelperUse {
        let name = dt.name.as_name().unwrap_or_default().to_string();
        for param in &dt.params {
            self.parameter(param, depth, span);
        }
        if let Some(body) = &dt.template {
            self.template(body, depth);
        }
        HelperUse { name, block: false, span }
    }

    fn parameter(&mut self, param: &Parameter, depth: usize, span: Span) {
        match param {
            Parameter::Literal(json) => self.facts.literals.push(json.clone()),
            Parameter::Subexpression(sub) => self.element(sub.as_element(), depth, span),
            other => {
                if let Some(raw) = other.as_name()
                    && let Some(name) = root_variable(raw, depth)
                {
                    self.facts.variables.push(VariableRef {
                        name,
                        raw: raw.to_string(),
                        span,
                    });
                }
            }
        }
    }

    fn comparison(&mut self, variable: &Parameter, literal: &Parameter, depth: usize) {
        if let Parameter::Literal(lit) = literal
            && !matches!(variable, Parameter::Literal(_) | Parameter::Subexpression(_))
            && let Some(raw) = variable.as_name()
            && let Some(name) = root_variable(raw, depth)
        {
            self.facts.comparisons.push(Comparison {
                variable: name,
                literal: lit.clone(),
            });
        }
    }
}

fn is_name_only(ht: &HelperTemplate) -> bool {
    !ht.block && ht.params.is_empty() && ht.hash.is_empty()
}

/// Root-context variable a path refers to, if any
///
/// Inside `each`/`with` bodies plain paths resolve against the current item, so
/// only `@root` and enough `../` hops reach the root context.
pub fn root_variable(raw: &str, depth: usize) -> Option<String> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("@root") {
        return first_segment(rest.trim_start_matches(['.', '/']));
    }
    if raw.starts_with('@') {
        return None;
    }

    let mut rest = raw;
    let mut ups = 0;
    while let Some(r) = rest.strip_prefix("../") {
        ups += 1;
        rest = r;
    }
    if rest.starts_with('@') || depth.saturating_sub(ups) > 0 {
        return None;
    }

    let rest = rest.strip_prefix("./").unwrap_or(rest);
    let rest = rest
        .strip_prefix("this.")
        .or_else(|| rest.strip_prefix("this/"))
        .unwrap_or(rest);
    if rest == "this" || rest == "." || rest == ".." {
        return None;
    }
    first_segment(rest)
}

fn first_segment(path: &str) -> Option<String> {
    if let Some(inner) = path.strip_prefix('[') {
        let end = inner.find(']')?;
        let seg = &inner[..end];
        return if seg.is_empty() { None } else { Some(seg.to_string()) };
    }
    let seg: String = path.chars().take_while(|c| !matches!(c, '.' | '/' | '[')).collect();
    if seg.is_empty() { None } else { Some(seg) }
}
