//! Structured command results

use colored::*;
use serde::Serialize;
use serde_json::Value as Json;
use std::time::Duration;

use crate::cli::OutputFormat;
use crate::error::FailureCategory;
use crate::validation::{ValidationIssue, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Failed,
}

/// What every command prints
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<FailureCategory>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub timing_ms: u64,
    #[serde(skip_serializing_if = "Json::is_null")]
    pub data: Json,
}

impl CommandReport {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            status: Status::Ok,
            category: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            timing_ms: 0,
            data: Json::Null,
        }
    }

    /// Fold in the issues of one validation result
    pub fn absorb(&mut self, result: &ValidationResult) {
        self.errors.extend(result.errors.iter().cloned());
        self.warnings.extend(result.warnings.iter().cloned());
        if let Some(category) = result.category() {
            self.fail(category);
        }
    }

    /// Mark the command failed, keeping the most severe category seen
    pub fn fail(&mut self, category: FailureCategory) {
        self.status = Status::Failed;
        self.category = Some(match self.category {
            Some(existing) => existing.max(category),
            None => category,
        });
    }

    pub fn with_data(mut self, data: Json) -> Self {
        self.data = data;
        self
    }

    pub fn finish(mut self, elapsed: Duration) -> Self {
        self.timing_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            Status::Ok => 0,
            Status::Failed => self.category.unwrap_or(FailureCategory::Other).exit_code(),
        }
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}")),
            OutputFormat::Text => self.render_text(),
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        let mark = match self.status {
            Status::Ok => "✓".green(),
            Status::Failed => "✗".red(),
        };
        let category = self.category.map(|c| format!(" ({c:?})").to_lowercase()).unwrap_or_default();
        out.push_str(&format!("{} {}{}\n", mark, self.command.bold(), category));

        for issue in &self.errors {
            out.push_str(&format!("  {} {}\n", "error".red(), issue));
        }
        for issue in &self.warnings {
            out.push_str(&format!("  {} {}\n", "warning".yellow(), issue));
        }
        if let Some(text) = self.data.as_str() {
            out.push_str(text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
        } else if !self.data.is_null() {
            out.push_str(&format!("{}\n", summarize(&self.data)));
        }
        out.push_str(&format!("  {}\n", format!("{} ms", self.timing_ms).dimmed()));
        out
    }
}

fn summarize(data: &Json) -> String {
    match data {
        Json::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Json::String(s) => format!("  {}: {}", k.cyan(), s),
                Json::Array(items) => {
                    let items: Vec<String> = items
                        .iter()
                        .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                        .collect();
                    format!("  {}: {}", k.cyan(), items.join(", "))
                }
                other => format!("  {}: {}", k.cyan(), other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{IssueKind, Layer, Location};
    use serde_json::json;

    fn issue(kind: IssueKind) -> ValidationIssue {
        ValidationIssue::error(Layer::Security, kind, "bad", Location::at("template.source"))
    }

    #[test]
    fn test_ok_report_exits_zero() {
        let report = CommandReport::new("validate");
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_most_severe_category_wins() {
        let mut report = CommandReport::new("discover");
        report.fail(FailureCategory::Validation);
        report.fail(FailureCategory::Security);
        report.fail(FailureCategory::Generation);
        assert_eq!(report.exit_code(), FailureCategory::Security.exit_code());
    }

    #[test]
    fn test_absorb_result() {
        let mut result = ValidationResult::new("x.yml");
        result.record(Layer::Security, vec![issue(IssueKind::SecurityViolation)]);
        let mut report = CommandReport::new("validate");
        report.absorb(&result);
        assert_eq!(report.status, Status::Failed);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.exit_code(), 4);
    }

    #[test]
    fn test_json_shape() {
        let report = CommandReport::new("list").with_data(json!({"ids": ["a"]}));
        let value: Json = serde_json::from_str(&report.render(OutputFormat::Json)).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["errors"], json!([]));
        assert!(value.get("timing_ms").is_some());
        assert!(value.get("category").is_none());
    }
}
