//! Parses Maven's `[ERROR]`/`[WARNING]` build report lines into structured
//! [`CompilationDiagnostic`]s.
//!
//! Grounded on `feedback/compiler.rs`'s diagnostic-line grammar, retargeted
//! at Maven's `javac`-via-`maven-compiler-plugin` output format:
//! `[ERROR] /path/To/File.java:[12,5] cannot find symbol`.

use regex::Regex;

use crate::model::{CompilationDiagnostic, DiagnosticSeverity};

/// Parses every diagnostic line out of a raw `mvn compile`/`mvn package`
/// log. Lines that don't match the grammar (build banners, progress
/// dots, etc.) are ignored.
pub fn parse_build_output(output: &str) -> Vec<CompilationDiagnostic> {
    let located =
        Regex::new(r"^\[(ERROR|WARNING)\]\s+(\S+\.java):\[(\d+),\d+\]\s*(.*)$").unwrap();
    let unlocated = Regex::new(r"^\[(ERROR|WARNING)\]\s+(.*)$").unwrap();

    output
        .lines()
        .filter_map(|line| {
            if let Some(caps) = located.captures(line) {
                Some(CompilationDiagnostic {
                    severity: severity_from(&caps[1]),
                    file: Some(caps[2].to_string()),
                    line: caps[3].parse().ok(),
                    message: caps[4].trim().to_string(),
                    raw: line.to_string(),
                })
            } else {
                unlocated.captures(line).map(|caps| CompilationDiagnostic {
                    severity: severity_from(&caps[1]),
                    file: None,
                    line: None,
                    message: caps[2].trim().to_string(),
                    raw: line.to_string(),
                })
            }
        })
        .collect()
}

fn severity_from(tag: &str) -> DiagnosticSeverity {
    if tag == "ERROR" {
        DiagnosticSeverity::Error
    } else {
        DiagnosticSeverity::Warning
    }
}

pub fn has_errors(diagnostics: &[CompilationDiagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == DiagnosticSeverity::Error)
}

/// Classifies a diagnostic's message into a known fixable category, used
/// by [`crate::compiler::rules`] to pick a rule-based repair before
/// falling back to an LLM repair pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCategory {
    MissingDependency,
    MissingImport,
    CancellableEventMisuse,
    Unknown,
}

pub fn classify(diagnostic: &CompilationDiagnostic) -> DiagnosticCategory {
    let msg = diagnostic.message.to_lowercase();
    if msg.contains("package") && msg.contains("does not exist") {
        DiagnosticCategory::MissingDependency
    } else if msg.contains("cannot find symbol") && msg.contains("class") {
        DiagnosticCategory::MissingImport
    } else if msg.contains("setcancelled") || msg.contains("iscancelled") {
        DiagnosticCategory::CancellableEventMisuse
    } else {
        DiagnosticCategory::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_located_error() {
        let output = "[ERROR] /proj/src/Main.java:[12,5] cannot find symbol\n  symbol: class Foo\n";
        let diags = parse_build_output(output);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file.as_deref(), Some("/proj/src/Main.java"));
        assert_eq!(diags[0].line, Some(12));
        assert_eq!(diags[0].severity, DiagnosticSeverity::Error);
    }

    #[test]
    fn test_parses_unlocated_error() {
        let output = "[ERROR] Failed to execute goal org.apache.maven.plugins:maven-compiler-plugin";
        let diags = parse_build_output(output);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].file.is_none());
    }

    #[test]
    fn test_classifies_missing_dependency() {
        let d = CompilationDiagnostic {
            severity: DiagnosticSeverity::Error,
            file: None,
            line: None,
            message: "package org.bukkit.event does not exist".into(),
            raw: String::new(),
        };
        assert_eq!(classify(&d), DiagnosticCategory::MissingDependency);
    }

    #[test]
    fn test_has_errors() {
        let diags = parse_build_output("[WARNING] deprecated API\n");
        assert!(!has_errors(&diags));
        let diags = parse_build_output("[ERROR] boom\n");
        assert!(has_errors(&diags));
    }
}
