// Static checks for generated code that looks unfinished

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::db::models::ProjectFile;

pub const TOTAL_CHECKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    FakeCode,
    MissingErrorHandling,
    MissingEnv,
    MissingResponsive,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub file: String,
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub total_checks: usize,
    pub passed: usize,
    pub warnings: usize,
    pub issues: Vec<Issue>,
    pub checked_at: String,
}

lazy_static! {
    static ref FAKE_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"// TODO").unwrap(), "TODO placeholder found"),
        (
            Regex::new(r#"console\.log\(['"]Feature not implemented"#).unwrap(),
            "Feature marked as not implemented",
        ),
        (
            Regex::new(r#"alert\(['"]Coming soon"#).unwrap(),
            "Coming soon placeholder",
        ),
        (
            Regex::new(r"onClick=\{\(\)\s*=>\s*\{\s*\}\}").unwrap(),
            "Empty click handler",
        ),
        (
            Regex::new(r"const\s+handleSubmit\s*=\s*\(\)\s*=>\s*\{\s*\}").unwrap(),
            "Empty submit handler",
        ),
    ];
}

fn detect_fake_code(files: &[ProjectFile], issues: &mut Vec<Issue>) {
    for file in files.iter().filter(|f| !f.content.is_empty()) {
        for (pattern, message) in FAKE_PATTERNS.iter() {
            if pattern.is_match(&file.content) {
                issues.push(Issue {
                    file: file.path.clone(),
                    kind: IssueKind::FakeCode,
                    severity: Severity::Error,
                    message: message.to_string(),
                });
            }
        }
    }
}

fn check_error_handling(files: &[ProjectFile], issues: &mut Vec<Issue>) {
    for file in files {
        let content = &file.content;

        if content.contains("fetch(") && !content.contains("try") {
            issues.push(Issue {
                file: file.path.clone(),
                kind: IssueKind::MissingErrorHandling,
                severity: Severity::Warning,
                message: "Fetch call without error handling".to_string(),
            });
        }

        if content.contains("async function") && !content.contains("catch") {
            issues.push(Issue {
                file: file.path.clone(),
                kind: IssueKind::MissingErrorHandling,
                severity: Severity::Warning,
                message: "Async function without error handling".to_string(),
            });
        }
    }
}

fn check_env_completeness(files: &[ProjectFile], issues: &mut Vec<Issue>) {
    let needs_env = files
        .iter()
        .any(|f| f.content.contains("OPENAI_API_KEY") || f.content.contains("STRIPE"));
    let has_env_example = files.iter().any(|f| f.path.contains(".env"));

    if needs_env && !has_env_example {
        issues.push(Issue {
            file: "project".to_string(),
            kind: IssueKind::MissingEnv,
            severity: Severity::Error,
            message: ".env.example file missing for required API keys".to_string(),
        });
    }
}

fn check_responsive_design(files: &[ProjectFile], issues: &mut Vec<Issue>) {
    let stylesheets: Vec<&ProjectFile> = files
        .iter()
        .filter(|f| f.path.ends_with(".css") || f.path.to_lowercase().contains("style"))
        .collect();

    let responsive = stylesheets
        .iter()
        .any(|f| f.content.contains("@media") || f.content.to_lowercase().contains("responsive"));

    if !stylesheets.is_empty() && !responsive {
        issues.push(Issue {
            file: "styles".to_string(),
            kind: IssueKind::MissingResponsive,
            severity: Severity::Warning,
            message: "No responsive design patterns found".to_string(),
        });
    }
}

pub fn inspect(files: &[ProjectFile]) -> QualityReport {
    let mut issues = Vec::new();

    detect_fake_code(files, &mut issues);
    check_error_handling(files, &mut issues);
    check_env_completeness(files, &mut issues);
    check_responsive_design(files, &mut issues);

    let errors = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .count();
    let warnings = issues.len() - errors;

    QualityReport {
        total_checks: TOTAL_CHECKS,
        passed: TOTAL_CHECKS.saturating_sub(errors),
        warnings,
        issues,
        checked_at: Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> ProjectFile {
        ProjectFile::new(path, content)
    }

    #[test]
    fn test_clean_files_pass() {
        let files = vec![
            file("src/App.js", "export default function App() { return <div/>; }"),
            file("src/App.css", "@media (max-width: 600px) { body { margin: 0; } }"),
        ];
        let report = inspect(&files);
        assert!(report.issues.is_empty());
        assert_eq!(report.passed, TOTAL_CHECKS);
        assert_eq!(report.warnings, 0);
    }

    #[test]
    fn test_detects_placeholders_and_empty_handlers() {
        let files = vec![file(
            "src/App.js",
            "// TODO wire this up\n<button onClick={() => {}}>Go</button>\nconst handleSubmit = () => { }",
        )];
        let report = inspect(&files);
        let messages: Vec<&str> = report.issues.iter().map(|i| i.message.as_str()).collect();

        assert!(messages.contains(&"TODO placeholder found"));
        assert!(messages.contains(&"Empty click handler"));
        assert!(messages.contains(&"Empty submit handler"));
        assert!(report
            .issues
            .iter()
            .all(|i| i.kind == IssueKind::FakeCode && i.severity == Severity::Error));
    }

    #[test]
    fn test_coming_soon_and_not_implemented() {
        let files = vec![file(
            "src/Nav.js",
            "alert('Coming soon!'); console.log(\"Feature not implemented\");",
        )];
        let report = inspect(&files);
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn test_fetch_without_try_is_a_warning() {
        let files = vec![file("src/api.js", "export const load = () => fetch('/api/items');")];
        let report = inspect(&files);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Severity::Warning);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.passed, TOTAL_CHECKS);
    }

    #[test]
    fn test_async_function_without_catch() {
        let files = vec![file("src/api.js", "async function load() { await go(); }")];
        let report = inspect(&files);
        assert_eq!(report.issues[0].message, "Async function without error handling");
    }

    #[test]
    fn test_missing_env_example() {
        let files = vec![file("backend/main.py", "key = os.getenv('OPENAI_API_KEY')")];
        let report = inspect(&files);
        assert_eq!(report.issues[0].kind, IssueKind::MissingEnv);
        assert_eq!(report.passed, TOTAL_CHECKS - 1);

        let with_env = vec![
            file("backend/main.py", "key = os.getenv('OPENAI_API_KEY')"),
            file(".env.example", "OPENAI_API_KEY="),
        ];
        assert!(inspect(&with_env).issues.is_empty());
    }

    #[test]
    fn test_stylesheets_without_media_queries() {
        let files = vec![file("src/styles.css", "body { color: red; }")];
        let report = inspect(&files);
        assert_eq!(report.issues[0].kind, IssueKind::MissingResponsive);
        assert_eq!(report.issues[0].file, "styles");
    }
}
