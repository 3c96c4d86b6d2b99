//! Result rendering
//!
//! Turns a result document into human-readable reports: plain text for
//! terminals, markdown for CI summaries, HTML for archiving.

use std::fmt::Write as _;

use chrono::Utc;

use crate::tester::scenario::{ResultDocument, ScenarioResult};

/// Output format for the `report` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Html,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "html" => Ok(ReportFormat::Html),
            other => Err(format!("unknown report format '{other}'")),
        }
    }
}

/// Render a result document in the requested format.
pub fn render(results: &ResultDocument, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => render_text(results),
        ReportFormat::Markdown => render_markdown(results),
        ReportFormat::Html => render_html(results),
    }
}

fn summary_line(results: &ResultDocument) -> String {
    format!(
        "{} scenario(s): {} passed, {} failed",
        results.results.len(),
        results.passed_count(),
        results.failed_count()
    )
}

fn render_text(results: &ResultDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scenario results: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "{}", summary_line(results));
    let _ = writeln!(out);
    for result in &results.results {
        let status = if result.success { "PASS" } else { "FAIL" };
        let _ = writeln!(out, "[{status}] {} ({} ms)", result.name, result.duration);
        if let Some(message) = &result.error_message {
            let _ = writeln!(out, "       {message}");
        }
        for step in &result.step_results {
            if step.success {
                continue;
            }
            let _ = writeln!(out, "       step '{}' failed:", step.name);
            for e in step.expectation_results.iter().filter(|e| !e.success) {
                let _ = writeln!(
                    out,
                    "         {} expected {} got {}",
                    e.key, e.expected, e.actual
                );
            }
        }
    }
    out
}

fn render_markdown(results: &ResultDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Scenario results");
    let _ = writeln!(out);
    let _ = writeln!(out, "_{}_", summary_line(results));
    let _ = writeln!(out);
    let _ = writeln!(out, "| Scenario | Result | Duration (ms) | Details |");
    let _ = writeln!(out, "|---|---|---|---|");
    for result in &results.results {
        let status = if result.success { "✅ pass" } else { "❌ fail" };
        let details = failure_details(result).join("; ");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            result.name, status, result.duration, details
        );
    }
    out
}

fn render_html(results: &ResultDocument) -> String {
    let mut rows = String::new();
    for result in &results.results {
        let class = if result.success { "pass" } else { "fail" };
        let status = if result.success { "PASS" } else { "FAIL" };
        let details = escape(&failure_details(result).join("; "));
        let _ = write!(
            rows,
            "<tr class=\"{class}\"><td>{}</td><td>{status}</td><td>{}</td><td>{details}</td></tr>\n",
            escape(&result.name),
            result.duration
        );
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Scenario results</title>\n<style>\n\
         body {{ font-family: sans-serif; margin: 2em; }}\n\
         table {{ border-collapse: collapse; width: 100%; }}\n\
         th, td {{ border: 1px solid #ccc; padding: 0.4em 0.8em; text-align: left; }}\n\
         tr.pass td:nth-child(2) {{ color: #2e7d32; }}\n\
         tr.fail td:nth-child(2) {{ color: #c62828; }}\n\
         </style>\n</head>\n<body>\n<h1>Scenario results</h1>\n<p>{}</p>\n\
         <table>\n<tr><th>Scenario</th><th>Result</th><th>Duration (ms)</th><th>Details</th></tr>\n\
         {rows}</table>\n</body>\n</html>\n",
        escape(&summary_line(results))
    )
}

fn failure_details(result: &ScenarioResult) -> Vec<String> {
    let mut details = Vec::new();
    if let Some(message) = &result.error_message {
        details.push(message.clone());
    }
    for step in &result.step_results {
        for e in step.expectation_results.iter().filter(|e| !e.success) {
            details.push(format!(
                "{}: expected {} got {}",
                e.key, e.expected, e.actual
            ));
        }
    }
    details
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tester::scenario::{ExpectationResult, StepResult};
    use crate::types::Value;

    fn sample_results() -> ResultDocument {
        ResultDocument {
            results: vec![
                ScenarioResult {
                    name: "passes".to_string(),
                    success: true,
                    duration: 42,
                    error_message: None,
                    step_results: vec![],
                },
                ScenarioResult {
                    name: "fails".to_string(),
                    success: false,
                    duration: 99,
                    error_message: Some("step 'x' failed".to_string()),
                    step_results: vec![StepResult {
                        name: "x".to_string(),
                        success: false,
                        expectation_results: vec![ExpectationResult {
                            key: "output:alert".to_string(),
                            expected: Value::Text("HOT".into()),
                            actual: Value::Absent,
                            success: false,
                        }],
                    }],
                },
            ],
        }
    }

    #[test]
    fn text_report_lists_failures() {
        let text = render(&sample_results(), ReportFormat::Text);
        assert!(text.contains("[PASS] passes"));
        assert!(text.contains("[FAIL] fails"));
        assert!(text.contains("output:alert expected HOT got null"));
        assert!(text.contains("1 passed, 1 failed"));
    }

    #[test]
    fn markdown_report_is_a_table() {
        let md = render(&sample_results(), ReportFormat::Markdown);
        assert!(md.starts_with("# Scenario results"));
        assert!(md.contains("| passes | ✅ pass | 42 |"));
        assert!(md.contains("| fails | ❌ fail | 99 |"));
    }

    #[test]
    fn html_report_escapes_and_marks_rows() {
        let html = render(&sample_results(), ReportFormat::Html);
        assert!(html.contains("<tr class=\"pass\">"));
        assert!(html.contains("<tr class=\"fail\">"));
        assert!(html.contains("<title>Scenario results</title>"));
    }

    #[test]
    fn format_parses_from_cli_strings() {
        assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!("html".parse::<ReportFormat>().unwrap(), ReportFormat::Html);
        assert!("pdf".parse::<ReportFormat>().is_err());
    }
}
