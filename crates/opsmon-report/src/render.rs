//! Markdown rendering of a finished report.
//!
//! Pure: identical inputs always produce byte-identical output, with no
//! trailing newline.

use opsmon_state::StatusSummary;

use crate::facts::SourcesInfo;
use crate::schema::ReportData;

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

pub fn render_report_markdown(
    report: &ReportData,
    generated_at: &str,
    range_minutes: u32,
    status: &StatusSummary,
    sources: &SourcesInfo,
) -> String {
    let mut lines: Vec<String> = vec![
        format!("# Ops Report ({generated_at})"),
        String::new(),
        format!("**Overall:** {}", report.headline),
        String::new(),
        "## Current status".to_string(),
        format!("- Window: last {range_minutes} minutes"),
        format!(
            "- Checks: total={}, up={}, down={}, unknown={}",
            status.total, status.up, status.down, status.unknown
        ),
    ];
    let down_ids = status.down_ids();
    if !down_ids.is_empty() {
        lines.push(format!("- Down checks: {}", down_ids.join(", ")));
    }

    lines.push(String::new());
    lines.push("## Notable events".to_string());
    if report.notable_events.is_empty() {
        lines.push("- None".to_string());
    }
    for event in &report.notable_events {
        let time = event.time.as_deref().unwrap_or("unknown");
        lines.push(format!("- [{}] {time} - {}", event.severity, event.summary));
    }

    lines.push(String::new());
    lines.push("## Current issues".to_string());
    if report.current_issues.is_empty() {
        lines.push("- None".to_string());
    }
    for issue in &report.current_issues {
        lines.push(format!(
            "- {} (suggestion: {})",
            issue.summary, issue.suggestion
        ));
    }

    lines.push(String::new());
    lines.push("## Recommendations".to_string());
    if report.recommendations.is_empty() {
        lines.push("1. None".to_string());
    }
    for (idx, rec) in report.recommendations.iter().enumerate() {
        lines.push(format!("{}. {rec}", idx + 1));
    }

    lines.push(String::new());
    lines.push("## Sources".to_string());
    lines.push(format!("- ops_summary: {}", yes_no(sources.ops_summary_included)));
    lines.push(format!(
        "- status_summary: {}",
        yes_no(sources.status_summary_included)
    ));
    lines.push(format!("- events_limit: {}", sources.events_limit));
    lines.push(format!("- proxmox: {}", yes_no(sources.proxmox_included)));

    lines.join("\n")
}
