//! Markdown report rendering.
//!
//! A per-flow report (step table plus findings grouped by severity) and a
//! session summary suitable as the export directory's README.

use crate::types::{Finding, Session, Severity};

use super::{FlowExport, SessionExport};

fn severity_heading(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Critical",
        Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low => "Low",
        Severity::Info => "Info",
    }
}

fn push_git_context(lines: &mut Vec<String>, session: &Session) {
    let Some(commit) = session.git_commit.as_deref() else {
        return;
    };
    let branch = session.git_branch.as_deref().unwrap_or("unknown");
    let dirty = if session.git_dirty { "Yes" } else { "No" };
    lines.push(String::new());
    lines.push("**Git Context:**".to_string());
    lines.push(format!("- Commit: `{commit}` ({branch})"));
    lines.push(format!("- Uncommitted changes: {dirty}"));
}

fn push_findings_by_severity(lines: &mut Vec<String>, findings: &[Finding]) {
    for severity in Severity::ALL {
        let group: Vec<&Finding> = findings.iter().filter(|f| f.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        lines.push(format!("### {}", severity_heading(severity)));
        lines.push(String::new());
        for finding in group {
            lines.push(format!("- **{}**: {}", finding.category, finding.description));
        }
        lines.push(String::new());
    }
}

/// Render one flow as a Markdown report.
pub fn flow_report(export: &FlowExport, session: &Session) -> String {
    let flow = &export.flow;
    let mut lines = vec![
        format!("# {}", flow.name),
        String::new(),
        format!("**Session:** {}", session.name),
        format!(
            "**Entry Point:** {}",
            flow.entry_point.as_deref().unwrap_or("-")
        ),
        format!("**Status:** {}", flow.status),
        format!("**Created:** {}", flow.created_at),
    ];

    push_git_context(&mut lines, session);

    lines.extend([
        String::new(),
        "## Flow Steps".to_string(),
        String::new(),
        "| # | Layer | Action | Subject | File | Status |".to_string(),
        "|---|-------|--------|---------|------|--------|".to_string(),
    ]);
    for node in &export.nodes {
        let file_ref = node.file_ref.as_deref().unwrap_or("-");
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} |",
            node.id, node.layer, node.action, node.subject, file_ref, node.status
        ));
    }

    if !export.findings.is_empty() {
        lines.push(String::new());
        lines.push("## Findings".to_string());
        lines.push(String::new());
        push_findings_by_severity(&mut lines, &export.findings);
    }

    lines.extend([
        String::new(),
        "## Flow Diagram".to_string(),
        String::new(),
        format!("See [{0}.mermaid]({0}.mermaid)", flow.name),
    ]);

    lines.join("\n")
}

/// Render a session summary, used as the export directory's README.
pub fn session_summary(export: &SessionExport) -> String {
    let session = &export.session;
    let mut lines = vec![
        format!("# {}", session.name),
        String::new(),
        format!("**Purpose:** {}", session.purpose),
        format!("**Granularity:** {}", session.granularity),
        format!("**Status:** {}", session.status),
        format!("**Created:** {}", session.created_at),
    ];

    push_git_context(&mut lines, session);

    lines.extend([String::new(), "## Flows".to_string(), String::new()]);
    for flow in &export.flows {
        lines.push(format!(
            "- [{0}]({0}.md) - {1} steps, {2} findings",
            flow.flow.name,
            flow.nodes.len(),
            flow.findings.len()
        ));
    }

    if !export.session_findings.is_empty() {
        lines.extend([
            String::new(),
            "## Session-Level Findings".to_string(),
            String::new(),
        ]);
        for finding in &export.session_findings {
            lines.push(format!(
                "- [{}] {}: {}",
                finding.severity.to_string().to_uppercase(),
                finding.category,
                finding.description
            ));
        }
    }

    lines.join("\n")
}
