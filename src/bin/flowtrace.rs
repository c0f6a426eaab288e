//! Trace graph CLI.
//!
//! Inspects, exports, validates, and merges trace databases. The database
//! lives at `.flowtrace/flowtrace.db` by default; the CSV twin of the
//! database lives in `.flowtrace/csv/`, and document exports land under
//! `docs/flows/<session>/`.
//!
//! ## Usage
//!
//! ```bash
//! flowtrace init
//! flowtrace show payments-audit
//! flowtrace export payments-audit --format mermaid
//! flowtrace validate payments-audit
//! flowtrace db-merge %O %A %B   # git merge driver
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use flowtrace::analyzer::FlowGraph;
use flowtrace::export::mermaid::{self, Direction};
use flowtrace::export::{markdown, FlowExport, SessionExport};
use flowtrace::interchange::{self, InterchangeError};
use flowtrace::merge::MergeReport;
use flowtrace::snapshot::{Snapshot, Table, TableCounts};
use flowtrace::store::sqlite::{merge_databases, SqliteError, SqliteStore};
use flowtrace::store::EntityStore;
use flowtrace::types::{Edge, Flow, Node, NodeId, Session, Severity};
use flowtrace::validate::{validate_session, ValidationLimits};

#[derive(Parser)]
#[command(name = "flowtrace", version, about = "Trace graph analyzer and merge engine")]
struct Cli {
    /// Path to the trace database
    #[arg(long, default_value = ".flowtrace/flowtrace.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the trace database
    Init {
        /// Replace an existing database
        #[arg(long)]
        force: bool,
    },
    /// List sessions
    List,
    /// Show session or flow details
    Show {
        /// Session name or id
        session: String,
        /// Flow name
        flow: Option<String>,
    },
    /// Export a session or flow as documents
    Export {
        /// Session name or id
        session: String,
        /// Export a single flow instead of the whole session
        #[arg(long, short)]
        flow: Option<String>,
        /// Flowchart direction
        #[arg(long, short, value_enum, ignore_case = true, default_value_t = DirectionArg::Td)]
        direction: DirectionArg,
        /// Output format
        #[arg(long, short = 'F', value_enum, default_value_t = FormatArg::All)]
        format: FormatArg,
        /// Root directory for exports
        #[arg(long, default_value = "docs/flows")]
        out_dir: PathBuf,
    },
    /// Run lint checks over a session's flows
    Validate {
        /// Session name or id
        session: String,
    },
    /// Export all tables to a CSV directory
    CsvExport {
        /// CSV directory
        #[arg(long, default_value = ".flowtrace/csv")]
        dir: PathBuf,
    },
    /// Replace the database with a CSV directory's contents
    CsvImport {
        /// CSV directory
        #[arg(long, default_value = ".flowtrace/csv")]
        dir: PathBuf,
    },
    /// Merge another CSV directory into ours
    CsvMerge {
        /// Their CSV directory
        theirs_dir: PathBuf,
        /// Our CSV directory, result written here
        #[arg(long, default_value = ".flowtrace/csv")]
        dir: PathBuf,
    },
    /// Git merge driver over two database files
    DbMerge {
        /// Common ancestor database (%O), unused
        ancestor: PathBuf,
        /// Our database (%A), result written here
        ours: PathBuf,
        /// Their database (%B)
        theirs: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    /// Top to bottom
    Td,
    /// Left to right
    Lr,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Td => Direction::TopDown,
            DirectionArg::Lr => Direction::LeftRight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Json,
    Yaml,
    Mermaid,
    #[value(alias = "md")]
    Markdown,
    All,
}

impl FormatArg {
    fn wants(self, which: FormatArg) -> bool {
        self == which || self == FormatArg::All
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowtrace=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

fn run(cli: Cli) -> CliResult {
    match cli.command {
        Commands::Init { force } => cmd_init(&cli.db, force),
        Commands::List => cmd_list(&cli.db),
        Commands::Show { session, flow } => cmd_show(&cli.db, &session, flow.as_deref()),
        Commands::Export {
            session,
            flow,
            direction,
            format,
            out_dir,
        } => cmd_export(
            &cli.db,
            &session,
            flow.as_deref(),
            direction.into(),
            format,
            &out_dir,
        ),
        Commands::Validate { session } => cmd_validate(&cli.db, &session),
        Commands::CsvExport { dir } => cmd_csv_export(&cli.db, &dir),
        Commands::CsvImport { dir } => cmd_csv_import(&cli.db, &dir),
        Commands::CsvMerge { theirs_dir, dir } => cmd_csv_merge(&dir, &theirs_dir),
        Commands::DbMerge {
            ancestor,
            ours,
            theirs,
        } => cmd_db_merge(&ancestor, &ours, &theirs),
    }
}

fn open_snapshot(db: &Path) -> Result<Snapshot, SqliteError> {
    SqliteStore::open(db)?.read_snapshot()
}

fn count_rows(counts: &TableCounts) -> [(Table, u64); 5] {
    [
        (Table::Sessions, counts.sessions),
        (Table::Flows, counts.flows),
        (Table::Nodes, counts.nodes),
        (Table::Edges, counts.edges),
        (Table::Findings, counts.findings),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_init(db: &Path, force: bool) -> CliResult {
    match SqliteStore::create(db, force) {
        Ok(_) => {
            println!("Initialized trace database at {}", db.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(SqliteError::AlreadyExists(path)) => {
            println!("Database already exists at {}", path.display());
            println!("Use --force to reinitialize (deletes existing data)");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_list(db: &Path) -> CliResult {
    let snapshot = open_snapshot(db)?;
    if snapshot.sessions.is_empty() {
        println!("No sessions found");
        return Ok(ExitCode::SUCCESS);
    }

    let mut sessions: Vec<&Session> = snapshot.sessions.iter().collect();
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.name.cmp(&b.name)));

    println!(
        "{:<25} {:<15} {:<10} {:<6} {:<8} {:<10} Created",
        "Name", "Purpose", "Status", "Flows", "Nodes", "Findings"
    );
    println!("{}", "-".repeat(105));
    for session in sessions {
        let flows = snapshot.flows_of(session.id);
        let node_count: usize = flows
            .iter()
            .map(|flow| snapshot.nodes_of(flow.id).len())
            .sum();
        let finding_count = snapshot.findings_of_session(session.id).len();
        println!(
            "{:<25} {:<15} {:<10} {:<6} {:<8} {:<10} {}",
            session.name,
            session.purpose,
            session.status,
            flows.len(),
            node_count,
            finding_count,
            session.created_at
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_show(db: &Path, session_key: &str, flow_name: Option<&str>) -> CliResult {
    let snapshot = open_snapshot(db)?;
    let Some(session) = snapshot.resolve_session(session_key).session() else {
        eprintln!("Session not found: {session_key}");
        return Ok(ExitCode::FAILURE);
    };

    if let Some(flow_name) = flow_name {
        let Some(flow) = snapshot.flow_by_name(session.id, flow_name) else {
            eprintln!("Flow not found: {flow_name}");
            return Ok(ExitCode::FAILURE);
        };
        show_flow(&snapshot, session, flow);
    } else {
        show_session(&snapshot, session);
    }
    Ok(ExitCode::SUCCESS)
}

fn show_session(snapshot: &Snapshot, session: &Session) {
    println!();
    println!("=== Session: {} ===", session.name);
    println!("Purpose: {}", session.purpose);
    println!("Granularity: {}", session.granularity);
    println!("Status: {}", session.status);
    println!("Created: {}", session.created_at);

    let flows = snapshot.flows_of(session.id);
    if !flows.is_empty() {
        println!();
        println!("=== Flows ({}) ===", flows.len());
        println!(
            "{:<25} {:<35} {:<8} {:<10} Status",
            "Name", "Entry Point", "Nodes", "Concerns"
        );
        println!("{}", "-".repeat(95));
        for flow in &flows {
            let nodes = snapshot.render_nodes_of(flow.id);
            let concerns = nodes.iter().filter(|n| n.is_concern()).count();
            let entry: String = flow
                .entry_point
                .as_deref()
                .unwrap_or("-")
                .chars()
                .take(35)
                .collect();
            println!(
                "{:<25} {:<35} {:<8} {:<10} {}",
                flow.name,
                entry,
                nodes.len(),
                concerns,
                flow.status
            );
        }
    }

    let findings = snapshot.findings_of_session(session.id);
    if !findings.is_empty() {
        println!();
        println!("=== Findings Summary ===");
        for severity in Severity::ALL {
            let count = findings.iter().filter(|f| f.severity == severity).count();
            if count > 0 {
                println!("  {}: {count}", severity.to_string().to_uppercase());
            }
        }
    }
}

fn action_of<'a>(nodes: &'a [&Node], id: NodeId) -> &'a str {
    nodes
        .iter()
        .find(|n| n.id == id)
        .map(|n| n.action.as_str())
        .unwrap_or("?")
}

fn show_flow(snapshot: &Snapshot, session: &Session, flow: &Flow) {
    println!();
    println!("=== Flow: {} ===", flow.name);
    println!("Session: {}", session.name);
    println!("Entry Point: {}", flow.entry_point.as_deref().unwrap_or("-"));
    println!("Status: {}", flow.status);
    println!("Created: {}", flow.created_at);

    let nodes = snapshot.render_nodes_of(flow.id);
    let edges = snapshot.render_edges_of(flow.id);

    if !nodes.is_empty() {
        println!();
        println!("=== Nodes ({}) ===", nodes.len());
        println!(
            "{:<5} {:<8} {:<25} {:<30} Status",
            "ID", "Layer", "Action", "Subject"
        );
        println!("{}", "-".repeat(80));
        for node in &nodes {
            println!(
                "{:<5} {:<8} {:<25} {:<30} {}",
                node.id, node.layer, node.action, node.subject, node.status
            );
        }
    }

    if !edges.is_empty() {
        println!();
        println!("=== Edges ({}) ===", edges.len());
        for edge in &edges {
            let cond = edge
                .condition
                .as_deref()
                .filter(|c| !c.is_empty())
                .map(|c| format!(" [{c}]"))
                .unwrap_or_default();
            println!(
                "  {} --{}{}--> {}",
                action_of(&nodes, edge.from_node),
                edge.relation,
                cond,
                action_of(&nodes, edge.to_node)
            );
        }
    }

    let owned_nodes: Vec<Node> = nodes.iter().map(|n| (*n).clone()).collect();
    let owned_edges: Vec<Edge> = edges.iter().map(|e| (*e).clone()).collect();
    let graph = FlowGraph::build(&owned_nodes, &owned_edges);
    let mut nonlinear = Vec::new();
    for node in &owned_nodes {
        let incoming = graph.in_degree(node.id);
        let outgoing = graph.neighbors(node.id).len() as u32;
        if outgoing > 1 {
            nonlinear.push(format!(
                "  [BRANCH] {} (in:{incoming}, out:{outgoing})",
                node.action
            ));
        } else if incoming > 1 {
            nonlinear.push(format!(
                "  [MERGE] {} (in:{incoming}, out:{outgoing})",
                node.action
            ));
        }
    }
    if !nonlinear.is_empty() {
        println!();
        println!("=== Non-Linear Points ===");
        for line in nonlinear {
            println!("{line}");
        }
    }

    let mut findings = snapshot.findings_of_flow(flow.id);
    findings.sort_by_key(|f| f.severity);
    if !findings.is_empty() {
        println!();
        println!("=== Findings ({}) ===", findings.len());
        for finding in findings {
            println!(
                "[{}] {}: {}",
                finding.severity.to_string().to_uppercase(),
                finding.category,
                finding.description
            );
        }
    }
}

fn write_doc(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)?;
    println!("  Exported: {}", path.display());
    Ok(())
}

fn write_mermaid(out_dir: &Path, export: &FlowExport, direction: Direction) -> std::io::Result<()> {
    let path = out_dir.join(format!("{}.mermaid", export.flow.name));
    match mermaid::render(export, direction) {
        Some(text) => write_doc(&path, &text),
        None => {
            println!("  Skipped (no nodes): {}", path.display());
            Ok(())
        }
    }
}

fn cmd_export(
    db: &Path,
    session_key: &str,
    flow_name: Option<&str>,
    direction: Direction,
    format: FormatArg,
    out_root: &Path,
) -> CliResult {
    let snapshot = open_snapshot(db)?;
    let Some(session) = snapshot.resolve_session(session_key).session() else {
        eprintln!("Session not found: {session_key}");
        return Ok(ExitCode::FAILURE);
    };

    let out_dir = out_root.join(&session.name);
    std::fs::create_dir_all(&out_dir)?;

    if let Some(flow_name) = flow_name {
        let Some(flow) = snapshot.flow_by_name(session.id, flow_name) else {
            eprintln!("Flow not found: {flow_name}");
            return Ok(ExitCode::FAILURE);
        };
        println!("Exporting flow '{}' to {}/", flow.name, out_dir.display());
        let export = FlowExport::collect(&snapshot, flow);
        if format.wants(FormatArg::Json) {
            write_doc(&out_dir.join(format!("{}.json", flow.name)), &export.to_json()?)?;
        }
        if format.wants(FormatArg::Yaml) {
            write_doc(&out_dir.join(format!("{}.yaml", flow.name)), &export.to_yaml()?)?;
        }
        if format.wants(FormatArg::Mermaid) {
            write_mermaid(&out_dir, &export, direction)?;
        }
        if format.wants(FormatArg::Markdown) {
            write_doc(
                &out_dir.join(format!("{}.md", flow.name)),
                &markdown::flow_report(&export, session),
            )?;
        }
    } else {
        println!("Exporting session '{}' to {}/", session.name, out_dir.display());
        let export = SessionExport::collect(&snapshot, session);
        if format.wants(FormatArg::Json) {
            write_doc(&out_dir.join("session.json"), &export.to_json()?)?;
        }
        if format.wants(FormatArg::Yaml) {
            write_doc(&out_dir.join("session.yaml"), &export.to_yaml()?)?;
        }
        for flow_export in &export.flows {
            if format.wants(FormatArg::Mermaid) {
                write_mermaid(&out_dir, flow_export, direction)?;
            }
            if format.wants(FormatArg::Markdown) {
                write_doc(
                    &out_dir.join(format!("{}.md", flow_export.flow.name)),
                    &markdown::flow_report(flow_export, session),
                )?;
            }
        }
        if format.wants(FormatArg::Markdown) {
            write_doc(&out_dir.join("README.md"), &markdown::session_summary(&export))?;
        }
    }
    println!("Done!");
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(db: &Path, session_key: &str) -> CliResult {
    let snapshot = open_snapshot(db)?;
    let Some(session) = snapshot.resolve_session(session_key).session() else {
        eprintln!("Session not found: {session_key}");
        return Ok(ExitCode::FAILURE);
    };

    let report = validate_session(&snapshot, session.id, &ValidationLimits::default());
    for flow in &report.flows {
        println!();
        println!("=== Validating: {} ===", flow.flow_name);
        for issue in &flow.issues {
            println!("  {}: {}", issue.level, issue.message);
        }
        if !flow.entry_labels.is_empty() {
            println!("  OK: Entry point(s): {}", flow.entry_labels.join(", "));
        }
        if flow.is_clean() {
            println!("  OK: No issues found ({} nodes)", flow.node_count);
        }
    }
    println!();
    println!(
        "=== Summary: {} errors, {} warnings ===",
        report.error_count(),
        report.warning_count()
    );
    Ok(if report.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_csv_export(db: &Path, dir: &Path) -> CliResult {
    let snapshot = open_snapshot(db)?;
    interchange::write_snapshot_dir(&snapshot, dir)?;
    for (table, rows) in count_rows(&snapshot.counts()) {
        println!(
            "  Exported {rows:>4} rows -> {}",
            dir.join(format!("{table}.csv")).display()
        );
    }
    println!("CSV export complete.");
    Ok(ExitCode::SUCCESS)
}

fn cmd_csv_import(db: &Path, dir: &Path) -> CliResult {
    let snapshot = interchange::read_snapshot_dir(dir)?;
    let mut store = SqliteStore::create(db, true)?;
    store.write_snapshot(&snapshot)?;
    let violations = store.check_integrity()?;

    for (table, rows) in count_rows(&snapshot.counts()) {
        println!(
            "  Imported {rows:>4} rows <- {}",
            dir.join(format!("{table}.csv")).display()
        );
    }
    if violations.is_empty() {
        println!("Foreign key integrity: OK");
    } else {
        eprintln!("WARNING: {} foreign key violation(s) detected:", violations.len());
        for violation in &violations {
            eprintln!("  {violation}");
        }
    }
    println!("CSV import complete.");
    Ok(ExitCode::SUCCESS)
}

fn print_merge_report(report: &MergeReport) {
    for (table, rows) in count_rows(&report.merged_stamp.counts) {
        println!("  {table}: {rows} rows");
    }
    let stats = &report.stats;
    if stats.session_conflicts > 0 {
        println!("  Session conflicts resolved: {}", stats.session_conflicts);
    }
    if stats.flow_collisions > 0 {
        println!("  Flow collisions resolved: {}", stats.flow_collisions);
    }
    if stats.edges_dropped > 0 {
        println!("  Edges dropped: {}", stats.edges_dropped);
    }
    if stats.findings_deduplicated > 0 {
        println!("  Findings deduplicated: {}", stats.findings_deduplicated);
    }
    if stats.flow_refs_cleared > 0 {
        println!("  Finding flow refs cleared: {}", stats.flow_refs_cleared);
    }
    for violation in &report.violations {
        eprintln!("  FK violation: {violation}");
    }
}

fn cmd_csv_merge(ours_dir: &Path, theirs_dir: &Path) -> CliResult {
    match interchange::merge_interchange(ours_dir, theirs_dir) {
        Ok(report) => {
            print_merge_report(&report);
            if report.has_violations() {
                return Ok(ExitCode::FAILURE);
            }
            println!("Merge complete.");
            Ok(ExitCode::SUCCESS)
        }
        Err(InterchangeError::MissingDirectory(path)) if path == ours_dir => {
            eprintln!("Ours CSV directory not found at {}", path.display());
            eprintln!("Run: flowtrace csv-export");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_db_merge(ancestor: &Path, ours: &Path, theirs: &Path) -> CliResult {
    println!("Merging trace databases...");
    println!("  Ours:   {}", ours.display());
    println!("  Theirs: {}", theirs.display());

    let report = merge_databases(ancestor, ours, theirs)?;
    print_merge_report(&report);

    if report.has_violations() {
        eprintln!(
            "WARNING: {} foreign key violation(s), merge may need manual review",
            report.violations.len()
        );
        return Ok(ExitCode::FAILURE);
    }
    println!("Merge complete.");
    Ok(ExitCode::SUCCESS)
}
