use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

use sqldeps_core::{
    Config, DependencyGraph, DependencyMap, Diagnostic, DiagnosticCode, EdgeFilter, Location,
    OperationKind, Report, Severity,
};
use sqldeps_proc::BufferAnalyzer;
use sqldeps_sql::{Analysis, LineageSession, SqlParser};

/// Config file picked up from the working directory
const DEFAULT_CONFIG: &str = "sqldeps.toml";

/// sqldeps - table, CTE and column dependencies of SQL scripts
#[derive(Parser)]
#[command(name = "sqldeps")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: sqldeps.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the SQL comes from
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
struct Input {
    /// SQL text to analyse
    #[arg(long)]
    sql: Option<String>,

    /// Directory scanned recursively for SQL files
    #[arg(short, long)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Table-level dependencies
    Tables {
        #[command(flatten)]
        input: Input,

        /// One report per file instead of a merged one
        #[arg(long)]
        separate: bool,

        /// Write the JSON report to a file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only keep these operations (comma-separated, e.g. insert,join)
        #[arg(long, value_delimiter = ',')]
        operations: Vec<OperationKind>,

        /// Hide result/input/unknown placeholder nodes
        #[arg(long)]
        hide_placeholders: bool,

        /// Print the JSON report to stdout
        #[arg(long)]
        json: bool,

        /// Exit with code 1 when any error diagnostic was produced
        #[arg(long)]
        fail_on_error: bool,
    },

    /// Column-level lineage of statement edges
    Columns {
        #[command(flatten)]
        input: Input,

        /// Print the JSON report to stdout
        #[arg(long)]
        json: bool,
    },

    /// Buffer tables shared between stored procedures
    Buffers {
        #[command(flatten)]
        input: Input,

        /// Print the JSON report to stdout
        #[arg(long)]
        json: bool,
    },

    /// Show everything an entity feeds (or is fed by)
    Impact {
        /// Entity to analyze (table, CTE or placeholder name)
        entity: String,

        #[command(flatten)]
        input: Input,

        /// Walk towards sources instead of consumers
        #[arg(long)]
        upstream: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    if cli.verbose {
        let dialects: Vec<&str> = config.dialects.iter().map(|d| d.as_str()).collect();
        eprintln!("{} dialects: {}", "Using".cyan(), dialects.join(", "));
    }

    match cli.command {
        Commands::Tables {
            input,
            separate,
            output,
            operations,
            hide_placeholders,
            json,
            fail_on_error,
        } => {
            let mut config = config;
            if !operations.is_empty() {
                config.filter.operations = operations;
            }
            config.filter.hide_placeholders |= hide_placeholders;

            let options = TablesOptions {
                separate,
                output,
                json,
                fail_on_error,
            };
            tables_command(config, &input, &options, cli.verbose)
        }
        Commands::Columns { input, json } => {
            let mut config = config;
            config.column_lineage = true;
            columns_command(config, &input, json, cli.verbose)
        }
        Commands::Buffers { input, json } => buffers_command(&config, &input, json, cli.verbose),
        Commands::Impact {
            entity,
            input,
            upstream,
        } => impact_command(config, &entity, &input, upstream, cli.verbose),
    }
}

/// Logging goes to stderr so JSON output on stdout stays clean
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    if let Some(path) = path {
        return Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        return Config::from_file(default)
            .with_context(|| format!("Failed to load config from {}", default.display()));
    }

    if verbose {
        eprintln!("{}", "No config file found, using defaults".yellow());
    }
    Ok(Config::default())
}

/// SQL files under a directory, sorted by path
fn collect_sql_files(dir: &Path, config: &Config) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%err, "skipping unreadable directory entry");
                continue;
            }
        };

        if entry.file_type().is_file() && config.scan.accepts(entry.path()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Analyse the input as one unit per file (or one unit for `--sql`)
fn analyze_units(
    session: &mut LineageSession,
    input: &Input,
    verbose: bool,
) -> Result<Vec<(String, Analysis)>> {
    if let Some(sql) = &input.sql {
        return Ok(vec![("<inline>".to_string(), session.analyze_sql(sql))]);
    }

    let Some(dir) = &input.dir else {
        anyhow::bail!("Either --sql or --dir is required");
    };

    let files = collect_sql_files(dir, session.config())?;
    if verbose {
        eprintln!("{} {} SQL files in {}", "Found".cyan(), files.len(), dir.display());
    }

    let mut units = Vec::with_capacity(files.len());
    for file in files {
        if verbose {
            eprintln!("  {} {}", "Analyzing".cyan(), file.display());
        }
        let analysis = session.analyze_file(&file);
        units.push((file.display().to_string(), analysis));
    }

    Ok(units)
}

/// Merge per-unit analyses after all of them finished
fn merge_units(units: Vec<(String, Analysis)>) -> Analysis {
    let mut merged = Analysis::default();
    for (_, analysis) in units {
        merged.merge(analysis);
    }
    merged
}

struct TablesOptions {
    separate: bool,
    output: Option<PathBuf>,
    json: bool,
    fail_on_error: bool,
}

/// Tables command - table-level dependency map
fn tables_command(config: Config, input: &Input, options: &TablesOptions, verbose: bool) -> Result<()> {
    let filter = EdgeFilter::from(&config.filter);
    let mut session = LineageSession::new(config);
    let units = analyze_units(&mut session, input, verbose)?;

    let reports: Vec<Report> = if options.separate {
        units
            .into_iter()
            .map(|(label, analysis)| {
                let analysis = analysis.filtered(&filter);
                Report::from_analysis(analysis.dependencies, analysis.diagnostics, 1)
                    .with_metadata(serde_json::json!({ "source": label }))
            })
            .collect()
    } else {
        let count = units.len();
        let analysis = merge_units(units).filtered(&filter);
        vec![Report::from_analysis(analysis.dependencies, analysis.diagnostics, count)]
    };

    if let Some(path) = &options.output {
        write_reports(&reports, path)?;
        if verbose {
            eprintln!("{} {}", "Report saved to:".green(), path.display());
        }
    }

    if options.json {
        println!("{}", reports_json(&reports)?);
    } else {
        for report in &reports {
            print_dependencies(&report.dependencies);
            print_report_summary(report, "Table Dependency Report");
        }
    }

    if options.fail_on_error && reports.iter().any(Report::has_errors) {
        std::process::exit(1);
    }

    Ok(())
}

fn reports_json(reports: &[Report]) -> Result<String> {
    let json = match reports {
        [single] => single.to_json()?,
        many => serde_json::to_string_pretty(many)?,
    };
    Ok(json)
}

fn write_reports(reports: &[Report], path: &Path) -> Result<()> {
    let written = match reports {
        [single] => single.save_to_file(path),
        many => {
            let json = serde_json::to_string_pretty(many)?;
            std::fs::write(path, json)
        }
    };
    written.with_context(|| format!("Failed to write {}", path.display()))
}

/// Columns command - column lineage per statement edge
fn columns_command(config: Config, input: &Input, json: bool, verbose: bool) -> Result<()> {
    let filter = EdgeFilter::from(&config.filter);
    let mut session = LineageSession::new(config);
    let units = analyze_units(&mut session, input, verbose)?;
    let count = units.len();
    let analysis = merge_units(units).filtered(&filter);

    let entries = analysis.column_entries();
    let report = Report::from_analysis(analysis.dependencies, analysis.diagnostics, count)
        .with_metadata(serde_json::json!({ "columns": entries }));

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Column Lineage".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    if entries.is_empty() {
        println!("{}", "No statement edges with column detail".yellow());
    }

    for entry in &entries {
        println!(
            "{} {} {} [{}]",
            entry.edge.source.cyan(),
            "->".dimmed(),
            entry.edge.target.green(),
            entry.edge.operation
        );
        match &entry.lineage.target_columns {
            Some(columns) => println!("    columns: {}", columns.join(", ")),
            None => println!("    columns: {}", "-".dimmed()),
        }
        if let Some(filters) = &entry.lineage.filter_columns {
            println!("    filters: {}", filters.join(", "));
        }
    }

    print_report_summary(&report, "Column Lineage Report");
    Ok(())
}

/// Buffers command - procedures linked through buffer tables
fn buffers_command(config: &Config, input: &Input, json: bool, verbose: bool) -> Result<()> {
    let mut analyzer = BufferAnalyzer::new(SqlParser::with_dialects(config.dialects.clone()));
    let mut diagnostics = Vec::new();
    let mut units = 0;

    if let Some(sql) = &input.sql {
        analyzer.add_sql(sql, None);
        units = 1;
    } else if let Some(dir) = &input.dir {
        for file in collect_sql_files(dir, config)? {
            let label = file.display().to_string();
            units += 1;

            match std::fs::read_to_string(&file) {
                Ok(sql) => {
                    let found = analyzer.add_sql(&sql, Some(&label));
                    if verbose {
                        eprintln!("  {} {} procedures in {}", "Found".cyan(), found, label);
                    }
                }
                Err(err) => diagnostics.push(
                    Diagnostic::new(
                        DiagnosticCode::FileReadError,
                        Severity::Error,
                        format!("Failed to read file: {}", err),
                    )
                    .with_location(Location::new(label)),
                ),
            }
        }
    }

    diagnostics.extend(analyzer.diagnostics().iter().cloned());
    for diagnostic in &mut diagnostics {
        diagnostic.severity = config
            .severity
            .get_severity(diagnostic.code, diagnostic.severity);
    }

    let tables = analyzer.buffer_tables();
    let dependencies = analyzer.dependencies().filtered(&EdgeFilter::from(&config.filter));
    let report = Report::from_analysis(dependencies, diagnostics, units).with_metadata(
        serde_json::json!({
            "procedures": analyzer.procedures_analyzed(),
            "buffer_tables": tables,
        }),
    );

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Buffer Tables".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
    println!("{} {}", "Procedures analyzed:".bold(), analyzer.procedures_analyzed());
    println!();

    if tables.is_empty() {
        println!("{}", "No buffer tables found".yellow());
    }

    for table in &tables {
        println!("{}", table.name.green().bold());
        let writers: Vec<&str> = table.write_procedures.iter().map(String::as_str).collect();
        let readers: Vec<&str> = table.read_procedures.iter().map(String::as_str).collect();
        println!("    writers: {}", writers.join(", "));
        println!("    readers: {}", readers.join(", "));
    }

    print_report_summary(&report, "Buffer Table Report");
    Ok(())
}

/// Impact command - transitive consumers or sources of an entity
fn impact_command(config: Config, entity: &str, input: &Input, upstream: bool, verbose: bool) -> Result<()> {
    let mut session = LineageSession::new(config);
    let units = analyze_units(&mut session, input, verbose)?;
    let analysis = merge_units(units);

    if verbose {
        eprintln!("{}", "Building dependency graph...".cyan());
    }

    let graph = DependencyGraph::from_dependencies(&analysis.dependencies);
    if !graph.contains(entity) {
        anyhow::bail!(
            "Entity '{}' not found in the dependency graph. Aliased sources appear as 'name (alias)'",
            entity
        );
    }

    let (direction, affected) = if upstream {
        ("Upstream", graph.upstream(entity))
    } else {
        ("Downstream", graph.downstream(entity))
    };

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", format!("{} Impact Analysis", direction).bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("{} {}", "Entity:".bold(), entity.green());
    println!("{} {}", format!("{} entities:", direction).bold(), affected.len());
    println!();

    if affected.is_empty() {
        println!("{}", format!("✓ No {} dependencies", direction.to_lowercase()).green());
    } else {
        for (i, name) in affected.iter().enumerate() {
            println!("  {}. {}", i + 1, name.yellow());
        }

        if !upstream {
            println!();
            println!("{}", "⚠ Changes to this entity may affect the entities above!".yellow().bold());
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());

    Ok(())
}

/// Print the dependency map grouped by target
fn print_dependencies(dependencies: &DependencyMap) {
    for (target, edges) in dependencies.iter() {
        println!("{}", target.green().bold());
        for edge in edges {
            let mut flags = Vec::new();
            if edge.is_recursive {
                flags.push("recursive");
            }
            if edge.is_internal_update {
                flags.push("internal");
            }

            let suffix = if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", ")).dimmed().to_string()
            };
            println!("    {} {} [{}]{}", "<-".dimmed(), edge.source.cyan(), edge.operation, suffix);
        }
    }
}

/// Print report summary to stdout
fn print_report_summary(report: &Report, title: &str) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", title.bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    if let Some(source) = report
        .metadata
        .as_ref()
        .and_then(|m| m.get("source"))
        .and_then(|s| s.as_str())
    {
        println!("Source: {}", source);
    }
    println!();

    println!("{}", "Summary:".bold());
    println!("  Units analyzed: {}", report.summary.units_analyzed);
    println!("  Nodes: {}  Edges: {}", report.summary.nodes, report.summary.edges);
    println!("  Total diagnostics: {}", report.summary.total);

    if report.summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", report.summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", report.summary.errors).green());
    }

    if report.summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).green());
    }

    println!("  Info:     {}", report.summary.info);
    println!();

    if report.diagnostics.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        println!("{}", "Diagnostics:".bold());
        for diag in &report.diagnostics {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };

            println!("  [{}] {}: {}", severity_str, diag.code, diag.message);

            if let Some(loc) = &diag.location {
                println!("    at {}", loc);
            } else if let Some(statement) = diag.statement {
                println!("    at statement #{}", statement);
            }
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn operations_parse_from_comma_list() {
        let cli = Cli::try_parse_from([
            "sqldeps",
            "tables",
            "--sql",
            "SELECT 1",
            "--operations",
            "insert,buffer_write",
        ])
        .expect("valid arguments");

        match cli.command {
            Commands::Tables { operations, .. } => {
                assert_eq!(operations, vec![OperationKind::Insert, OperationKind::BufferWrite]);
            }
            _ => panic!("expected tables command"),
        }
    }

    #[test]
    fn input_is_required_and_exclusive() {
        assert!(Cli::try_parse_from(["sqldeps", "tables"]).is_err());
        assert!(Cli::try_parse_from(["sqldeps", "tables", "--sql", "SELECT 1", "--dir", "."]).is_err());
    }

    #[test]
    fn sql_files_are_collected_by_extension() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("b.sql"), "SELECT 1").expect("write");
        std::fs::write(dir.path().join("a.DDL"), "SELECT 1").expect("write");
        std::fs::write(dir.path().join("notes.txt"), "hi").expect("write");

        let files = collect_sql_files(dir.path(), &Config::default()).expect("collect");
        let names: Vec<_> = files
            .iter()
            .filter_map(|f| f.file_name())
            .filter_map(|n| n.to_str())
            .collect();

        assert_eq!(names, vec!["a.DDL", "b.sql"]);
    }
}
