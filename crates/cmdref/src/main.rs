use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use cmdref_core::config::{CmdrefConfig, load_config};
use cmdref_core::index::{CommandIndex, IndexStats, SearchQuery, discover_pages};
use cmdref_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_config, normalize_for_display, resolve_paths,
};
use cmdref_core::sync::{SyncOptions, SyncPlan, SyncReport, load_sync_inputs, plan_sync};
use tracing::{debug, warn};

mod logging;

#[derive(Debug, Parser)]
#[command(
    name = "cmdref",
    version,
    about = "Keep HTML command reference pages in sync with a master command list"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Master command list to read")]
    master: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Enable debug logging on stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    master: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            master: cli.master.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Regenerate section code blocks in the target pages")]
    Sync(SyncArgs),
    #[command(about = "Write a default cmdref.toml")]
    Init(InitArgs),
    #[command(about = "Query commands scraped from the target pages")]
    Index(IndexArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, help = "Plan the update without writing any file")]
    dry_run: bool,
    #[arg(long, help = "Print a unified diff for every changed page")]
    diff: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexSubcommand,
}

#[derive(Debug, Args)]
struct IndexScope {
    #[arg(long, help = "Index every .html page under the project root")]
    all: bool,
    #[arg(long, help = "Print results as JSON")]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum IndexSubcommand {
    List {
        #[arg(long, value_name = "TEXT")]
        filter: Option<String>,
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        #[command(flatten)]
        scope: IndexScope,
    },
    Search {
        query: Option<String>,
        #[arg(long, value_name = "PAGE")]
        file: Option<String>,
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        #[command(flatten)]
        scope: IndexScope,
    },
    Stats {
        #[command(flatten)]
        scope: IndexScope,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Index(IndexArgs { command })) => match command {
            IndexSubcommand::List {
                filter,
                limit,
                scope,
            } => run_index_list(&runtime, filter.as_deref(), limit, &scope),
            IndexSubcommand::Search {
                query,
                file,
                limit,
                scope,
            } => run_index_search(
                &runtime,
                SearchQuery { query, file, limit },
                &scope,
            ),
            IndexSubcommand::Stats { scope } => run_index_stats(&runtime, &scope),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let inputs = load_sync_inputs(&paths, &config)?;
    let plan = plan_sync(inputs, &config)?;
    let report = plan.apply(SyncOptions {
        dry_run: args.dry_run,
    })?;

    let diagnostics = runtime.diagnostics.then(|| paths.diagnostics());
    write_sync_output(
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
        &plan,
        &report,
        &args,
        diagnostics.as_deref(),
    )
}

/// With `--json`, stdout carries only the report; diffs and diagnostics go
/// to stderr.
fn write_sync_output<O: Write, E: Write>(
    out: &mut O,
    err: &mut E,
    plan: &SyncPlan,
    report: &SyncReport,
    args: &SyncArgs,
    diagnostics: Option<&str>,
) -> Result<()> {
    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
    } else {
        write_sync_report(out, report)?;
    }

    let extras: &mut dyn Write = if args.json { err } else { out };
    if args.diff {
        for doc in plan.changed_documents() {
            write!(extras, "{}", doc.unified_diff())?;
        }
    }
    if let Some(diagnostics) = diagnostics {
        writeln!(extras, "\n[diagnostics]\n{diagnostics}")?;
    }
    Ok(())
}

fn write_sync_report<W: Write>(out: &mut W, report: &SyncReport) -> io::Result<()> {
    writeln!(out, "sync")?;
    writeln!(out, "master: {}", report.master_path)?;
    writeln!(
        out,
        "mode: {}",
        if report.dry_run { "dry-run" } else { "write" }
    )?;
    writeln!(out, "sections: {}", report.section_count)?;
    writeln!(out, "blocks: {}", report.block_count)?;
    if report.unassigned.is_empty() {
        writeln!(out, "unassigned: <none>")?;
    } else {
        let numbers = report
            .unassigned
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "unassigned: {numbers}")?;
    }
    for missing in &report.missing_targets {
        writeln!(out, "missing_target: {missing}")?;
    }
    for doc in &report.documents {
        writeln!(out, "{}", doc.summary())?;
        writeln!(out, "  range: {}-{}", doc.first, doc.last)?;
        writeln!(out, "  hash: {} -> {}", doc.before_hash, doc.after_hash)?;
        for section in &doc.sections {
            writeln!(
                out,
                "  section.{}: {}{}",
                section.number,
                section.outcome.as_str(),
                if section.changed { "" } else { " (unchanged)" }
            )?;
        }
    }
    writeln!(out)?;
    writeln!(out, "Done.")
}

fn print_diagnostics(paths: &ResolvedPaths, json: bool) {
    let text = format!("\n[diagnostics]\n{}", paths.diagnostics());
    if json {
        eprintln!("{text}");
    } else {
        println!("{text}");
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let wrote = init_config(&paths, args.force)?;
    if wrote {
        println!("Wrote config: {}", normalize_for_display(&paths.config_path));
    } else {
        println!(
            "Config already exists: {} (use --force to overwrite)",
            normalize_for_display(&paths.config_path)
        );
    }
    if runtime.diagnostics {
        print_diagnostics(&paths, false);
    }
    Ok(())
}

fn run_index_list(
    runtime: &RuntimeOptions,
    filter: Option<&str>,
    limit: Option<usize>,
    scope: &IndexScope,
) -> Result<()> {
    let (paths, index) = build_index(runtime, scope)?;
    let result = index.list(filter, limit)?;

    if scope.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("index list");
        println!("filter: {}", filter.unwrap_or("<none>"));
        println!("total: {}", result.total);
        print_commands(&result.commands);
    }
    if runtime.diagnostics {
        print_diagnostics(&paths, scope.json);
    }
    Ok(())
}

fn run_index_search(runtime: &RuntimeOptions, query: SearchQuery, scope: &IndexScope) -> Result<()> {
    let (paths, index) = build_index(runtime, scope)?;
    let result = index.search(&query)?;

    if scope.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("index search");
        println!(
            "query: {}",
            if result.query.is_empty() {
                "<none>"
            } else {
                result.query.as_str()
            }
        );
        println!("file: {}", query.file.as_deref().unwrap_or("<any>"));
        println!("total_results: {}", result.total_results);
        print_commands(&result.results);
    }
    if runtime.diagnostics {
        print_diagnostics(&paths, scope.json);
    }
    Ok(())
}

fn run_index_stats(runtime: &RuntimeOptions, scope: &IndexScope) -> Result<()> {
    let (paths, index) = build_index(runtime, scope)?;
    let stats = index.stats();

    if scope.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_index_stats(&stats);
    }
    if runtime.diagnostics {
        print_diagnostics(&paths, scope.json);
    }
    Ok(())
}

fn print_commands(commands: &[cmdref_core::index::CommandEntry]) {
    if commands.is_empty() {
        println!("commands: <none>");
        return;
    }
    for command in commands {
        println!("- {} [{}]", command.title, command.file);
        for line in command.code.lines() {
            println!("    {line}");
        }
    }
}

fn print_index_stats(stats: &IndexStats) {
    println!("index stats");
    println!("total_commands: {}", stats.total_commands);
    println!("total_files: {}", stats.total_files);
    if stats.by_file.is_empty() {
        println!("by_file: <empty>");
    } else {
        for (file, count) in &stats.by_file {
            println!("file.{file}: {count}");
        }
    }
    println!("built_at_unix: {}", stats.built_at_unix);
}

fn build_index(runtime: &RuntimeOptions, scope: &IndexScope) -> Result<(ResolvedPaths, CommandIndex)> {
    let (paths, config) = resolve_runtime(runtime)?;
    let pages = if scope.all {
        discover_pages(&paths.project_root)?
    } else {
        config
            .targets
            .iter()
            .map(|target| paths.target_path(target))
            .collect()
    };
    if pages.is_empty() {
        bail!(
            "no pages to index under {}",
            normalize_for_display(&paths.project_root)
        );
    }
    let index = CommandIndex::build(&pages)?;
    Ok((paths, index))
}

fn resolve_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, CmdrefConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        master: runtime.master.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        match dotenvy::from_path_override(&project_env) {
            Ok(()) => debug!(path = %project_env.display(), "loaded project .env"),
            Err(error) => warn!(path = %project_env.display(), %error, "ignoring unreadable .env"),
        }
    }

    let paths = resolve_paths(&context, &overrides)?;
    debug!(
        root = %paths.project_root.display(),
        source = paths.root_source.as_str(),
        "resolved project root"
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::{CommandFactory, Parser};
    use cmdref_core::config::TargetAssignment;
    use cmdref_core::sync::{DocumentPlan, SyncOptions, SyncPlan};

    use super::{Cli, Commands, IndexArgs, IndexSubcommand, SyncArgs, write_sync_output};

    fn pending_plan() -> SyncPlan {
        SyncPlan {
            master_path: PathBuf::from("/ref/command_summary.txt"),
            section_count: 1,
            block_count: 1,
            unassigned: Vec::new(),
            missing_targets: Vec::new(),
            documents: vec![DocumentPlan {
                assignment: TargetAssignment::new("page.html", 1, 10),
                path: PathBuf::from("/ref/page.html"),
                original: "<h2>1. Files</h2>\n".to_string(),
                updated: "<h2>1. Files</h2>\n<pre><code>\nls\n</code></pre>\n".to_string(),
                sections: Vec::new(),
            }],
        }
    }

    fn render(args: &SyncArgs) -> (String, String) {
        let plan = pending_plan();
        let report = plan.apply(SyncOptions { dry_run: true }).expect("apply");
        let mut out = Vec::new();
        let mut err = Vec::new();
        write_sync_output(
            &mut out,
            &mut err,
            &plan,
            &report,
            args,
            Some("project_root=/ref (flag)"),
        )
        .expect("write output");
        (
            String::from_utf8(out).expect("utf8 stdout"),
            String::from_utf8(err).expect("utf8 stderr"),
        )
    }

    #[test]
    fn json_sync_output_keeps_extras_off_stdout() {
        let (out, err) = render(&SyncArgs {
            dry_run: true,
            diff: true,
            json: true,
        });
        let parsed: serde_json::Value =
            serde_json::from_str(&out).expect("stdout is one JSON document");
        assert_eq!(parsed["documents"][0]["file"], "page.html");
        assert!(err.contains("--- a/page.html"));
        assert!(err.contains("[diagnostics]"));
        assert!(!out.contains("[diagnostics]"));
    }

    #[test]
    fn text_sync_output_prints_everything_to_stdout() {
        let (out, err) = render(&SyncArgs {
            dry_run: true,
            diff: true,
            json: false,
        });
        assert!(out.contains("Would update page.html"));
        assert!(out.contains("+<pre><code>"));
        assert!(out.contains("[diagnostics]\nproject_root=/ref (flag)"));
        assert!(err.is_empty());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_sync_flags() {
        let cli = Cli::parse_from(["cmdref", "sync", "--dry-run", "--diff"]);
        match cli.command {
            Some(Commands::Sync(args)) => {
                assert!(args.dry_run);
                assert!(args.diff);
                assert!(!args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_global_paths_after_subcommand() {
        let cli = Cli::parse_from([
            "cmdref",
            "sync",
            "--master",
            "notes.txt",
            "--project-root",
            "/srv/ref",
            "-v",
        ]);
        assert_eq!(cli.master.as_deref(), Some(std::path::Path::new("notes.txt")));
        assert_eq!(
            cli.project_root.as_deref(),
            Some(std::path::Path::new("/srv/ref"))
        );
        assert!(cli.verbose);
    }

    #[test]
    fn parse_index_search() {
        let cli = Cli::parse_from([
            "cmdref",
            "index",
            "search",
            "docker",
            "--file",
            "devops-tools.html",
            "--all",
            "--json",
        ]);
        match cli.command {
            Some(Commands::Index(IndexArgs {
                command:
                    IndexSubcommand::Search {
                        query, file, scope, ..
                    },
            })) => {
                assert_eq!(query.as_deref(), Some("docker"));
                assert_eq!(file.as_deref(), Some("devops-tools.html"));
                assert!(scope.all);
                assert!(scope.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
