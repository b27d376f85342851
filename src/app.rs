//! Command dispatch for the `dedup` binary.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use yansi::Paint;

use crate::cli::{Cli, Commands, DirsCommand, DuplicatesArgs, ScanArgs};
use crate::config::EngineConfig;
use crate::duplicates::DuplicateGroup;
use crate::engine::Engine;
use crate::error::ExitCode;
use crate::logging::init_logging;
use crate::progress::Progress;
use crate::signal::{install_handler, CancelToken};
use crate::workspace::RecentWorkspaces;

/// Run the CLI with the recent list in its default location.
///
/// # Errors
///
/// Returns any error that ends the command. The binary maps it to an exit
/// code with [`ExitCode::from_error`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let recent = match RecentWorkspaces::default_location() {
        Ok(recent) => Some(recent),
        Err(e) => {
            log::warn!("Recent workspaces unavailable: {e:#}");
            None
        }
    };
    run_with(cli, recent.as_ref())
}

/// Run the CLI against an explicit recent list (or none).
///
/// # Errors
///
/// See [`run_app`].
pub fn run_with(cli: Cli, recent: Option<&RecentWorkspaces>) -> Result<ExitCode> {
    let mut config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Init(args) => {
            let mut engine = Engine::create(&args.path, config)
                .with_context(|| format!("Failed to create workspace {}", args.path.display()))?;
            for dir in &args.directories {
                add_directory(&mut engine, dir)?;
            }
            remember(recent, &args.path);
            if !cli.quiet {
                println!(
                    "{} {} ({} directories)",
                    "Workspace ready:".green().bold(),
                    args.path.display(),
                    engine.directories().len()
                );
            }
            engine.close()?;
            Ok(ExitCode::Success)
        }
        Commands::Dirs(command) => {
            let path = workspace_path(cli.workspace, recent)?;
            let mut engine = open(&path, config, recent)?;
            match command {
                DirsCommand::Add { paths } => {
                    for dir in &paths {
                        add_directory(&mut engine, dir)?;
                    }
                }
                DirsCommand::Remove { paths } => {
                    for dir in &paths {
                        if !engine.remove_directory(dir)? {
                            log::warn!("Not a configured directory: {}", dir.display());
                        }
                    }
                }
                DirsCommand::List { json } => {
                    let entries = engine.store().directory_entries()?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    } else {
                        for entry in entries {
                            let scanned = entry
                                .last_scanned
                                .map_or_else(|| "never scanned".to_string(), |t| {
                                    format!("scanned {}", t.format("%Y-%m-%d %H:%M"))
                                });
                            println!("{}  {}", entry.path.display(), scanned.dim());
                        }
                    }
                }
            }
            engine.close()?;
            Ok(ExitCode::Success)
        }
        Commands::Scan(args) => {
            apply_scan_args(&mut config, &args);
            let path = workspace_path(cli.workspace, recent)?;
            let engine = open(&path, config, recent)?;
            watch_interrupt(&engine.cancel_token());

            let progress = Progress::new(cli.quiet);
            let result = engine.scan_and_hash(&progress);
            progress.finish();
            let report = result.context("Scan failed")?;

            if !cli.quiet {
                println!(
                    "{} {} files in {} folders, {} hashed, {} unchanged",
                    "Scanned".green().bold(),
                    report.discovered,
                    report.folders,
                    report.hash.hashed,
                    report.hash.skipped
                );
                if report.missing > 0 {
                    println!("{} files no longer exist", report.missing.yellow());
                }
                if !report.hash.failures.is_empty() {
                    println!(
                        "{} files could not be hashed (run with -v for details)",
                        report.hash.failures.len().red()
                    );
                }
                if !report.failed_folders.is_empty() {
                    println!(
                        "{} folders could not be listed (run with -v for details)",
                        report.failed_folders.len().red()
                    );
                }
                println!(
                    "Workspace: {} files, {} in {:.1}s",
                    report.stats.total_files,
                    ByteSize::b(report.stats.total_size),
                    report.duration.as_secs_f64()
                );
            }
            let code = if report.has_failures() {
                ExitCode::PartialSuccess
            } else {
                ExitCode::Success
            };
            engine.close()?;
            Ok(code)
        }
        Commands::Duplicates(args) => {
            let path = workspace_path(cli.workspace, recent)?;
            let engine = open(&path, config, recent)?;
            watch_interrupt(&engine.cancel_token());

            let progress = Progress::new(cli.quiet || args.json);
            let result = engine.resolve(&progress);
            progress.finish();
            let report = result.context("Duplicate search failed")?;

            print_groups(&report.groups, &args)?;
            if !cli.quiet && !args.json {
                println!(
                    "{} duplicate groups, {} reclaimable",
                    report.groups.len().bold(),
                    ByteSize::b(report.wasted_bytes()).bold()
                );
            }
            let code = if report.groups.is_empty() {
                ExitCode::NoDuplicates
            } else {
                ExitCode::Success
            };
            engine.close()?;
            Ok(code)
        }
        Commands::Stats(args) => {
            let path = workspace_path(cli.workspace, recent)?;
            let engine = open(&path, config, recent)?;
            let stats = engine.stats()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", stats.workspace_name.bold());
                println!("  Files:            {}", stats.total_files);
                println!("  Total size:       {}", ByteSize::b(stats.total_size));
                println!("  Duplicate groups: {}", stats.duplicate_groups);
                match stats.last_scan {
                    Some(t) => println!("  Last scan:        {}", t.format("%Y-%m-%d %H:%M:%S")),
                    None => println!("  Last scan:        never"),
                }
            }
            engine.close()?;
            Ok(ExitCode::Success)
        }
        Commands::Recent(args) => {
            let Some(recent) = recent else {
                bail!("Recent workspaces are not available on this platform");
            };
            if args.clear {
                recent.clear()?;
                return Ok(ExitCode::Success);
            }
            for entry in recent.list()? {
                println!(
                    "{}  {}  {}",
                    entry.name.bold(),
                    entry.path.display(),
                    entry.last_opened.format("%Y-%m-%d %H:%M").dim()
                );
            }
            Ok(ExitCode::Success)
        }
        Commands::Config => {
            let rendered = config.to_toml()?;
            let file = cli.config.or_else(EngineConfig::default_path);
            if let Some(file) = file {
                println!("# {}", file.display());
            }
            print!("{rendered}");
            std::io::stdout().flush()?;
            Ok(ExitCode::Success)
        }
    }
}

fn apply_scan_args(config: &mut EngineConfig, args: &ScanArgs) {
    config.skip_hashed |= args.skip_hashed;
    config.skip_hidden |= args.skip_hidden;
    if args.min_size.is_some() {
        config.min_size = args.min_size;
    }
    if args.scan_workers.is_some() {
        config.scan_workers = args.scan_workers;
    }
    if args.hash_workers.is_some() {
        config.hash_workers = args.hash_workers;
    }
    config
        .ignore_patterns
        .extend(args.ignore_patterns.iter().cloned());
}

fn workspace_path(
    explicit: Option<PathBuf>,
    recent: Option<&RecentWorkspaces>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = recent.map(RecentWorkspaces::last).transpose()?.flatten() {
        log::info!("Using most recent workspace: {}", path.display());
        return Ok(path);
    }
    bail!("No workspace given and no recent workspace found (use --workspace)")
}

fn open(path: &Path, config: EngineConfig, recent: Option<&RecentWorkspaces>) -> Result<Engine> {
    let engine = Engine::open(path, config)
        .with_context(|| format!("Failed to open workspace {}", path.display()))?;
    remember(recent, path);
    Ok(engine)
}

fn add_directory(engine: &mut Engine, dir: &Path) -> Result<()> {
    if !engine
        .add_directory(dir)
        .with_context(|| format!("Cannot add directory {}", dir.display()))?
    {
        log::info!("Already configured: {}", dir.display());
    }
    Ok(())
}

fn remember(recent: Option<&RecentWorkspaces>, path: &Path) {
    if let Some(recent) = recent {
        if let Err(e) = recent.add(path, None) {
            log::warn!("Failed to update recent workspaces: {e:#}");
        }
    }
}

fn watch_interrupt(token: &CancelToken) {
    if let Err(e) = install_handler(token) {
        log::warn!("{e}");
    }
}

fn print_groups(groups: &[DuplicateGroup], args: &DuplicatesArgs) -> Result<()> {
    let shown = &groups[..args.limit.unwrap_or(groups.len()).min(groups.len())];
    if args.json {
        println!("{}", serde_json::to_string_pretty(shown)?);
        return Ok(());
    }
    for (idx, group) in shown.iter().enumerate() {
        println!(
            "{} {} copies of {} ({} wasted)",
            format!("#{}", idx + 1).cyan().bold(),
            group.len(),
            ByteSize::b(group.size),
            ByteSize::b(group.wasted_bytes())
        );
        for file in &group.files {
            println!("    {}", file.path.display());
        }
    }
    if shown.len() < groups.len() {
        println!("... {} more groups", groups.len() - shown.len());
    }
    Ok(())
}
