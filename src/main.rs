//! treesync CLI - mirror a directory tree, copying only what changed

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use treesync::config::{CliArgs, Commands, HashAlgorithm, SyncConfig};
use treesync::core::{Interrupter, RunOutcome, RunSummary, SyncEngine};
use treesync::error::{Result, SyncError};
use treesync::hash::{compare_files, hash_files_parallel};
use treesync::progress::{bytes_to_human_readable, millis_to_human_readable, TerminalReporter};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Handle result
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: CliArgs) -> Result<i32> {
    // Handle subcommands
    if let Some(command) = &args.command {
        return handle_command(command);
    }

    // Require source and destination unless a profile supplies them
    if args.profile.is_none() && (args.source.is_none() || args.destination.is_none()) {
        eprintln!("Usage: treesync <SOURCE> <DESTINATION> [OPTIONS]");
        eprintln!("       treesync --help for more information");
        eprintln!("       treesync hash <FILE>...  - Print file digests");
        eprintln!("       treesync compare <A> <B> - Compare two files byte by byte");
        return Ok(1);
    }

    // Build configuration
    let config = SyncConfig::from_cli(&args).map_err(SyncError::ConfigError)?;

    if let Some(path) = &args.save_profile {
        config.save(path)?;
        tracing::info!("Saved profile to {}", path.display());
    }

    // Print configuration if verbose
    if args.verbose > 0 {
        print_config(&config);
    }

    let reporter = if args.quiet {
        TerminalReporter::hidden(config.workers)
    } else {
        TerminalReporter::new(config.workers)
    };
    let listeners = reporter.listeners(|| tracing::debug!("Engine reported completion"));

    let handle = SyncEngine::start(config, listeners)?;
    install_interrupt_handler(handle.interrupter());
    let outcome = handle.join();

    match outcome {
        RunOutcome::Completed(summary) => {
            reporter.finish(&format!("Done! {}", millis_to_human_readable(summary.elapsed.as_millis() as u64)));
            if !args.quiet {
                print_summary(&summary);
            }
            Ok(0)
        }
        RunOutcome::Aborted { message } => {
            reporter.abandon(&message);
            eprintln!("Aborted: {}", message);
            Ok(1)
        }
        RunOutcome::Interrupted => {
            reporter.abandon("Interrupted");
            Ok(130)
        }
    }
}

/// Route SIGINT/SIGTERM to the run; a second signal exits immediately
fn install_interrupt_handler(interrupter: Interrupter) {
    let signalled = AtomicBool::new(false);
    let result = ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        interrupter.interrupt();
    });
    if let Err(e) = result {
        tracing::warn!("Can't install interrupt handler: {}", e);
    }
}

fn handle_command(command: &Commands) -> Result<i32> {
    match command {
        Commands::Hash { files, algorithm } => cmd_hash(files, *algorithm),
        Commands::Compare { first, second } => cmd_compare(first, second),
    }
}

fn cmd_hash(files: &[PathBuf], algorithm: HashAlgorithm) -> Result<i32> {
    let paths: Vec<_> = files.iter().map(PathBuf::as_path).collect();
    let mut failed = false;

    for (path, result) in paths.iter().zip(hash_files_parallel(&paths, algorithm)) {
        match result {
            Ok(hash) => println!("{}  {}", hash, path.display()),
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failed = true;
            }
        }
    }

    Ok(if failed { 1 } else { 0 })
}

fn cmd_compare(first: &Path, second: &Path) -> Result<i32> {
    if compare_files(first, second)? {
        println!("{} and {} are identical", first.display(), second.display());
        Ok(0)
    } else {
        println!("{} and {} differ", first.display(), second.display());
        Ok(1)
    }
}

fn print_config(config: &SyncConfig) {
    println!("=== treesync Configuration ===");
    println!("Source:        {:?}", config.source);
    println!("Destination:   {:?}", config.destination);
    println!("Include root:  {}", config.include_root);
    let strategies: Vec<_> = config.strategies.iter().map(|s| s.name()).collect();
    println!(
        "Strategies:    {}",
        if strategies.is_empty() { "always".to_string() } else { strategies.join(", ") }
    );
    println!("Hash:          {}", config.hash_algorithm.name());
    println!("Workers:       {}", config.workers);
    println!("Chunk size:    {}", bytes_to_human_readable(config.chunk_size as u64));
    println!();
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Sync Summary ===");
    println!("Files selected:  {}", summary.files_selected);
    println!("Files completed: {}", summary.files_completed);
    println!(
        "Bytes copied:    {} of {}",
        bytes_to_human_readable(summary.bytes_copied),
        bytes_to_human_readable(summary.bytes_selected)
    );
    println!("Duration:        {}", millis_to_human_readable(summary.elapsed.as_millis() as u64));
}
