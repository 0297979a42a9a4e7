use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use cpatch::{process_chunks, ChunkConfig, ChunkRequest};
use env_logger::Builder;
use log::{info, warn, Level, LevelFilter};
use similar::udiff::unified_diff;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

// --- Main Application Entry Point ---

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        // Using {:?} ensures the full error chain from `anyhow` is printed.
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Contains the primary logic of the application.
fn run(args: Args) -> Result<()> {
    setup_logging(args.verbose);

    // --- Argument Validation ---
    if !args.target_file.is_file() {
        return Err(anyhow!(
            "Target file '{}' not found or is not a file.",
            args.target_file.display()
        ));
    }
    if !(0.0..=1.0).contains(&args.min_confidence) {
        return Err(anyhow!("Minimum confidence must be between 0.0 and 1.0."));
    }

    // --- Input Parsing ---
    let content = fs::read_to_string(&args.target_file)
        .with_context(|| format!("Failed to read target file '{}'", args.target_file.display()))?;
    let script = fs::read_to_string(&args.edits_file)
        .with_context(|| format!("Failed to read edits file '{}'", args.edits_file.display()))?;
    let requests = parse_edit_script(&script)?;

    if requests.is_empty() {
        info!("No edit chunks found in the input file.");
        return Ok(());
    }

    let config = ChunkConfig::builder()
        .case_sensitive(!args.ignore_case)
        .preserve_whitespace(args.preserve_whitespace)
        .max_search_lines(args.max_search_lines)
        .min_confidence(args.min_confidence)
        .build();

    info!(
        "Applying {} edit chunk(s) to '{}' (min confidence {:.2}).",
        requests.len(),
        args.target_file.display(),
        config.min_confidence
    );

    // --- Core Engine ---
    let result = process_chunks(&content, &requests, &config)?;

    for change in &result.applied_changes {
        info!("  {}", change);
    }
    for warning in &result.warnings {
        warn!("{}", warning);
    }

    // --- Output ---
    if args.dry_run {
        info!(
            "DRY RUN: Would write changes to '{}'",
            args.target_file.display()
        );
        let diff = unified_diff(
            similar::Algorithm::default(),
            &result.original_content,
            &result.modified_content,
            3,
            Some(("a", "b")),
        );
        println!(
            "----- Proposed Changes for {} -----",
            args.target_file.display()
        );
        print!("{}", diff);
        println!("------------------------------------");
    } else if result.has_changes() {
        fs::write(&args.target_file, &result.modified_content).with_context(|| {
            format!(
                "Failed to write modified content to '{}'",
                args.target_file.display()
            )
        })?;
        info!("Wrote changes to '{}'.", args.target_file.display());
    } else {
        info!("Document unchanged.");
    }

    // --- Final Summary ---
    info!("\n{}", result.summary().trim_end());

    if !result.success {
        for error in &result.errors {
            warn!("{}", error);
        }
        return Err(anyhow!(
            "Completed with {} failed edit(s).",
            result.errors.len()
        ));
    }

    Ok(())
}

// --- Helper Structs and Functions ---

/// Defines the command-line arguments for the application.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Apply context-anchored edit chunks to a file, locating each chunk by a fuzzy anchor line instead of line numbers.",
    long_about = "Each chunk in the edits file starts with a line beginning `@@`; the rest of that line is the context marker. Subsequent lines prefixed with `+`, `-`, or a space are the chunk's add/remove/context operations."
)]
struct Args {
    /// Path to the file to modify.
    target_file: PathBuf,
    /// Path to the edit-script file containing `@@`-marked chunks.
    edits_file: PathBuf,
    /// If set, show what would be done, but don't modify any files.
    #[arg(
        short = 'n',
        long,
        help = "Show what would be done, but don't modify files."
    )]
    dry_run: bool,
    /// The acceptance threshold for anchor matching (0.0 to 1.0).
    #[arg(short = 'c', long, default_value_t = DEFAULT_MIN_CONFIDENCE, help = "Acceptance threshold for anchor matching (0.0 to 1.0). Higher is stricter.")]
    min_confidence: f64,
    /// Compare lines case-insensitively.
    #[arg(long, help = "Compare lines case-insensitively.")]
    ignore_case: bool,
    /// Compare lines without trimming surrounding whitespace first.
    #[arg(
        long,
        help = "Compare lines without trimming surrounding whitespace first."
    )]
    preserve_whitespace: bool,
    /// How many document lines each matcher strategy scans.
    #[arg(
        long,
        default_value_t = 100,
        help = "How many document lines each matcher strategy scans."
    )]
    max_search_lines: usize,
    /// Increase logging verbosity. Can be used multiple times.
    /// -v for info, -vv for debug, -vvv for trace.
    #[arg(short, long, action = clap::ArgAction::Count, long_help = "Increase logging verbosity.\n-v for info, -vv for debug, -vvv for trace.")]
    verbose: u8,
}

/// Parses the edit-script format: `@@ marker` lines start a chunk, and the
/// lines that follow (until the next `@@` line) are its change lines.
fn parse_edit_script(script: &str) -> Result<Vec<ChunkRequest>> {
    let mut requests: Vec<ChunkRequest> = Vec::new();
    let mut current: Option<ChunkRequest> = None;

    for (index, line) in script.lines().enumerate() {
        if let Some(marker) = line.strip_prefix("@@") {
            if let Some(request) = current.take() {
                requests.push(request);
            }
            current = Some(ChunkRequest {
                context_marker: marker.trim().to_string(),
                change_lines: Vec::new(),
            });
        } else if let Some(request) = current.as_mut() {
            request.change_lines.push(line.to_string());
        } else if !line.trim().is_empty() {
            return Err(anyhow!(
                "Edits file line {}: change line appears before any '@@' marker line.",
                index + 1
            ));
        }
    }
    if let Some(request) = current.take() {
        requests.push(request);
    }

    Ok(requests)
}

/// Sets up the global logger with colored, level-prefixed output.
fn setup_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}
