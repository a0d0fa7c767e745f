//! xlsx-mend CLI - stamp the current datetime into a workbook and restore the
//! parts the save dropped.

use clap::{ArgAction, Parser, ValueEnum};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use xlsx_mend::{PipelineOptions, PipelineOutcome, RestoreMode};

/// Set a cell of the first worksheet to the current datetime
#[derive(Parser)]
#[command(
    name = "xlsx-mend",
    author = "iyulab",
    version,
    about = "Set a cell to the current datetime and restore what the save dropped",
    long_about = "xlsx-mend - write the current datetime into the first worksheet of an\n\
                  Excel workbook, then restore drawings, diagrams, media, comments and\n\
                  extension lists the save lost."
)]
struct Cli {
    /// Input workbook
    src: PathBuf,

    /// Output workbook (may be the same file as the input)
    dest: PathBuf,

    /// Do not delete the scratch directory (created under --scratch-dir, else the system temp dir)
    #[arg(long = "keep-temp-dir")]
    keep_temp_dir: bool,

    /// Only load and save the workbook, no datetime and no restoration
    #[arg(long = "just-save")]
    just_save: bool,

    /// Which parts to restore
    #[arg(long, value_enum, default_value = "comments")]
    mode: ModeArg,

    /// Cell that receives the datetime
    #[arg(long, default_value = "B1")]
    cell: String,

    /// Directory the scratch area is created in (default: system temp dir)
    #[arg(long = "scratch-dir")]
    scratch_dir: Option<PathBuf>,

    /// Print the restoration report as JSON
    #[arg(long)]
    report: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Restore mode
#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Restore drawing parts one by one, leave comments to the save
    Drawings,
    /// Replace the drawings folder and reinstate the original comments
    Comments,
}

impl From<ModeArg> for RestoreMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Drawings => RestoreMode::Drawings,
            ModeArg::Comments => RestoreMode::Comments,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = PipelineOptions::new()
        .with_mode(cli.mode.into())
        .with_keep_scratch(cli.keep_temp_dir);
    if let Some(dir) = &cli.scratch_dir {
        options = options.with_scratch_parent(dir);
    }

    // Log lines and a spinner on the same terminal garble each other.
    let pb = if cli.verbose > 0 {
        ProgressBar::hidden()
    } else {
        create_spinner("Saving workbook...")?
    };

    let outcome = if cli.just_save {
        xlsx_mend::resave(&cli.src, &cli.dest, &options)
    } else {
        let now = chrono::Local::now().naive_local();
        pb.set_message(format!("Setting {} and restoring parts...", cli.cell));
        xlsx_mend::stamp_datetime(&cli.src, &cli.dest, &cli.cell, now, &options)
    };
    pb.finish_and_clear();
    let outcome = outcome?;

    print_summary(&cli, &outcome);

    if cli.report {
        if let Some(report) = &outcome.report {
            println!("{}", report.to_json(true)?);
        }
    }

    Ok(())
}

fn print_summary(cli: &Cli, outcome: &PipelineOutcome) {
    match &outcome.report {
        Some(report) => {
            println!(
                "{} Saved {} ({} parts, {} relationships restored)",
                "✓".green().bold(),
                cli.dest.display(),
                report.parts_restored(),
                report.relationships_admitted()
            );
            let fallbacks = report
                .extension_lists
                .iter()
                .filter(|e| e.root_fallback)
                .count();
            if fallbacks > 0 {
                println!(
                    "{} {} extension list(s) placed under the worksheet root",
                    "!".yellow().bold(),
                    fallbacks
                );
            }
        }
        None => {
            println!("{} Saved {}", "✓".green().bold(), cli.dest.display());
        }
    }

    if let Some(dir) = &outcome.scratch_dir {
        println!("{} Scratch directory kept: {}", "i".cyan().bold(), dir.display());
    }
}

fn create_spinner(message: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.blue} {msg}")?,
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_keep_temp_dir_help_names_location() {
        use clap::CommandFactory;
        let command = Cli::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == "keep_temp_dir")
            .unwrap();
        let help = arg.get_help().unwrap().to_string();
        assert!(help.contains("system temp dir"), "{help}");
        assert!(help.contains("--scratch-dir"), "{help}");
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["xlsx-mend", "in.xlsx", "out.xlsx"]);
        assert_eq!(cli.cell, "B1");
        assert!(!cli.just_save);
        assert!(matches!(RestoreMode::from(cli.mode), RestoreMode::Comments));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "xlsx-mend",
            "in.xlsx",
            "in.xlsx",
            "--keep-temp-dir",
            "--just-save",
            "--mode",
            "drawings",
            "--scratch-dir",
            "scratch",
            "-vv",
        ]);
        assert!(cli.keep_temp_dir);
        assert!(cli.just_save);
        assert!(matches!(RestoreMode::from(cli.mode), RestoreMode::Drawings));
        assert_eq!(cli.scratch_dir, Some(PathBuf::from("scratch")));
        assert_eq!(cli.verbose, 2);
    }
}
