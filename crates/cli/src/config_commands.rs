use {anyhow::Result, clap::Subcommand};

use paird_config::{PairdConfig, Severity};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the effective configuration and report errors/warnings.
    Check,
    /// Print the effective configuration as TOML, admin token masked.
    Show,
}

pub fn handle_config(action: ConfigAction, config: &PairdConfig) -> Result<()> {
    match action {
        ConfigAction::Check => check(config),
        ConfigAction::Show => {
            print!("{}", paird_config::redacted_toml(config)?);
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &PairdConfig) -> Result<()> {
    let diagnostics = paird_config::validate(config);

    for d in &diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    let warnings = diagnostics.len() - errors;

    if !diagnostics.is_empty() {
        eprintln!();
    }

    if diagnostics.is_empty() {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
