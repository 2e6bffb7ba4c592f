//! Shared result printing for text and JSON modes.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print `value` as pretty JSON in JSON mode; text mode prints its own layout.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Json = format {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{}: could not serialize result: {e}", "Error".red().bold()),
        }
    }
}

pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    println!("{} {}", "✓".green().bold(), message);
}

pub fn warning(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

pub fn yes_no(value: bool) -> colored::ColoredString {
    if value { "yes".green() } else { "no".red() }
}
