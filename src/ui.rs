//! UI helpers for the eksops CLI.
//!
//! Provides consistent formatting for console output during the deployment
//! workflows.

use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// Print the eksops banner.
pub fn print_banner() {
    println!();
    println!(
        "{}",
        r"
       _
  ___ | | __ ___   ___   _ __   ___
 / _ \| |/ // __| / _ \ | '_ \ / __|
|  __/|   < \__ \| (_) || |_) |\__ \
 \___||_|\_\|___/ \___/ | .__/ |___/
                        |_|
"
        .cyan()
    );
    println!("  {}", "EKS Deployment Operations".bright_black());
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a step indicator with message.
pub fn print_step(message: &str) {
    println!("{} {}", "▶".cyan(), message.bold());
}

/// Print a progress step with step number.
pub fn print_progress_step(current: u8, total: u8, message: &str) {
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a passed checklist entry.
pub fn print_check_pass(name: &str, detail: Option<&str>) {
    print_check_line(&"✓".green().to_string(), name, detail);
}

/// Print a warned checklist entry.
pub fn print_check_warn(name: &str, detail: Option<&str>) {
    print_check_line(&"⚠".yellow().to_string(), name, detail);
}

/// Print a failed checklist entry.
pub fn print_check_fail(name: &str, detail: Option<&str>) {
    print_check_line(&"✗".red().to_string(), name, detail);
}

/// Print a skipped checklist entry.
pub fn print_check_skip(name: &str, detail: Option<&str>) {
    print_check_line(&"−".bright_black().to_string(), name, detail);
}

fn print_check_line(status: &str, name: &str, detail: Option<&str>) {
    let text = if let Some(detail) = detail {
        format!("{name} - {detail}")
    } else {
        name.to_string()
    };
    println!("  {status} {text}");
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Spinner shown while a bounded wait polls an external system.
///
/// Callers finish it with `finish_and_clear` before printing the outcome.
#[must_use]
pub fn wait_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
