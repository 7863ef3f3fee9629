use colored::*;
use companion_core::MessageKey;
use companion_host::{Notifier, ProbeOutcome, UnreachableCause, Warning};
use std::path::Path;

/// Prints launch feedback to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn warn(&self, warning: &Warning) {
        eprintln!("{} {}", format!("{}:", warning.title).yellow().bold(), warning.message);
    }

    fn launching(&self, path: &Path) {
        eprintln!(
            "{} {}",
            MessageKey::LaunchTitle.title().cyan(),
            path.display().to_string().dimmed()
        );
    }
}

pub fn print_probe_outcome(path: &Path, outcome: &ProbeOutcome) {
    match outcome {
        ProbeOutcome::Compatible => {
            println!("{} {}", "Compatible:".green().bold(), path.display())
        }
        ProbeOutcome::Incompatible { exit_code } => println!(
            "{} {} (exit code {})",
            "Incompatible:".red().bold(),
            path.display(),
            exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
        ),
        ProbeOutcome::Unreachable(UnreachableCause::Timeout) => println!(
            "{} {} did not exit in time",
            "Unreachable:".red().bold(),
            path.display()
        ),
        ProbeOutcome::Unreachable(UnreachableCause::Spawn(e)) => println!(
            "{} cannot execute {}: {}",
            "Unreachable:".red().bold(),
            path.display(),
            e
        ),
    }
}

pub fn print_session_help() {
    println!("{}", "Commands:".cyan());
    println!("  open <FILE>  Open a file under the asset folder");
    println!("  build        Reload compiled classes");
    println!("  resolve      Reload libraries");
    println!("  quit         Stop the companion and exit");
}
