use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Configure, probe and drive the companion application
#[derive(Parser, Debug)]
#[command(name = "companionctl", author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file to use instead of the default one
    #[arg(long, global = true, env = "COMPANION_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Settings management commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Run the compatibility probe against a companion executable
    Probe {
        /// Executable to probe; defaults to the configured path
        path: Option<PathBuf>,
    },

    /// Launch the companion if needed and open a file in it
    Open {
        /// File under the module's asset folder
        file: PathBuf,

        /// Module layout (JSON)
        #[arg(short, long)]
        module: PathBuf,
    },

    /// Launch the companion and keep the session open, reading
    /// `open <file>`, `build`, `resolve` and `quit` from stdin
    Session {
        /// Module layout (JSON)
        #[arg(short, long)]
        module: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the current settings
    Show,

    /// Set the companion executable path
    SetPath {
        /// Path to the companion executable; an empty string clears it
        path: String,
    },

    /// Print the settings file location
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open() {
        let cli = Cli::try_parse_from([
            "companionctl",
            "-v",
            "open",
            "assets/Scenes/level.j3o",
            "--module",
            "module.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Open { file, module } => {
                assert_eq!(file, PathBuf::from("assets/Scenes/level.j3o"));
                assert_eq!(module, PathBuf::from("module.json"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_set_path() {
        let cli =
            Cli::try_parse_from(["companionctl", "config", "set-path", "/opt/editor"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommands::SetPath { ref path }) if path == "/opt/editor"
        ));
    }

    #[test]
    fn test_probe_path_is_optional() {
        let cli = Cli::try_parse_from(["companionctl", "probe"]).unwrap();
        assert!(matches!(cli.command, Commands::Probe { path: None }));
    }
}
