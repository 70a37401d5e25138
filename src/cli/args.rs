use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config YAML file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging for internal details
    #[arg(short, long)]
    pub debug: bool,

    /// Print the session outcome as JSON
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the loaded rules and session settings
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Path to config YAML file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_arguments() {
        let cli = Cli::try_parse_from(["prompt-autopilot"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.debug);
        assert_eq!(cli.config_path(), PathBuf::from("config.yaml"));
    }

    #[test]
    fn test_run_with_flags() {
        let cli =
            Cli::try_parse_from(["prompt-autopilot", "--config", "detector.yaml", "-d", "--json"])
                .unwrap();
        assert!(cli.debug);
        assert!(cli.json);
        assert_eq!(cli.config_path(), PathBuf::from("detector.yaml"));
    }

    #[test]
    fn test_show_subcommand() {
        let cli = Cli::try_parse_from(["prompt-autopilot", "show", "--config", "x.yaml"]).unwrap();
        match cli.command {
            Some(Commands::Show(args)) => assert_eq!(args.config, PathBuf::from("x.yaml")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
