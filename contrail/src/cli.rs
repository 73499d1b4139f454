//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use contrail::config::DEFAULT_TARGET_URL;

/// Capture proxy and context-lineage viewer for LLM API traffic
#[derive(Parser, Debug)]
#[command(name = "contrail")]
#[command(about = "Trace LLM API traffic and visualise how context evolves", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the capture proxy in front of an LLM API
    Proxy {
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Upstream API base URL
        #[arg(long, env = "CONTRAIL_TARGET", default_value = DEFAULT_TARGET_URL)]
        target: String,

        /// Capture log path (appended to)
        #[arg(long, env = "CONTRAIL_OUTPUT")]
        output: PathBuf,
    },

    /// Preprocess a capture log into the visualisation artifact
    Cook {
        /// Input JSONL capture log
        input: PathBuf,

        /// Output artifact path (atomically replaced)
        #[arg(short, long, default_value = "./output.json")]
        output: PathBuf,
    },

    /// Serve the viewer UI over a capture log
    Viewer {
        /// Input capture log (or an already-cooked artifact)
        input: PathBuf,

        /// Port to listen on
        #[arg(long, default_value_t = 9090)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_defaults_are_applied() {
        let cli = Cli::try_parse_from(["contrail", "proxy", "--output", "trace.jsonl"]).unwrap();
        match cli.command {
            Command::Proxy {
                port,
                host,
                target,
                output,
            } => {
                assert_eq!(port, 8080);
                assert_eq!(host, "127.0.0.1");
                assert_eq!(target, DEFAULT_TARGET_URL);
                assert_eq!(output, PathBuf::from("trace.jsonl"));
            }
            _ => panic!("expected proxy subcommand"),
        }
    }

    #[test]
    fn cook_takes_positional_input() {
        let cli =
            Cli::try_parse_from(["contrail", "cook", "trace.jsonl", "-o", "out.json"]).unwrap();
        match cli.command {
            Command::Cook { input, output } => {
                assert_eq!(input, PathBuf::from("trace.jsonl"));
                assert_eq!(output, PathBuf::from("out.json"));
            }
            _ => panic!("expected cook subcommand"),
        }
    }

    #[test]
    fn missing_required_arguments_fail_parsing() {
        assert!(Cli::try_parse_from(["contrail", "proxy"]).is_err());
        assert!(Cli::try_parse_from(["contrail", "cook"]).is_err());
        assert!(Cli::try_parse_from(["contrail", "nonsense"]).is_err());
    }
}
