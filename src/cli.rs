use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zipstore")]
#[command(version)]
#[command(about = "Build ZIP archives atomically and browse them without extracting", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipstore pack out.zip --root build a.txt=docs/a.txt lib/   pack two sources\n  \
  zipstore ls out.zip docs/                                   list a directory\n  \
  zipstore ls out.zip -g '**/*.txt'                           list matching files\n  \
  zipstore cat out.zip docs/a.txt | more                      stream an entry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log progress (repeat for more detail)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack workspace files into an archive
    Pack {
        /// Archive to create or replace
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Directory the sources are relative to
        #[arg(long, value_name = "DIR", default_value = ".")]
        root: PathBuf,

        /// Sources to pack, as SRC or SRC=ENTRY
        #[arg(value_name = "MAPPING", required = true, value_parser = parse_mapping)]
        mappings: Vec<(String, String)>,
    },

    /// List the children of a directory, or the files matching a glob
    Ls {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Directory inside the archive (default: root)
        #[arg(value_name = "PATH", default_value = "")]
        path: String,

        /// Ant-style pattern relative to PATH (`*`, `**`, `?`)
        #[arg(short = 'g', long = "glob", value_name = "GLOB")]
        glob: Option<String>,
    },

    /// Write an entry's content to stdout
    Cat {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Show the type, size and modification time of a path
    Stat {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        #[arg(value_name = "PATH", default_value = "")]
        path: String,
    },

    /// Delete an archive
    Rm {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
}

impl Cli {
    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, _) => "debug",
        }
    }
}

/// Parse `SRC` or `SRC=ENTRY`; the entry name defaults to the source path.
fn parse_mapping(arg: &str) -> Result<(String, String), String> {
    let (source, entry) = arg.split_once('=').unwrap_or((arg, arg));
    if source.is_empty() {
        return Err(format!("empty source in mapping {arg:?}"));
    }
    Ok((source.to_string(), entry.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappings_default_to_the_source_name() {
        assert_eq!(
            parse_mapping("a.txt").unwrap(),
            ("a.txt".to_string(), "a.txt".to_string())
        );
        assert_eq!(
            parse_mapping("build/a.txt=out/a.txt").unwrap(),
            ("build/a.txt".to_string(), "out/a.txt".to_string())
        );
        assert!(parse_mapping("=out/a.txt").is_err());
    }

    #[test]
    fn parses_pack_invocations() {
        let cli = Cli::parse_from([
            "zipstore",
            "-v",
            "pack",
            "out.zip",
            "--root",
            "build",
            "a.txt=x/a.txt",
            "lib",
        ]);
        assert_eq!(cli.log_filter(), "info");
        match cli.command {
            Command::Pack { archive, root, mappings } => {
                assert_eq!(archive, PathBuf::from("out.zip"));
                assert_eq!(root, PathBuf::from("build"));
                assert_eq!(mappings.len(), 2);
                assert_eq!(mappings[1], ("lib".to_string(), "lib".to_string()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
