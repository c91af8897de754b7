use clap::{ArgAction, Parser};

/// Command-line client for Amazon S3 and compatible object stores.
///
/// Run `s3commander help` for the list of commands.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// COMMAND followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    pub fn parse_arguments() -> Cli {
        Cli::parse()
    }
}
