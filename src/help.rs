use std::io::Write;

use crate::dispatch::COMMANDS;
use crate::error::Result;
use crate::options::{self, OptionSchema, OptionSpec};

const HELP_OPTIONS: OptionSchema = OptionSchema::new(&[OptionSpec::flag("version")]);

const EXAMPLES: &[(&str, &str)] = &[
    ("ls", "List all my buckets"),
    ("ls s3://foo", "List all objects in foo bucket"),
    (
        "ls s3://foo/images/",
        "List all objects in bucket foo with the common prefix of images/",
    ),
    (
        "put s3://foo index.html",
        "Add local file named index.html as key index.html in bucket foo",
    ),
    (
        "put s3://foo/images/ ani.gif",
        "Add local file named ani.gif as key images/ani.gif in bucket foo",
    ),
    (
        "put s3://foo/images/animation.gif ani.gif",
        "Add local file named ani.gif as key images/animation.gif in bucket foo",
    ),
    (
        "put s3://foo/script script --content-type text/plain",
        "Add local file named script as key script in bucket foo and set its\n  content type to plain text",
    ),
    (
        "get s3://foo/index.html",
        "Get object with key index.html in bucket foo as local file named index.html",
    ),
    (
        "get s3://foo/index.html bar.html",
        "Get object with key index.html in bucket foo as local file named bar.html",
    ),
    (
        "rm s3://foo/index.html",
        "Remove the object with key index.html in the bucket foo",
    ),
    (
        "puts s3://foo/dir.txt < listing.txt",
        "Put standard input as a plain text object named dir.txt in bucket foo",
    ),
    (
        "gets s3://foo/dir.txt",
        "Write the plain text object named dir.txt in bucket foo to standard output",
    ),
    (
        "pops s3://foo/dir.txt",
        "Write the plain text object named dir.txt in bucket foo to standard output\n  and then remove the object",
    ),
    (
        "authurl s3://foo/bar",
        "Get a pre-authenticated URL for key bar in bucket foo that expires in an hour",
    ),
    (
        "authurl s3://foo/bar --expires 2030-01-01",
        "Get a pre-authenticated URL for key bar in bucket foo that expires on\n  January 1st, 2030",
    ),
    ("mkbkt foo", "Create a new bucket called foo"),
    ("mkbkt foo --europe", "Create a new bucket called foo in the EU"),
    ("rmbkt foo", "Delete the bucket called foo if it is empty"),
    (
        "ids",
        "Save the access identifiers given by options or environment to the vault",
    ),
];

/// Prints usage, or the version with `--version`.
pub fn print_help(out: &mut dyn Write, program: &str, args: Vec<String>) -> Result<()> {
    let parsed = options::parse(args, &HELP_OPTIONS, false)?;

    if parsed.options.flag("version") {
        writeln!(
            out,
            "{} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )?;
        return Ok(());
    }

    writeln!(out, "{} - {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_DESCRIPTION"))?;
    writeln!(out)?;
    writeln!(out, "Usage:")?;
    writeln!(out)?;
    writeln!(out, "  {} [-v] COMMAND ARGS", program)?;
    writeln!(out)?;
    writeln!(out, "Commands:")?;
    writeln!(out)?;
    for spec in COMMANDS {
        let mut name = spec.name.to_owned();
        if !spec.aliases.is_empty() {
            name = format!("{} ({})", name, spec.aliases.join(", "));
        }
        writeln!(out, "  {:<12} {}", name, spec.description)?;
    }
    writeln!(out, "  {:<12} {}", "ids", "Securely saves the AWS access identifiers")?;
    writeln!(out, "  {:<12} {}", "help", "Shows this text, or the version with --version")?;
    writeln!(out)?;
    writeln!(
        out,
        "Every command except help takes the AWS access identifiers:

  --aws-key-id VALUE      Your AWS access key ID
  --aws-secret-key VALUE  Your AWS secret access key

A dash, or leaving an option out, picks the value up from AWS_ACCESS_KEY_ID
and AWS_SECRET_ACCESS_KEY, and failing that from the file saved by \"ids\"
(AWS_IDS_FILE overrides where that file lives).

Objects are addressed as:

  \"s3://\" BUCKET ( \"/\" KEY )

Examples:"
    )?;
    for (command, explanation) in EXAMPLES {
        writeln!(out)?;
        writeln!(out, "{} {}", program, command)?;
        writeln!(out, "  {}", explanation)?;
    }
    Ok(())
}
