use tracing::debug;

use crate::command_handler::CommandHandler;
use crate::error::{Error, Result};
use crate::options::{self, OptionSchema, OptionSpec, Options};

pub type PositionalFn = fn(&mut CommandHandler<'_>, Vec<String>) -> Result<()>;
pub type WithOptionsFn = fn(&mut CommandHandler<'_>, Vec<String>, Options) -> Result<()>;

#[derive(Clone, Copy)]
pub enum Handler {
    /// Takes positional arguments only; any `--name` is rejected.
    Positional(PositionalFn),
    WithOptions(WithOptionsFn),
}

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub handler: Handler,
    pub schema: OptionSchema,
    pub description: &'static str,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "list",
        aliases: &["ls"],
        handler: Handler::WithOptions(|ctx, args, options| ctx.handle_list(args, options)),
        schema: OptionSchema::new(&[OptionSpec::flag("brief")]),
        description: "Lists all buckets or objects in a bucket, optionally constrained by a prefix",
    },
    CommandSpec {
        name: "put",
        aliases: &[],
        handler: Handler::WithOptions(|ctx, args, options| ctx.handle_put(args, options)),
        schema: OptionSchema::new(&[OptionSpec::value("content-type"), OptionSpec::value("acl")]),
        description: "Puts a local file as an object in a bucket",
    },
    CommandSpec {
        name: "puts",
        aliases: &[],
        handler: Handler::WithOptions(|ctx, args, options| ctx.handle_puts(args, options)),
        schema: OptionSchema::new(&[OptionSpec::value("acl")]),
        description: "Puts text from standard input as an object in a bucket",
    },
    CommandSpec {
        name: "get",
        aliases: &[],
        handler: Handler::Positional(|ctx, args| ctx.handle_get(args)),
        schema: OptionSchema::EMPTY,
        description: "Gets an object from a bucket as a local file",
    },
    CommandSpec {
        name: "gets",
        aliases: &[],
        handler: Handler::Positional(|ctx, args| ctx.handle_gets(args)),
        schema: OptionSchema::EMPTY,
        description: "Sends a text object from a bucket to standard output",
    },
    CommandSpec {
        name: "pops",
        aliases: &[],
        handler: Handler::Positional(|ctx, args| ctx.handle_pops(args)),
        schema: OptionSchema::EMPTY,
        description: "Removes and sends a text object from a bucket to standard output",
    },
    CommandSpec {
        name: "rm",
        aliases: &["del"],
        handler: Handler::Positional(|ctx, args| ctx.handle_rm(args)),
        schema: OptionSchema::EMPTY,
        description: "Removes an object from a bucket",
    },
    CommandSpec {
        name: "authurl",
        aliases: &[],
        handler: Handler::WithOptions(|ctx, args, options| ctx.handle_authurl(args, options)),
        schema: OptionSchema::new(&[OptionSpec::value("expires")]),
        description: "Creates a pre-authorized URL valid for performing a GET",
    },
    CommandSpec {
        name: "mkbkt",
        aliases: &[],
        handler: Handler::WithOptions(|ctx, args, options| ctx.handle_mkbkt(args, options)),
        schema: OptionSchema::new(&[
            OptionSpec::flag("europe"),
            OptionSpec::value("region"),
            OptionSpec::value("acl"),
        ]),
        description: "Creates a new bucket",
    },
    CommandSpec {
        name: "rmbkt",
        aliases: &[],
        handler: Handler::Positional(|ctx, args| ctx.handle_rmbkt(args)),
        schema: OptionSchema::EMPTY,
        description: "Deletes a bucket",
    },
];

/// Finds a command by its name or one of its aliases.
pub fn lookup(verb: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name == verb || spec.aliases.contains(&verb))
}

/// Parses `args` against the command's schema and runs it.
pub fn dispatch(ctx: &mut CommandHandler<'_>, verb: &str, args: Vec<String>) -> Result<()> {
    let spec = lookup(verb).ok_or_else(|| Error::UnknownCommand(verb.to_owned()))?;

    match spec.handler {
        Handler::WithOptions(handler) => {
            let (positional, options) = options::parse(args, &spec.schema, false)?.into_parts();
            debug!(
                "Running {} with {} options [{}] and {} arguments",
                spec.name,
                options.len(),
                options.names().collect::<Vec<_>>().join(", "),
                positional.len()
            );
            handler(ctx, positional, options)
        }
        Handler::Positional(handler) => {
            let (positional, _) = options::parse(args, &OptionSchema::EMPTY, false)?.into_parts();
            debug!("Running {} with {} arguments", spec.name, positional.len());
            handler(ctx, positional)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::local::LocalStore;
    use crate::storage::{CannedAcl, ObjectStore};
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        store: LocalStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            fs::create_dir(dir.path().join("store")).unwrap();
            let store = LocalStore::new(dir.path().join("store"));
            store.create_bucket("foo", CannedAcl::Private).unwrap();
            Fixture { dir, store }
        }

        fn path(&self, name: &str) -> String {
            self.dir.path().join(name).to_string_lossy().into_owned()
        }

        fn run_with_input(&self, verb: &str, args: &[&str], input: &str) -> Result<String> {
            let mut out = Vec::new();
            let mut input = input.as_bytes();
            let mut ctx = CommandHandler::new(&self.store, &mut out, &mut input);
            dispatch(
                &mut ctx,
                verb,
                args.iter().map(|arg| arg.to_string()).collect(),
            )?;
            Ok(String::from_utf8(out).unwrap())
        }

        fn run(&self, verb: &str, args: &[&str]) -> Result<String> {
            self.run_with_input(verb, args, "")
        }

        fn exists(&self, key: &str) -> bool {
            self.store.get_object_as_stream("foo", key).is_ok()
        }
    }

    #[test]
    fn should_pair_option_handlers_with_schemas() {
        for spec in COMMANDS {
            let takes_options = matches!(spec.handler, Handler::WithOptions(_));
            assert_eq!(takes_options, !spec.schema.is_empty(), "{}", spec.name);
        }
    }

    #[test]
    fn should_keep_names_and_aliases_unique() {
        let mut seen = HashSet::new();
        for spec in COMMANDS {
            for name in std::iter::once(&spec.name).chain(spec.aliases) {
                assert!(seen.insert(*name), "duplicate verb {}", name);
            }
        }
    }

    #[test]
    fn should_resolve_aliases() {
        assert_eq!(lookup("ls").map(|spec| spec.name), Some("list"));
        assert_eq!(lookup("del").map(|spec| spec.name), Some("rm"));
        assert!(lookup("LS").is_none());
    }

    #[test]
    fn should_name_unknown_command() {
        let fixture = Fixture::new();
        let err = fixture.run("frobnicate", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Unknown command (frobnicate).");
    }

    #[test]
    fn should_reject_options_for_positional_commands() {
        let fixture = Fixture::new();
        match fixture.run("rm", &["s3://foo/a", "--x", "1"]) {
            Err(Error::UnknownArgument(name)) => assert_eq!(name, "x"),
            other => panic!("unexpected result: {:?}", other),
        }
        // A bare `--` still ends the arguments
        match fixture.run("rm", &["--", "s3://foo/a"]) {
            Err(Error::MissingPositional(message)) => assert_eq!(message, "Missing object path."),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn should_put_into_directory_style_target() {
        let fixture = Fixture::new();
        let local = fixture.path("ani.gif");
        fs::write(&local, vec![0u8; 1234]).unwrap();

        let out = fixture.run("put", &["s3://foo/images/", &local]).unwrap();

        assert_eq!(out, "Uploading ani.gif (1,234 bytes) as image/gif... OK\n");
        let stream = fixture.store.get_object_as_stream("foo", "images/ani.gif").unwrap();
        assert_eq!(stream.content_type, "image/gif");
        assert_eq!(stream.content_length, 1234);
    }

    #[test]
    fn should_put_with_explicit_key_and_content_type() {
        let fixture = Fixture::new();
        let local = fixture.path("script");
        fs::write(&local, "echo hi").unwrap();

        fixture
            .run(
                "put",
                &["s3://foo/bin/run", &local, "--content-type", "text/plain"],
            )
            .unwrap();

        let stream = fixture.store.get_object_as_stream("foo", "bin/run").unwrap();
        assert_eq!(stream.content_type, "text/plain");
    }

    #[test]
    fn should_validate_put_arguments_before_uploading() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.run("put", &[]).unwrap_err().to_string(),
            "Missing target object path."
        );
        assert_eq!(
            fixture.run("put", &["s3://foo/"]).unwrap_err().to_string(),
            "Missing local file path."
        );

        let local = fixture.path("a.txt");
        fs::write(&local, "a").unwrap();
        assert!(matches!(
            fixture.run("put", &["s3://foo/", &local, "--acl", "everyone"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!fixture.exists("a.txt"));
    }

    #[test]
    fn should_list_objects_and_prefixes() {
        let fixture = Fixture::new();
        fixture
            .store
            .put_object_from_text("12345", "foo", "images/a.txt", "text/plain", CannedAcl::Private)
            .unwrap();
        fixture
            .store
            .put_object_from_text("", "foo", "images/raw/b.tif", "image/tiff", CannedAcl::Private)
            .unwrap();

        let out = fixture.run("ls", &["s3://foo/images/"]).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        // Fixed-width date, then the size right-aligned in 20 columns
        assert!(lines[0].ends_with(" GMT                     5  a.txt"), "{}", lines[0]);
        assert_eq!(lines[0].len(), 29 + 2 + 20 + 2 + "a.txt".len());
        assert_eq!(lines[1], format!("{}images/raw/", " ".repeat(53)));

        let brief = fixture.run("list", &["s3://foo/images/", "--brief"]).unwrap();
        assert_eq!(brief, "a.txt\nimages/raw/\n");
    }

    #[test]
    fn should_list_buckets() {
        let fixture = Fixture::new();
        fixture.run("mkbkt", &["bar", "--europe"]).unwrap();

        assert_eq!(fixture.run("ls", &["--brief"]).unwrap(), "bar\nfoo\n");
        let full = fixture.run("ls", &[]).unwrap();
        assert!(full.lines().all(|line| line.contains(" GMT  ")));
    }

    #[test]
    fn should_round_trip_text_and_pop_it() {
        let fixture = Fixture::new();

        let out = fixture
            .run_with_input("puts", &["s3://foo/dir.txt"], "héllo")
            .unwrap();
        assert_eq!(out, "Uploading 5 characters of text... OK\n");

        assert_eq!(fixture.run("gets", &["s3://foo/dir.txt"]).unwrap(), "héllo\n");
        assert!(fixture.exists("dir.txt"));

        assert_eq!(fixture.run("pops", &["s3://foo/dir.txt"]).unwrap(), "héllo\n");
        assert!(!fixture.exists("dir.txt"));
    }

    #[test]
    fn should_refuse_non_text_objects() {
        let fixture = Fixture::new();
        fixture
            .store
            .put_object_from_text("GIF89a", "foo", "ani.gif", "image/gif", CannedAcl::Private)
            .unwrap();

        let err = fixture.run("pops", &["s3://foo/ani.gif"]).unwrap_err();
        assert_eq!(err.to_string(), "Object is image/gif, not text/plain.");
        assert!(fixture.exists("ani.gif"));
    }

    #[test]
    fn should_require_key_for_text() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.run("puts", &["s3://foo"]).unwrap_err().to_string(),
            "Missing key for text."
        );
        assert_eq!(
            fixture.run("gets", &["s3://foo/"]).unwrap_err().to_string(),
            "Missing key."
        );
    }

    #[test]
    fn should_get_into_directory_or_named_file() {
        let fixture = Fixture::new();
        fixture
            .store
            .put_object_from_text("<html/>", "foo", "site/index.html", "text/html", CannedAcl::Private)
            .unwrap();

        let out = fixture
            .run("get", &["s3://foo/site/index.html", &fixture.path("")])
            .unwrap();
        assert_eq!(out, "Downloading site/index.html to index.html... OK\n");
        assert_eq!(
            fs::read_to_string(Path::new(&fixture.path("index.html"))).unwrap(),
            "<html/>"
        );

        let renamed = fixture.path("bar.html");
        let out = fixture.run("get", &["s3://foo/site/index.html", &renamed]).unwrap();
        assert_eq!(out, "Downloading site/index.html to bar.html... OK\n");
        assert_eq!(fs::read_to_string(renamed).unwrap(), "<html/>");
    }

    #[test]
    fn should_remove_with_alias() {
        let fixture = Fixture::new();
        fixture
            .store
            .put_object_from_text("x", "foo", "gone.txt", "text/plain", CannedAcl::Private)
            .unwrap();

        assert_eq!(fixture.run("del", &["s3://foo/gone.txt"]).unwrap(), "");
        assert!(!fixture.exists("gone.txt"));
    }

    #[test]
    fn should_default_authurl_expiry_to_an_hour() {
        let fixture = Fixture::new();
        let before = chrono::Utc::now().timestamp();

        let out = fixture.run("authurl", &["s3://foo/bar"]).unwrap();

        let expires: i64 = out
            .trim()
            .rsplit("expires=")
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert!(expires >= before + 3600 && expires <= before + 3602, "{}", out);
    }

    #[test]
    fn should_honor_explicit_authurl_expiry() {
        let fixture = Fixture::new();
        let out = fixture
            .run("authurl", &["s3://foo/bar", "--expires", "2030-01-01T00:00:00Z"])
            .unwrap();
        assert!(out.trim().ends_with("expires=1893456000"), "{}", out);

        assert!(matches!(
            fixture.run("authurl", &["s3://foo/bar", "--expires", "someday"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            fixture.run("authurl", &["s3://foo/bar", "--expires"]),
            Err(Error::MissingArgumentValue(_))
        ));
    }

    #[test]
    fn should_create_and_remove_buckets() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.run("mkbkt", &[]).unwrap_err().to_string(),
            "Missing bucket name."
        );

        fixture
            .run("mkbkt", &["baz", "--region", "eu-west-1", "--acl", "public-read"])
            .unwrap();
        assert!(fixture.store.list_buckets().unwrap().iter().any(|b| b.name == "baz"));

        fixture.run("rmbkt", &["baz"]).unwrap();
        assert!(!fixture.store.list_buckets().unwrap().iter().any(|b| b.name == "baz"));
        assert_eq!(
            fixture.run("rmbkt", &[]).unwrap_err().to_string(),
            "Missing bucket name."
        );
    }

    #[test]
    fn should_pass_store_errors_through() {
        let fixture = Fixture::new();
        assert!(matches!(
            fixture.run("gets", &["s3://nope/key"]),
            Err(Error::Storage(_))
        ));
    }
}
