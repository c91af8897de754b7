//! Permissive `--name value` option parsing.
//!
//! Tokens starting with `--` name an option, everything else is positional.
//! A bare `--` ends parsing and drops whatever follows it. Options repeated
//! later in the stream overwrite earlier values.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Marker introducing a named option.
const OPTION_PREFIX: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub required: bool,
    pub flag: bool,
}

impl OptionSpec {
    /// An optional option that takes a value.
    pub const fn value(name: &'static str) -> Self {
        OptionSpec {
            name,
            required: false,
            flag: false,
        }
    }

    /// An option that takes a value and must be present.
    pub const fn required(name: &'static str) -> Self {
        OptionSpec {
            name,
            required: true,
            flag: false,
        }
    }

    /// A boolean option that consumes no value.
    pub const fn flag(name: &'static str) -> Self {
        OptionSpec {
            name,
            required: false,
            flag: true,
        }
    }
}

/// The set of option names a command understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSchema {
    specs: &'static [OptionSpec],
}

impl OptionSchema {
    pub const EMPTY: OptionSchema = OptionSchema { specs: &[] };

    pub const fn new(specs: &'static [OptionSpec]) -> Self {
        OptionSchema { specs }
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&'static OptionSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    fn required(&self) -> impl Iterator<Item = &'static OptionSpec> {
        self.specs.iter().filter(|spec| spec.required)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Text(String),
    Flag,
}

/// Named option values produced by [`parse`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: HashMap<String, OptionValue>,
}

impl Options {
    /// Value of a non-flag option.
    pub fn get(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(OptionValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(OptionValue::Flag))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn insert(&mut self, name: &str, value: OptionValue) {
        self.values.insert(name.to_owned(), value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    pub options: Options,
    pub positional: Vec<String>,
}

impl ParsedArgs {
    pub fn into_parts(self) -> (Vec<String>, Options) {
        (self.positional, self.options)
    }
}

/// Splits `tokens` into named options and positional arguments.
///
/// In strict mode an undeclared `--name` is an error. In lax mode it is kept
/// as a positional token, in place, so a later strict pass can see it.
pub fn parse<I, S>(tokens: I, schema: &OptionSchema, lax: bool) -> Result<ParsedArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut tokens = tokens.into_iter().map(Into::into);
    let mut parsed = ParsedArgs::default();

    while let Some(token) = tokens.next() {
        let name = match token.strip_prefix(OPTION_PREFIX) {
            Some(name) => name.to_owned(),
            None => {
                parsed.positional.push(token);
                continue;
            }
        };

        if name.is_empty() {
            // Everything after a bare `--` is commentary
            break;
        }

        match schema.get(&name) {
            None if lax => parsed.positional.push(token),
            None => return Err(Error::UnknownArgument(name)),
            Some(spec) if spec.flag => parsed.options.insert(spec.name, OptionValue::Flag),
            Some(spec) => {
                let value = tokens
                    .next()
                    .ok_or_else(|| Error::MissingArgumentValue(name.clone()))?;
                parsed.options.insert(spec.name, OptionValue::Text(value));
            }
        }
    }

    if let Some(missing) = schema
        .required()
        .find(|spec| !parsed.options.contains(spec.name))
    {
        return Err(Error::MissingRequiredArgument(missing.name.to_owned()));
    }

    Ok(parsed)
}

pub fn parse_lax<I, S>(tokens: I, schema: &OptionSchema) -> Result<ParsedArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parse(tokens, schema, true)
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    const SCHEMA: OptionSchema = OptionSchema::new(&[
        OptionSpec::value("acl"),
        OptionSpec::value("content-type"),
        OptionSpec::flag("brief"),
    ]);

    const ACL_ONLY: OptionSchema = OptionSchema::new(&[OptionSpec::value("acl")]);

    const REQUIRES_EXPIRES: OptionSchema =
        OptionSchema::new(&[OptionSpec::required("expires"), OptionSpec::flag("brief")]);

    #[test]
    fn should_split_options_and_positionals() {
        let parsed = parse(
            ["s3://foo/", "--acl", "public-read", "ani.gif", "--brief"],
            &SCHEMA,
            false,
        )
        .unwrap();

        assert_eq!(parsed.positional, vec!["s3://foo/", "ani.gif"]);
        assert_eq!(parsed.options.get("acl"), Some("public-read"));
        assert!(parsed.options.flag("brief"));
        assert_eq!(parsed.options.get("brief"), None);
        assert_eq!(parsed.options.len(), 2);
    }

    #[test]
    fn should_let_last_value_win() {
        let parsed = parse(["--acl", "a", "--acl", "b"], &SCHEMA, false).unwrap();
        assert_eq!(parsed.options.get("acl"), Some("b"));
        assert!(parsed.positional.is_empty());
    }

    #[test]
    fn should_stop_at_bare_double_dash() {
        let parsed = parse(["one", "--", "two", "--acl"], &SCHEMA, false).unwrap();
        assert_eq!(parsed.positional, vec!["one"]);
        assert!(parsed.options.is_empty());
    }

    #[test]
    fn should_take_option_value_verbatim() {
        let parsed = parse(["--content-type", "--brief"], &SCHEMA, false).unwrap();
        assert_eq!(parsed.options.get("content-type"), Some("--brief"));
        assert!(!parsed.options.flag("brief"));
    }

    #[test]
    fn should_treat_single_dash_tokens_as_positional() {
        let parsed = parse(["-", "-x"], &SCHEMA, false).unwrap();
        assert_eq!(parsed.positional, vec!["-", "-x"]);
    }

    #[test]
    fn should_fail_on_unknown_argument_when_strict() {
        match parse(["--nope"], &SCHEMA, false) {
            Err(Error::UnknownArgument(name)) => assert_eq!(name, "nope"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn should_fail_when_value_is_missing() {
        match parse(["x", "--acl"], &SCHEMA, false) {
            Err(Error::MissingArgumentValue(name)) => assert_eq!(name, "acl"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn should_fail_when_required_option_is_absent() {
        let err = parse(["s3://foo/bar", "--brief"], &REQUIRES_EXPIRES, false).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: expires");

        let parsed = parse(["--expires", "2030-01-01"], &REQUIRES_EXPIRES, false).unwrap();
        assert_eq!(parsed.options.get("expires"), Some("2030-01-01"));
    }

    #[test]
    fn should_keep_unknown_options_in_place_when_lax() {
        let parsed = parse_lax(
            ["put", "--content-type", "text/plain", "--acl", "private", "x"],
            &ACL_ONLY,
        )
        .unwrap();
        assert_eq!(
            parsed.positional,
            vec!["put", "--content-type", "text/plain", "x"]
        );
        assert_eq!(parsed.options.get("acl"), Some("private"));
    }

    #[test]
    fn should_reject_every_option_with_empty_schema() {
        assert!(parse(["a", "--brief"], &OptionSchema::EMPTY, false).is_err());
        let parsed = parse(["a", "b"], &OptionSchema::EMPTY, false).unwrap();
        assert_eq!(parsed.positional, vec!["a", "b"]);
    }

    const FLAGS_ONLY: OptionSchema = OptionSchema::new(&[OptionSpec::flag("brief")]);

    fn positional_token() -> impl Strategy<Value = String> {
        "[^-][ -~]{0,12}|-|-[a-z]{1,4}"
    }

    fn any_token() -> impl Strategy<Value = String> {
        prop_oneof![
            positional_token(),
            Just("--acl".to_owned()),
            Just("--brief".to_owned()),
            Just("--unknown".to_owned()),
            Just("--".to_owned()),
            "--[a-z]{1,6}",
        ]
    }

    proptest! {
        #[test]
        fn positional_only_input_is_returned_unchanged(tokens in prop::collection::vec(positional_token(), 0..12)) {
            for schema in [SCHEMA, OptionSchema::EMPTY] {
                let parsed = parse(tokens.clone(), &schema, false).unwrap();
                prop_assert!(parsed.options.is_empty());
                prop_assert_eq!(&parsed.positional, &tokens);
            }
        }

        #[test]
        fn lax_mode_keeps_unknown_options_in_position(tokens in prop::collection::vec(any_token(), 0..12)) {
            let parsed = parse_lax(tokens.clone(), &FLAGS_ONLY).unwrap();
            let expected: Vec<String> = tokens
                .iter()
                .take_while(|t| t.as_str() != "--")
                .filter(|t| t.as_str() != "--brief")
                .cloned()
                .collect();
            prop_assert_eq!(parsed.positional, expected);
        }

        #[test]
        fn lax_mode_never_reports_unknown_arguments(tokens in prop::collection::vec(any_token(), 0..12)) {
            if let Err(err) = parse_lax(tokens, &SCHEMA) {
                prop_assert!(!matches!(err, Error::UnknownArgument(_)));
            }
        }

        #[test]
        fn parsing_is_deterministic(tokens in prop::collection::vec(any_token(), 0..12)) {
            let first = parse_lax(tokens.clone(), &SCHEMA).ok();
            let second = parse_lax(tokens, &SCHEMA).ok();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn missing_required_option_always_fails(tokens in prop::collection::vec(positional_token(), 0..8)) {
            let err = parse(tokens, &REQUIRES_EXPIRES, false).unwrap_err();
            prop_assert!(matches!(err, Error::MissingRequiredArgument(ref name) if name == "expires"));
        }
    }
}
