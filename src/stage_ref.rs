//! Parsing of middleware references such as `auth` or `throttle:api`.

use std::fmt;

use crate::error::ConfigError;

/// Separates a middleware name from its argument.
pub const ARGUMENT_DELIMITER: char = ':';

/// A middleware reference as written in a manifest or on a route: a name
/// (alias, group, or registered stage id) plus an optional argument.
///
/// `throttle:api` parses to name `throttle`, argument `api`. Only the first
/// delimiter splits, so `cache.headers:max_age=60` and `can:edit:own` keep
/// everything after it as the argument.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StageRef {
    name: String,
    argument: Option<String>,
}

impl StageRef {
    pub fn parse(reference: &str) -> Result<Self, ConfigError> {
        let malformed = |reason| ConfigError::MalformedReference {
            reference: reference.to_owned(),
            reason,
        };

        let reference = reference.trim();
        let (name, argument) = match reference.split_once(ARGUMENT_DELIMITER) {
            Some((name, argument)) => (name.trim(), Some(argument.trim())),
            None => (reference, None),
        };

        if name.is_empty() {
            return Err(malformed("missing middleware name"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(malformed("middleware name contains whitespace"));
        }
        if argument == Some("") {
            return Err(malformed("empty argument after `:`"));
        }

        Ok(Self { name: name.to_owned(), argument: argument.map(str::to_owned) })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn argument(&self) -> Option<&str> { self.argument.as_deref() }
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(arg) => write!(f, "{}{ARGUMENT_DELIMITER}{arg}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_has_no_argument() {
        let r = StageRef::parse("auth").unwrap();
        assert_eq!(r.name(), "auth");
        assert_eq!(r.argument(), None);
    }

    #[test]
    fn splits_on_first_delimiter_only() {
        let r = StageRef::parse("can:bookings:cancel").unwrap();
        assert_eq!(r.name(), "can");
        assert_eq!(r.argument(), Some("bookings:cancel"));
        assert_eq!(r.to_string(), "can:bookings:cancel");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let r = StageRef::parse("  throttle : api ").unwrap();
        assert_eq!(r.to_string(), "throttle:api");
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", ":api", "throttle:", "auth sanctum"] {
            let err = StageRef::parse(bad).unwrap_err();
            assert!(
                matches!(err, ConfigError::MalformedReference { .. }),
                "`{bad}` should be malformed, got {err}"
            );
        }
    }
}
