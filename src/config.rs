use std::env;
use std::fmt::Debug;
use std::str::FromStr;

/// Returns the value of the named environment variable if it exists or panics.
pub fn get_variable(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("must define {} environment variable", name))
}

/// Parses the named environment variable, falling back to `default` if
/// it is unset. Panics if it is set but does not parse.
pub fn parse_variable<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Debug,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("parse {} ({:?}): {:?}", name, raw, e)),
        Err(_) => default,
    }
}

/// As [`parse_variable`], for settings such as the cool-down that only
/// make sense when positive. Panics on zero or negative values.
pub fn parse_positive_variable(name: &str, default: i64) -> i64 {
    let value = parse_variable(name, default);

    if value <= 0 {
        panic!("parse {} ({:?}): must be positive", name, value);
    }

    value
}
