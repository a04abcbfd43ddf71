//! Symbolic URI syntax.
//!
//! A symbolic URI is a token of the form `:NS_<NAME>:` standing in for a real
//! filesystem path. Tokens only have meaning at the start of a path-like
//! string; anything else is an ordinary path.

/// Fixed prefix every token starts with.
pub const URI_PREFIX: &str = ":NS_";

/// Fixed terminator every token ends with.
pub const URI_SUFFIX: char = ':';

/// Root of the run's private directory tree.
pub const HOME_PATH: &str = ":NS_HOME_PATH:";
/// Scratch directory for temporary files.
pub const TEMP_PATH: &str = ":NS_TEMP_PATH:";
/// Root of all stage workspaces.
pub const WORKSPACE_ROOT: &str = ":NS_WORKSPACE_ROOT:";
/// Directory under which model stages get their work directories.
pub const WORKSPACE_MODEL: &str = ":NS_WORKSPACE_MODEL:";
/// Scratch area used by the recorder and the replay engine.
pub const WORKSPACE_REPLAY: &str = ":NS_WORKSPACE_REPLAY:";
/// User output directory, known once a pipeline config is loaded.
pub const OUTPUT_PATH: &str = ":NS_OUTPUT_PATH:";

/// Build a token from a bare name, e.g. `token("WPS_ROOT")` is `":NS_WPS_ROOT:"`.
#[must_use]
pub fn token(name: &str) -> String {
    format!("{URI_PREFIX}{name}{URI_SUFFIX}")
}

/// Returns `true` if `path` starts with the symbolic prefix.
#[must_use]
pub fn is_symbolic(path: &str) -> bool {
    path.starts_with(URI_PREFIX)
}

/// Returns `true` if `token` has the exact `:NS_<NAME>:` shape with a
/// non-empty name that contains no further colon.
#[must_use]
pub fn is_well_formed(token: &str) -> bool {
    let Some(rest) = token.strip_prefix(URI_PREFIX) else {
        return false;
    };
    let Some(name) = rest.strip_suffix(URI_SUFFIX) else {
        return false;
    };
    !name.is_empty() && !name.contains(URI_SUFFIX)
}

/// Split a symbolic path into its leading token and the remainder.
///
/// Returns `None` if the path does not start with the prefix or the token is
/// never terminated.
#[must_use]
pub fn split_leading(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(URI_PREFIX)?;
    let end = rest.find(URI_SUFFIX)?;
    let split_at = URI_PREFIX.len() + end + 1;
    Some((&path[..split_at], &path[split_at..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_builds_prefixed_name() {
        assert_eq!(token("WPS_ROOT"), ":NS_WPS_ROOT:");
        assert!(is_well_formed(&token("WPS_ROOT")));
    }

    #[test]
    fn well_formed_rejects_bad_shapes() {
        assert!(!is_well_formed("NS_A:"));
        assert!(!is_well_formed(":NS_A"));
        assert!(!is_well_formed(":NS_:"));
        assert!(!is_well_formed(":NS_A:B:"));
        assert!(!is_well_formed(":WRF_A:"));
    }

    #[test]
    fn split_leading_separates_remainder() {
        assert_eq!(split_leading(":NS_A:/x/y"), Some((":NS_A:", "/x/y")));
        assert_eq!(split_leading(":NS_A:"), Some((":NS_A:", "")));
        assert_eq!(split_leading("/plain/path"), None);
        assert_eq!(split_leading(":NS_unterminated/x"), None);
    }

    #[test]
    fn is_symbolic_only_checks_prefix() {
        assert!(is_symbolic(":NS_A:/x"));
        assert!(!is_symbolic("/a/:NS_A:/x"));
    }
}
