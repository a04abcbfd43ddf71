//! Symbolic resource resolution.
//!
//! [`ResourceResolver`] maps `:NS_<NAME>:` tokens to real paths so that stage
//! configuration can be written once and resolved on whichever host runs it.
//! A token may resolve to a string that itself starts with another token;
//! resolution follows the chain and fails on cycles instead of looping.

use std::collections::HashMap;
use std::path::PathBuf;

use modelrun_types::uri;

use crate::error::ErrorCategory;

/// Errors from token registration and resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// Token does not have the `:NS_<NAME>:` shape.
    #[error("malformed resource token '{0}': expected ':NS_<NAME>:'")]
    MalformedToken(String),

    /// Token is already bound to a path.
    #[error("resource token '{0}' is already registered")]
    DuplicateToken(String),

    /// Token has never been registered.
    #[error("unknown resource token '{0}'")]
    UnknownToken(String),

    /// Token resolves, directly or through a chain, back to itself.
    #[error("cyclic resource resolution: {}", .chain.join(" -> "))]
    CyclicResolution { chain: Vec<String> },
}

impl ResourceError {
    pub(crate) fn category(&self) -> ErrorCategory {
        ErrorCategory::ConfigurationState
    }
}

/// Table of symbolic tokens and the real paths they stand for.
#[derive(Debug, Clone, Default)]
pub struct ResourceResolver {
    table: HashMap<String, String>,
}

impl ResourceResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token` to `real_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::MalformedToken`] if the token shape is wrong and
    /// [`ResourceError::DuplicateToken`] if it is already bound.
    pub fn register(
        &mut self,
        token: &str,
        real_path: impl Into<String>,
    ) -> Result<(), ResourceError> {
        if !uri::is_well_formed(token) {
            return Err(ResourceError::MalformedToken(token.to_string()));
        }
        if self.table.contains_key(token) {
            return Err(ResourceError::DuplicateToken(token.to_string()));
        }
        let real_path = real_path.into();
        tracing::debug!(token, path = real_path, "Registered resource token");
        self.table.insert(token.to_string(), real_path);
        Ok(())
    }

    /// Remove a binding. Unknown tokens are ignored.
    pub fn unregister(&mut self, token: &str) {
        if self.table.remove(token).is_some() {
            tracing::debug!(token, "Unregistered resource token");
        }
    }

    /// Replace any existing binding of `token` with `real_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::MalformedToken`] if the token shape is wrong.
    pub fn rebind(
        &mut self,
        token: &str,
        real_path: impl Into<String>,
    ) -> Result<(), ResourceError> {
        self.unregister(token);
        self.register(token, real_path)
    }

    #[must_use]
    pub fn is_registered(&self, token: &str) -> bool {
        self.table.contains_key(token)
    }

    /// The path `token` is directly bound to, without following chains.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<&str> {
        self.table.get(token).map(String::as_str)
    }

    /// All bindings, sorted by token.
    #[must_use]
    pub fn bindings(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self
            .table
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Resolve a path-like string to a real path string.
    ///
    /// Strings that do not start with the symbolic prefix are returned
    /// unchanged. Otherwise the leading token is substituted, repeatedly,
    /// until the result no longer starts with a token.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::UnknownToken`] for an unbound token,
    /// [`ResourceError::MalformedToken`] for an unterminated token and
    /// [`ResourceError::CyclicResolution`] if a token is reached twice.
    pub fn resolve(&self, path: &str) -> Result<String, ResourceError> {
        let mut current = path.to_string();
        let mut chain: Vec<String> = Vec::new();

        while uri::is_symbolic(&current) {
            let (token, rest) = uri::split_leading(&current)
                .map(|(t, r)| (t.to_string(), r.to_string()))
                .ok_or_else(|| ResourceError::MalformedToken(current.clone()))?;

            if chain.contains(&token) {
                chain.push(token);
                return Err(ResourceError::CyclicResolution { chain });
            }

            let real = self
                .table
                .get(&token)
                .ok_or_else(|| ResourceError::UnknownToken(token.clone()))?;
            current = format!("{real}{rest}");
            chain.push(token);
        }

        Ok(current)
    }

    /// [`resolve`](Self::resolve) into a [`PathBuf`].
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, ResourceError> {
        self.resolve(path).map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_passes_through() {
        let resolver = ResourceResolver::new();
        assert_eq!(resolver.resolve("/data/file.nc").unwrap(), "/data/file.nc");
        assert_eq!(resolver.resolve("relative/x").unwrap(), "relative/x");
        assert_eq!(resolver.resolve("").unwrap(), "");
    }

    #[test]
    fn test_register_and_resolve_round_trip() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_DATA:", "/srv/data").unwrap();
        assert_eq!(resolver.resolve(":NS_DATA:/x").unwrap(), "/srv/data/x");
        assert_eq!(resolver.resolve(":NS_DATA:").unwrap(), "/srv/data");
    }

    #[test]
    fn test_chained_indirection() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_A:", ":NS_B:/x").unwrap();
        resolver.register(":NS_B:", "/real").unwrap();
        assert_eq!(resolver.resolve(":NS_A:/y").unwrap(), "/real/x/y");
    }

    #[test]
    fn test_only_leading_token_is_substituted() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_A:", "/a").unwrap();
        assert_eq!(
            resolver.resolve(":NS_A:/sub/:NS_A:").unwrap(),
            "/a/sub/:NS_A:"
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_A:", "/a").unwrap();
        let err = resolver.register(":NS_A:", "/b").unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateToken(ref t) if t == ":NS_A:"));
        assert_eq!(resolver.lookup(":NS_A:"), Some("/a"));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let mut resolver = ResourceResolver::new();
        for bad in ["NS_A:", ":NS_A", ":OTHER_A:", ":NS_:"] {
            let err = resolver.register(bad, "/x").unwrap_err();
            assert!(matches!(err, ResourceError::MalformedToken(_)), "{bad}");
        }
    }

    #[test]
    fn test_unknown_token_fails() {
        let resolver = ResourceResolver::new();
        let err = resolver.resolve(":NS_MISSING:/x").unwrap_err();
        assert!(matches!(err, ResourceError::UnknownToken(ref t) if t == ":NS_MISSING:"));
    }

    #[test]
    fn test_unterminated_token_is_malformed() {
        let resolver = ResourceResolver::new();
        let err = resolver.resolve(":NS_OPEN/x").unwrap_err();
        assert!(matches!(err, ResourceError::MalformedToken(_)));
    }

    #[test]
    fn test_self_cycle_detected() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_LOOP:", ":NS_LOOP:/again").unwrap();
        let err = resolver.resolve(":NS_LOOP:").unwrap_err();
        match err {
            ResourceError::CyclicResolution { chain } => {
                assert_eq!(chain, vec![":NS_LOOP:", ":NS_LOOP:"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_transitive_cycle_detected() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_A:", ":NS_B:/x").unwrap();
        resolver.register(":NS_B:", ":NS_C:").unwrap();
        resolver.register(":NS_C:", ":NS_A:/y").unwrap();
        let err = resolver.resolve(":NS_B:").unwrap_err();
        assert!(err.to_string().contains(":NS_B: -> :NS_C: -> :NS_A: -> :NS_B:"));
    }

    #[test]
    fn test_unregister_is_noop_when_absent() {
        let mut resolver = ResourceResolver::new();
        resolver.unregister(":NS_NOPE:");
        resolver.register(":NS_A:", "/a").unwrap();
        resolver.unregister(":NS_A:");
        assert!(!resolver.is_registered(":NS_A:"));
    }

    #[test]
    fn test_rebind_switches_path() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_OUT:", "/old").unwrap();
        resolver.rebind(":NS_OUT:", "/new").unwrap();
        assert_eq!(resolver.resolve(":NS_OUT:/f").unwrap(), "/new/f");
    }

    #[test]
    fn test_bindings_sorted() {
        let mut resolver = ResourceResolver::new();
        resolver.register(":NS_B:", "/b").unwrap();
        resolver.register(":NS_A:", "/a").unwrap();
        assert_eq!(resolver.bindings(), vec![(":NS_A:", "/a"), (":NS_B:", "/b")]);
    }
}
