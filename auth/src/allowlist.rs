//! Allowed-URL Policy.
//!
//! An allow-list entry is a URL prefix. A candidate URL matches iff scheme,
//! host, **port**, and path prefix all match exactly — no suffix or glob
//! magic.

use url::Url;

/// A read-only allow-list of URL prefixes.
#[derive(Debug, Clone, Default)]
pub struct UrlAllowList {
    entries: Vec<Url>,
}

impl UrlAllowList {
    /// Build an allow-list from configured prefix URLs.
    #[must_use]
    pub fn new(entries: Vec<Url>) -> Self {
        Self { entries }
    }

    /// `true` if `candidate` matches some configured prefix on scheme, host,
    /// port, and path prefix.
    #[must_use]
    pub fn allows(&self, candidate: &Url) -> bool {
        self.entries.iter().any(|entry| Self::matches(entry, candidate))
    }

    fn matches(entry: &Url, candidate: &Url) -> bool {
        entry.scheme() == candidate.scheme()
            && entry.host_str() == candidate.host_str()
            && entry.port_or_known_default() == candidate.port_or_known_default()
            && candidate.path().starts_with(entry.path())
    }

    /// Validate a raw URL string against the allow-list.
    ///
    /// # Errors
    /// Returns [`crate::error::AuthError::AllowlistViolation`] if the URL is
    /// unparsable or does not match any configured prefix.
    pub fn validate(&self, candidate: &str) -> crate::error::Result<Url> {
        let url = Url::parse(candidate)
            .map_err(|_| crate::error::AuthError::AllowlistViolation(candidate.to_string()))?;
        if self.allows(&url) {
            Ok(url)
        } else {
            Err(crate::error::AuthError::AllowlistViolation(candidate.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> UrlAllowList {
        UrlAllowList::new(vec![Url::parse("https://app.example.com:8443/auth").unwrap()])
    }

    #[test]
    fn exact_prefix_matches() {
        assert!(list()
            .validate("https://app.example.com:8443/auth/callback")
            .is_ok());
    }

    #[test]
    fn different_port_rejected() {
        assert!(list().validate("https://app.example.com/auth/callback").is_err());
    }

    #[test]
    fn different_host_rejected() {
        assert!(list()
            .validate("https://evil.example.com:8443/auth/callback")
            .is_err());
    }

    #[test]
    fn path_outside_prefix_rejected() {
        assert!(list()
            .validate("https://app.example.com:8443/other")
            .is_err());
    }

    #[test]
    fn different_scheme_rejected() {
        assert!(list()
            .validate("http://app.example.com:8443/auth/callback")
            .is_err());
    }
}
