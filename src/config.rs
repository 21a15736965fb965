//! Run configuration.
//!
//! Built once at startup (see `main.rs`) and treated as immutable for the
//! rest of the run.

use std::fmt;
use std::time::Duration;

use crate::error::HarnessError;

/// Default per-case timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub host: String,
    pub port: u16,
    /// Use TLS with ALPN `h2` instead of prior-knowledge cleartext.
    pub secure: bool,
    /// Budget for one case: handshake reads and the classification loop
    /// each get this much.
    pub timeout: Duration,
    pub filter: SectionFilter,
}

impl RunConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
            timeout: DEFAULT_TIMEOUT,
            filter: SectionFilter::all(),
        }
    }

    /// Reject configurations no case could run under.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.host.trim().is_empty() {
            return Err(HarnessError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(HarnessError::Config("port must not be 0".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(HarnessError::Config("timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Value for the `:authority` pseudo-header.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the `:scheme` pseudo-header.
    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }
}

/// Which sections and cases to run.
///
/// Identifiers are dotted section numbers (`8.1.2.1`), optionally followed by
/// `#n` to pick the n-th case of that section (`8.1.2#1`). An empty filter
/// selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionFilter {
    targets: Vec<String>,
}

impl SectionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a comma separated list of identifiers.
    pub fn parse(list: &str) -> Result<Self, HarnessError> {
        let mut targets = Vec::new();
        for raw in list.split(',') {
            let id = raw.trim().trim_end_matches('.');
            if id.is_empty() {
                continue;
            }
            validate_id(id)?;
            targets.push(id.to_string());
        }
        Ok(Self { targets })
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Whether the node `id` (section or case) is selected: it equals a
    /// target or lies below one.
    pub fn selects(&self, id: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| is_within(id, t))
    }

    /// Whether traversal should descend into section `id`: either it is
    /// selected, or some target lies below it.
    pub fn enters(&self, id: &str) -> bool {
        self.targets.is_empty()
            || self
                .targets
                .iter()
                .any(|t| is_within(id, t) || is_within(t, id))
    }
}

impl fmt::Display for SectionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.targets.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&self.targets.join(","))
        }
    }
}

/// `id` equals `ancestor` or is a descendant of it.
fn is_within(id: &str, ancestor: &str) -> bool {
    match id.strip_prefix(ancestor) {
        Some("") => true,
        Some(rest) => rest.starts_with('.') || rest.starts_with('#'),
        None => false,
    }
}

fn validate_id(id: &str) -> Result<(), HarnessError> {
    let (section, case) = match id.split_once('#') {
        Some((section, case)) => (section, Some(case)),
        None => (id, None),
    };

    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !section.split('.').all(numeric) {
        return Err(HarnessError::Config(format!("invalid section id {id:?}")));
    }
    if let Some(case) = case
        && !numeric(case)
    {
        return Err(HarnessError::Config(format!("invalid case index in {id:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_selects_everything() {
        let filter = SectionFilter::all();
        assert!(filter.selects("4.2"));
        assert!(filter.selects("8.1.2#1"));
        assert!(filter.enters("8.1"));
    }

    #[test]
    fn prefix_matches_on_component_boundaries() {
        let filter = SectionFilter::parse("8.1").unwrap();
        assert!(filter.selects("8.1"));
        assert!(filter.selects("8.1.2.1"));
        assert!(filter.selects("8.1#1"));
        assert!(!filter.selects("8.10"));
        assert!(!filter.selects("4.2"));
    }

    #[test]
    fn ancestors_of_a_target_are_entered_but_not_selected() {
        let filter = SectionFilter::parse("8.1.2.1").unwrap();
        assert!(filter.enters("8.1"));
        assert!(filter.enters("8.1.2"));
        assert!(!filter.selects("8.1.2#1"));
        assert!(filter.selects("8.1.2.1#2"));
        assert!(!filter.enters("4.3"));
    }

    #[test]
    fn single_case_target() {
        let filter = SectionFilter::parse("8.1.2#1").unwrap();
        assert!(filter.selects("8.1.2#1"));
        assert!(!filter.selects("8.1.2.1#1"));
        assert!(filter.enters("8.1"));
    }

    #[test]
    fn parse_accepts_lists_and_trailing_dots() {
        let filter = SectionFilter::parse("4.2., 4.3").unwrap();
        assert_eq!(filter.to_string(), "4.2,4.3");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SectionFilter::parse("4.x").is_err());
        assert!(SectionFilter::parse("4..2").is_err());
        assert!(SectionFilter::parse("4.2#a").is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout_and_port() {
        let mut config = RunConfig::new("localhost", 8080);
        assert!(config.validate().is_ok());

        config.timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));

        config.timeout = DEFAULT_TIMEOUT;
        config.port = 0;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn authority_brackets_ipv6_hosts() {
        assert_eq!(RunConfig::new("::1", 443).authority(), "[::1]:443");
        assert_eq!(RunConfig::new("example.com", 80).authority(), "example.com:80");
    }
}
