//! Target validation with a memoizing cache.
//!
//! A target is accepted when it parses as an IP address or a CIDR network
//! (host bits may be set, as scanners accept `10.0.0.7/24`). Anything else
//! must match a conservative hostname character set. Dash ranges such as
//! `192.168.1.1-254` fall under that set and are reported as
//! [`TargetKind::Range`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;

use cidr_utils::cidr::IpCidr;
use regex::Regex;
use tracing::debug;

/// Default number of cached results before the cache is cleared.
pub const DEFAULT_CACHE_LIMIT: usize = 1000;

static HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+$").expect("hostname pattern is valid"));

/// What a valid target string was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Address,
    Network,
    Range,
    Hostname,
}

/// Classify one target without touching any cache.
///
/// Returns `None` for invalid targets.
pub fn classify(target: &str) -> Option<TargetKind> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }

    if IpAddr::from_str(target).is_ok() {
        return Some(TargetKind::Address);
    }
    if is_network(target) {
        return Some(TargetKind::Network);
    }
    if HOSTNAME.is_match(target) {
        let is_range = target.contains('-')
            && target.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-');
        return Some(if is_range {
            TargetKind::Range
        } else {
            TargetKind::Hostname
        });
    }
    None
}

fn is_network(target: &str) -> bool {
    if IpCidr::from_str(target).is_ok() {
        return true;
    }

    // Non-strict form: address with host bits set plus a prefix length.
    let Some((addr, prefix)) = target.split_once('/') else {
        return false;
    };
    let Ok(addr) = IpAddr::from_str(addr) else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };
    match addr {
        IpAddr::V4(_) => prefix <= 32,
        IpAddr::V6(_) => prefix <= 128,
    }
}

/// Validates targets and memoizes the verdict per exact input string.
///
/// The cache is cleared wholesale once it reaches its limit, so memory stays
/// bounded for long sessions. Clearing never changes a verdict.
#[derive(Debug)]
pub struct TargetValidator {
    cache: HashMap<String, bool>,
    limit: usize,
    computations: u64,
}

impl TargetValidator {
    /// Create a validator with the default cache limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_CACHE_LIMIT)
    }

    /// Create a validator whose cache holds at most `limit` entries.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            cache: HashMap::new(),
            limit: limit.max(1),
            computations: 0,
        }
    }

    /// Check a single target, serving repeated strings from the cache.
    pub fn validate(&mut self, target: &str) -> bool {
        if let Some(&valid) = self.cache.get(target) {
            return valid;
        }

        if self.cache.len() >= self.limit {
            debug!(entries = self.cache.len(), "Clearing target validation cache");
            self.cache.clear();
        }

        self.computations += 1;
        let valid = classify(target).is_some();
        self.cache.insert(target.to_string(), valid);
        valid
    }

    /// Validate a comma-separated target list.
    ///
    /// Entries are trimmed and blanks skipped. Every invalid entry is
    /// returned, in input order, so they can be reported together.
    pub fn validate_all(&mut self, targets: &str) -> Vec<String> {
        split_targets(targets)
            .filter(|t| !self.validate(t))
            .map(str::to_string)
            .collect()
    }

    /// Number of times a target was actually parsed rather than served from cache.
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// Number of cached verdicts.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached verdict.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

impl Default for TargetValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a comma-separated target list into trimmed, non-empty entries.
pub fn split_targets(targets: &str) -> impl Iterator<Item = &str> {
    targets.split(',').map(str::trim).filter(|t| !t.is_empty())
}
