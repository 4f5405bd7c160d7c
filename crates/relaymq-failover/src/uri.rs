//! Broker endpoint URIs, composite failover URI parsing, and the candidate
//! pool the reconnect task draws from.
//!
//! A failover connection string has the form
//! `failover:(tcp://a:61616,tcp://b:61616)?randomize=false&timeout=3000`:
//! component URIs inside the parentheses, shared transport parameters after
//! them. Component URIs may carry their own sub-parameters.

use std::collections::BTreeMap;
use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// One candidate broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerUri {
    scheme: String,
    host: String,
    port: Option<u16>,
    params: BTreeMap<String, String>,
}

impl BrokerUri {
    /// Builds a URI from parts, without sub-parameters.
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port: Some(port),
            params: BTreeMap::new(),
        }
    }

    /// Parses a single endpoint URI such as `tcp://broker1:61616?soTimeout=500`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| TransportError::InvalidUri {
            uri: input.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("missing scheme"));
        }

        let (authority, query) = match rest.split_once('?') {
            Some((a, q)) => (a, Some(q)),
            None => (rest, None),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| invalid("invalid port"))?;
                (h, Some(port))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let mut params = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                params.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            params,
        })
    }

    /// The URI scheme (e.g. `tcp`, `ssl`).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The broker host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The broker port, when one was given.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Endpoint sub-parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Looks up a sub-parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl fmt::Display for BrokerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        let mut sep = '?';
        for (key, value) in &self.params {
            write!(f, "{sep}{key}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}

/// A parsed composite failover URI: component endpoints plus the shared
/// transport parameter map.
#[derive(Debug, Clone)]
pub struct CompositeUri {
    /// Candidate endpoints in declaration order.
    pub components: Vec<BrokerUri>,
    /// Shared parameters following the component list.
    pub params: BTreeMap<String, String>,
}

impl CompositeUri {
    /// Parses `failover:(uri1,uri2,...)?param=value` (the `failover://(...)`
    /// spelling is accepted too). A bare `failover:uri1,uri2` form without
    /// parentheses is allowed when no component carries sub-parameters.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| TransportError::InvalidUri {
            uri: input.to_string(),
            reason: reason.to_string(),
        };

        let rest = input
            .strip_prefix("failover:")
            .ok_or_else(|| invalid("expected failover: scheme"))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);

        let (list, query) = if let Some(inner) = rest.strip_prefix('(') {
            let close = inner.rfind(')').ok_or_else(|| invalid("unterminated component list"))?;
            let list = &inner[..close];
            let tail = &inner[close + 1..];
            let query = match tail.strip_prefix('?') {
                Some(q) => Some(q),
                None if tail.is_empty() => None,
                None => return Err(invalid("unexpected text after component list")),
            };
            (list, query)
        } else {
            match rest.split_once('?') {
                Some((list, query)) => (list, Some(query)),
                None => (rest, None),
            }
        };

        let components = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(BrokerUri::parse)
            .collect::<Result<Vec<_>>>()?;
        if components.is_empty() {
            return Err(invalid("no component uris"));
        }

        let mut params = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                params.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self { components, params })
    }
}

#[derive(Debug, Clone)]
struct PoolEntry {
    uri: BrokerUri,
    priority: bool,
}

/// Ordered set of candidate broker URIs with a priority subset.
///
/// Priority URIs are always attempted before ordinary candidates and are
/// never shuffled; randomization, when enabled, applies only to the
/// non-priority remainder of each attempt cycle.
#[derive(Debug, Default)]
pub struct UriPool {
    entries: Vec<PoolEntry>,
}

impl UriPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an ordinary candidate. Returns false when already present
    /// (priority membership is kept as-is in that case).
    pub fn add(&mut self, uri: BrokerUri) -> bool {
        if self.contains(&uri) {
            return false;
        }
        self.entries.push(PoolEntry { uri, priority: false });
        true
    }

    /// Adds a candidate that is always preferred over ordinary backups, or
    /// promotes an existing entry to priority.
    pub fn add_priority(&mut self, uri: BrokerUri) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.uri == uri) {
            let promoted = !entry.priority;
            entry.priority = true;
            return promoted;
        }
        self.entries.push(PoolEntry { uri, priority: true });
        true
    }

    /// Removes a candidate. Returns true when it was present.
    pub fn remove(&mut self, uri: &BrokerUri) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.uri != uri);
        self.entries.len() != before
    }

    /// True when the URI is in the pool.
    pub fn contains(&self, uri: &BrokerUri) -> bool {
        self.entries.iter().any(|e| &e.uri == uri)
    }

    /// True when the URI is flagged priority.
    pub fn is_priority(&self, uri: &BrokerUri) -> bool {
        self.entries.iter().any(|e| &e.uri == uri && e.priority)
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the pool has no candidates.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the attempt order for one reconnect cycle: priority URIs first
    /// in declaration order, then the remainder, shuffled when `randomize`.
    pub fn candidates(&self, randomize: bool) -> Vec<BrokerUri> {
        let mut priority: Vec<BrokerUri> = self
            .entries
            .iter()
            .filter(|e| e.priority)
            .map(|e| e.uri.clone())
            .collect();
        let mut rest: Vec<BrokerUri> = self
            .entries
            .iter()
            .filter(|e| !e.priority)
            .map(|e| e.uri.clone())
            .collect();
        if randomize {
            rest.shuffle(&mut rand::thread_rng());
        }
        priority.append(&mut rest);
        priority
    }

    /// All candidates in declaration order.
    pub fn uris(&self) -> Vec<BrokerUri> {
        self.entries.iter().map(|e| e.uri.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_uri() {
        let uri = BrokerUri::parse("tcp://broker1:61616").unwrap();
        assert_eq!(uri.scheme(), "tcp");
        assert_eq!(uri.host(), "broker1");
        assert_eq!(uri.port(), Some(61616));
        assert!(uri.params().is_empty());
    }

    #[test]
    fn test_parse_uri_with_params() {
        let uri = BrokerUri::parse("ssl://broker2:61617?soTimeout=500&keepAlive=true").unwrap();
        assert_eq!(uri.scheme(), "ssl");
        assert_eq!(uri.param("soTimeout"), Some("500"));
        assert_eq!(uri.param("keepAlive"), Some("true"));
        assert_eq!(uri.param("missing"), None);
    }

    #[test]
    fn test_parse_uri_without_port() {
        let uri = BrokerUri::parse("tcp://broker3").unwrap();
        assert_eq!(uri.port(), None);
        assert_eq!(uri.to_string(), "tcp://broker3");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(BrokerUri::parse("broker1:61616").is_err());
        assert!(BrokerUri::parse("tcp://:61616").is_err());
        assert!(BrokerUri::parse("tcp://host:notaport").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let input = "tcp://broker1:61616?keepAlive=true&soTimeout=500";
        let uri = BrokerUri::parse(input).unwrap();
        assert_eq!(uri.to_string(), input);
    }

    #[test]
    fn test_parse_composite() {
        let composite =
            CompositeUri::parse("failover:(tcp://a:61616,tcp://b:61616)?randomize=false&timeout=3000")
                .unwrap();
        assert_eq!(composite.components.len(), 2);
        assert_eq!(composite.components[0].host(), "a");
        assert_eq!(composite.components[1].host(), "b");
        assert_eq!(composite.params.get("randomize").map(String::as_str), Some("false"));
        assert_eq!(composite.params.get("timeout").map(String::as_str), Some("3000"));
    }

    #[test]
    fn test_parse_composite_double_slash_form() {
        let composite = CompositeUri::parse("failover://(tcp://a:61616)?backup=true").unwrap();
        assert_eq!(composite.components.len(), 1);
        assert_eq!(composite.params.get("backup").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_parse_composite_without_parens() {
        let composite = CompositeUri::parse("failover:tcp://a:61616,tcp://b:61616").unwrap();
        assert_eq!(composite.components.len(), 2);
        assert!(composite.params.is_empty());
    }

    #[test]
    fn test_parse_composite_component_params_survive() {
        let composite =
            CompositeUri::parse("failover:(tcp://a:61616?soTimeout=100)?randomize=true").unwrap();
        assert_eq!(composite.components[0].param("soTimeout"), Some("100"));
    }

    #[test]
    fn test_parse_composite_rejects_empty_list() {
        assert!(CompositeUri::parse("failover:()?randomize=true").is_err());
        assert!(CompositeUri::parse("mock://a:1").is_err());
    }

    #[test]
    fn test_pool_add_remove_contains() {
        let mut pool = UriPool::new();
        let a = BrokerUri::new("tcp", "a", 1);
        let b = BrokerUri::new("tcp", "b", 2);

        assert!(pool.add(a.clone()));
        assert!(!pool.add(a.clone()));
        assert!(pool.add(b.clone()));
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&a));

        assert!(pool.remove(&a));
        assert!(!pool.remove(&a));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_priority_always_first() {
        let mut pool = UriPool::new();
        let a = BrokerUri::new("tcp", "a", 1);
        let b = BrokerUri::new("tcp", "b", 2);
        let p = BrokerUri::new("tcp", "p", 3);
        pool.add(a);
        pool.add(b);
        pool.add_priority(p.clone());

        for _ in 0..20 {
            let order = pool.candidates(true);
            assert_eq!(order[0], p);
        }
    }

    #[test]
    fn test_randomize_varies_order() {
        let mut pool = UriPool::new();
        for i in 0..6 {
            pool.add(BrokerUri::new("tcp", &format!("h{i}"), 1000 + i));
        }

        let baseline = pool.candidates(false);
        let mut saw_different = false;
        for _ in 0..50 {
            if pool.candidates(true) != baseline {
                saw_different = true;
                break;
            }
        }
        assert!(saw_different, "50 shuffles of 6 candidates never changed order");
    }

    #[test]
    fn test_no_randomize_preserves_order() {
        let mut pool = UriPool::new();
        let a = BrokerUri::new("tcp", "a", 1);
        let b = BrokerUri::new("tcp", "b", 2);
        pool.add(a.clone());
        pool.add(b.clone());
        assert_eq!(pool.candidates(false), vec![a, b]);
    }

    #[test]
    fn test_promote_existing_to_priority() {
        let mut pool = UriPool::new();
        let a = BrokerUri::new("tcp", "a", 1);
        pool.add(a.clone());
        assert!(!pool.is_priority(&a));
        assert!(pool.add_priority(a.clone()));
        assert!(pool.is_priority(&a));
        assert_eq!(pool.len(), 1);
    }
}
