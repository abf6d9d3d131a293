//! Host and path routing for the gateway.
//!
//! The routing document maps hostnames to path prefixes:
//!
//! ```json
//! {
//!   "api.example.com": {
//!     "/admin": { "backend": "http://10.0.0.2:8080", "scopes": ["admin.write"] },
//!     "*":      { "backend": "http://10.0.0.2:8080", "scopes": [] }
//!   },
//!   "*.example.com": { "*": { "backend": "http://10.0.0.3:8080" } }
//! }
//! ```
//!
//! A table is immutable once built. Reloads build a new table and swap it in.

use arc_swap::ArcSwap;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Host or path entry matching anything not otherwise configured.
pub const WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("Failed to read routing document: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse routing document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid backend for {host}{prefix}: {reason}")]
    InvalidBackend {
        host: String,
        prefix: String,
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct BackendEntry {
    backend: String,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    comment: String,
}

type RoutingDocument = HashMap<String, HashMap<String, BackendEntry>>;

/// A backend reachable through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Matched path prefix, stripped before forwarding. `None` for the
    /// host's fallback entry.
    pub prefix: Option<String>,
    pub target: Url,
    /// Every scope must be granted. Empty means the route is public.
    pub scopes: Vec<String>,
}

impl Route {
    pub fn is_public(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Path to request from the backend.
    pub fn upstream_path<'a>(&self, path: &'a str) -> &'a str {
        match &self.prefix {
            Some(prefix) => path.strip_prefix(prefix.as_str()).unwrap_or(path),
            None => path,
        }
    }
}

#[derive(Debug, Default)]
struct HostRoutes {
    /// Longest prefix first.
    prefixed: Vec<Route>,
    fallback: Option<Route>,
}

impl HostRoutes {
    fn matching(&self, path: &str) -> Option<&Route> {
        self.prefixed
            .iter()
            .find(|route| {
                route
                    .prefix
                    .as_deref()
                    .is_some_and(|prefix| path.starts_with(prefix))
            })
            .or(self.fallback.as_ref())
    }
}

/// Immutable snapshot of the routing configuration.
#[derive(Debug, Default)]
pub struct SiteTable {
    hosts: HashMap<String, HostRoutes>,
}

impl SiteTable {
    pub fn from_json(document: &str) -> Result<Self, SiteError> {
        let document: RoutingDocument = serde_json::from_str(document)?;
        let mut hosts = HashMap::with_capacity(document.len());

        for (host, entries) in document {
            let mut routes = HostRoutes::default();
            for (prefix, entry) in entries {
                let target = parse_backend(&host, &prefix, &entry.backend)?;
                if prefix == WILDCARD {
                    routes.fallback = Some(Route {
                        prefix: None,
                        target,
                        scopes: entry.scopes,
                    });
                } else {
                    routes.prefixed.push(Route {
                        prefix: Some(prefix),
                        target,
                        scopes: entry.scopes,
                    });
                }
            }
            routes
                .prefixed
                .sort_by_key(|route| std::cmp::Reverse(route.prefix.as_ref().map_or(0, String::len)));
            hosts.insert(host.to_ascii_lowercase(), routes);
        }

        Ok(Self { hosts })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SiteError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Resolves a request. The exact hostname is tried first, then its
    /// one-level wildcard, then the global wildcard host.
    pub fn resolve(&self, host: &str, path: &str) -> Option<&Route> {
        let hostname = hostname_of(host);
        let wildcard = wildcard_of(&hostname);

        let route = [hostname.as_str(), wildcard.as_str(), WILDCARD]
            .into_iter()
            .filter_map(|candidate| self.hosts.get(candidate))
            .find_map(|routes| routes.matching(path));

        match route {
            Some(route) => debug!("Matched {}{} to {}", hostname, path, route.target),
            None => debug!("No site configured for {}{}", hostname, path),
        }
        route
    }
}

fn parse_backend(host: &str, prefix: &str, backend: &str) -> Result<Url, SiteError> {
    let invalid = |reason: String| SiteError::InvalidBackend {
        host: host.to_string(),
        prefix: prefix.to_string(),
        reason,
    };
    let url = Url::parse(backend).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme {scheme}"))),
    }
}

/// Lowercased hostname without port and without a leading `www.` label.
pub fn hostname_of(host: &str) -> String {
    let hostname = host.split(':').next().unwrap_or_default();
    let hostname = match hostname.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest,
        _ => hostname,
    };
    hostname.to_ascii_lowercase()
}

/// One-level wildcard of a hostname: `a.b.c` becomes `*.b.c`, while a name
/// with fewer than three labels is prefixed, `b.c` becoming `*.b.c`.
pub fn wildcard_of(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 3 {
        return format!("*.{hostname}");
    }
    format!("*.{}", labels[1..].join("."))
}

/// Routing table shared by request handlers and replaced on reload.
pub struct SiteRouter {
    table: ArcSwap<SiteTable>,
}

impl SiteRouter {
    pub fn new(table: SiteTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// Current snapshot. Holding it keeps that version alive across a reload.
    pub fn snapshot(&self) -> Arc<SiteTable> {
        self.table.load_full()
    }

    pub fn resolve(&self, host: &str, path: &str) -> Option<Route> {
        self.table.load().resolve(host, path).cloned()
    }

    pub fn replace(&self, table: SiteTable) {
        info!("Installing routing table with {} hosts", table.host_count());
        self.table.store(Arc::new(table));
    }

    /// Reads the document and swaps it in. The current table stays in place
    /// when the document is invalid.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<(), SiteError> {
        let table = SiteTable::from_file(path)?;
        self.replace(table);
        Ok(())
    }
}

impl Default for SiteRouter {
    fn default() -> Self {
        Self::new(SiteTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "api.example.com": {
            "/x": { "backend": "http://exact:8080", "scopes": ["admin.write"] },
            "/x/long": { "backend": "http://exact-long:8080", "scopes": [] },
            "*": { "backend": "http://exact-default:8080" }
        },
        "*.example.com": {
            "/x": { "backend": "http://wildcard:8080", "scopes": ["picture"] }
        },
        "*": {
            "*": { "backend": "http://global:8080", "comment": "catch all" }
        }
    }"#;

    fn table() -> SiteTable {
        SiteTable::from_json(DOCUMENT).unwrap()
    }

    fn target(route: Option<&Route>) -> String {
        route.map(|r| r.target.host_str().unwrap_or_default().to_string()).unwrap_or_default()
    }

    #[test]
    fn test_hostname_of() {
        assert_eq!(hostname_of("www.example.com:8443"), "example.com");
        assert_eq!(hostname_of("API.example.com"), "api.example.com");
        assert_eq!(hostname_of("www."), "www.");
        assert_eq!(hostname_of("localhost:3000"), "localhost");
    }

    #[test]
    fn test_wildcard_of() {
        assert_eq!(wildcard_of("foo.example.com"), "*.example.com");
        assert_eq!(wildcard_of("a.b.example.com"), "*.b.example.com");
        assert_eq!(wildcard_of("example.com"), "*.example.com");
    }

    #[test]
    fn test_exact_host_wins_over_wildcard() {
        let table = table();
        let route = table.resolve("api.example.com", "/x/1");
        assert_eq!(target(route), "exact");
        assert_eq!(route.unwrap().scopes, vec!["admin.write"]);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = table();
        let route = table.resolve("api.example.com", "/x/long/path").unwrap();
        assert_eq!(target(Some(route)), "exact-long");
        assert!(route.is_public());
        assert_eq!(route.upstream_path("/x/long/path"), "/path");
    }

    #[test]
    fn test_host_fallback_entry() {
        let table = table();
        let route = table.resolve("www.api.example.com:443", "/other").unwrap();
        assert_eq!(target(Some(route)), "exact-default");
        assert_eq!(route.prefix, None);
        assert_eq!(route.upstream_path("/other"), "/other");
    }

    #[test]
    fn test_wildcard_host() {
        let table = table();
        assert_eq!(target(table.resolve("foo.example.com", "/x")), "wildcard");
        // No path matches on the wildcard host, so the global site applies.
        assert_eq!(target(table.resolve("foo.example.com", "/y")), "global");
    }

    #[test]
    fn test_global_wildcard_host() {
        let table = table();
        assert_eq!(target(table.resolve("unknown.org", "/x")), "global");
    }

    #[test]
    fn test_not_found() {
        let table = SiteTable::from_json(
            r#"{ "api.example.com": { "/x": { "backend": "http://exact:8080" } } }"#,
        )
        .unwrap();
        assert!(table.resolve("api.example.com", "/y").is_none());
        assert!(table.resolve("unknown.org", "/x").is_none());
    }

    #[test]
    fn test_rejects_non_http_backend() {
        let result = SiteTable::from_json(r#"{ "a.com": { "*": { "backend": "file:///srv" } } }"#);
        assert!(matches!(result, Err(SiteError::InvalidBackend { .. })));
    }

    #[test]
    fn test_router_swaps_tables() {
        let router = SiteRouter::new(table());
        let before = router.snapshot();

        router.replace(SiteTable::default());
        assert!(router.resolve("unknown.org", "/x").is_none());
        // Readers holding the old snapshot are unaffected.
        assert_eq!(target(before.resolve("unknown.org", "/x")), "global");
    }
}
