// # RouterOS Device Adapter
//
// Read-only RouterOS REST adapter for the fleet reconciliation engine.
//
// ## Behavior
//
// - One logical listing per trait call, no mutation endpoints touched
// - HTTP timeout configured (30 seconds); a timeout surfaces as an
//   ordinary transport error scoped to the router
// - NO retry logic (owned by the engine)
// - NO caching between calls (listing freshness is the engine's concern)
// - NO background tasks
//
// Unparsable individual records are skipped with a warning; the
// synchronizers own per-record validation of the fields they consume.
//
// ## API Reference
//
// - RouterOS REST API: https://help.mikrotik.com/docs/display/ROS/REST+API
// - IP pools:        GET `/rest/ip/pool`
// - Pool occupancy:  GET `/rest/ip/pool/used?pool=<name>`
// - PPP profiles:    GET `/rest/ppp/profile`
// - PPP secrets:     GET `/rest/ppp/secret`
//
// The device lists pool occupancy as used entries only; the available
// bucket is derived here by expanding the pool's range expression and
// subtracting the used set.
//
// ## Security
//
// The API password never appears in logs; the Debug implementation
// redacts it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, warn};

use fleetsync_core::config::AdapterConfig;
use fleetsync_core::model::{
    AddressRange, DeviceAddressBook, DevicePool, DeviceProfile, DeviceUser, Router, parse_ranges,
};
use fleetsync_core::traits::{DeviceClient, DeviceClientFactory};
use fleetsync_core::{Error, Result};

/// Default HTTP timeout for REST requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on pool range expansion.
///
/// PPPoE pools are /24-ish in practice; anything beyond this is treated
/// as a malformed pool rather than enumerated.
const MAX_POOL_ADDRESSES: usize = 65_536;

/// RouterOS REST device client
///
/// One instance serves the whole fleet; the per-router connection
/// reference (`Router::connection`) carries the host, optionally a port
/// or a full URL, while credentials and TLS policy are fleet-wide
/// configuration.
pub struct RouterosClient {
    username: String,
    /// Never log this value
    password: String,
    tls: bool,
    port: Option<u16>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RouterosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterosClient")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("tls", &self.tls)
            .field("port", &self.port)
            .finish()
    }
}

impl RouterosClient {
    /// Create a new RouterOS client
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        tls: bool,
        port: Option<u16>,
    ) -> Result<Self> {
        let username = username.into();
        if username.is_empty() {
            return Err(Error::config("RouterOS username cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            username,
            password: password.into(),
            tls,
            port,
            client,
        })
    }

    /// REST base URL for one router.
    ///
    /// The connection reference is either a bare `host`/`host:port` or a
    /// full `http(s)://...` URL; bare forms get the fleet-wide scheme and
    /// port applied.
    fn base_url(&self, router: &Router) -> Result<String> {
        let conn = router.connection.trim().trim_end_matches('/');
        if conn.is_empty() {
            return Err(Error::config(format!(
                "router {} has an empty connection reference",
                router.id
            )));
        }
        if conn.contains("://") {
            return Ok(format!("{conn}/rest"));
        }
        let scheme = if self.tls { "https" } else { "http" };
        match (conn.contains(':'), self.port) {
            (true, _) => Ok(format!("{scheme}://{conn}/rest")),
            (false, Some(port)) => Ok(format!("{scheme}://{conn}:{port}/rest")),
            (false, None) => Ok(format!("{scheme}://{conn}/rest")),
        }
    }

    /// One GET returning the endpoint's JSON array
    async fn get_array(
        &self,
        router: &Router,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<Value>> {
        let url = format!("{}/{}", self.base_url(router)?, path);
        debug!(router = %router.id, %url, "device query");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::transport(router.id.as_str(), format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response".to_string());
            return Err(match status.as_u16() {
                401 | 403 => Error::transport(
                    router.id.as_str(),
                    format!("authentication failed ({status})"),
                ),
                404 => Error::transport(
                    router.id.as_str(),
                    format!("endpoint {path} not found; REST API requires RouterOS v7"),
                ),
                _ => Error::transport(
                    router.id.as_str(),
                    format!("device returned {status}: {body}"),
                ),
            });
        }

        let json: Value = response.json().await.map_err(|e| {
            Error::transport(router.id.as_str(), format!("unparsable response: {e}"))
        })?;
        match json {
            Value::Array(items) => Ok(items),
            other => Err(Error::validation(format!(
                "expected an array from {path}, got {other}"
            ))),
        }
    }

    /// Resolve a pool's device record by external id
    async fn find_pool(&self, router: &Router, external_id: &str) -> Result<Option<DevicePool>> {
        let pools = self.list_ip_pools(router).await?;
        Ok(pools.into_iter().find(|p| p.external_id == external_id))
    }
}

#[async_trait]
impl DeviceClient for RouterosClient {
    async fn list_ip_pools(&self, router: &Router) -> Result<Vec<DevicePool>> {
        let items = self.get_array(router, "ip/pool", &[]).await?;
        Ok(items
            .iter()
            .filter_map(|item| match parse_pool(item) {
                Ok(pool) => Some(pool),
                Err(reason) => {
                    warn!(router = %router.id, payload = %item, "skipping device pool: {reason}");
                    None
                }
            })
            .collect())
    }

    async fn list_pool_addresses(
        &self,
        router: &Router,
        pool_external_id: &str,
    ) -> Result<DeviceAddressBook> {
        let Some(pool) = self.find_pool(router, pool_external_id).await? else {
            // The pool vanished device-side; an empty book lets the
            // synchronizer block the stale rows.
            warn!(router = %router.id, pool = %pool_external_id, "pool no longer on device");
            return Ok(DeviceAddressBook::default());
        };

        let ranges = parse_ranges(&pool.ranges).map_err(Error::validation)?;
        let expanded = expand_ranges(&ranges)?;

        let items = self
            .get_array(router, "ip/pool/used", &[("pool", pool.name.as_str())])
            .await?;
        let used: Vec<IpAddr> = items
            .iter()
            .filter_map(|item| match parse_used_address(item) {
                Ok(addr) => Some(addr),
                Err(reason) => {
                    warn!(router = %router.id, payload = %item, "skipping used address: {reason}");
                    None
                }
            })
            .collect();

        let used_set: HashSet<IpAddr> = used.iter().copied().collect();
        let available = expanded
            .into_iter()
            .filter(|addr| !used_set.contains(addr))
            .collect();

        Ok(DeviceAddressBook { used, available })
    }

    async fn list_profiles(&self, router: &Router) -> Result<Vec<DeviceProfile>> {
        let items = self.get_array(router, "ppp/profile", &[]).await?;
        Ok(items
            .iter()
            .filter_map(|item| match parse_profile(item) {
                Ok(profile) => Some(profile),
                Err(reason) => {
                    warn!(router = %router.id, payload = %item, "skipping device profile: {reason}");
                    None
                }
            })
            .collect())
    }

    async fn list_users(&self, router: &Router) -> Result<Vec<DeviceUser>> {
        let items = self.get_array(router, "ppp/secret", &[]).await?;
        Ok(items
            .iter()
            .filter_map(|item| match parse_user(item) {
                Ok(user) => Some(user),
                Err(reason) => {
                    warn!(router = %router.id, payload = %item, "skipping device user: {reason}");
                    None
                }
            })
            .collect())
    }

    fn adapter_name(&self) -> &'static str {
        "routeros"
    }
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

fn required_str<'a>(item: &'a Value, key: &str) -> std::result::Result<&'a str, String> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing field {key:?}"))
}

fn parse_pool(item: &Value) -> std::result::Result<DevicePool, String> {
    Ok(DevicePool {
        external_id: required_str(item, ".id")?.to_string(),
        name: required_str(item, "name")?.to_string(),
        ranges: item
            .get("ranges")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Split a RouterOS rate-limit expression into the base rate and the
/// optional burst component ("10M/2M 20M/4M ..." → "10M/2M", "20M/4M").
fn split_rate_limit(expr: &str) -> (String, Option<String>) {
    let mut parts = expr.split_whitespace();
    let rate = parts.next().unwrap_or_default().to_string();
    let burst = parts.next().map(str::to_string);
    (rate, burst)
}

fn parse_profile(item: &Value) -> std::result::Result<DeviceProfile, String> {
    let (rate_limit, burst) = split_rate_limit(
        item.get("rate-limit")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );
    Ok(DeviceProfile {
        external_id: required_str(item, ".id")?.to_string(),
        name: required_str(item, "name")?.to_string(),
        rate_limit,
        burst,
    })
}

/// RouterOS encodes booleans as the strings "true"/"false"
fn flag(item: &Value, key: &str) -> bool {
    match item.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "yes",
        _ => false,
    }
}

fn parse_user(item: &Value) -> std::result::Result<DeviceUser, String> {
    let static_address = item
        .get("remote-address")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());
    Ok(DeviceUser {
        external_id: required_str(item, ".id")?.to_string(),
        username: required_str(item, "name")?.to_string(),
        profile: item
            .get("profile")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string(),
        disabled: flag(item, "disabled"),
        static_address,
    })
}

fn parse_used_address(item: &Value) -> std::result::Result<IpAddr, String> {
    required_str(item, "address")?
        .parse()
        .map_err(|_| "bad address".to_string())
}

/// Enumerate every address of the pool's ranges.
///
/// IPv4 only; PPPoE pools that cannot be enumerated (IPv6 spans, or more
/// than [`MAX_POOL_ADDRESSES`] entries) are malformed for this adapter's
/// purposes.
fn expand_ranges(ranges: &[AddressRange]) -> Result<Vec<IpAddr>> {
    let mut out = Vec::new();
    for range in ranges {
        match (range.first, range.last) {
            (IpAddr::V4(first), IpAddr::V4(last)) => {
                let (first, last) = (u32::from(first), u32::from(last));
                if first > last {
                    return Err(Error::validation(format!(
                        "inverted range {}-{}",
                        range.first, range.last
                    )));
                }
                let count = (last - first) as usize + 1;
                if out.len() + count > MAX_POOL_ADDRESSES {
                    return Err(Error::validation(format!(
                        "pool expands past {MAX_POOL_ADDRESSES} addresses"
                    )));
                }
                out.extend((first..=last).map(|n| IpAddr::V4(Ipv4Addr::from(n))));
            }
            (first, last) if first == last => out.push(first),
            (first, last) => {
                return Err(Error::validation(format!(
                    "cannot enumerate IPv6 range {first}-{last}"
                )));
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Factory / registration
// ---------------------------------------------------------------------------

/// Factory for [`RouterosClient`]
pub struct RouterosClientFactory;

impl DeviceClientFactory for RouterosClientFactory {
    fn create(&self, config: &AdapterConfig) -> Result<Box<dyn DeviceClient>> {
        match config {
            AdapterConfig::Routeros {
                username,
                password,
                tls,
                port,
            } => Ok(Box::new(RouterosClient::new(
                username, password, *tls, *port,
            )?)),
            AdapterConfig::Custom { factory, .. } => Err(Error::config(format!(
                "routeros factory cannot build adapter type {factory:?}"
            ))),
        }
    }
}

/// Register this adapter in a component registry
pub fn register(registry: &fleetsync_core::ComponentRegistry) {
    registry.register_adapter("routeros", Box::new(RouterosClientFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(tls: bool, port: Option<u16>) -> RouterosClient {
        RouterosClient::new("sync", "s3cret", tls, port).unwrap()
    }

    fn router_with(connection: &str) -> Router {
        Router {
            id: fleetsync_core::model::RouterId::from("r1"),
            name: "edge-1".to_string(),
            connection: connection.to_string(),
            active: true,
        }
    }

    #[test]
    fn base_url_applies_fleet_scheme_and_port() {
        let c = client(true, None);
        assert_eq!(
            c.base_url(&router_with("10.0.0.1")).unwrap(),
            "https://10.0.0.1/rest"
        );

        let c = client(false, Some(8080));
        assert_eq!(
            c.base_url(&router_with("edge.example.net")).unwrap(),
            "http://edge.example.net:8080/rest"
        );

        // An explicit port in the connection reference wins
        assert_eq!(
            c.base_url(&router_with("10.0.0.1:9999")).unwrap(),
            "http://10.0.0.1:9999/rest"
        );

        // A full URL is taken as-is
        assert_eq!(
            c.base_url(&router_with("https://edge.example.net/")).unwrap(),
            "https://edge.example.net/rest"
        );
    }

    #[test]
    fn pool_payload_parses() {
        let pool = parse_pool(&json!({
            ".id": "*1",
            "name": "pppoe-active",
            "ranges": "10.0.0.2-10.0.0.254"
        }))
        .unwrap();
        assert_eq!(pool.external_id, "*1");
        assert_eq!(pool.ranges, "10.0.0.2-10.0.0.254");

        assert!(parse_pool(&json!({"name": "no-id"})).is_err());
    }

    #[test]
    fn profile_rate_limit_splits_into_rate_and_burst() {
        let profile = parse_profile(&json!({
            ".id": "*2",
            "name": "10M",
            "rate-limit": "10M/2M 20M/4M 15M/3M 8/8"
        }))
        .unwrap();
        assert_eq!(profile.rate_limit, "10M/2M");
        assert_eq!(profile.burst.as_deref(), Some("20M/4M"));

        let bare = parse_profile(&json!({".id": "*3", "name": "flat"})).unwrap();
        assert_eq!(bare.rate_limit, "");
        assert!(bare.burst.is_none());
    }

    #[test]
    fn user_payload_parses_flags_and_static_address() {
        let user = parse_user(&json!({
            ".id": "*5",
            "name": "alice@isp",
            "profile": "10M",
            "disabled": "true",
            "remote-address": "10.0.0.40"
        }))
        .unwrap();
        assert!(user.disabled);
        assert_eq!(user.static_address, Some("10.0.0.40".parse().unwrap()));

        let minimal = parse_user(&json!({".id": "*6", "name": "bob"})).unwrap();
        assert!(!minimal.disabled);
        assert_eq!(minimal.profile, "default");
        assert!(minimal.static_address.is_none());
    }

    #[test]
    fn range_expansion_is_bounded() {
        let small = parse_ranges("10.0.0.1-10.0.0.3").unwrap();
        let addrs = expand_ranges(&small).unwrap();
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[0], "10.0.0.1".parse::<IpAddr>().unwrap());

        let huge = parse_ranges("10.0.0.0-10.255.255.255").unwrap();
        assert!(expand_ranges(&huge).is_err());

        let v6 = parse_ranges("::1-::ff").unwrap();
        assert!(expand_ranges(&v6).is_err());
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let c = client(true, None);
        let output = format!("{c:?}");
        assert!(output.contains("<REDACTED>"));
        assert!(!output.contains("s3cret"));
    }
}
