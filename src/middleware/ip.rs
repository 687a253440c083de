//! Client IP resolution shared by the rate limiter and the authentication
//! extractor.
//!
//! # Resolution Order
//!
//! The socket peer (`ConnectInfo<SocketAddr>`, available when the server is
//! started with `into_make_service_with_connect_info`) is the client unless
//! it falls inside one of the configured [`TrustedProxies`] ranges. For a
//! trusted peer:
//!
//! 1. `X-Forwarded-For`, walked right to left: the first hop that is not
//!    itself a trusted proxy
//! 2. The leftmost `X-Forwarded-For` entry when every hop is trusted
//! 3. `X-Real-IP`
//! 4. The peer address
//!
//! Without a peer address the result is [`UNKNOWN_IP`]. Forwarded entries
//! that do not parse as IP addresses are ignored.
//!
//! # Security
//!
//! The proxy headers are client controlled. With no trusted ranges (the
//! default) they are never read, so a client cannot rotate spoofed
//! addresses to dodge per-IP throttles or frame another IP.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use tracing::{debug, warn};

/// Fallback when no client IP can be determined.
///
/// All such requests share one throttle bucket.
pub const UNKNOWN_IP: &str = "unknown";

/// Parsed CIDR network range, e.g. `10.0.0.0/8` or `::1/128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation. A bare address is a single-host range.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(prefix) => prefix.parse::<u8>().ok()?,
            None => max_prefix,
        };

        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Whether `ip` lies inside this range. IPv4 never matches IPv6.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Proxies whose forwarding headers are believed.
///
/// Empty means no proxy is trusted and only the socket peer counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies {
    ranges: Vec<CidrRange>,
}

impl TrustedProxies {
    /// Build from CIDR strings (`TRUSTED_PROXIES`).
    ///
    /// Invalid entries are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Where the client IP was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp {
    FromXff(IpAddr),
    FromRealIp(IpAddr),
    FromPeer(IpAddr),
    NotFound,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

/// Client hop of a forwarded chain: the rightmost untrusted entry, or the
/// leftmost one when the whole chain is trusted.
fn forwarded_client(headers: &HeaderMap, trusted: &TrustedProxies) -> Option<IpAddr> {
    let hops: Vec<IpAddr> = header_value(headers, "x-forwarded-for")?
        .split(',')
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();

    hops.iter()
        .rev()
        .find(|hop| !trusted.is_trusted(hop))
        .or_else(|| hops.first())
        .copied()
}

#[inline]
fn extract_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted: &TrustedProxies,
) -> ExtractedIp {
    let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() else {
        return ExtractedIp::NotFound;
    };
    let peer = addr.ip();

    if !trusted.is_trusted(&peer) {
        return ExtractedIp::FromPeer(peer);
    }

    if let Some(ip) = forwarded_client(headers, trusted) {
        return ExtractedIp::FromXff(ip);
    }

    if let Some(ip) = header_value(headers, "x-real-ip").and_then(|value| value.parse().ok()) {
        return ExtractedIp::FromRealIp(ip);
    }

    ExtractedIp::FromPeer(peer)
}

/// Resolve the client IP of a request from its headers and extensions.
///
/// Returns a borrowed [`UNKNOWN_IP`] when nothing identifies the client.
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted: &TrustedProxies,
) -> Cow<'static, str> {
    match extract_ip(headers, extensions, trusted) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) | ExtractedIp::FromPeer(ip) => {
            Cow::Owned(ip.to_string())
        }
        ExtractedIp::NotFound => Cow::Borrowed(UNKNOWN_IP),
    }
}

/// Whether `ip` is a loopback address (`127.0.0.0/8` or `::1`).
pub fn is_loopback(ip: &str) -> bool {
    ip.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn with_peer(addr: &str) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        extensions
    }

    fn trusting(cidrs: &[&str]) -> TrustedProxies {
        let cidrs: Vec<String> = cidrs.iter().map(|c| c.to_string()).collect();
        TrustedProxies::new(&cidrs)
    }

    #[test]
    fn test_cidr_parse() {
        assert!(CidrRange::parse("10.0.0.0/8").is_some());
        assert!(CidrRange::parse(" 192.168.1.1 ").is_some());
        assert!(CidrRange::parse("::1/128").is_some());
        assert!(CidrRange::parse("0.0.0.0/0").is_some());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("::/129").is_none());
        assert!(CidrRange::parse("10.0.0.0/abc").is_none());
        assert!(CidrRange::parse("not-an-ip").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let range = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(range.contains(&"10.255.0.1".parse().unwrap()));
        assert!(!range.contains(&"11.0.0.1".parse().unwrap()));
        assert!(!range.contains(&"::1".parse().unwrap()));

        let everything = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(everything.contains(&"203.0.113.7".parse().unwrap()));

        let v6 = CidrRange::parse("fd00::/8").unwrap();
        assert!(v6.contains(&"fd12::1".parse().unwrap()));
        assert!(!v6.contains(&"fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_ranges_are_skipped() {
        let trusted = trusting(&["bogus", "127.0.0.1/32"]);
        assert!(trusted.is_enabled());
        assert!(trusted.is_trusted(&"127.0.0.1".parse().unwrap()));
        assert!(!TrustedProxies::default().is_enabled());
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarded_headers() {
        let h = headers(&[("x-forwarded-for", "10.0.0.1"), ("x-real-ip", "192.168.1.1")]);
        let ip = client_ip(&h, &with_peer("127.0.0.1:4000"), &TrustedProxies::default());
        assert_eq!(ip, "127.0.0.1");

        let trusted = trusting(&["10.0.0.0/8"]);
        assert_eq!(client_ip(&h, &with_peer("203.0.113.7:80"), &trusted), "203.0.113.7");
    }

    #[test]
    fn test_rightmost_untrusted_hop_wins() {
        let trusted = trusting(&["127.0.0.1", "10.0.0.0/8"]);
        let h = headers(&[("x-forwarded-for", "6.6.6.6, 198.51.100.4, 10.1.2.3")]);
        assert_eq!(client_ip(&h, &with_peer("127.0.0.1:4000"), &trusted), "198.51.100.4");
    }

    #[test]
    fn test_all_trusted_chain_takes_leftmost() {
        let trusted = trusting(&["127.0.0.1", "10.0.0.0/8"]);
        let h = headers(&[("x-forwarded-for", " 10.9.9.9 , 10.1.2.3")]);
        assert_eq!(client_ip(&h, &with_peer("127.0.0.1:4000"), &trusted), "10.9.9.9");
    }

    #[test]
    fn test_garbage_hops_are_ignored() {
        let trusted = trusting(&["127.0.0.1"]);
        let h = headers(&[("x-forwarded-for", "192.0.2.5, not-an-ip")]);
        assert_eq!(client_ip(&h, &with_peer("127.0.0.1:4000"), &trusted), "192.0.2.5");
    }

    #[test]
    fn test_real_ip_behind_trusted_peer() {
        let trusted = trusting(&["127.0.0.1"]);
        let h = headers(&[("x-forwarded-for", "   "), ("x-real-ip", "192.168.1.9")]);
        assert_eq!(client_ip(&h, &with_peer("127.0.0.1:4000"), &trusted), "192.168.1.9");
    }

    #[test]
    fn test_trusted_peer_without_headers() {
        let trusted = trusting(&["127.0.0.1"]);
        let ip = client_ip(&HeaderMap::new(), &with_peer("127.0.0.1:4000"), &trusted);
        assert_eq!(ip, "127.0.0.1");
    }

    #[test]
    fn test_peer_address() {
        let none = TrustedProxies::default();
        let h = HeaderMap::new();
        assert_eq!(client_ip(&h, &with_peer("203.0.113.7:5555"), &none), "203.0.113.7");
        assert_eq!(client_ip(&h, &with_peer("[::1]:5555"), &none), "::1");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let h = headers(&[("x-forwarded-for", "10.0.0.1")]);
        let ip = client_ip(&h, &Extensions::new(), &trusting(&["0.0.0.0/0"]));
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("127.8.9.10"));
        assert!(is_loopback("::1"));
        assert!(!is_loopback("10.0.0.1"));
        assert!(!is_loopback("unknown"));
    }
}
