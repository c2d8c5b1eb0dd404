//! Engine construction flags and environment-derived address resolution.
//!
//! Grounded on the general "resolve at construction, fail fast" idiom of
//! `examples/HFQR-xitca-web/server/src/builder.rs`: a malformed trusted
//! proxy CIDR or an over-specified bind address is reported as a plain
//! `Result::Err` at setup time, never discovered mid-dispatch.

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Dispatch flags an [`crate::engine::Engine`] is constructed with.
///
/// [`Config::new`] mirrors the reference framework's `New()` defaults: the
/// three redirect/method-not-allowed behaviors are on, everything else is
/// off until the caller opts in.
#[derive(Clone, Debug)]
pub struct Config {
    pub redirect_trailing_slash: bool,
    pub redirect_fixed_path: bool,
    pub handle_method_not_allowed: bool,
    pub forwarded_by_client_ip: bool,
    pub remove_extra_slash: bool,
    pub use_raw_path: bool,
    pub unescape_path_values: bool,
    pub trusted_platform: Option<String>,
    pub remote_ip_headers: Vec<String>,
    trusted_cidrs: Vec<TrustedCidr>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            redirect_trailing_slash: true,
            redirect_fixed_path: true,
            handle_method_not_allowed: true,
            forwarded_by_client_ip: true,
            remove_extra_slash: false,
            use_raw_path: false,
            unescape_path_values: true,
            trusted_platform: None,
            remote_ip_headers: vec!["X-Forwarded-For".to_string()],
            trusted_cidrs: Vec::new(),
        }
    }

    /// Parses and stores the engine's trusted proxy CIDRs, failing on the
    /// first malformed entry rather than silently ignoring it.
    pub fn set_trusted_proxies<I, S>(&mut self, cidrs: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for raw in cidrs {
            parsed.push(TrustedCidr::parse(raw.as_ref())?);
        }
        self.trusted_cidrs = parsed;
        Ok(())
    }

    /// `true` if `addr` falls within a configured trusted proxy CIDR.
    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        self.trusted_cidrs.iter().any(|c| c.contains(addr))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
struct TrustedCidr {
    network: IpAddr,
    prefix_len: u32,
}

impl TrustedCidr {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidCidr(raw.to_string());
        let (addr_part, prefix_part) = raw.split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = addr_part.parse().map_err(|_| invalid())?;
        let max_bits = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len: u32 = prefix_part.parse().map_err(|_| invalid())?;
        if prefix_len > max_bits {
            return Err(invalid());
        }
        Ok(Self { network, prefix_len })
    }

    fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(candidate)) => {
                let mask = mask32(self.prefix_len);
                u32::from(net) & mask == u32::from(candidate) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(candidate)) => {
                let mask = mask128(self.prefix_len);
                u128::from(net) & mask == u128::from(candidate) & mask
            }
            _ => false,
        }
    }
}

fn mask32(prefix_len: u32) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    }
}

fn mask128(prefix_len: u32) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - prefix_len)
    }
}

/// A configuration error surfaced at setup time, never during dispatch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// A `set_trusted_proxies` entry wasn't a valid `address/prefix` CIDR.
    InvalidCidr(String),
    /// [`crate::engine::Engine::run`] was given more than one address.
    TooManyAddresses,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCidr(raw) => write!(f, "invalid trusted proxy CIDR: {raw}"),
            Self::TooManyAddresses => write!(f, "Engine::run accepts at most one address"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Resolves the bind address for [`crate::engine::Engine::run`]: an
/// explicit argument wins, then the `PORT` environment variable (bound to
/// `0.0.0.0`), then `:8080`.
pub fn resolve_addr(explicit: &[SocketAddr]) -> Result<SocketAddr, ConfigError> {
    match explicit.len() {
        0 => {
            let port: u16 = env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
        }
        1 => Ok(explicit[0]),
        _ => Err(ConfigError::TooManyAddresses),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_new_not_bare() {
        let c = Config::new();
        assert!(c.redirect_trailing_slash);
        assert!(c.handle_method_not_allowed);
        assert!(!c.remove_extra_slash);
    }

    #[test]
    fn resolves_explicit_address() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(resolve_addr(&[addr]).unwrap(), addr);
    }

    #[test]
    fn rejects_multiple_addresses() {
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        assert_eq!(resolve_addr(&[a, b]), Err(ConfigError::TooManyAddresses));
    }

    #[test]
    fn falls_back_to_default_port_without_env() {
        env::remove_var("PORT");
        let addr = resolve_addr(&[]).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn trusted_cidr_matches_network() {
        let mut c = Config::new();
        c.set_trusted_proxies(["10.0.0.0/8"]).unwrap();
        assert!(c.is_trusted("10.1.2.3".parse().unwrap()));
        assert!(!c.is_trusted("192.168.0.1".parse().unwrap()));
    }

    #[test]
    fn rejects_malformed_cidr() {
        let mut c = Config::new();
        assert!(matches!(c.set_trusted_proxies(["not-a-cidr"]), Err(ConfigError::InvalidCidr(_))));
    }
}
