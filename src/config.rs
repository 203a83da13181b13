use crate::error::{Result, TollgateError};
use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Address the proxy listens on
pub const LISTEN_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// Fixed upstream host
pub const UPSTREAM_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// Fixed upstream port
pub const UPSTREAM_PORT: u16 = 5002;
/// Trailing span the rate limiter counts arrivals over
pub const DETECTION_WINDOW: Duration = Duration::from_secs(10);
/// Arrivals tolerated inside the detection window
pub const MAX_REQUESTS: usize = 100;
/// Single read from the client; longer requests are truncated
pub const READ_BUFFER: usize = 4096;
/// Upper bound of one upstream response chunk
pub const RESPONSE_CHUNK: usize = 4096;
/// Bytes taken after `boundary=`; longer boundaries are truncated
pub const BOUNDARY_WIDTH: usize = 70;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener configuration
    pub proxy: ProxyServerConfig,
    /// Where approved requests are forwarded
    pub upstream: UpstreamDestination,
    /// Heuristic thresholds and buffer bounds
    pub inspection: InspectionConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Host to bind to (always loopback)
    pub host: IpAddr,
    /// Port for the proxy; `None` means the operator is asked at startup
    pub port: Option<u16>,
}

impl Default for ProxyServerConfig {
    fn default() -> Self {
        Self {
            host: LISTEN_HOST,
            port: None,
        }
    }
}

/// Fixed (host, port) pair every approved request is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamDestination {
    pub host: IpAddr,
    pub port: u16,
}

impl UpstreamDestination {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for UpstreamDestination {
    fn default() -> Self {
        Self::new(UPSTREAM_HOST, UPSTREAM_PORT)
    }
}

impl fmt::Display for UpstreamDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

#[derive(Debug, Clone)]
pub struct InspectionConfig {
    /// Sliding window for DoS detection
    pub detection_window: Duration,
    /// Maximum arrivals inside the window before rejecting
    pub max_requests: usize,
    /// Size of the single client read
    pub read_buffer: usize,
    /// Size of each upstream receive
    pub response_chunk: usize,
    /// Fixed width of the multipart boundary heuristic
    pub boundary_width: usize,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            detection_window: DETECTION_WINDOW,
            max_requests: MAX_REQUESTS,
            read_buffer: READ_BUFFER,
            response_chunk: RESPONSE_CHUNK,
            boundary_width: BOUNDARY_WIDTH,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" | "plain" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PROXY_PORT") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_port(&raw)?),
            _ => None,
        };

        let format = get_env_or("LOG_FORMAT", "pretty");
        let format = LogFormat::parse(&format).ok_or_else(|| {
            TollgateError::InvalidConfig(format!("LOG_FORMAT must be pretty or json, got {}", format))
        })?;

        Ok(Config {
            proxy: ProxyServerConfig {
                host: LISTEN_HOST,
                port,
            },
            upstream: UpstreamDestination::default(),
            inspection: InspectionConfig::default(),
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format,
            },
        })
    }

    /// Get the proxy listening address, if the port is known
    pub fn proxy_addr(&self) -> Option<SocketAddr> {
        self.proxy.port.map(|port| SocketAddr::new(self.proxy.host, port))
    }
}

/// Parse an operator-supplied port number
pub fn parse_port(raw: &str) -> Result<u16> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| TollgateError::InvalidConfig(format!("{} is not a valid port number", raw.trim())))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
