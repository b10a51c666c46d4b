//! Connection configuration and connection string parsing
//!
//! Connection strings take the form `host[/port]:database`:
//! - `localhost:employee`
//! - `dbserver/3051:/var/lib/firebird/data/app.fdb`
//! - `[::1]/3050:C:\data\app.fdb`
//!
//! A string without a host part (`/srv/app.fdb`, `C:\app.fdb`) connects to
//! `localhost` on the default port.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default Firebird port
pub const DEFAULT_PORT: u16 = 3050;

/// Default socket buffer size
pub const DEFAULT_PACKET_SIZE: u32 = 8192;

/// Rows requested per fetch round trip
pub const DEFAULT_FETCH_SIZE: u32 = 200;

/// Default SQL dialect
pub const DEFAULT_DIALECT: u8 = 3;

/// Default connection character set
pub const DEFAULT_CHARSET: &str = "UTF8";

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Plugins offered by default, most preferred first
pub const DEFAULT_AUTH_PLUGINS: &str = "Srp256,Srp";

/// Wire encryption policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireCrypt {
    /// Never encrypt
    Disabled,
    /// Encrypt when the server agrees
    #[default]
    Enabled,
    /// Fail unless the channel gets encrypted
    Required,
}

impl WireCrypt {
    /// Value sent in the CNCT client-crypt item
    pub fn wire_value(&self) -> i32 {
        match self {
            WireCrypt::Disabled => 0,
            WireCrypt::Enabled => 1,
            WireCrypt::Required => 2,
        }
    }
}

impl FromStr for WireCrypt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(WireCrypt::Disabled),
            "enabled" => Ok(WireCrypt::Enabled),
            "required" => Ok(WireCrypt::Required),
            other => Err(Error::InvalidConnectionString(format!(
                "unknown wire crypt option '{}'",
                other
            ))),
        }
    }
}

/// Connection configuration for Firebird databases.
///
/// # Examples
///
/// ```rust
/// use firebird_rs::{Config, WireCrypt};
/// use std::time::Duration;
///
/// let config = Config::new("localhost", 3050, "employee", "SYSDBA", "masterkey")
///     .role("RDB$ADMIN")
///     .fetch_size(500)
///     .wire_crypt(WireCrypt::Required)
///     .read_timeout(Duration::from_secs(30));
/// assert_eq!(config.to_string(), "localhost/3050:employee");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to connect to
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Database path or alias
    pub database: String,
    /// User name
    pub username: String,
    password: String,
    /// SQL role
    pub role: Option<String>,
    /// Connection character set
    pub charset: String,
    /// SQL dialect
    pub dialect: u8,
    /// Page size for newly created databases
    pub page_size: Option<u32>,
    /// Force writes for newly created databases
    pub force_write: Option<bool>,
    /// Replace an existing file when creating a database
    pub overwrite: bool,
    /// Socket buffer size
    pub packet_size: u32,
    /// Rows per fetch round trip
    pub fetch_size: u32,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Bound on a single blocking read, none by default
    pub read_timeout: Option<Duration>,
    /// Wire encryption policy
    pub wire_crypt: WireCrypt,
    /// Key answered to crypt key callbacks
    pub crypt_key: Option<Vec<u8>>,
    /// Comma separated authentication plugins
    pub auth_plugins: String,
    /// Query affected-row counts after DML
    pub records_affected: bool,
    /// Process name reported to the server
    pub process_name: Option<String>,
    /// Process id reported to the server
    pub process_id: Option<u32>,
    /// Session time zone
    pub session_time_zone: Option<String>,
}

impl Config {
    /// Create a new configuration
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Set the SQL role
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the connection character set
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the SQL dialect
    pub fn dialect(mut self, dialect: u8) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the page size used by [`Connection::create_database`](crate::Connection::create_database)
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set forced writes for a created database
    pub fn force_write(mut self, enabled: bool) -> Self {
        self.force_write = Some(enabled);
        self
    }

    /// Overwrite an existing database file on create
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set the socket buffer size
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the number of rows per fetch
    pub fn fetch_size(mut self, size: u32) -> Self {
        self.fetch_size = size.max(1);
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound how long a single read may block
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the wire encryption policy
    pub fn wire_crypt(mut self, option: WireCrypt) -> Self {
        self.wire_crypt = option;
        self
    }

    /// Set the key for database encryption callbacks
    pub fn crypt_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.crypt_key = Some(key.into());
        self
    }

    /// Set the authentication plugin list
    pub fn auth_plugins(mut self, plugins: impl Into<String>) -> Self {
        self.auth_plugins = plugins.into();
        self
    }

    /// Enable or disable the affected-row query after DML
    pub fn records_affected(mut self, enabled: bool) -> Self {
        self.records_affected = enabled;
        self
    }

    /// Report a process name and id to the server
    pub fn process(mut self, name: impl Into<String>, id: u32) -> Self {
        self.process_name = Some(name.into());
        self.process_id = Some(id);
        self
    }

    /// Set the session time zone
    pub fn session_time_zone(mut self, zone: impl Into<String>) -> Self {
        self.session_time_zone = Some(zone.into());
        self
    }

    /// Get the password (for authentication)
    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Set the password
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// Set the username
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            role: None,
            charset: DEFAULT_CHARSET.to_string(),
            dialect: DEFAULT_DIALECT,
            page_size: None,
            force_write: None,
            overwrite: false,
            packet_size: DEFAULT_PACKET_SIZE,
            fetch_size: DEFAULT_FETCH_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            wire_crypt: WireCrypt::default(),
            crypt_key: None,
            auth_plugins: DEFAULT_AUTH_PLUGINS.to_string(),
            records_affected: true,
            process_name: None,
            process_id: None,
            session_time_zone: None,
        }
    }
}

/// Whether `s` starts with a Windows drive such as `C:\` or `C:/`
fn starts_with_drive(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && (b[2] == b'\\' || b[2] == b'/')
}

fn parse_port(s: &str) -> Result<u16> {
    s.parse()
        .map_err(|_| Error::InvalidConnectionString(format!("invalid port number '{}'", s)))
}

/// Parse a `host[/port]:database` connection string
impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidConnectionString(
                "empty connection string".to_string(),
            ));
        }

        let mut config = Config::default();

        // Bracketed IPv6 host
        if let Some(rest) = s.strip_prefix('[') {
            let end = rest.find(']').ok_or_else(|| {
                Error::InvalidConnectionString("unterminated IPv6 address".to_string())
            })?;
            config.host = rest[..end].to_string();
            let rest = &rest[end + 1..];
            let (port, database) = match rest.strip_prefix('/') {
                Some(r) => {
                    let colon = r.find(':').ok_or_else(|| {
                        Error::InvalidConnectionString("missing database after port".to_string())
                    })?;
                    (Some(&r[..colon]), &r[colon + 1..])
                }
                None => (
                    None,
                    rest.strip_prefix(':').ok_or_else(|| {
                        Error::InvalidConnectionString("missing ':' after host".to_string())
                    })?,
                ),
            };
            if let Some(port) = port {
                config.port = parse_port(port)?;
            }
            config.database = database.to_string();
        } else if starts_with_drive(s) || !s.contains(':') {
            config.database = s.to_string();
        } else {
            let colon = s.find(':').unwrap_or(s.len());
            let host_port = &s[..colon];
            config.database = s[colon + 1..].to_string();
            match host_port.split_once('/') {
                Some((host, port)) => {
                    config.host = host.to_string();
                    config.port = parse_port(port)?;
                }
                None => config.host = host_port.to_string(),
            }
        }

        if config.host.is_empty() {
            return Err(Error::InvalidConnectionString("missing host".to_string()));
        }
        if config.database.is_empty() {
            return Err(Error::InvalidConnectionString(
                "missing database".to_string(),
            ));
        }

        Ok(config)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        write!(f, "/{}:{}", self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_database() {
        let config: Config = "dbhost:employee".parse().unwrap();
        assert_eq!(config.host, "dbhost");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database, "employee");
    }

    #[test]
    fn test_parse_host_port_and_path() {
        let config: Config = "dbhost/3051:/var/db/app.fdb".parse().unwrap();
        assert_eq!(config.host, "dbhost");
        assert_eq!(config.port, 3051);
        assert_eq!(config.database, "/var/db/app.fdb");
    }

    #[test]
    fn test_parse_windows_drive_keeps_path() {
        let config: Config = "winbox:C:\\data\\app.fdb".parse().unwrap();
        assert_eq!(config.host, "winbox");
        assert_eq!(config.database, "C:\\data\\app.fdb");

        let local: Config = "D:/data/app.fdb".parse().unwrap();
        assert_eq!(local.host, "localhost");
        assert_eq!(local.database, "D:/data/app.fdb");
    }

    #[test]
    fn test_parse_ipv6() {
        let config: Config = "[::1]/3052:employee".parse().unwrap();
        assert_eq!(config.host, "::1");
        assert_eq!(config.port, 3052);
        assert_eq!(config.database, "employee");
        assert_eq!(config.socket_addr(), "[::1]:3052");

        let no_port: Config = "[fe80::1]:db".parse().unwrap();
        assert_eq!(no_port.port, DEFAULT_PORT);
        assert_eq!(no_port.database, "db");
    }

    #[test]
    fn test_parse_path_only() {
        let config: Config = "/srv/app.fdb".parse().unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.database, "/srv/app.fdb");
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Config>().is_err());
        assert!("host/abc:db".parse::<Config>().is_err());
        assert!("host:".parse::<Config>().is_err());
        assert!(":db".parse::<Config>().is_err());
        assert!("[::1/3050:db".parse::<Config>().is_err());
    }

    #[test]
    fn test_config_display_round_trip() {
        let config = Config::new("dbhost", 3051, "employee", "u", "p");
        assert_eq!(config.to_string(), "dbhost/3051:employee");
        let parsed: Config = config.to_string().parse().unwrap();
        assert_eq!(parsed.host, "dbhost");
        assert_eq!(parsed.port, 3051);

        let v6 = Config::new("::1", 3050, "db", "u", "p");
        assert_eq!(v6.to_string(), "[::1]/3050:db");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3050);
        assert_eq!(config.packet_size, 8192);
        assert_eq!(config.fetch_size, 200);
        assert_eq!(config.dialect, 3);
        assert_eq!(config.charset, "UTF8");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.read_timeout.is_none());
        assert_eq!(config.wire_crypt, WireCrypt::Enabled);
        assert_eq!(config.auth_plugins, "Srp256,Srp");
        assert!(config.records_affected);
    }

    #[test]
    fn test_builder_pattern() {
        let config = Config::new("h", 3050, "db", "u", "p")
            .role("ADMIN")
            .fetch_size(0)
            .wire_crypt(WireCrypt::Disabled)
            .records_affected(false)
            .page_size(16384);
        assert_eq!(config.role.as_deref(), Some("ADMIN"));
        assert_eq!(config.fetch_size, 1);
        assert_eq!(config.wire_crypt, WireCrypt::Disabled);
        assert!(!config.records_affected);
        assert_eq!(config.page_size, Some(16384));
        assert_eq!(config.password(), "p");
    }

    #[test]
    fn test_wire_crypt_values() {
        assert_eq!(WireCrypt::Disabled.wire_value(), 0);
        assert_eq!(WireCrypt::Enabled.wire_value(), 1);
        assert_eq!(WireCrypt::Required.wire_value(), 2);
        assert_eq!("Required".parse::<WireCrypt>().unwrap(), WireCrypt::Required);
        assert!("maybe".parse::<WireCrypt>().is_err());
    }
}
