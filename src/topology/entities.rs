//! Frontend, backend and server entities

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default server weight, omitted from generated server lines
pub const DEFAULT_WEIGHT: u32 = 1;

/// Default per-server connection limit, omitted from generated server lines
pub const DEFAULT_MAXCONN: u32 = 32;

/// Highest weight HAProxy accepts on a server line
pub const MAX_WEIGHT: u32 = 256;

/// Proxy mode of a frontend or backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Tcp,
    Http,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Tcp => write!(f, "tcp"),
            Mode::Http => write!(f, "http"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Mode::Tcp),
            "http" => Ok(Mode::Http),
            other => Err(Error::InvalidTopology(format!("unknown mode '{}'", other))),
        }
    }
}

/// Load-balancing algorithm of a backend
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Balance {
    #[default]
    RoundRobin,
    StaticRr,
    LeastConn,
    First,
    Source,
    Uri,
    Random,
    /// Any other algorithm, including its arguments (`url_param userid`)
    Other(String),
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Balance::RoundRobin => "roundrobin",
            Balance::StaticRr => "static-rr",
            Balance::LeastConn => "leastconn",
            Balance::First => "first",
            Balance::Source => "source",
            Balance::Uri => "uri",
            Balance::Random => "random",
            Balance::Other(text) => text,
        };
        f.write_str(name)
    }
}

impl From<&str> for Balance {
    fn from(text: &str) -> Self {
        match text.trim() {
            "roundrobin" => Balance::RoundRobin,
            "static-rr" => Balance::StaticRr,
            "leastconn" => Balance::LeastConn,
            "first" => Balance::First,
            "source" => Balance::Source,
            "uri" => Balance::Uri,
            "random" => Balance::Random,
            other => Balance::Other(other.to_string()),
        }
    }
}

impl Serialize for Balance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Balance {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Balance::from(text.as_str()))
    }
}

/// Listening address of a frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    /// Address part; empty for `bind :80`, brackets kept for IPv6
    pub address: String,
    pub port: u16,
    /// Verbatim tail of the bind line (`ssl crt /etc/ssl/site.pem`)
    #[serde(default)]
    pub options: String,
}

impl Bind {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            options: String::new(),
        }
    }
}

impl Bind {
    /// Read the arguments of a `bind` line; `None` when it is not `ADDR:PORT`
    pub fn from_directive(args: &str) -> Option<Bind> {
        let (endpoint, options) = match args.split_once(char::is_whitespace) {
            Some((endpoint, options)) => (endpoint, options.trim()),
            None => (args, ""),
        };
        let (address, port) = split_host_port(endpoint)?;
        Some(Bind {
            address: address.to_string(),
            port,
            options: options.to_string(),
        })
    }
}

impl fmt::Display for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)?;
        if !self.options.is_empty() {
            write!(f, " {}", self.options)?;
        }
        Ok(())
    }
}

/// A `frontend` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    pub name: String,
    #[serde(default)]
    pub bind: Option<Bind>,
    /// `None` inherits the mode from the defaults section
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directive lines this crate does not model, kept verbatim
    #[serde(default)]
    pub extra: Vec<String>,
}

/// How a directive line inside a frontend is read
#[derive(Debug, PartialEq)]
pub(crate) enum FrontendLine {
    Bind(Bind),
    Mode(Mode),
    DefaultBackend(String),
    Disabled,
    /// Kept verbatim in `extra`
    Other,
}

impl Frontend {
    pub fn new(name: impl Into<String>, bind: Bind) -> Self {
        Self {
            name: name.into(),
            bind: Some(bind),
            mode: None,
            default_backend: None,
            enabled: true,
            extra: Vec::new(),
        }
    }

    /// Frontend with only a name, as opened by a section header
    pub(crate) fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind: None,
            mode: None,
            default_backend: None,
            enabled: true,
            extra: Vec::new(),
        }
    }

    /// Classify a directive given the fields already set. Only the first
    /// usable occurrence of a modeled directive fills its field.
    pub(crate) fn classify(&self, line: &str) -> FrontendLine {
        let (keyword, rest) = split_keyword(line);
        match keyword {
            "bind" if self.bind.is_none() => {
                Bind::from_directive(rest).map_or(FrontendLine::Other, FrontendLine::Bind)
            }
            "mode" if self.mode.is_none() => {
                rest.parse::<Mode>().map_or(FrontendLine::Other, FrontendLine::Mode)
            }
            "default_backend"
                if self.default_backend.is_none()
                    && !rest.is_empty()
                    && !rest.contains(char::is_whitespace) =>
            {
                FrontendLine::DefaultBackend(rest.to_string())
            }
            "disabled" if rest.is_empty() && self.enabled => FrontendLine::Disabled,
            _ => FrontendLine::Other,
        }
    }
}

/// A `backend` section; owns its servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub name: String,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub balance: Balance,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Backend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: None,
            balance: Balance::default(),
            enabled: true,
            servers: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Look up a server by name
    pub fn server(&self, name: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Classify a directive given the fields already set. `balance_seen`
    /// is whether a `balance` line has been read for this backend.
    pub(crate) fn classify(&self, line: &str, balance_seen: bool) -> BackendLine {
        let (keyword, rest) = split_keyword(line);
        match keyword {
            "balance" if !rest.is_empty() && !balance_seen => BackendLine::Balance(Balance::from(rest)),
            "mode" if self.mode.is_none() => {
                rest.parse::<Mode>().map_or(BackendLine::Other, BackendLine::Mode)
            }
            "disabled" if rest.is_empty() && self.enabled => BackendLine::Disabled,
            "server" => Server::from_directive(rest).map_or(BackendLine::Other, BackendLine::Server),
            _ => BackendLine::Other,
        }
    }
}

/// How a directive line inside a backend is read
#[derive(Debug, PartialEq)]
pub(crate) enum BackendLine {
    Balance(Balance),
    Mode(Mode),
    Disabled,
    Server(Server),
    /// Kept verbatim in `extra`
    Other,
}

/// A `server` line inside a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_maxconn")]
    pub maxconn: u32,
    /// Health checking (`check`)
    #[serde(default = "default_true")]
    pub check: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Unrecognized server options, verbatim (`inter 2000 rise 2`)
    #[serde(default)]
    pub options: String,
}

impl Server {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            weight: DEFAULT_WEIGHT,
            maxconn: DEFAULT_MAXCONN,
            check: true,
            enabled: true,
            options: String::new(),
        }
    }

    /// Read the arguments of a `server` line; `None` when the address has
    /// no usable port. `check`, `disabled` and the first valid `weight` and
    /// `maxconn` are modeled; other tokens are joined into `options`.
    pub fn from_directive(args: &str) -> Option<Server> {
        let mut tokens = args.split_whitespace().peekable();
        let name = tokens.next()?;
        let (address, port) = split_host_port(tokens.next()?)?;
        if address.is_empty() {
            return None;
        }

        let mut server = Server::new(name, address, port);
        server.check = false;

        let mut weight_seen = false;
        let mut maxconn_seen = false;
        let mut extras: Vec<&str> = Vec::new();

        while let Some(token) = tokens.next() {
            match token {
                "check" if !server.check => server.check = true,
                "disabled" if server.enabled => server.enabled = false,
                "weight" if !weight_seen => {
                    match tokens.peek().and_then(|v| v.parse::<u32>().ok()) {
                        Some(w) if (1..=MAX_WEIGHT).contains(&w) => {
                            server.weight = w;
                            weight_seen = true;
                            tokens.next();
                        }
                        _ => extras.push(token),
                    }
                }
                "maxconn" if !maxconn_seen => {
                    match tokens.peek().and_then(|v| v.parse::<u32>().ok()) {
                        Some(m) if m > 0 => {
                            server.maxconn = m;
                            maxconn_seen = true;
                            tokens.next();
                        }
                        _ => extras.push(token),
                    }
                }
                other => extras.push(other),
            }
        }

        server.options = extras.join(" ");
        Some(server)
    }

    /// Arguments of this server's `server` line. Only non-default settings
    /// are written: `check` when on, `weight` when not 1, `maxconn` when
    /// not 32.
    pub fn directive_args(&self) -> String {
        let mut args = format!("{} {}:{}", self.name, self.address, self.port);
        if self.check {
            args.push_str(" check");
        }
        if self.weight != DEFAULT_WEIGHT {
            args.push_str(&format!(" weight {}", self.weight));
        }
        if self.maxconn != DEFAULT_MAXCONN {
            args.push_str(&format!(" maxconn {}", self.maxconn));
        }
        if !self.enabled {
            args.push_str(" disabled");
        }
        let options = self.options.trim();
        if !options.is_empty() {
            args.push(' ');
            args.push_str(options);
        }
        args
    }

    pub(crate) fn validate(&self, backend: &str) -> Result<()> {
        let owner = format!("server '{}' in backend '{}'", self.name, backend);
        super::check_name("server", &self.name)?;
        if self.address.is_empty() || self.address.chars().any(char::is_whitespace) {
            return Err(Error::InvalidTopology(format!("{} has an invalid address", owner)));
        }
        if self.port == 0 {
            return Err(Error::InvalidTopology(format!("{} has port 0", owner)));
        }
        if !(1..=MAX_WEIGHT).contains(&self.weight) {
            return Err(Error::InvalidTopology(format!(
                "{} has weight {} (expected 1..={})",
                owner, self.weight, MAX_WEIGHT
            )));
        }
        if self.maxconn == 0 {
            return Err(Error::InvalidTopology(format!("{} has maxconn 0", owner)));
        }
        if self.options.contains(['\n', '\r']) {
            return Err(Error::InvalidTopology(format!("{} has multi-line options", owner)));
        }
        // Options must not contain tokens that would be read back as the
        // modeled fields, and must be in the single-spaced form the line
        // is read back in
        if Server::from_directive(&self.directive_args()).as_ref() != Some(self) {
            return Err(Error::InvalidTopology(format!(
                "{} would be read back differently from 'server {}'",
                owner,
                self.directive_args()
            )));
        }
        Ok(())
    }
}

/// Split a directive into its keyword and trimmed arguments
pub(crate) fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    }
}

/// Split `HOST:PORT`; the host may be empty or a bracketed IPv6 address
fn split_host_port(value: &str) -> Option<(&str, u16)> {
    let (host, port) = value.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    (port > 0).then_some((host, port))
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_maxconn() -> u32 {
    DEFAULT_MAXCONN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_round_trips_through_text() {
        assert_eq!(Balance::from("leastconn"), Balance::LeastConn);
        assert_eq!(
            Balance::from("url_param userid"),
            Balance::Other("url_param userid".to_string())
        );
        assert_eq!(Balance::Other("hdr(host)".into()).to_string(), "hdr(host)");
        assert_eq!(Balance::default().to_string(), "roundrobin");
    }

    #[test]
    fn test_bind_display() {
        let mut bind = Bind::new("*", 443);
        assert_eq!(bind.to_string(), "*:443");
        bind.options = "ssl crt /etc/ssl/site.pem".into();
        assert_eq!(bind.to_string(), "*:443 ssl crt /etc/ssl/site.pem");
        assert_eq!(Bind::new("", 80).to_string(), ":80");
    }

    #[test]
    fn test_server_defaults_from_json() {
        let server: Server =
            serde_json::from_str(r#"{"name":"s1","address":"10.0.0.5","port":8080}"#).unwrap();
        assert_eq!(server, Server::new("s1", "10.0.0.5", 8080));
    }

    #[test]
    fn test_server_validation() {
        let mut server = Server::new("s1", "10.0.0.5", 8080);
        assert!(server.validate("web").is_ok());

        server.weight = 0;
        assert!(server.validate("web").is_err());

        server.weight = 1;
        server.maxconn = 0;
        assert!(server.validate("web").is_err());

        server.maxconn = 32;
        server.address = "10.0.0.5 backup".into();
        assert!(server.validate("web").is_err());
    }

    #[test]
    fn test_server_options_cannot_shadow_modeled_fields() {
        for options in ["check", "disabled", "weight 7", "maxconn 10", "inter 2000 weight 7"] {
            let mut server = Server::new("s1", "10.0.0.5", 8080);
            server.check = false;
            server.options = options.into();
            assert!(server.validate("web").is_err(), "options '{}' accepted", options);
        }

        let mut server = Server::new("s1", "10.0.0.5", 8080);
        server.options = "inter  2000".into();
        assert!(server.validate("web").is_err());
        server.options = " inter 2000".into();
        assert!(server.validate("web").is_err());

        // Values the line reader would not take stay as options
        server.options = "weight 0 inter 2000".into();
        assert!(server.validate("web").is_ok());
    }

    #[test]
    fn test_server_directive_reads_back() {
        let mut server = Server::new("s2", "[::1]", 8080);
        server.weight = 3;
        server.maxconn = 64;
        server.enabled = false;
        server.options = "inter 2000 rise 2".into();
        assert_eq!(
            server.directive_args(),
            "s2 [::1]:8080 check weight 3 maxconn 64 disabled inter 2000 rise 2"
        );
        assert_eq!(Server::from_directive(&server.directive_args()), Some(server));

        assert_eq!(Server::from_directive("s1 10.0.0.1"), None);
        assert_eq!(Server::from_directive("s1 :80"), None);
    }

    #[test]
    fn test_bind_from_directive() {
        let bind = Bind::from_directive("*:443 ssl crt /etc/ssl/site.pem").unwrap();
        assert_eq!(bind.address, "*");
        assert_eq!(bind.port, 443);
        assert_eq!(bind.options, "ssl crt /etc/ssl/site.pem");
        assert_eq!(Bind::from_directive(":80"), Some(Bind::new("", 80)));
        assert_eq!(Bind::from_directive("/var/run/haproxy.sock"), None);
        assert_eq!(Bind::from_directive(":8000-8010"), None);
        assert_eq!(Bind::from_directive(":0"), None);
    }

    #[test]
    fn test_classify_only_fills_unset_fields() {
        let mut frontend = Frontend::named("main");
        assert_eq!(frontend.classify("bind :80"), FrontendLine::Bind(Bind::new("", 80)));
        assert_eq!(frontend.classify("mode http"), FrontendLine::Mode(Mode::Http));
        assert_eq!(frontend.classify("mode health"), FrontendLine::Other);
        assert_eq!(frontend.classify("default_backend web"), FrontendLine::DefaultBackend("web".into()));
        assert_eq!(frontend.classify("disabled"), FrontendLine::Disabled);

        frontend.bind = Some(Bind::new("", 80));
        frontend.enabled = false;
        assert_eq!(frontend.classify("bind :81"), FrontendLine::Other);
        assert_eq!(frontend.classify("disabled"), FrontendLine::Other);

        let backend = Backend::new("web");
        assert_eq!(backend.classify("balance source", false), BackendLine::Balance(Balance::Source));
        assert_eq!(backend.classify("balance source", true), BackendLine::Other);
        assert!(matches!(backend.classify("server s1 10.0.0.1:80", true), BackendLine::Server(_)));
        assert_eq!(backend.classify("server s1 10.0.0.1", true), BackendLine::Other);
    }
}
