//! Topology Model
//!
//! In-memory representation of an HAProxy deployment: the global and
//! defaults blocks, frontends, backends and their servers. Frontend and
//! backend names are the join key between this model and the generated
//! text, so uniqueness is enforced when a `Topology` is constructed.

mod entities;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use entities::{
    Backend, Balance, Bind, Frontend, Mode, Server, DEFAULT_MAXCONN, DEFAULT_WEIGHT, MAX_WEIGHT,
};
pub(crate) use entities::{BackendLine, FrontendLine};

use crate::error::{Error, Result};

/// Keywords that open a new top-level section
pub const SECTION_KEYWORDS: &[&str] = &[
    "global",
    "defaults",
    "frontend",
    "backend",
    "listen",
    "userlist",
    "peers",
    "resolvers",
    "mailers",
    "cache",
    "program",
    "http-errors",
    "ring",
];

/// Check if a token opens a top-level section
pub fn is_section_keyword(token: &str) -> bool {
    SECTION_KEYWORDS.contains(&token)
}

/// Section keywords whose sections inherit from `defaults`
pub const PROXY_KEYWORDS: &[&str] = &["frontend", "backend", "listen"];

/// A section this crate does not model (`listen`, `userlist`, ...),
/// carried through untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSection {
    /// Full header line, e.g. `listen stats`
    pub header: String,
    #[serde(default)]
    pub lines: Vec<String>,
}

/// Validated topology snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TopologyDocument")]
pub struct Topology {
    preamble: Vec<String>,
    global: Vec<String>,
    defaults: Vec<String>,
    frontends: Vec<Frontend>,
    backends: Vec<Backend>,
    sections: Vec<RawSection>,
}

/// Unvalidated shape of a topology as supplied by callers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologyDocument {
    #[serde(default)]
    pub preamble: Vec<String>,
    #[serde(default = "default_global")]
    pub global: Vec<String>,
    #[serde(default = "default_defaults")]
    pub defaults: Vec<String>,
    #[serde(default)]
    pub frontends: Vec<Frontend>,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default)]
    pub sections: Vec<RawSection>,
}

impl TryFrom<TopologyDocument> for Topology {
    type Error = Error;

    fn try_from(doc: TopologyDocument) -> Result<Self> {
        let mut topology = Topology {
            preamble: doc.preamble,
            global: doc.global,
            defaults: doc.defaults,
            frontends: doc.frontends,
            backends: doc.backends,
            sections: doc.sections,
        };
        topology.normalize();
        topology.validate()?;
        Ok(topology)
    }
}

impl Topology {
    /// Build a topology with the standard managed global and defaults blocks
    pub fn new(frontends: Vec<Frontend>, backends: Vec<Backend>) -> Result<Self> {
        Self::try_from(TopologyDocument {
            global: default_global(),
            defaults: default_defaults(),
            frontends,
            backends,
            ..Default::default()
        })
    }

    /// Build a topology from every part, as the parser does
    pub fn from_parts(
        preamble: Vec<String>,
        global: Vec<String>,
        defaults: Vec<String>,
        frontends: Vec<Frontend>,
        backends: Vec<Backend>,
        sections: Vec<RawSection>,
    ) -> Result<Self> {
        Self::try_from(TopologyDocument {
            preamble,
            global,
            defaults,
            frontends,
            backends,
            sections,
        })
    }

    /// Load a topology document from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a topology document from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidTopology(e.to_string()))
    }

    pub fn preamble(&self) -> &[String] {
        &self.preamble
    }

    pub fn global(&self) -> &[String] {
        &self.global
    }

    pub fn defaults(&self) -> &[String] {
        &self.defaults
    }

    /// Frontends, sorted by name
    pub fn frontends(&self) -> &[Frontend] {
        &self.frontends
    }

    /// Backends, sorted by name, each with servers sorted by name
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn sections(&self) -> &[RawSection] {
        &self.sections
    }

    pub fn frontend(&self, name: &str) -> Option<&Frontend> {
        self.frontends.iter().find(|f| f.name == name)
    }

    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Frontends whose `default_backend` names no backend in this model,
    /// as `(frontend, backend)` pairs
    pub fn dangling_default_backends(&self) -> Vec<(&str, &str)> {
        let known: HashSet<&str> = self.backends.iter().map(|b| b.name.as_str()).collect();
        self.frontends
            .iter()
            .filter_map(|f| {
                f.default_backend
                    .as_deref()
                    .filter(|b| !known.contains(b))
                    .map(|b| (f.name.as_str(), b))
            })
            .collect()
    }

    fn normalize(&mut self) {
        self.frontends.sort_by(|a, b| a.name.cmp(&b.name));
        self.backends.sort_by(|a, b| a.name.cmp(&b.name));
        for backend in &mut self.backends {
            backend.servers.sort_by(|a, b| a.name.cmp(&b.name));
            if let Balance::Other(text) = &backend.balance {
                backend.balance = Balance::from(text.as_str());
            }
        }
    }

    /// Reject anything `serialize` could not write in a form `parse` reads
    /// back as the same model
    fn validate(&self) -> Result<()> {
        for line in &self.preamble {
            if !line.starts_with('#') || line.trim() != line || line.contains(['\n', '\r']) {
                return Err(Error::InvalidTopology(format!(
                    "preamble line '{}' is not a single-line comment",
                    line
                )));
            }
        }
        check_lines("global", &self.global)?;
        check_lines("defaults", &self.defaults)?;

        let mut seen = HashSet::new();
        for frontend in &self.frontends {
            check_name("frontend", &frontend.name)?;
            if !seen.insert(frontend.name.as_str()) {
                return Err(Error::InvalidTopology(format!(
                    "duplicate frontend name '{}'",
                    frontend.name
                )));
            }
            if let Some(bind) = &frontend.bind {
                if bind.options.contains(['\n', '\r'])
                    || Bind::from_directive(&bind.to_string()).as_ref() != Some(bind)
                {
                    return Err(Error::InvalidTopology(format!(
                        "frontend '{}' has an invalid bind '{}'",
                        frontend.name, bind
                    )));
                }
            }
            if let Some(backend) = &frontend.default_backend {
                check_name("default_backend", backend)?;
            }

            let owner = format!("frontend '{}'", frontend.name);
            check_lines(&owner, &frontend.extra)?;
            for line in &frontend.extra {
                if frontend.classify(line) != FrontendLine::Other {
                    return Err(absorbed(&owner, line));
                }
            }
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            check_name("backend", &backend.name)?;
            if !seen.insert(backend.name.as_str()) {
                return Err(Error::InvalidTopology(format!(
                    "duplicate backend name '{}'",
                    backend.name
                )));
            }
            if let Balance::Other(text) = &backend.balance {
                if text.is_empty() || text.contains(['\n', '\r']) {
                    return Err(Error::InvalidTopology(format!(
                        "backend '{}' has an invalid balance algorithm",
                        backend.name
                    )));
                }
            }

            let mut servers = HashSet::new();
            for server in &backend.servers {
                server.validate(&backend.name)?;
                if !servers.insert(server.name.as_str()) {
                    return Err(Error::InvalidTopology(format!(
                        "duplicate server name '{}' in backend '{}'",
                        server.name, backend.name
                    )));
                }
            }

            let owner = format!("backend '{}'", backend.name);
            check_lines(&owner, &backend.extra)?;
            for line in &backend.extra {
                // The balance line is always written, so later ones stay verbatim
                if backend.classify(line, true) != BackendLine::Other {
                    return Err(absorbed(&owner, line));
                }
            }
        }

        for section in &self.sections {
            check_raw_header(&section.header)?;
            check_lines(&section.header, &section.lines)?;
        }

        Ok(())
    }
}

fn absorbed(owner: &str, line: &str) -> Error {
    Error::InvalidTopology(format!(
        "{} carries '{}' as a verbatim directive; it must be set through the modeled field",
        owner, line
    ))
}

/// Headers of unmodeled sections must open a section the parser keeps
/// unmodeled: not `global`/`defaults`, and not a plain `frontend NAME` or
/// `backend NAME`
fn check_raw_header(header: &str) -> Result<()> {
    let tokens: Vec<&str> = header.split_whitespace().collect();
    let keyword = tokens.first().copied().unwrap_or("");
    let modeled = match keyword {
        "global" | "defaults" => true,
        "frontend" | "backend" => tokens.len() <= 2,
        _ => false,
    };
    if !is_section_keyword(keyword)
        || modeled
        || header.trim() != header
        || header.contains(['\n', '\r'])
    {
        return Err(Error::InvalidTopology(format!(
            "'{}' is not a valid header for an unmodeled section",
            header
        )));
    }
    Ok(())
}

/// Names are single tokens: they end up as the argument of a directive
pub(crate) fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidTopology(format!("{} name cannot be empty", what)));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidTopology(format!(
            "{} name '{}' contains whitespace",
            what, name
        )));
    }
    Ok(())
}

/// Directive lines are emitted indented under their section header and
/// read back trimmed, so each must be a single trimmed line that does not
/// open a section of its own
fn check_lines(owner: &str, lines: &[String]) -> Result<()> {
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || line.contains(['\n', '\r']) {
            return Err(Error::InvalidTopology(format!(
                "{} contains an empty or multi-line directive",
                owner
            )));
        }
        if trimmed != line {
            return Err(Error::InvalidTopology(format!(
                "{} directive '{}' has leading or trailing whitespace",
                owner, line
            )));
        }
        let first = trimmed.split_whitespace().next().unwrap_or("");
        if is_section_keyword(first) {
            return Err(Error::InvalidTopology(format!(
                "{} contains a directive starting with section keyword '{}'",
                owner, first
            )));
        }
    }
    Ok(())
}

/// Global block written on hosts managed from the database
pub fn default_global() -> Vec<String> {
    [
        "log /dev/log local0",
        "log /dev/log local1 notice",
        "chroot /var/lib/haproxy",
        "stats socket /run/haproxy/admin.sock mode 660 level admin",
        "stats timeout 30s",
        "user haproxy",
        "group haproxy",
        "daemon",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Defaults block written on hosts managed from the database
pub fn default_defaults() -> Vec<String> {
    [
        "log global",
        "mode tcp",
        "option tcplog",
        "option dontlognull",
        "timeout connect 5000",
        "timeout client 50000",
        "timeout server 50000",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_backend() -> Backend {
        let mut backend = Backend::new("web");
        backend.servers.push(Server::new("s2", "10.0.0.6", 8080));
        backend.servers.push(Server::new("s1", "10.0.0.5", 8080));
        backend
    }

    #[test]
    fn test_new_sorts_entities() {
        let mut api = Backend::new("api");
        api.servers.push(Server::new("a1", "10.0.1.1", 9000));

        let topology = Topology::new(vec![], vec![web_backend(), api]).unwrap();
        let names: Vec<_> = topology.backends().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);

        let servers: Vec<_> = topology.backends()[1]
            .servers
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(servers, vec!["s1", "s2"]);
        assert_eq!(topology.global(), default_global().as_slice());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Topology::new(vec![], vec![web_backend(), web_backend()]);
        assert!(matches!(result, Err(Error::InvalidTopology(_))));

        let mut backend = web_backend();
        backend.servers.push(Server::new("s1", "10.0.0.9", 8080));
        assert!(Topology::new(vec![], vec![backend]).is_err());

        let fe = Frontend::new("main", Bind::new("*", 80));
        assert!(Topology::new(vec![fe.clone(), fe], vec![]).is_err());
    }

    #[test]
    fn test_frontend_and_backend_may_share_a_name() {
        let fe = Frontend::new("web", Bind::new("*", 80));
        assert!(Topology::new(vec![fe], vec![web_backend()]).is_ok());
    }

    #[test]
    fn test_directive_opening_a_section_rejected() {
        let mut backend = web_backend();
        backend.extra.push("backend sneaky".into());
        assert!(Topology::new(vec![], vec![backend]).is_err());

        let mut backend = web_backend();
        backend.extra.push("option httpchk\nbalance first".into());
        assert!(Topology::new(vec![], vec![backend]).is_err());
    }

    #[test]
    fn test_untrimmed_directives_rejected() {
        let mut fe = Frontend::new("main", Bind::new("*", 80));
        fe.extra.push("  option forwardfor".into());
        assert!(Topology::new(vec![fe], vec![]).is_err());

        let result = Topology::from_parts(
            vec![],
            vec!["daemon ".into()],
            vec![],
            vec![],
            vec![],
            vec![],
        );
        assert!(matches!(result, Err(Error::InvalidTopology(_))));
    }

    #[test]
    fn test_extras_the_parser_would_model_rejected() {
        let mut backend = web_backend();
        backend.extra.push("server s9 10.0.0.9:80".into());
        assert!(Topology::new(vec![], vec![backend]).is_err());

        for line in ["mode tcp", "disabled"] {
            let mut backend = web_backend();
            backend.extra.push(line.into());
            assert!(Topology::new(vec![], vec![backend]).is_err(), "backend extra '{}'", line);
        }

        let mut unbound = Frontend::new("main", Bind::new("*", 80));
        unbound.bind = None;
        for line in ["bind :81", "mode http", "default_backend web", "disabled"] {
            let mut fe = unbound.clone();
            fe.extra.push(line.into());
            assert!(Topology::new(vec![fe], vec![]).is_err(), "frontend extra '{}'", line);
        }

        // Once the modeled field is set, further lines of the same kind stay verbatim
        let mut fe = Frontend::new("main", Bind::new("*", 80));
        fe.mode = Some(Mode::Http);
        fe.extra = vec!["bind :81".into(), "mode tcp".into(), "bind /run/h.sock".into()];
        let mut backend = web_backend();
        backend.extra = vec!["balance source".into(), "server s9 10.0.0.9".into()];
        assert!(Topology::new(vec![fe], vec![backend]).is_ok());
    }

    #[test]
    fn test_known_balance_names_normalized() {
        let mut backend = web_backend();
        backend.balance = Balance::Other(" leastconn".into());
        let topology = Topology::new(vec![], vec![backend]).unwrap();
        assert_eq!(topology.backend("web").unwrap().balance, Balance::LeastConn);

        let mut backend = web_backend();
        backend.balance = Balance::Other("  ".into());
        assert!(Topology::new(vec![], vec![backend]).is_err());
    }

    #[test]
    fn test_preamble_and_raw_headers_checked() {
        let build = |preamble: Vec<String>, header: &str| {
            Topology::from_parts(
                preamble,
                default_global(),
                default_defaults(),
                vec![],
                vec![],
                vec![RawSection {
                    header: header.into(),
                    lines: vec![],
                }],
            )
        };

        assert!(build(vec!["# managed".into()], "listen stats").is_ok());
        assert!(build(vec![], "backend web # pool").is_ok());
        assert!(build(vec!["backend ghost".into()], "listen stats").is_err());
        for header in ["frontend x", "backend x", "defaults", "defaults web", "global", " listen stats", "option x"] {
            assert!(build(vec![], header).is_err(), "header '{}'", header);
        }
    }

    #[test]
    fn test_dangling_default_backend() {
        let mut fe = Frontend::new("main", Bind::new("*", 80));
        fe.default_backend = Some("missing".into());
        let mut ok = Frontend::new("other", Bind::new("*", 81));
        ok.default_backend = Some("web".into());

        let topology = Topology::new(vec![fe, ok], vec![web_backend()]).unwrap();
        assert_eq!(topology.dangling_default_backends(), vec![("main", "missing")]);
    }

    #[test]
    fn test_document_json_validated_on_deserialize() {
        let json = r#"{
            "frontends": [{"name": "main", "bind": {"address": "0.0.0.0", "port": 80},
                           "mode": "http", "default_backend": "web"}],
            "backends": [{"name": "web", "balance": "leastconn",
                          "servers": [{"name": "s1", "address": "10.0.0.5", "port": 8080}]}]
        }"#;
        let topology = Topology::from_json(json).unwrap();
        assert_eq!(topology.frontend("main").unwrap().mode, Some(Mode::Http));
        assert_eq!(topology.backend("web").unwrap().balance, Balance::LeastConn);
        assert_eq!(topology.defaults(), default_defaults().as_slice());

        let bad = r#"{"backends": [{"name": "web"}, {"name": "web"}]}"#;
        assert!(Topology::from_json(bad).is_err());
    }

    #[test]
    fn test_document_toml() {
        let toml = r#"
[[backends]]
name = "web"
mode = "tcp"

[[backends.servers]]
name = "s1"
address = "10.0.0.5"
port = 8080
weight = 3
"#;
        let topology = Topology::from_toml(toml).unwrap();
        let backend = topology.backend("web").unwrap();
        assert_eq!(backend.mode, Some(Mode::Tcp));
        assert_eq!(backend.server("s1").unwrap().weight, 3);
    }
}
