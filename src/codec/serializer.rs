//! Topology → HAProxy configuration text

use crate::topology::{Backend, Frontend, Server, Topology};

const INDENT: &str = "    ";

/// Render a topology as HAProxy configuration text.
///
/// Output is deterministic: preamble, `global`, `defaults`, frontends and
/// backends sorted by name, then unmodeled sections in their original
/// order. Blocks are separated by one blank line.
pub fn serialize(topology: &Topology) -> String {
    let mut blocks: Vec<Vec<String>> = Vec::new();

    if !topology.preamble().is_empty() {
        blocks.push(topology.preamble().to_vec());
    }
    blocks.push(section("global", topology.global()));
    blocks.push(section("defaults", topology.defaults()));

    for frontend in topology.frontends() {
        blocks.push(frontend_block(frontend));
    }
    for backend in topology.backends() {
        blocks.push(backend_block(backend));
    }
    for raw in topology.sections() {
        blocks.push(section(&raw.header, &raw.lines));
    }

    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for line in block {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Render one `server` line, without indentation.
///
/// Only non-default options are written: `check` when health checks are
/// on, `weight` when not 1, `maxconn` when not 32.
pub fn server_line(server: &Server) -> String {
    format!("server {}", server.directive_args())
}

fn section(header: &str, lines: &[String]) -> Vec<String> {
    let mut block = Vec::with_capacity(lines.len() + 1);
    block.push(header.to_string());
    block.extend(lines.iter().map(|l| indent(l)));
    block
}

fn frontend_block(frontend: &Frontend) -> Vec<String> {
    let mut block = vec![format!("frontend {}", frontend.name)];
    if let Some(bind) = &frontend.bind {
        block.push(indent(&format!("bind {}", bind)));
    }
    if let Some(mode) = frontend.mode {
        block.push(indent(&format!("mode {}", mode)));
    }
    if let Some(backend) = &frontend.default_backend {
        block.push(indent(&format!("default_backend {}", backend)));
    }
    if !frontend.enabled {
        block.push(indent("disabled"));
    }
    block.extend(frontend.extra.iter().map(|l| indent(l)));
    block
}

fn backend_block(backend: &Backend) -> Vec<String> {
    let mut block = vec![format!("backend {}", backend.name)];
    if let Some(mode) = backend.mode {
        block.push(indent(&format!("mode {}", mode)));
    }
    block.push(indent(&format!("balance {}", backend.balance)));
    if !backend.enabled {
        block.push(indent("disabled"));
    }
    block.extend(backend.servers.iter().map(|s| indent(&server_line(s))));
    block.extend(backend.extra.iter().map(|l| indent(l)));
    block
}

fn indent(line: &str) -> String {
    format!("{}{}", INDENT, line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Backend, Bind, Frontend, Mode, Server, Topology};

    #[test]
    fn test_server_line_omits_defaults() {
        let server = Server::new("s1", "10.0.0.5", 8080);
        assert_eq!(server_line(&server), "server s1 10.0.0.5:8080 check");

        let mut server = Server::new("s2", "10.0.0.6", 8080);
        server.check = false;
        assert_eq!(server_line(&server), "server s2 10.0.0.6:8080");
    }

    #[test]
    fn test_server_line_non_default_options() {
        let mut server = Server::new("s1", "10.0.0.5", 8080);
        server.weight = 5;
        server.maxconn = 100;
        server.enabled = false;
        server.options = "inter 2000 rise 2".into();
        assert_eq!(
            server_line(&server),
            "server s1 10.0.0.5:8080 check weight 5 maxconn 100 disabled inter 2000 rise 2"
        );
    }

    #[test]
    fn test_serialize_layout() {
        let mut frontend = Frontend::new("main", Bind::new("0.0.0.0", 80));
        frontend.mode = Some(Mode::Http);
        frontend.default_backend = Some("web".into());
        frontend.extra.push("option forwardfor".into());

        let mut backend = Backend::new("web");
        backend.mode = Some(Mode::Http);
        backend.servers.push(Server::new("s1", "10.0.0.5", 8080));

        let topology = Topology::from_parts(
            vec![],
            vec!["daemon".into()],
            vec!["mode http".into()],
            vec![frontend],
            vec![backend],
            vec![],
        )
        .unwrap();

        let expected = "\
global
    daemon

defaults
    mode http

frontend main
    bind 0.0.0.0:80
    mode http
    default_backend web
    option forwardfor

backend web
    mode http
    balance roundrobin
    server s1 10.0.0.5:8080 check
";
        assert_eq!(serialize(&topology), expected);
    }

    #[test]
    fn test_serialize_sorted_by_name() {
        let topology = Topology::new(
            vec![
                Frontend::new("zeta", Bind::new("*", 81)),
                Frontend::new("alpha", Bind::new("*", 80)),
            ],
            vec![Backend::new("web"), Backend::new("api")],
        )
        .unwrap();

        let text = serialize(&topology);
        let alpha = text.find("frontend alpha").unwrap();
        let zeta = text.find("frontend zeta").unwrap();
        let api = text.find("backend api").unwrap();
        let web = text.find("backend web").unwrap();
        assert!(alpha < zeta && zeta < api && api < web);
    }

    #[test]
    fn test_disabled_sections_marked() {
        let mut backend = Backend::new("old");
        backend.enabled = false;
        let topology = Topology::new(vec![], vec![backend]).unwrap();

        assert!(serialize(&topology).contains("backend old\n    balance roundrobin\n    disabled\n"));
    }
}
