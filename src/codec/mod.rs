//! Config Codec
//!
//! Converts between the Topology Model and HAProxy's configuration text.
//!
//! Only the managed subset is decomposed (binds, mode, default backend,
//! balance algorithm, server lines). Everything else is carried as opaque
//! directive text so that operator-written detail survives every
//! parse → serialize cycle.

mod parser;
mod serializer;

use std::io::ErrorKind;
use std::path::Path;

pub use parser::parse;
pub use serializer::{serialize, server_line};

use crate::error::{Error, Result};
use crate::topology::Topology;

/// Read and parse an HAProxy configuration file
pub fn parse_file(path: &Path) -> Result<Topology> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::ConfigNotFound(path.to_path_buf()),
        ErrorKind::PermissionDenied => Error::ConfigPermissionDenied(path.to_path_buf()),
        ErrorKind::InvalidData => Error::Parse {
            line: 0,
            reason: format!("{} is not valid UTF-8", path.display()),
        },
        _ => Error::Io(e),
    })?;
    parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Backend, Balance, Bind, Frontend, Mode, RawSection, Server};
    use tempfile::tempdir;

    fn sample_topology() -> Topology {
        let mut main = Frontend::new("main", Bind::new("0.0.0.0", 80));
        main.mode = Some(Mode::Http);
        main.default_backend = Some("web".into());
        main.extra = vec![
            "option forwardfor".into(),
            "http-request set-header X-Forwarded-Proto http".into(),
        ];

        let mut tls = Frontend::new("tls", Bind::new("[::]", 443));
        tls.bind.as_mut().unwrap().options = "ssl crt /etc/ssl/site.pem alpn h2".into();
        tls.enabled = false;

        let mut web = Backend::new("web");
        web.mode = Some(Mode::Http);
        web.balance = Balance::LeastConn;
        web.extra = vec!["option httpchk GET /health".into()];
        web.servers.push(Server::new("s1", "10.0.0.5", 8080));
        let mut s2 = Server::new("s2", "10.0.0.6", 8080);
        s2.weight = 10;
        s2.maxconn = 500;
        s2.check = false;
        s2.options = "inter 2000 rise 2 fall 3".into();
        web.servers.push(s2);

        let mut db = Backend::new("db");
        db.mode = Some(Mode::Tcp);
        db.balance = Balance::Other("url_param userid".into());
        db.enabled = false;
        let mut replica = Server::new("replica", "db2.internal", 5432);
        replica.enabled = false;
        db.servers.push(replica);

        Topology::from_parts(
            vec!["# generated".into()],
            crate::topology::default_global(),
            crate::topology::default_defaults(),
            vec![main, tls],
            vec![web, db],
            vec![RawSection {
                header: "listen stats".into(),
                lines: vec!["bind :8404".into(), "stats enable".into()],
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_preserves_model() {
        let model = sample_topology();
        let parsed = parse(&serialize(&model)).unwrap();
        assert_eq!(parsed, model);
    }

    #[test]
    fn test_round_trip_minimal_model() {
        let model = Topology::new(vec![], vec![]).unwrap();
        assert_eq!(parse(&serialize(&model)).unwrap(), model);
    }

    #[test]
    fn test_round_trip_edge_models() {
        let mut unbound = Frontend::new("sock", Bind::new("*", 80));
        unbound.bind = None;
        unbound.extra = vec![
            "bind /var/run/haproxy.sock".into(),
            "mode health".into(),
            "default_backend".into(),
        ];

        let mut rebound = Frontend::new("multi", Bind::new("", 80));
        rebound.enabled = false;
        rebound.extra = vec!["bind :81".into(), "disabled".into()];

        let mut odd = Backend::new("odd");
        odd.balance = Balance::Other("hdr(host)".into());
        odd.extra = vec!["balance source".into(), "server s9 10.0.0.9".into()];
        let mut s1 = Server::new("s1", "10.0.0.1", 80);
        s1.options = "weight 0 inter 2000".into();
        odd.servers.push(s1);

        let mut named = Backend::new("named");
        named.balance = Balance::Other("leastconn".into());

        let model = Topology::from_parts(
            vec!["# generated".into(), "# do not edit".into()],
            vec!["daemon".into()],
            vec!["mode tcp".into()],
            vec![unbound, rebound],
            vec![odd, named],
            vec![
                RawSection {
                    header: "backend legacy # old pool".into(),
                    lines: vec!["server l1 10.0.9.1:80".into()],
                },
                RawSection {
                    header: "userlist admins".into(),
                    lines: vec![],
                },
            ],
        )
        .unwrap();

        assert_eq!(model.backend("named").unwrap().balance, Balance::LeastConn);
        assert_eq!(parse(&serialize(&model)).unwrap(), model);
    }

    #[test]
    fn test_serialize_is_idempotent() {
        let text = serialize(&sample_topology());
        assert_eq!(serialize(&parse(&text).unwrap()), text);
    }

    #[test]
    fn test_parse_file_not_found() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("haproxy.cfg");
        assert!(matches!(parse_file(&missing), Err(Error::ConfigNotFound(p)) if p == missing));
    }

    #[test]
    fn test_parse_file_reads_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("haproxy.cfg");
        std::fs::write(&path, serialize(&sample_topology())).unwrap();
        assert_eq!(parse_file(&path).unwrap(), sample_topology());
    }
}
