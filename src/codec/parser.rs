//! HAProxy configuration text → Topology
//!
//! Block-scanning state machine. A line at column 0 whose first token is a
//! section keyword closes the current block and opens the next one; every
//! other non-blank line is a directive of the current block. Directives
//! that are not modeled are kept verbatim on the entity they belong to.
//!
//! The serializer always writes one `global` and one `defaults` ahead of
//! every proxy, so a file is only accepted when that layout keeps its
//! meaning: repeated `global` sections are merged, while a second or named
//! `defaults`, or a `defaults` after a proxy, is a parse error.

use std::collections::HashSet;
use std::mem;

use crate::error::{Error, Result};
use crate::topology::{
    is_section_keyword, Backend, BackendLine, Frontend, FrontendLine, RawSection, Topology,
    PROXY_KEYWORDS,
};

/// Block currently being filled
enum Block {
    Preamble,
    Global,
    Defaults,
    Frontend(Frontend),
    Backend {
        backend: Backend,
        balance_seen: bool,
    },
    Raw(RawSection),
}

#[derive(Default)]
struct Scanner {
    preamble: Vec<String>,
    global: Vec<String>,
    defaults: Vec<String>,
    frontends: Vec<Frontend>,
    backends: Vec<Backend>,
    sections: Vec<RawSection>,
    seen_defaults: bool,
    seen_proxy: bool,
    frontend_names: HashSet<String>,
    backend_names: HashSet<String>,
}

/// Parse HAProxy configuration text into a topology
pub fn parse(text: &str) -> Result<Topology> {
    let mut scanner = Scanner::default();
    let mut current = Block::Preamble;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let keyword = trimmed.split_whitespace().next().unwrap_or("");
        let at_column_zero = !raw_line.starts_with(char::is_whitespace);

        if is_section_keyword(keyword) {
            if !at_column_zero {
                return Err(Error::Parse {
                    line: line_no,
                    reason: format!(
                        "indented '{}' line; section headers must start at column 0",
                        keyword
                    ),
                });
            }
            let previous = mem::replace(&mut current, scanner.open(line_no, trimmed)?);
            scanner.close(previous);
            continue;
        }

        scanner.directive(&mut current, line_no, trimmed)?;
    }
    scanner.close(current);

    Topology::from_parts(
        scanner.preamble,
        scanner.global,
        scanner.defaults,
        scanner.frontends,
        scanner.backends,
        scanner.sections,
    )
}

impl Scanner {
    /// Start a block for a section header line
    fn open(&mut self, line_no: usize, header: &str) -> Result<Block> {
        let mut tokens = header.split_whitespace();
        let keyword = tokens.next().unwrap_or("");
        let name = tokens.next();
        let trailing = tokens.next().is_some();

        let reject = |reason: String| -> Result<Block> { Err(Error::Parse { line: line_no, reason }) };

        let block = match (keyword, name) {
            ("global", None) => Block::Global,
            ("global", Some(_)) => return reject("global section takes no arguments".into()),
            ("defaults", Some(name)) => {
                return reject(format!("named defaults section '{}' is not supported", name));
            }
            ("defaults", None) if self.seen_defaults => {
                return reject("only one defaults section is supported".into());
            }
            ("defaults", None) if self.seen_proxy => {
                return reject("defaults section must come before every proxy section".into());
            }
            ("defaults", None) => {
                self.seen_defaults = true;
                Block::Defaults
            }
            ("frontend", None) | ("backend", None) => {
                return reject(format!("{} section without a name", keyword));
            }
            ("frontend", Some(name)) if !trailing => {
                if !self.frontend_names.insert(name.to_string()) {
                    return reject(format!("duplicate frontend '{}'", name));
                }
                Block::Frontend(Frontend::named(name))
            }
            ("backend", Some(name)) if !trailing => {
                if !self.backend_names.insert(name.to_string()) {
                    return reject(format!("duplicate backend '{}'", name));
                }
                Block::Backend {
                    backend: Backend::new(name),
                    balance_seen: false,
                }
            }
            _ => Block::Raw(RawSection {
                header: header.to_string(),
                lines: Vec::new(),
            }),
        };

        if PROXY_KEYWORDS.contains(&keyword) {
            self.seen_proxy = true;
        }
        Ok(block)
    }

    /// Store a finished block
    fn close(&mut self, block: Block) {
        match block {
            Block::Frontend(frontend) => self.frontends.push(frontend),
            Block::Backend { backend, .. } => self.backends.push(backend),
            Block::Raw(section) => self.sections.push(section),
            Block::Preamble | Block::Global | Block::Defaults => {}
        }
    }

    fn directive(&mut self, block: &mut Block, line_no: usize, line: &str) -> Result<()> {
        match block {
            Block::Preamble if line.starts_with('#') => self.preamble.push(line.to_string()),
            Block::Preamble => {
                return Err(Error::Parse {
                    line: line_no,
                    reason: format!("directive '{}' outside of any section", line),
                });
            }
            Block::Global => self.global.push(line.to_string()),
            Block::Defaults => self.defaults.push(line.to_string()),
            Block::Raw(section) => section.lines.push(line.to_string()),
            Block::Frontend(frontend) => frontend_directive(frontend, line),
            Block::Backend {
                backend,
                balance_seen,
            } => backend_directive(backend, balance_seen, line_no, line)?,
        }
        Ok(())
    }
}

fn frontend_directive(frontend: &mut Frontend, line: &str) {
    match frontend.classify(line) {
        FrontendLine::Bind(bind) => frontend.bind = Some(bind),
        FrontendLine::Mode(mode) => frontend.mode = Some(mode),
        FrontendLine::DefaultBackend(backend) => frontend.default_backend = Some(backend),
        FrontendLine::Disabled => frontend.enabled = false,
        FrontendLine::Other => frontend.extra.push(line.to_string()),
    }
}

fn backend_directive(
    backend: &mut Backend,
    balance_seen: &mut bool,
    line_no: usize,
    line: &str,
) -> Result<()> {
    match backend.classify(line, *balance_seen) {
        BackendLine::Balance(balance) => {
            backend.balance = balance;
            *balance_seen = true;
        }
        BackendLine::Mode(mode) => backend.mode = Some(mode),
        BackendLine::Disabled => backend.enabled = false,
        BackendLine::Server(server) => {
            if backend.server(&server.name).is_some() {
                return Err(Error::Parse {
                    line: line_no,
                    reason: format!(
                        "duplicate server '{}' in backend '{}'",
                        server.name, backend.name
                    ),
                });
            }
            backend.servers.push(server);
        }
        BackendLine::Other => backend.extra.push(line.to_string()),
    }
    Ok(())
}
