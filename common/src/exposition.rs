//! Helpers for writing self-delimited blocks of Prometheus text.
//!
//! Every block starts with comment lines naming where the payload came from.
//! Failures are written as comments too, so a composite response built from
//! many blocks stays valid exposition text even when some of them failed.

use std::fmt;

pub const COMMENT_PREFIX: &str = "### ";

const BANNER_RULE: &str =
    "################################################################################\n";

/// Re-emits `text` as comment lines.
///
/// A trailing newline in `text` is kept as a bare empty line.
pub fn comment_out(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    for (idx, line) in lines.iter().enumerate() {
        if idx == last && line.is_empty() {
            out.push('\n');
            continue;
        }
        out.push_str(COMMENT_PREFIX);
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Comment header of one scrape block, e.g.
///
/// ```text
/// ### Static File Target
/// ### Path: /var/lib/app/last.prom
/// ### Config: /etc/cradle_exporter/targets.d/app.yml
/// ```
#[derive(Debug, Clone)]
pub struct BlockHeader<'a> {
    title: &'a str,
    fields: Vec<(&'static str, &'a str)>,
}

impl<'a> BlockHeader<'a> {
    pub fn new(title: &'a str) -> Self {
        Self {
            title,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &'static str, value: &'a str) -> Self {
        self.fields.push((name, value));
        self
    }

    /// Writes the header followed by the raw payload.
    pub fn write_payload(&self, w: &mut Vec<u8>, payload: &[u8]) {
        w.extend_from_slice(self.to_string().as_bytes());
        w.extend_from_slice(payload);
    }

    /// Writes the header with an `Err:` line and the commented-out error.
    pub fn write_error(&self, w: &mut Vec<u8>, reason: &str, err: &dyn fmt::Display) {
        let mut out = String::new();
        out.push_str(COMMENT_PREFIX);
        out.push_str(self.title);
        out.push('\n');
        out.push_str(COMMENT_PREFIX);
        out.push_str("Err: ");
        out.push_str(reason);
        out.push('\n');
        for (name, value) in &self.fields {
            push_field(&mut out, name, value);
        }
        out.push_str(&comment_out(&err.to_string()));
        w.extend_from_slice(out.as_bytes());
    }
}

impl fmt::Display for BlockHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{}", COMMENT_PREFIX, self.title)?;
        for (name, value) in &self.fields {
            writeln!(f, "{}{}: {}", COMMENT_PREFIX, name, value)?;
        }
        Ok(())
    }
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(COMMENT_PREFIX);
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

/// Wraps one target's output in the banner used by the composite endpoint.
pub fn write_banner(w: &mut Vec<u8>, name: &str, block: &[u8]) {
    w.extend_from_slice(BANNER_RULE.as_bytes());
    w.extend_from_slice(format!("### From: {}\n", name).as_bytes());
    w.extend_from_slice(BANNER_RULE.as_bytes());
    w.push(b'\n');
    w.extend_from_slice(block);
    w.push(b'\n');
}
