//! Output parsers
//!
//! One pure function per git command kind, turning raw text into typed
//! records. Parsers never touch the cache: a failed parse leaves state as is.

mod branches;
mod files;
mod locks;
mod log;
mod status;
mod version;

pub use branches::*;
pub use files::*;
pub use locks::*;
pub use log::*;
pub use status::*;
pub use version::*;

use tracing::debug;

use crate::error::{ParseError, Result};

/// Malformed lines tolerated before a whole parse is rejected
const MALFORMED_LINE_ALLOWANCE: usize = 2;

/// Counts skipped lines and decides whether the output as a whole is usable
///
/// A parse fails when more than two lines *and* more than 10% of the
/// non-empty lines could not be understood.
#[derive(Debug)]
pub(crate) struct MalformedTally {
    what: &'static str,
    total: usize,
    malformed: usize,
    first: Option<String>,
}

impl MalformedTally {
    pub(crate) fn new(what: &'static str) -> Self {
        Self {
            what,
            total: 0,
            malformed: 0,
            first: None,
        }
    }

    pub(crate) fn line(&mut self) {
        self.total += 1;
    }

    pub(crate) fn malformed(&mut self, line: &str) {
        debug!(what = self.what, "skipping malformed line: {:?}", line);
        self.malformed += 1;
        if self.first.is_none() {
            self.first = Some(line.to_string());
        }
    }

    pub(crate) fn finish(self) -> Result<()> {
        if self.malformed > MALFORMED_LINE_ALLOWANCE && self.malformed * 10 > self.total {
            return Err(ParseError::Unparsable {
                what: self.what,
                malformed: self.malformed,
                total: self.total,
                first: self.first.unwrap_or_default(),
            }
            .into());
        }
        Ok(())
    }
}

/// Undo git's C-style path quoting (`"a\tb"`, `"caf\303\251"`)
///
/// Unquoted input is returned unchanged.
pub fn unquote_path(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('a') => bytes.push(0x07),
            Some('b') => bytes.push(0x08),
            Some('f') => bytes.push(0x0c),
            Some('v') => bytes.push(0x0b),
            Some(d @ '0'..='7') => {
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                bytes.push((value & 0xff) as u8);
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
