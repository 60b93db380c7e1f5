//! Positional parser for the `/proc/<pid>/stat` record.
//!
//! Fields are addressed by their zero-based position in the
//! whitespace-separated record. The second field is the command name in
//! parentheses and may itself contain spaces, so everything after the last
//! `)` is split separately and the positions are offset accordingly.

/// User-mode ticks.
pub const UTIME_POS: usize = 13;
/// Kernel-mode ticks.
pub const STIME_POS: usize = 14;
/// Process start time in ticks since boot.
pub const START_POS: usize = 21;
/// Virtual memory size in bytes.
pub const VSS_POS: usize = 22;
/// Resident set size in pages.
pub const RSS_POS: usize = 23;

/// Position of the first field following the command name.
const AFTER_COMM_POS: usize = 2;

/// One parsed stat record borrowing the raw file contents.
#[derive(Debug)]
pub struct StatRecord<'a> {
    fields: Vec<&'a [u8]>,
    offset: usize,
}

impl<'a> StatRecord<'a> {
    /// Split a raw record into fields. Never fails; missing fields read as unknown.
    pub fn parse(contents: &'a [u8]) -> Self {
        match contents.iter().rposition(|&b| b == b')') {
            Some(end) => StatRecord {
                fields: split_fields(&contents[end + 1..]),
                offset: AFTER_COMM_POS,
            },
            None => StatRecord {
                fields: split_fields(contents),
                offset: 0,
            },
        }
    }

    /// Raw bytes of the field at `pos`.
    pub fn field(&self, pos: usize) -> Option<&'a [u8]> {
        let idx = pos.checked_sub(self.offset)?;
        self.fields.get(idx).copied()
    }

    /// Field at `pos` as a non-negative decimal, `None` if absent or malformed.
    pub fn number(&self, pos: usize) -> Option<i64> {
        self.field(pos).and_then(parse_decimal)
    }

    pub fn utime(&self) -> Option<i64> {
        self.number(UTIME_POS)
    }

    pub fn stime(&self) -> Option<i64> {
        self.number(STIME_POS)
    }

    pub fn start_ticks(&self) -> Option<i64> {
        self.number(START_POS)
    }

    pub fn vss_bytes(&self) -> Option<i64> {
        self.number(VSS_POS)
    }

    pub fn rss_pages(&self) -> Option<i64> {
        self.number(RSS_POS)
    }
}

fn split_fields(bytes: &[u8]) -> Vec<&[u8]> {
    bytes
        .split(|b| b.is_ascii_whitespace())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Parses an unsigned ASCII decimal. Any non-digit byte or overflow yields `None`.
pub fn parse_decimal(digits: &[u8]) -> Option<i64> {
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for &d in digits {
        if !d.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(i64::from(d - b'0'))?;
    }
    Some(n)
}
