//! Wire framing for the separator-delimited command protocol.
//!
//! ```text
//! <name>;                      no-value command
//! <name>|<value>;              single-value command
//! <name>|<v1>|<v2>|...|<vN>;   multi-value command
//! ```
//!
//! There is no escaping: a separator can never appear inside a name or value.
use serde::{Deserialize, Serialize};

use super::queue::Pattern;

pub const DEFAULT_SEGMENT_SEPARATOR: u8 = b';';
pub const DEFAULT_VALUE_SEPARATOR: u8 = b'|';
pub const DEFAULT_MAX_BUFFER: usize = 4096;

/// The two control characters of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Separators {
    /// Ends one command
    pub segment: u8,
    /// Splits a command's name from its value(s)
    pub value: u8,
}

impl Default for Separators {
    fn default() -> Self {
        Self { segment: DEFAULT_SEGMENT_SEPARATOR, value: DEFAULT_VALUE_SEPARATOR }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandValues {
    None,
    Single(String),
    Multiple(Vec<String>),
}

/// One framed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub name: String,
    pub values: CommandValues,
}

impl CommandRecord {
    pub fn bare(name: impl Into<String>) -> Self {
        Self { name: name.into(), values: CommandValues::None }
    }

    /// Subject the queue matches against: the bare name, or name followed by values.
    pub fn to_pattern(&self) -> Pattern {
        match &self.values {
            CommandValues::None => Pattern::Scalar(self.name.clone()),
            CommandValues::Single(v) => Pattern::Sequence(vec![self.name.clone(), v.clone()]),
            CommandValues::Multiple(vs) => {
                let mut seq = Vec::with_capacity(vs.len() + 1);
                seq.push(self.name.clone());
                seq.extend(vs.iter().cloned());
                Pattern::Sequence(seq)
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && matches!(self.values, CommandValues::None)
    }

    fn from_segment(segment: &[u8], value_separator: u8) -> Self {
        let mut parts = segment
            .split(|b| *b == value_separator)
            .map(|p| String::from_utf8_lossy(p).into_owned());
        let name = parts.next().unwrap_or_default();
        let mut rest: Vec<String> = parts.collect();
        let values = match rest.len() {
            0 => CommandValues::None,
            1 => CommandValues::Single(rest.remove(0)),
            _ => CommandValues::Multiple(rest),
        };
        Self { name, values }
    }
}

/// Encode a command for the wire: `name;` or `name|value;`
pub fn encode_command(name: &str, value: Option<&str>, separators: Separators) -> String {
    let mut out = String::with_capacity(name.len() + value.map_or(0, str::len) + 2);
    out.push_str(name);
    if let Some(v) = value {
        out.push(separators.value as char);
        out.push_str(v);
    }
    out.push(separators.segment as char);
    out
}

/// Incremental framer; keeps a partial segment between pushes.
pub struct CommandFramer {
    buffer: Vec<u8>,
    separators: Separators,
    max_buffer: usize,
    overflows: u64,
    /// Set after an overflow; bytes are dropped through the next segment separator
    discarding: bool,
}

impl CommandFramer {
    pub fn new(separators: Separators) -> Self {
        Self::with_max_buffer(separators, DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(separators: Separators, max_buffer: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            separators,
            max_buffer: max_buffer.max(1),
            overflows: 0,
            discarding: false,
        }
    }

    /// Feed one chunk, returning every command it completed in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<CommandRecord> {
        let mut records = Vec::new();

        for &b in chunk {
            if b == self.separators.segment {
                if self.discarding {
                    self.discarding = false;
                } else {
                    records.push(CommandRecord::from_segment(&self.buffer, self.separators.value));
                }
                self.buffer.clear();
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buffer.len() >= self.max_buffer {
                self.overflows += 1;
                log::warn!(
                    "Command buffer exceeded {} bytes without a segment separator, dropping command",
                    self.max_buffer
                );
                self.buffer.clear();
                self.discarding = true;
                continue;
            }
            self.buffer.push(b);
        }

        records
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Bytes currently held for an incomplete command
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn separators(&self) -> Separators {
        self.separators
    }
}

impl Default for CommandFramer {
    fn default() -> Self {
        Self::new(Separators::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected() -> Vec<CommandRecord> {
        vec![
            CommandRecord::bare("a"),
            CommandRecord { name: "b".into(), values: CommandValues::Single("1".into()) },
            CommandRecord {
                name: "c".into(),
                values: CommandValues::Multiple(vec!["1".into(), "2".into(), "3".into()]),
            },
        ]
    }

    #[test]
    fn test_frames_single_chunk() {
        let mut framer = CommandFramer::default();
        assert_eq!(framer.push(b"a;b|1;c|1|2|3;"), expected());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_frames_independent_of_chunking() {
        let input = b"a;b|1;c|1|2|3;";
        for split in 0..=input.len() {
            let mut framer = CommandFramer::default();
            let mut records = framer.push(&input[..split]);
            records.extend(framer.push(&input[split..]));
            assert_eq!(records, expected(), "split at {}", split);
        }

        let mut framer = CommandFramer::default();
        let records: Vec<_> = input.iter().flat_map(|b| framer.push(&[*b])).collect();
        assert_eq!(records, expected());
    }

    #[test]
    fn test_partial_command_is_held() {
        let mut framer = CommandFramer::default();
        assert!(framer.push(b"temp|2").is_empty());
        assert_eq!(framer.buffered(), 6);
        let records = framer.push(b"1.5;");
        assert_eq!(records[0].values, CommandValues::Single("21.5".into()));
    }

    #[test]
    fn test_multibyte_utf8_across_chunks() {
        let text = "name|caf\u{e9};".as_bytes();
        let mut framer = CommandFramer::default();
        assert!(framer.push(&text[..9]).is_empty());
        let records = framer.push(&text[9..]);
        assert_eq!(records[0].values, CommandValues::Single("caf\u{e9}".into()));
    }

    #[test]
    fn test_custom_separators() {
        let mut framer = CommandFramer::new(Separators { segment: b'\n', value: b':' });
        let records = framer.push(b"led:on\nping\n");
        assert_eq!(records[0], CommandRecord { name: "led".into(), values: CommandValues::Single("on".into()) });
        assert_eq!(records[1], CommandRecord::bare("ping"));
    }

    #[test]
    fn test_buffer_cap_drops_runaway_input() {
        let mut framer = CommandFramer::with_max_buffer(Separators::default(), 8);
        assert!(framer.push(&[b'x'; 20]).is_empty());
        assert!(framer.buffered() <= 8);
        assert_eq!(framer.overflows(), 1);

        framer.reset();
        assert_eq!(framer.push(b"ok;"), vec![CommandRecord::bare("ok")]);
    }

    #[test]
    fn test_overflowed_segment_tail_is_not_framed() {
        let mut framer = CommandFramer::with_max_buffer(Separators::default(), 8);
        assert!(framer.push(b"xxxxxxxxxxok;").is_empty());
        assert_eq!(framer.buffered(), 0);

        // same thing with the tail arriving in a later chunk
        assert!(framer.push(b"yyyyyyyyyy").is_empty());
        assert!(framer.push(b"status|ok;").is_empty());
        assert_eq!(framer.overflows(), 2);

        // framing resumes after the separator
        assert_eq!(framer.push(b"ok;"), vec![CommandRecord::bare("ok")]);
    }

    #[test]
    fn test_empty_segment_is_blank() {
        let mut framer = CommandFramer::default();
        let records = framer.push(b";");
        assert!(records[0].is_blank());
    }

    #[test]
    fn test_record_to_pattern() {
        assert_eq!(CommandRecord::bare("pong").to_pattern(), Pattern::from("pong"));
        let rec = CommandRecord { name: "status".into(), values: CommandValues::Single("ok".into()) };
        assert_eq!(rec.to_pattern(), Pattern::from(["status", "ok"]));
    }

    #[test]
    fn test_encode_command() {
        let seps = Separators::default();
        assert_eq!(encode_command("ping", None, seps), "ping;");
        assert_eq!(encode_command("status", Some("Exiting"), seps), "status|Exiting;");
    }
}
