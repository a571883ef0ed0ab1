//! Incremental IRC line parsing.
//!
//! Socket reads arrive in arbitrary chunks, so a message may be split across
//! two reads (or in the middle of a multi-byte character). [`IrcBuffer`]
//! accumulates the raw bytes and only hands out messages whose line is known
//! to be complete.

use std::sync::LazyLock;

use regex::Regex;

/// Line terminator used by the Twitch IRC server.
pub const TERMINATOR: &str = "\r\n";

static MESSAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?:@(?P<tags>\S+) )?:(?P<info>\S+) (?P<command>[A-Z]+) #(?P<channel>\S+)(?: :(?P<message>[^\r\n]*))?",
    )
    .unwrap()
});

static PING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^PING (?P<payload>[^\r\n]*)\r$").unwrap());

static RECONNECT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?::\S+ )?RECONNECT\r$").unwrap());

/// One channel message, tags still raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: Option<String>,
    /// Prefix (`nick!user@host` or the server name).
    pub info: String,
    pub command: String,
    pub channel: String,
    pub message: Option<String>,
}

impl IrcMessage {
    /// Parsed and unescaped tag pairs.
    pub fn tags(&self) -> Vec<(&str, String)> {
        self.tags.as_deref().map(parse_tags).unwrap_or_default()
    }

    /// Nick from the prefix, if the message came from a user.
    pub fn nick(&self) -> Option<&str> {
        self.info.split_once('!').map(|(nick, _)| nick)
    }
}

/// Everything recovered from one read.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Parsed {
    pub messages: Vec<IrcMessage>,
    /// Payloads of server `PING`s to echo back.
    pub pings: Vec<String>,
    /// The server asked us to reconnect.
    pub reconnect: bool,
}

/// Accumulating receive buffer.
#[derive(Debug, Default)]
pub struct IrcBuffer {
    text: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
}

impl IrcBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text currently held back for the next read.
    pub fn remainder(&self) -> &str {
        &self.text
    }

    /// Feed raw bytes from the socket.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Parsed {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(s) => s.len(),
            // Keep an incomplete trailing sequence, replace anything else.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let rest = self.pending.split_off(valid);
        let chunk = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        self.feed(&chunk)
    }

    /// Feed decoded text.
    pub fn feed(&mut self, chunk: &str) -> Parsed {
        self.text.push_str(chunk);
        let buffer = std::mem::take(&mut self.text);

        // Control lines are only read from the region known to be complete.
        let complete = buffer.rfind(TERMINATOR).map_or("", |i| &buffer[..i + 2]);
        let pings = PING_REGEX
            .captures_iter(complete)
            .map(|c| c["payload"].to_string())
            .collect();
        let reconnect = RECONNECT_REGEX.is_match(complete);

        let mut matches: Vec<(usize, IrcMessage)> = MESSAGE_REGEX
            .captures_iter(&buffer)
            .map(|c| {
                let start = c.get(0).map_or(0, |m| m.start());
                let message = IrcMessage {
                    tags: c.name("tags").map(|m| m.as_str().to_string()),
                    info: c["info"].to_string(),
                    command: c["command"].to_string(),
                    channel: c["channel"].to_string(),
                    message: c.name("message").map(|m| m.as_str().to_string()),
                };
                (start, message)
            })
            .collect();

        if buffer.ends_with(TERMINATOR) {
            // Everything is complete.
        } else if let Some(&(last_start, _)) = matches.last() {
            if buffer[last_start..].contains(TERMINATOR) {
                self.text = tail_after_terminator(&buffer).to_string();
            } else {
                matches.pop();
                self.text = buffer[last_start..].to_string();
            }
        } else {
            self.text = tail_after_terminator(&buffer).to_string();
        }

        Parsed {
            messages: matches.into_iter().map(|(_, m)| m).collect(),
            pings,
            reconnect,
        }
    }
}

fn tail_after_terminator(buffer: &str) -> &str {
    match buffer.rfind(TERMINATOR) {
        Some(i) => &buffer[i + TERMINATOR.len()..],
        None => buffer,
    }
}

/// Undo IRCv3 tag value escaping.
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Split a raw tag list (`a=1;b=x\sy`) into unescaped pairs. Tags without a
/// value map to the empty string.
pub fn parse_tags(raw: &str) -> Vec<(&str, String)> {
    raw.split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key, unescape_tag_value(value)),
            None => (pair, String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_chunk_keeps_incomplete_tail() {
        let mut buffer = IrcBuffer::new();
        let parsed = buffer.feed("@id=1;mod=1 :u!u@u.tmi.twitch.tv PRIVMSG #c :hi\r\n@id=2");
        assert_eq!(parsed.messages.len(), 1);
        let message = &parsed.messages[0];
        assert_eq!(message.tags(), vec![("id", "1".to_string()), ("mod", "1".to_string())]);
        assert_eq!(message.command, "PRIVMSG");
        assert_eq!(message.channel, "c");
        assert_eq!(message.message.as_deref(), Some("hi"));
        assert_eq!(message.nick(), Some("u"));
        assert_eq!(buffer.remainder(), "@id=2");

        let parsed = buffer.feed(" :v!v@v.tmi.twitch.tv PRIVMSG #c :there\r\n");
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].tags(), vec![("id", "2".to_string())]);
        assert_eq!(buffer.remainder(), "");
    }

    #[test]
    fn test_cut_last_message_is_reparsed() {
        let mut buffer = IrcBuffer::new();
        let parsed = buffer.feed(":u!u@u PRIVMSG #c :one\r\n:u!u@u PRIVMSG #c :tw");
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(buffer.remainder(), ":u!u@u PRIVMSG #c :tw");

        let parsed = buffer.feed("o\r\n");
        assert_eq!(parsed.messages[0].message.as_deref(), Some("two"));
    }

    #[test]
    fn test_unrecognized_traffic_is_discarded() {
        let mut buffer = IrcBuffer::new();
        let parsed = buffer.feed(":tmi.twitch.tv 001 justinfan1 :Welcome, GLHF!\r\n");
        assert!(parsed.messages.is_empty());
        assert_eq!(buffer.remainder(), "");
    }

    #[test]
    fn test_ping_and_reconnect() {
        let mut buffer = IrcBuffer::new();
        let parsed = buffer.feed("PING :tmi.twitch.tv\r\n:tmi.twitch.tv RECONNECT\r\nPING :par");
        assert_eq!(parsed.pings, vec![":tmi.twitch.tv"]);
        assert!(parsed.reconnect);

        let parsed = buffer.feed("tial\r\n");
        assert_eq!(parsed.pings, vec![":partial"]);
        assert!(!parsed.reconnect);
    }

    #[test]
    fn test_split_multibyte_character() {
        let line = ":u!u@u PRIVMSG #c :héllo\r\n".as_bytes();
        let cut = line.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let mut buffer = IrcBuffer::new();
        assert!(buffer.feed_bytes(&line[..cut]).messages.is_empty());
        let parsed = buffer.feed_bytes(&line[cut..]);
        assert_eq!(parsed.messages[0].message.as_deref(), Some("héllo"));
    }

    #[test]
    fn test_unescape_tag_value() {
        assert_eq!(unescape_tag_value(r"a\sb\:c\\d"), r"a b;c\d");
        assert_eq!(unescape_tag_value(r"line\rbreak\n"), "line\rbreak\n");
        assert_eq!(unescape_tag_value("trailing\\"), "trailing");
    }

    #[test]
    fn test_parse_irc_message() {
        let line = "@badge-info=;badges=bits/100;bits=100;color=#FF0000;display-name=Cheerer;emotes=;id=abc123;mod=0;room-id=12345;subscriber=0;system-msg=Cheer\\sof\\s100;tmi-sent-ts=1234567890;turbo=0;user-id=67890;user-type= :cheerer!cheerer@cheerer.tmi.twitch.tv PRIVMSG #channel :cheer100 Great stream!\r\n";
        let parsed = IrcBuffer::new().feed(line);
        let message = &parsed.messages[0];
        let tags = message.tags();
        assert!(tags.contains(&("bits", "100".to_string())));
        assert!(tags.contains(&("system-msg", "Cheer of 100".to_string())));
        assert!(tags.contains(&("user-type", String::new())));
        assert_eq!(message.message.as_deref(), Some("cheer100 Great stream!"));
    }

    fn well_formed_line() -> impl Strategy<Value = String> {
        (
            proptest::option::of("[a-z]{1,6}=[a-z0-9]{0,6}(;[a-z-]{1,6}=[a-z0-9]{0,4}){0,3}"),
            "[a-z]{1,8}",
            prop::sample::select(vec!["PRIVMSG", "USERNOTICE", "CLEARMSG"]),
            "[a-z]{1,8}",
            "[a-zA-Z0-9 ]{0,24}",
        )
            .prop_map(|(tags, nick, command, channel, text)| {
                let tags = tags.map(|t| format!("@{t} ")).unwrap_or_default();
                format!("{tags}:{nick}!{nick}@{nick}.tmi.twitch.tv {command} #{channel} :{text}\r\n")
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_split_reassembly(lines in prop::collection::vec(well_formed_line(), 1..8), cut in any::<prop::sample::Index>()) {
            let data = lines.concat();
            let whole = IrcBuffer::new().feed_bytes(data.as_bytes()).messages;
            prop_assert_eq!(whole.len(), lines.len());

            let cut = cut.index(data.len() + 1);
            let mut buffer = IrcBuffer::new();
            let mut split = buffer.feed_bytes(&data.as_bytes()[..cut]).messages;
            split.extend(buffer.feed_bytes(&data.as_bytes()[cut..]).messages);
            prop_assert_eq!(split, whole);
            prop_assert_eq!(buffer.remainder(), "");
        }
    }
}
