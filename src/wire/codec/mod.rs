use std::fmt;

use thiserror::Error;

pub const MAX_FRAME_SIZE_BYTES: usize = 8 * 1024 * 1024;
pub const CONTENT_LENGTH_HEADER: &str = "content-length";

const NULL_BYTE: u8 = 0;
const LINE_FEED: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let command = match value {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(command)
    }

    // CONNECT and CONNECTED predate header escaping and must stay verbatim.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Repeated headers are legal; the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decoded {
    Frame(Frame),
    Heartbeat,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CodecError {
    #[error("frame size {size} exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("unknown STOMP command '{command}'")]
    UnknownCommand { command: String },
    #[error("malformed header line '{line}'")]
    MalformedHeader { line: String },
    #[error("frame is not valid UTF-8 in its command or headers")]
    InvalidUtf8,
    #[error("invalid content-length '{value}'")]
    InvalidContentLength { value: String },
    #[error("frame body is not followed by a NUL terminator")]
    MissingNullTerminator,
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let escape = frame.command.escapes_headers();
    let mut encoded = Vec::with_capacity(64 + frame.body.len());
    encoded.extend_from_slice(frame.command.as_str().as_bytes());
    encoded.push(LINE_FEED);

    for (name, value) in &frame.headers {
        if escape {
            encoded.extend_from_slice(escape_header(name).as_bytes());
            encoded.push(b':');
            encoded.extend_from_slice(escape_header(value).as_bytes());
        } else {
            encoded.extend_from_slice(name.as_bytes());
            encoded.push(b':');
            encoded.extend_from_slice(value.as_bytes());
        }
        encoded.push(LINE_FEED);
    }

    if !frame.body.is_empty() && frame.header(CONTENT_LENGTH_HEADER).is_none() {
        encoded.extend_from_slice(
            format!("{CONTENT_LENGTH_HEADER}:{}", frame.body.len()).as_bytes(),
        );
        encoded.push(LINE_FEED);
    }

    encoded.push(LINE_FEED);
    encoded.extend_from_slice(&frame.body);
    encoded.push(NULL_BYTE);
    encoded
}

pub fn encode_heartbeat() -> &'static [u8] {
    b"\n"
}

/// Incremental decoder over a byte stream that may split frames anywhere.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    #[cfg(test)]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn next_decoded(&mut self) -> Result<Option<Decoded>, CodecError> {
        match self.buffer.as_slice() {
            [] | [CARRIAGE_RETURN] => return Ok(None),
            [LINE_FEED, ..] => {
                self.buffer.drain(..1);
                return Ok(Some(Decoded::Heartbeat));
            }
            [CARRIAGE_RETURN, LINE_FEED, ..] => {
                self.buffer.drain(..2);
                return Ok(Some(Decoded::Heartbeat));
            }
            _ => {}
        }

        let Some((head_end, body_start)) = find_head_end(&self.buffer) else {
            return self.incomplete();
        };

        let head = std::str::from_utf8(&self.buffer[..head_end]).map_err(|_| CodecError::InvalidUtf8)?;
        let (command, headers) = parse_head(head)?;
        let frame_without_body = Frame {
            command,
            headers,
            body: Vec::new(),
        };

        let body_end = match frame_without_body.header(CONTENT_LENGTH_HEADER) {
            Some(raw_length) => {
                let length = raw_length.trim().parse::<usize>().map_err(|_| {
                    CodecError::InvalidContentLength {
                        value: raw_length.to_owned(),
                    }
                })?;
                if length > self.max_frame_size {
                    return Err(CodecError::FrameTooLarge {
                        size: length,
                        limit: self.max_frame_size,
                    });
                }
                let body_end = body_start + length;
                if self.buffer.len() <= body_end {
                    return self.incomplete();
                }
                if self.buffer[body_end] != NULL_BYTE {
                    return Err(CodecError::MissingNullTerminator);
                }
                body_end
            }
            None => match self.buffer[body_start..]
                .iter()
                .position(|byte| *byte == NULL_BYTE)
            {
                Some(offset) => body_start + offset,
                None => return self.incomplete(),
            },
        };

        let body = self.buffer[body_start..body_end].to_vec();
        self.buffer.drain(..=body_end);

        Ok(Some(Decoded::Frame(Frame {
            body,
            ..frame_without_body
        })))
    }

    fn incomplete(&self) -> Result<Option<Decoded>, CodecError> {
        if self.buffer.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: self.buffer.len(),
                limit: self.max_frame_size,
            });
        }
        Ok(None)
    }
}

/// Returns the end of the command+headers block and the start of the body.
fn find_head_end(buffer: &[u8]) -> Option<(usize, usize)> {
    for (index, byte) in buffer.iter().enumerate() {
        if *byte != LINE_FEED {
            continue;
        }
        match &buffer[index + 1..] {
            [LINE_FEED, ..] => return Some((index, index + 2)),
            [CARRIAGE_RETURN, LINE_FEED, ..] => return Some((index, index + 3)),
            _ => {}
        }
    }
    None
}

fn parse_head(head: &str) -> Result<(Command, Vec<(String, String)>), CodecError> {
    let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));
    let command_line = lines.next().unwrap_or_default();
    let command = Command::parse(command_line).ok_or_else(|| CodecError::UnknownCommand {
        command: command_line.to_owned(),
    })?;

    let unescape = command.escapes_headers();
    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(CodecError::MalformedHeader {
                line: line.to_owned(),
            });
        };
        if unescape {
            headers.push((unescape_header(name), unescape_header(value)));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    Ok((command, headers))
}

fn escape_header(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    escaped
}

// Unknown escape sequences are kept verbatim: STOMP 1.0 brokers do not
// escape at all and may send literal backslashes.
fn unescape_header(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            unescaped.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some('c') => unescaped.push(':'),
            Some(other) => {
                unescaped.push('\\');
                unescaped.push(other);
            }
            None => unescaped.push('\\'),
        }
    }
    unescaped
}
