//! Message sources and framing
//!
//! The dispatcher consumes an unbounded, restartable sequence of command
//! messages through [`MessageSource`]. How a byte stream is cut into
//! messages is a property of the transport, selected by [`Framing`]:
//!
//! - `close`: one message per writer session; the message ends when the last
//!   writer closes the pipe. This is what deployed containers do
//!   (`echo "reboot" > /opt/cmdpipe/dockerpipe`). Two writers whose sessions
//!   overlap get their bytes concatenated into one message.
//! - `line`: every `\n`-terminated line is a message; the read end survives
//!   across writers.
//! - `length-prefixed`: a 4-byte big-endian length followed by the payload.

use crate::errors::{ChannelError, DockerpipeError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Size of the length header used by [`Framing::LengthPrefixed`]
const LENGTH_HEADER_BYTES: usize = 4;

/// How a byte stream is split into messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Message ends when the writer closes the channel
    #[default]
    Close,
    /// Newline-delimited messages
    Line,
    /// 4-byte big-endian length followed by the payload
    LengthPrefixed,
}

impl Framing {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Line => "line",
            Self::LengthPrefixed => "length-prefixed",
        }
    }

    /// Whether the read end stays open across messages
    fn keeps_stream_open(&self) -> bool {
        !matches!(self, Self::Close)
    }
}

impl std::str::FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "close" => Ok(Self::Close),
            "line" => Ok(Self::Line),
            "length-prefixed" | "length_prefixed" => Ok(Self::LengthPrefixed),
            _ => Err(format!(
                "Unknown framing: {}. Supported framings: close, line, length-prefixed",
                s
            )),
        }
    }
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One command message received from the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    command: String,
}

impl Message {
    /// Decode raw channel bytes.
    ///
    /// Invalid UTF-8 is replaced lossily. Trailing line terminators are
    /// stripped since `echo cmd > pipe` always appends one.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let command = text.trim_end_matches(&['\n', '\r'][..]).to_string();
        Self { command }
    }

    /// The command line as written by the producer
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the message carries no command (empty or whitespace only)
    pub fn is_empty(&self) -> bool {
        self.command.trim().is_empty()
    }

    pub fn into_command(self) -> String {
        self.command
    }
}

impl From<&str> for Message {
    fn from(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

/// A lazy, unbounded sequence of command messages.
///
/// `next_message` blocks until a message is available. An `Err` means the
/// transport itself is broken (channel removed, I/O failure) and the caller
/// should stop.
pub trait MessageSource {
    /// Block until the next message arrives
    fn next_message(&mut self) -> Result<Message>;

    /// Short description used in diagnostics
    fn describe(&self) -> String {
        "message source".to_string()
    }
}

impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    fn next_message(&mut self) -> Result<Message> {
        (**self).next_message()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Read a single frame from `reader`.
///
/// Returns `Ok(None)` when the stream ended cleanly between frames, meaning
/// the caller should reopen the channel.
pub fn read_frame<R: BufRead>(reader: &mut R, framing: Framing) -> Result<Option<Message>> {
    match framing {
        Framing::Close => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map_err(stream_error)?;
            Ok(Some(Message::from_bytes(&buf)))
        }
        Framing::Line => {
            let mut buf = Vec::new();
            let n = reader.read_until(b'\n', &mut buf).map_err(stream_error)?;
            if n == 0 {
                return Ok(None);
            }
            Ok(Some(Message::from_bytes(&buf)))
        }
        Framing::LengthPrefixed => {
            let mut header = [0u8; LENGTH_HEADER_BYTES];
            let got = read_full(reader, &mut header).map_err(stream_error)?;
            if got == 0 {
                return Ok(None);
            }
            if got < LENGTH_HEADER_BYTES {
                return Err(ChannelError::Truncated {
                    expected: LENGTH_HEADER_BYTES,
                    actual: got,
                }
                .into());
            }

            let expected = u32::from_be_bytes(header) as usize;
            let mut payload = Vec::new();
            let actual = (&mut *reader)
                .take(expected as u64)
                .read_to_end(&mut payload)
                .map_err(stream_error)?;
            if actual < expected {
                return Err(ChannelError::Truncated { expected, actual }.into());
            }
            Ok(Some(Message::from_bytes(&payload)))
        }
    }
}

/// Encode `command` as one frame for `framing`.
pub fn encode_frame(command: &str, framing: Framing) -> Result<Vec<u8>> {
    match framing {
        Framing::Close => Ok(command.as_bytes().to_vec()),
        Framing::Line => {
            if command.contains('\n') {
                return Err(ChannelError::Unframeable {
                    message: "line framing cannot carry embedded newlines".to_string(),
                }
                .into());
            }
            let mut out = Vec::with_capacity(command.len() + 1);
            out.extend_from_slice(command.as_bytes());
            out.push(b'\n');
            Ok(out)
        }
        Framing::LengthPrefixed => {
            let len = u32::try_from(command.len()).map_err(|_| ChannelError::Unframeable {
                message: format!("{} bytes exceeds the 4-byte length header", command.len()),
            })?;
            let mut out = Vec::with_capacity(LENGTH_HEADER_BYTES + command.len());
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(command.as_bytes());
            Ok(out)
        }
    }
}

/// Fill `buf` as far as possible, stopping early only at end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Placeholder path for stream errors raised below [`FifoSource`], which
/// rewrites them with the real channel path.
fn stream_error(source: io::Error) -> DockerpipeError {
    ChannelError::Read {
        path: PathBuf::new(),
        source,
    }
    .into()
}

/// Message source reading from a named pipe.
///
/// Opening the read end blocks until a writer appears, which is the idle
/// state of the dispatcher.
#[derive(Debug)]
pub struct FifoSource {
    path: PathBuf,
    framing: Framing,
    reader: Option<BufReader<File>>,
}

impl FifoSource {
    pub fn new(path: impl Into<PathBuf>, framing: Framing) -> Self {
        Self {
            path: path.into(),
            framing,
            reader: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Open the read end, refusing anything that is not a FIFO.
    ///
    /// Reading a regular file left at the channel path would replay it in a
    /// tight loop, so the type is checked on every open.
    fn open(&self) -> Result<BufReader<File>> {
        match crate::channel::inspect_channel(&self.path)? {
            crate::channel::ChannelStatus::Fifo { .. } => {}
            crate::channel::ChannelStatus::Missing => {
                return Err(ChannelError::Missing {
                    path: self.path.clone(),
                }
                .into())
            }
            crate::channel::ChannelStatus::Other { kind } => {
                return Err(ChannelError::NotAFifo {
                    path: self.path.clone(),
                    kind,
                }
                .into())
            }
        }

        trace!("Waiting for a writer on {}", self.path.display());
        let file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(|source| self.read_error(source))?;
        Ok(BufReader::new(file))
    }

    fn read_error(&self, source: io::Error) -> DockerpipeError {
        if source.kind() == io::ErrorKind::NotFound {
            ChannelError::Missing {
                path: self.path.clone(),
            }
            .into()
        } else {
            ChannelError::Read {
                path: self.path.clone(),
                source,
            }
            .into()
        }
    }

    /// Attach the channel path to errors produced by [`read_frame`].
    fn with_path(&self, err: DockerpipeError) -> DockerpipeError {
        match err {
            DockerpipeError::Channel(ChannelError::Read { source, .. }) => self.read_error(source),
            other => other,
        }
    }
}

impl MessageSource for FifoSource {
    fn next_message(&mut self) -> Result<Message> {
        loop {
            let mut reader = match self.reader.take() {
                Some(reader) => reader,
                None => self.open()?,
            };

            match read_frame(&mut reader, self.framing) {
                Ok(Some(message)) => {
                    if self.framing.keeps_stream_open() {
                        self.reader = Some(reader);
                    }
                    debug!(
                        "Received {} byte message via {} framing",
                        message.command().len(),
                        self.framing
                    );
                    return Ok(message);
                }
                // All writers closed between frames; reopen and wait again
                Ok(None) => continue,
                Err(DockerpipeError::Channel(err @ ChannelError::Truncated { .. })) => {
                    warn!("Dropping partial frame on {}: {}", self.path.display(), err);
                    continue;
                }
                Err(err) => return Err(self.with_path(err)),
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} ({} framing)", self.path.display(), self.framing)
    }
}

/// Deliver one message to the channel, following the consumer contract:
/// open for writing, write, close.
///
/// Opening blocks until the dispatcher holds the read end.
pub fn send_message(path: &Path, command: &str, framing: Framing) -> Result<()> {
    match crate::channel::inspect_channel(path)? {
        crate::channel::ChannelStatus::Fifo { .. } => {}
        crate::channel::ChannelStatus::Missing => {
            return Err(ChannelError::Missing {
                path: path.to_path_buf(),
            }
            .into())
        }
        crate::channel::ChannelStatus::Other { kind } => {
            return Err(ChannelError::NotAFifo {
                path: path.to_path_buf(),
                kind,
            }
            .into())
        }
    }

    let frame = encode_frame(command, framing)?;
    let write_error = |source| ChannelError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(write_error)?;
    file.write_all(&frame).map_err(write_error)?;
    file.flush().map_err(write_error)?;
    debug!("Sent {} byte frame to {}", frame.len(), path.display());
    Ok(())
}
