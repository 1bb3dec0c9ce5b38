//! Record stream for event subscriptions.
//!
//! A subscription reply starts with an HTTP header block, then carries an
//! unbounded sequence of JSON documents, each terminated by a blank line or a
//! record-separator byte. Documents with an [`EVENT_DISCRIMINATOR`] field are
//! events; any other document is a reply such as an authentication challenge.

use serde_json::{Map, Value};

use crate::buffer::{BufferError, ReceiveBuffer};
use crate::errors::RpcError;
use crate::framing::{READ_CHUNK, decode_object, split_head};
use crate::reply::RpcReply;
use crate::session::Session;
use crate::transport::{Channel, TransportError};

/// Field that marks a streamed document as an event.
pub const EVENT_DISCRIMINATOR: &str = "event_class";

const STATUS_PREFIX: &[u8] = b"HTTP/";

/// One decoded streamed document.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// An event notification.
    Event(Map<String, Value>),
    /// A reply, for example an authentication challenge or redirect.
    Reply(RpcReply),
}

impl Record {
    fn classify(reply: RpcReply) -> Self {
        if reply.get(EVENT_DISCRIMINATOR).is_some() {
            Self::Event(reply.into_fields())
        } else {
            Self::Reply(reply)
        }
    }
}

/// Incremental parser over the bytes of one subscription connection.
#[derive(Debug)]
pub struct RecordStream {
    buffer: ReceiveBuffer,
    head_pending: bool,
}

impl Default for RecordStream {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStream {
    /// Creates a stream that expects a header block before the records.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: ReceiveBuffer::new(),
            head_pending: true,
        }
    }

    /// Appends bytes received from the controller.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.buffer.append(bytes)
    }

    /// Reads once from `channel` into the stream.
    ///
    /// Returns the number of bytes read; zero means the peer closed the
    /// connection.
    pub fn fill_from(&mut self, channel: &mut Channel) -> Result<usize, RpcError> {
        let mut chunk = [0_u8; READ_CHUNK];
        let count = channel.read(&mut chunk)?;
        let received = chunk.get(..count).ok_or(TransportError::NotConnected)?;
        self.buffer.append(received)?;
        Ok(count)
    }

    /// Whether a complete record is buffered.
    #[must_use]
    pub fn has_complete_record(&self) -> bool {
        !self.head_pending && self.buffer.has_complete_record()
    }

    /// Decodes the next complete record.
    ///
    /// The header block is handed to `session` first. Returns `Ok(None)`
    /// when more bytes are needed. Whitespace-only records are skipped.
    pub fn next_record(&mut self, session: &mut Session) -> Result<Option<Record>, RpcError> {
        if self.head_pending && !self.consume_head(session) {
            return Ok(None);
        }
        while let Some(bytes) = self.buffer.take_record() {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return decode_object(&bytes).map(|reply| Some(Record::classify(reply)));
        }
        Ok(None)
    }

    /// Drops buffered bytes and expects a new header block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.head_pending = true;
    }

    fn consume_head(&mut self, session: &mut Session) -> bool {
        let raw = self.buffer.as_bytes();
        let start = raw
            .iter()
            .position(|byte| !byte.is_ascii_whitespace())
            .unwrap_or(raw.len());
        let rest = raw.get(start..).unwrap_or_default();
        if rest.is_empty() {
            return false;
        }
        if rest.len() < STATUS_PREFIX.len() && STATUS_PREFIX.starts_with(rest) {
            return false;
        }
        if !rest.starts_with(STATUS_PREFIX) {
            self.head_pending = false;
            return true;
        }
        let Some((head, body)) = split_head(raw) else {
            return false;
        };
        session.parse_headers(head);
        let consumed = raw.len() - body.len();
        self.buffer.discard_front(consumed);
        self.head_pending = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    const HEAD: &[u8] = b"HTTP/1.0 200 OK\r\nServer: cmon/2.0\r\nSet-Cookie: sid=9\r\n\r\n";

    fn drain(stream: &mut RecordStream, session: &mut Session) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(record) = stream.next_record(session).expect("valid record") {
            records.push(record);
        }
        records
    }

    #[test]
    fn header_block_feeds_the_session() {
        let mut stream = RecordStream::new();
        let mut session = Session::new();
        stream.feed(HEAD).expect("feed");
        stream
            .feed(b"{\"event_class\":\"EventCluster\",\"event_name\":\"Changed\"}\n\n")
            .expect("feed");

        let records = drain(&mut stream, &mut session);

        assert_eq!(session.server_version(), Some("cmon/2.0"));
        assert_eq!(session.cookie("sid"), Some("9"));
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], Record::Event(fields) if fields["event_name"] == "Changed"));
    }

    #[test]
    fn byte_at_a_time_feeding_yields_every_record() {
        let mut wire = HEAD.to_vec();
        wire.extend_from_slice(b"{\"event_class\":\"EventHost\",\"n\":1}\n\n");
        wire.extend_from_slice(b"{\"requestStatus\":\"AuthRequired\"}\x1e");
        wire.extend_from_slice(b"\n{\"event_class\":\"EventJob\",\n \"n\":2}\n\n");
        let mut stream = RecordStream::new();
        let mut session = Session::new();
        let mut records = Vec::new();

        for byte in wire {
            stream.feed(&[byte]).expect("feed");
            records.extend(drain(&mut stream, &mut session));
        }

        assert_eq!(records.len(), 3);
        assert!(matches!(&records[0], Record::Event(_)));
        assert!(matches!(&records[1], Record::Reply(reply) if reply.is_auth_required()));
        assert!(matches!(&records[2], Record::Event(fields) if fields["n"] == 2));
    }

    #[test]
    fn stream_without_header_block_starts_at_first_record() {
        let mut stream = RecordStream::new();
        let mut session = Session::new();
        stream
            .feed(b"\x1e{\"event_class\":\"EventAlarm\"}\x1e")
            .expect("feed");

        let records = drain(&mut stream, &mut session);

        assert_eq!(records.len(), 1);
        assert_eq!(session.server_version(), None);
    }

    #[test]
    fn partial_status_line_waits() {
        let mut stream = RecordStream::new();
        let mut session = Session::new();
        stream.feed(b"HTT").expect("feed");
        assert_eq!(stream.next_record(&mut session).expect("no error"), None);
        stream.feed(b"P/1.0 200 OK\n\n{\"event_class\":\"E\"}\n\n").expect("feed");
        assert_eq!(drain(&mut stream, &mut session).len(), 1);
    }

    #[test]
    fn undecodable_record_is_malformed() {
        let mut stream = RecordStream::new();
        let mut session = Session::new();
        stream.feed(b"{\"event_class\": \n\n").expect("feed");

        let error = stream
            .next_record(&mut session)
            .expect_err("truncated JSON must fail");

        assert_eq!(error.kind(), ErrorKind::MalformedReply);
    }
}
