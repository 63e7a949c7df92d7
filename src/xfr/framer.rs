// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Length-prefixed message framing for zone transfers over TCP.
//!
//! On the sending side, a [`MessageFramer`] packs records into a
//! sequence of messages no larger than a fixed maximum, each carrying
//! its own name compression state and (optionally) its own TSIG record
//! continuing the signature of the previous message. Finished messages
//! are queued, with their two-octet length prefixes
//! ([RFC 1035 § 4.2.2]), in an output buffer that the caller drains.
//!
//! On the receiving side, a [`MessageReader`] reads one length-prefixed
//! message at a time from a stream, under an idle-read timeout, and
//! verifies its TSIG record (if configured) before handing it out.
//!
//! [RFC 1035 § 4.2.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.2

use std::fmt;
use std::io;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::message::tsig::{StreamError, StreamSigner, StreamVerifier, TimeSigned};
use crate::message::writer::{self, Writer};
use crate::message::{Opcode, Question, Rcode, MAX_MESSAGE_LEN};
use crate::name::Name;
use crate::rr::Record;

/// The size of the length prefix of a message sent over TCP.
pub const LENGTH_PREFIX_LEN: usize = 2;

////////////////////////////////////////////////////////////////////////
// OUTBOUND FRAMING                                                   //
////////////////////////////////////////////////////////////////////////

/// The header fields shared by every message of a response stream.
#[derive(Clone, Debug)]
pub struct StreamHeader {
    pub id: u16,
    pub opcode: Opcode,
    pub rcode: Rcode,
    pub aa: bool,

    /// The question, which is echoed in the first message only.
    pub question: Option<Question>,
}

/// Packs answer records into a stream of length-prefixed messages.
pub struct MessageFramer {
    header: StreamHeader,
    max_len: usize,
    current: Option<Writer>,
    signer: Option<StreamSigner>,
    output: Vec<u8>,
    n_messages: usize,
    n_records: usize,
}

/// The result of [`MessageFramer::push_answer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pushed {
    /// The record was added to the current message.
    Added,

    /// The current message is full. It must be flushed before the
    /// record is pushed again.
    Full,
}

impl MessageFramer {
    /// Creates a framer for messages of at most `max_len` octets
    /// (excluding the length prefix). If `signer` is provided, every
    /// message is signed.
    pub fn new(header: StreamHeader, max_len: usize, signer: Option<StreamSigner>) -> Self {
        Self {
            header,
            max_len: max_len.min(MAX_MESSAGE_LEN),
            current: None,
            signer,
            output: Vec::new(),
            n_messages: 0,
            n_records: 0,
        }
    }

    /// Adds a record to the answer section of the current message,
    /// starting a new message if none is in progress.
    ///
    /// If the record does not fit, the current message is left
    /// untouched and [`Pushed::Full`] is returned. A record that does
    /// not fit even in an otherwise empty message is an error.
    pub fn push_answer(&mut self, record: &Record) -> Result<Pushed, FramingError> {
        let writer = match self.current.take() {
            Some(writer) => writer,
            None => self.start_message()?,
        };
        let writer = self.current.insert(writer);
        match writer.add_answer(record) {
            Ok(()) => {
                self.n_records += 1;
                Ok(Pushed::Added)
            }
            Err(writer::Error::Truncation) if writer.ancount() == 0 => {
                Err(FramingError::RecordTooLarge(record.owner.clone()))
            }
            Err(writer::Error::Truncation) => Ok(Pushed::Full),
            Err(e) => Err(FramingError::Writer(e)),
        }
    }

    /// Returns whether a message is in progress.
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Finishes the current message (if any), signing it if
    /// configured, and queues it in the output buffer.
    pub fn flush(&mut self) -> Result<(), FramingError> {
        if let Some(writer) = self.current.take() {
            let ancount = writer.ancount();
            let (message, mac) = writer.finish_with_mac();
            if let (Some(signer), Some(mac)) = (self.signer.as_mut(), mac) {
                signer.signed(mac);
            }
            append_framed(&mut self.output, &message)?;
            self.n_messages += 1;
            debug!(
                "framed message {} ({} answers, {} octets)",
                self.n_messages,
                ancount,
                message.len()
            );
        }
        Ok(())
    }

    /// Flushes the final message. If no message has been produced at
    /// all, an empty one (carrying just the header and question) is
    /// produced, so that every stream has at least one message.
    pub fn finish(&mut self) -> Result<(), FramingError> {
        if self.n_messages == 0 && self.current.is_none() {
            self.current = Some(self.start_message()?);
        }
        self.flush()
    }

    /// Returns the queued output.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Removes and returns the queued output.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Returns the number of messages produced so far.
    pub fn messages_written(&self) -> usize {
        self.n_messages
    }

    /// Returns the number of records added so far.
    pub fn records_written(&self) -> usize {
        self.n_records
    }

    fn start_message(&self) -> Result<Writer, FramingError> {
        let mut writer = Writer::new(self.max_len).map_err(FramingError::Writer)?;
        writer.set_id(self.header.id);
        writer.set_qr(true);
        writer.set_opcode(self.header.opcode);
        writer.set_aa(self.header.aa);
        writer.set_rcode(self.header.rcode);
        if let Some(signer) = &self.signer {
            let (mode, rr) = signer.next_message(TimeSigned::now());
            writer.set_tsig(mode, rr).map_err(FramingError::Writer)?;
        }
        if self.n_messages == 0 {
            if let Some(question) = &self.header.question {
                writer
                    .add_question(question)
                    .map_err(FramingError::Writer)?;
            }
        }
        Ok(writer)
    }
}

impl fmt::Debug for MessageFramer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MessageFramer")
            .field("header", &self.header)
            .field("max_len", &self.max_len)
            .field("in_progress", &self.current.is_some())
            .field("signed", &self.signer.is_some())
            .field("output_len", &self.output.len())
            .field("n_messages", &self.n_messages)
            .field("n_records", &self.n_records)
            .finish()
    }
}

/// Appends `message` to `out` with its two-octet length prefix.
pub fn append_framed(out: &mut Vec<u8>, message: &[u8]) -> Result<(), FramingError> {
    let len = u16::try_from(message.len()).or(Err(FramingError::MessageTooLarge))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(message);
    Ok(())
}

/// Errors that arise while framing messages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FramingError {
    /// A record does not fit in a message by itself.
    RecordTooLarge(Name),

    /// A message exceeds the maximum message size.
    MessageTooLarge,

    /// The message writer failed.
    Writer(writer::Error),
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RecordTooLarge(owner) => {
                write!(f, "record at {owner} does not fit in an empty message")
            }
            Self::MessageTooLarge => f.write_str("message exceeds the maximum size"),
            Self::Writer(e) => write!(f, "failed to write message: {e}"),
        }
    }
}

impl std::error::Error for FramingError {}

////////////////////////////////////////////////////////////////////////
// INBOUND FRAMING                                                    //
////////////////////////////////////////////////////////////////////////

/// Reads length-prefixed messages from a stream.
pub struct MessageReader<S> {
    socket: S,
    buf: Vec<u8>,
    n_read: usize,
    consumed: usize,
    verifier: Option<StreamVerifier>,
}

impl<S: AsyncRead + Unpin> MessageReader<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            buf: vec![0; LENGTH_PREFIX_LEN + MAX_MESSAGE_LEN],
            n_read: 0,
            consumed: 0,
            verifier: None,
        }
    }

    /// Configures TSIG verification for the messages that follow.
    pub fn set_verifier(&mut self, verifier: Option<StreamVerifier>) {
        self.verifier = verifier;
    }

    /// Checks that the stream's TSIG verification (if any) ended on a
    /// signed message.
    pub fn finish_verification(&self) -> Result<(), ReadError> {
        match &self.verifier {
            Some(verifier) => verifier.finish().map_err(ReadError::Tsig),
            None => Ok(()),
        }
    }

    /// Returns the underlying stream (to write queries, for instance).
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Reads the next message, waiting at most `idle` for it to arrive
    /// in full. If TSIG verification is configured, the message is
    /// verified before it is returned.
    pub async fn next_message(&mut self, idle: Duration) -> Result<&[u8], ReadError> {
        // Any leftover data is the start of the next message.
        if self.consumed > 0 {
            self.buf.copy_within(self.consumed..self.n_read, 0);
            self.n_read -= self.consumed;
            self.consumed = 0;
        }

        let len = match timeout(
            idle,
            read_message(&mut self.socket, &mut self.buf, &mut self.n_read),
        )
        .await
        {
            Ok(Ok(Some(len))) => len,
            Ok(Ok(None)) => return Err(ReadError::Closed),
            Ok(Err(e)) => return Err(ReadError::Io(e)),
            Err(_) => return Err(ReadError::Timeout),
        };
        self.consumed = LENGTH_PREFIX_LEN + len;

        let message = &self.buf[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len];
        if let Some(verifier) = self.verifier.as_mut() {
            verifier
                .verify(message, TimeSigned::now())
                .map_err(ReadError::Tsig)?;
        }
        Ok(message)
    }
}

/// Reads a single DNS message (including the initial two-octet length
/// field) from a stream.
///
/// This function assumes that `*n_read` octets have already been read
/// into the buffer. It updates `*n_read` as it reads more data. It may
/// read data past the end of the message. When this function returns,
/// `*n_read` reflects the number of octets read into the buffer
/// (including the initial two-octet length field and any data read
/// after the end of the message), while the returned `usize` (if any)
/// is the size of the message itself (not including the initial length
/// field).
///
/// If this function returns `Ok(None)`, then the connection was closed
/// before a whole message could be read.
pub async fn read_message<S: AsyncRead + Unpin>(
    socket: &mut S,
    buf: &mut [u8],
    n_read: &mut usize,
) -> io::Result<Option<usize>> {
    let mut received_len_opt = None;
    loop {
        // There may already be data in the buffer, left over from the
        // previous message.
        if let Some(received_len) = received_len_opt {
            if *n_read >= received_len + LENGTH_PREFIX_LEN {
                return Ok(Some(received_len));
            }
        } else if *n_read >= LENGTH_PREFIX_LEN {
            // We've got the first two octets, so we now know the
            // message length.
            let received_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            if *n_read >= received_len + LENGTH_PREFIX_LEN {
                return Ok(Some(received_len));
            } else {
                received_len_opt = Some(received_len);
            }
        }

        let n_read_this_time = socket.read(&mut buf[*n_read..]).await?;

        // If we read nothing, then the peer closed their side of the
        // connection.
        if n_read_this_time == 0 {
            return Ok(None);
        }
        *n_read += n_read_this_time;
    }
}

/// Errors that arise while reading messages.
#[derive(Debug)]
pub enum ReadError {
    /// The peer closed the connection before a whole message arrived.
    Closed,

    /// The idle-read timer expired.
    Timeout,

    /// An I/O error occurred.
    Io(io::Error),

    /// The message failed TSIG verification.
    Tsig(StreamError),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed mid-stream"),
            Self::Timeout => f.write_str("timed out waiting for a message"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Tsig(e) => write!(f, "TSIG verification failed: {e}"),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Tsig(e) => Some(e),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::class::Class;
    use crate::db::memory::tests::{a_record, soa_record, txt_record};
    use crate::message::reader::Reader;
    use crate::message::tsig::{Algorithm, TsigKey};
    use crate::message::{Qclass, Qtype};

    fn header() -> StreamHeader {
        StreamHeader {
            id: 0x1234,
            opcode: Opcode::Query,
            rcode: Rcode::NoError,
            aa: true,
            question: Some(Question {
                qname: "example.".parse().unwrap(),
                qtype: Qtype::AXFR,
                qclass: Qclass::from(Class::IN),
            }),
        }
    }

    /// Splits framed output into its messages.
    fn split(mut output: &[u8]) -> Vec<&[u8]> {
        let mut messages = Vec::new();
        while !output.is_empty() {
            let len = u16::from_be_bytes([output[0], output[1]]) as usize;
            messages.push(&output[2..2 + len]);
            output = &output[2 + len..];
        }
        messages
    }

    /// Reads back every answer of every message.
    fn decode(output: &[u8]) -> Vec<Record> {
        let mut records = Vec::new();
        for message in split(output) {
            let mut reader = Reader::try_from(message).unwrap();
            for _ in 0..reader.qdcount() {
                reader.read_question().unwrap();
            }
            for _ in 0..reader.ancount() {
                records.push(reader.read_rr().unwrap());
            }
        }
        records
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| txt_record(&format!("r{i}.example."), "some text to take up space"))
            .collect()
    }

    fn frame_all(framer: &mut MessageFramer, records: &[Record]) {
        for record in records {
            if framer.push_answer(record).unwrap() == Pushed::Full {
                framer.flush().unwrap();
                assert_eq!(framer.push_answer(record).unwrap(), Pushed::Added);
            }
        }
        framer.finish().unwrap();
    }

    #[test]
    fn records_survive_framing() {
        for (n, max_len) in [(3, 512), (40, 512), (400, 512), (400, 65535)] {
            let records = records(n);
            let mut framer = MessageFramer::new(header(), max_len, None);
            frame_all(&mut framer, &records);
            assert_eq!(decode(framer.output()), records);
            assert_eq!(framer.records_written(), n);
            let messages = split(framer.output());
            assert_eq!(messages.len(), framer.messages_written());
            assert!(messages.iter().all(|m| m.len() <= max_len));
        }
    }

    #[test]
    fn question_is_only_in_first_message() {
        let mut framer = MessageFramer::new(header(), 512, None);
        frame_all(&mut framer, &records(50));
        let messages = split(framer.output());
        assert!(messages.len() > 1);
        assert_eq!(Reader::try_from(messages[0]).unwrap().qdcount(), 1);
        for message in &messages[1..] {
            let reader = Reader::try_from(*message).unwrap();
            assert_eq!(reader.qdcount(), 0);
            assert_eq!(reader.id(), 0x1234);
            assert!(reader.qr());
            assert!(reader.aa());
        }
    }

    #[test]
    fn oversized_record_is_an_error() {
        let mut framer = MessageFramer::new(header(), 64, None);
        let record = txt_record("a-long-owner-name.example.", "more text than fits in 64 octets");
        assert_eq!(
            framer.push_answer(&record),
            Err(FramingError::RecordTooLarge(record.owner.clone()))
        );
    }

    #[test]
    fn empty_stream_has_one_message() {
        let mut framer = MessageFramer::new(header(), 512, None);
        framer.finish().unwrap();
        let messages = split(framer.output());
        assert_eq!(messages.len(), 1);
        assert_eq!(Reader::try_from(messages[0]).unwrap().ancount(), 0);
    }

    #[test]
    fn signed_stream_verifies() {
        let key = Arc::new(TsigKey::new(
            "transfer.key.".parse().unwrap(),
            Algorithm::HmacSha256,
            b"0123456789abcdef".to_vec(),
        ));
        let request_mac = [0xaa; 32];
        let signer = StreamSigner::new(key.clone(), 0x1234, &request_mac);
        let mut framer = MessageFramer::new(header(), 512, Some(signer));
        let mut records = records(30);
        records.insert(0, soa_record("example.", 1));
        records.push(a_record("www.example.", 1));
        frame_all(&mut framer, &records);

        let mut verifier = StreamVerifier::new(key, &request_mac);
        let messages = split(framer.output());
        assert!(messages.len() > 1);
        for message in &messages {
            assert!(message.len() <= 512);
            verifier.verify(message, TimeSigned::now()).unwrap();
        }
        verifier.finish().unwrap();
    }

    #[tokio::test]
    async fn reader_splits_stream() {
        let mut framer = MessageFramer::new(header(), 512, None);
        frame_all(&mut framer, &records(50));
        let output = framer.take_output();
        let expected: Vec<Vec<u8>> = split(&output).into_iter().map(|m| m.to_vec()).collect();

        let (mut client, server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(&output).await.unwrap();
        });
        let mut reader = MessageReader::new(server);
        for message in &expected {
            let received = reader.next_message(Duration::from_secs(5)).await.unwrap();
            assert_eq!(received, message.as_slice());
        }
        writer.await.unwrap();
        assert!(matches!(
            reader.next_message(Duration::from_secs(5)).await,
            Err(ReadError::Closed)
        ));
    }

    #[tokio::test]
    async fn reader_times_out() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = MessageReader::new(server);
        assert!(matches!(
            reader.next_message(Duration::from_millis(20)).await,
            Err(ReadError::Timeout)
        ));
    }
}
