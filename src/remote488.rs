/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    remote488.rs

    Implements the Remote488 message framer: the line-oriented textual
    serialization of IEEE-488 bus traffic carried over a TCP link. Each
    message is `T:HH` where T is a type letter and HH a hex byte, separated
    by ',', ';' or whitespace. A background reader parses the inbound stream
    and answers echo heartbeats; outbound messages are serialized so that a
    multi-message burst is never split by a heartbeat reply.

*/

use std::{
    fmt::Write as _,
    io::{self, Read, Write},
    net::TcpStream,
    sync::{Arc, Mutex},
    thread,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

/// Depth of the inbound message FIFO. The reader blocks (exerting TCP
/// backpressure) if the executor falls this far behind.
const RX_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// Message types of the Remote488 serialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgType {
    /// `R` - clear signal(s)
    SignalClear,
    /// `S` - set signal(s)
    SignalSet,
    /// `D` - cmd/data byte (no EOI)
    Data,
    /// `E` - data byte (with EOI)
    End,
    /// `P` - parallel poll data
    PpData,
    /// `Q` - request parallel poll data
    PpRequest,
    /// `J` - heartbeat: echo request
    EchoReq,
    /// `K` - heartbeat: echo reply
    EchoReply,
}

impl MsgType {
    fn from_char(c: u8) -> Option<MsgType> {
        match c {
            b'R' => Some(MsgType::SignalClear),
            b'S' => Some(MsgType::SignalSet),
            b'D' => Some(MsgType::Data),
            b'E' => Some(MsgType::End),
            b'P' => Some(MsgType::PpData),
            b'Q' => Some(MsgType::PpRequest),
            b'J' => Some(MsgType::EchoReq),
            b'K' => Some(MsgType::EchoReply),
            _ => None,
        }
    }

    fn to_char(self) -> char {
        match self {
            MsgType::SignalClear => 'R',
            MsgType::SignalSet => 'S',
            MsgType::Data => 'D',
            MsgType::End => 'E',
            MsgType::PpData => 'P',
            MsgType::PpRequest => 'Q',
            MsgType::EchoReq => 'J',
            MsgType::EchoReply => 'K',
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Msg {
    pub msg_type: MsgType,
    pub data: u8,
}

impl Msg {
    pub fn new(msg_type: MsgType, data: u8) -> Msg {
        Msg { msg_type, data }
    }
}

/// Format one message in wire form, with its line terminator.
fn format_msg(msg: Msg, out: &mut String) {
    // Infallible on String
    let _ = writeln!(out, "{}:{:02x}", msg.msg_type.to_char(), msg.data);
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum RxState {
    WaitCh,
    WaitColon,
    WaitHex1,
    WaitHex2,
    WaitSep,
    WaitWs,
}

/// The inbound lexer. Feeding a byte advances the FSM and yields a complete
/// message when its terminator arrives. Any parse error drops the FSM into
/// the WaitWs resynchronization sink until the next terminator or whitespace.
pub struct MsgLexer {
    state: RxState,
    msg_type: MsgType,
    data: u8,
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|v| v as u8)
}

fn is_terminator(c: u8) -> bool {
    c == b',' || c == b';'
}

fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t' || c == b'\r' || c == b'\n'
}

impl Default for MsgLexer {
    fn default() -> Self {
        MsgLexer::new()
    }
}

impl MsgLexer {
    pub fn new() -> MsgLexer {
        MsgLexer {
            state: RxState::WaitCh,
            msg_type: MsgType::Data,
            data: 0,
        }
    }

    pub fn feed(&mut self, c: u8) -> Option<Msg> {
        match self.state {
            RxState::WaitCh => {
                if let Some(msg_type) = MsgType::from_char(c) {
                    self.msg_type = msg_type;
                    self.state = RxState::WaitColon;
                }
                else if !is_space(c) {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitColon => {
                if c == b':' {
                    self.state = RxState::WaitHex1;
                }
                else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitHex1 => {
                if let Some(v) = hex_digit(c) {
                    self.data = v;
                    self.state = RxState::WaitHex2;
                }
                else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitHex2 => {
                if let Some(v) = hex_digit(c) {
                    self.data = (self.data << 4) | v;
                    self.state = RxState::WaitSep;
                }
                else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitSep => {
                if is_terminator(c) || is_space(c) {
                    self.state = RxState::WaitCh;
                    return Some(Msg::new(self.msg_type, self.data));
                }
                else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitWs => {
                if is_terminator(c) || is_space(c) {
                    self.state = RxState::WaitCh;
                }
            }
        }
        None
    }
}

/// Outbound half of the message interface. A trait so that the drive state
/// machine can be exercised against a recording sink in tests.
pub trait MsgSender {
    /// Send a burst of messages as one atomic write.
    fn send_msgs(&self, msgs: &[Msg]) -> io::Result<()>;

    fn send_msg(&self, msg: Msg) -> io::Result<()> {
        self.send_msgs(std::slice::from_ref(&msg))
    }

    /// Send a data burst: Data messages throughout, with the last byte sent
    /// as End when `eoi_at_end` is requested.
    fn send_data(&self, data: &[u8], eoi_at_end: bool) -> io::Result<()> {
        let mut msgs = Vec::with_capacity(data.len());
        for (i, b) in data.iter().enumerate() {
            let msg_type = if eoi_at_end && i + 1 == data.len() {
                MsgType::End
            }
            else {
                MsgType::Data
            };
            msgs.push(Msg::new(msg_type, *b));
        }
        self.send_msgs(&msgs)
    }

    fn send_end_byte(&self, byte: u8) -> io::Result<()> {
        self.send_msg(Msg::new(MsgType::End, byte))
    }

    fn send_pp_state(&self, pp_state: u8) -> io::Result<()> {
        self.send_msg(Msg::new(MsgType::PpData, pp_state))
    }
}

/// The message interface over one connected TCP socket. Owns the background
/// reader; inbound messages arrive through `get_msg` in arrival order.
pub struct RemoteMsgIo {
    writer: Arc<Mutex<TcpStream>>,
    rx: Receiver<Msg>,
}

impl RemoteMsgIo {
    pub fn new(stream: TcpStream) -> io::Result<RemoteMsgIo> {
        let reader = stream.try_clone()?;
        let writer = Arc::new(Mutex::new(stream));
        let (tx, rx) = bounded(RX_QUEUE_DEPTH);

        let thread_writer = writer.clone();
        thread::spawn(move || reader_thread(reader, thread_writer, tx));

        Ok(RemoteMsgIo { writer, rx })
    }

    /// Block until the next inbound message. Fails once the peer has closed
    /// the connection and all queued messages have been drained.
    pub fn get_msg(&self) -> Result<Msg, TransportError> {
        self.rx.recv().map_err(|_| TransportError::ConnectionClosed)
    }
}

impl MsgSender for RemoteMsgIo {
    fn send_msgs(&self, msgs: &[Msg]) -> io::Result<()> {
        write_msgs(&self.writer, msgs)
    }
}

fn write_msgs(writer: &Mutex<TcpStream>, msgs: &[Msg]) -> io::Result<()> {
    if msgs.is_empty() {
        return Ok(());
    }
    let mut out = String::with_capacity(msgs.len() * 5);
    for msg in msgs {
        format_msg(*msg, &mut out);
    }
    let mut stream = writer.lock().unwrap();
    stream.write_all(out.as_bytes())
}

fn reader_thread(mut stream: TcpStream, writer: Arc<Mutex<TcpStream>>, tx: Sender<Msg>) {
    let mut lexer = MsgLexer::new();
    let mut buffer = [0u8; 256];

    loop {
        let n = match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("Socket read failed: {}", e);
                break;
            }
        };
        for &c in &buffer[..n] {
            if let Some(msg) = lexer.feed(c) {
                if msg.msg_type == MsgType::EchoReq {
                    // Heartbeat. Answer in place; not delivered upstream.
                    log::trace!("Echo request");
                    if write_msgs(&writer, &[Msg::new(MsgType::EchoReply, 0)]).is_err() {
                        return;
                    }
                }
                else if tx.send(msg).is_err() {
                    // Executor is gone
                    return;
                }
            }
        }
    }
    // Dropping the sender here disconnects the channel: the executor sees
    // exactly one ConnectionClosed once the queue drains.
    log::debug!("Connection closed, reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(input: &str) -> Vec<Msg> {
        let mut lexer = MsgLexer::new();
        input.bytes().filter_map(|c| lexer.feed(c)).collect()
    }

    #[test]
    fn lexer_basic_message() {
        assert_eq!(lex_all("D:0a\n"), vec![Msg::new(MsgType::Data, 0x0a)]);
    }

    #[test]
    fn lexer_all_types() {
        let msgs = lex_all("R:01 S:02 D:03 E:04 P:05 Q:06 J:07 K:08 ");
        assert_eq!(
            msgs,
            vec![
                Msg::new(MsgType::SignalClear, 1),
                Msg::new(MsgType::SignalSet, 2),
                Msg::new(MsgType::Data, 3),
                Msg::new(MsgType::End, 4),
                Msg::new(MsgType::PpData, 5),
                Msg::new(MsgType::PpRequest, 6),
                Msg::new(MsgType::EchoReq, 7),
                Msg::new(MsgType::EchoReply, 8),
            ]
        );
    }

    #[test]
    fn lexer_separators_and_hex_case() {
        let msgs = lex_all("D:aB,E:Cd;D:EF\tD:00\r\n");
        assert_eq!(
            msgs,
            vec![
                Msg::new(MsgType::Data, 0xab),
                Msg::new(MsgType::End, 0xcd),
                Msg::new(MsgType::Data, 0xef),
                Msg::new(MsgType::Data, 0x00),
            ]
        );
    }

    #[test]
    fn lexer_resync_on_garbage() {
        // The malformed fragments must not produce messages, and parsing
        // must resume at the next separator.
        assert_eq!(lex_all("zz D:01 "), vec![Msg::new(MsgType::Data, 1)]);
        assert_eq!(lex_all("D;xx,D:02 "), vec![Msg::new(MsgType::Data, 2)]);
        assert_eq!(lex_all("D:zz D:04 "), vec![Msg::new(MsgType::Data, 4)]);
        // A truncated hex field consumes up to the next separator, so the
        // message that follows it directly is lost too
        assert_eq!(lex_all("D:0 D:03 "), vec![]);
        assert_eq!(lex_all("D:0 ,D:03 "), vec![Msg::new(MsgType::Data, 3)]);
        // Lowercase type letters are not recognized
        assert_eq!(lex_all("d:05 D:06 "), vec![Msg::new(MsgType::Data, 6)]);
    }

    #[test]
    fn lexer_message_needs_terminator() {
        let mut lexer = MsgLexer::new();
        let mut msgs: Vec<Msg> = "D:01".bytes().filter_map(|c| lexer.feed(c)).collect();
        assert!(msgs.is_empty());
        msgs.extend(lexer.feed(b','));
        assert_eq!(msgs, vec![Msg::new(MsgType::Data, 1)]);
    }

    #[test]
    fn msg_wire_format() {
        let mut out = String::new();
        format_msg(Msg::new(MsgType::PpData, 0x80), &mut out);
        format_msg(Msg::new(MsgType::End, 0x0a), &mut out);
        assert_eq!(out, "P:80\nE:0a\n");
    }
}
