//! Client side of a ZMTP 3.0 PUSH connection, NULL mechanism only.
//!
//! The connection keeps its read half after the handshake. A PULL peer never
//! sends anything after READY, so the read half only ever reports end of
//! stream, which is how a departed collector is noticed while the sender is
//! idle instead of on a later write.

use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::LinkError;

const GREETING_LEN: usize = 64;
const MECHANISM: &[u8] = b"NULL";
const SOCKET_TYPE: &[u8] = b"PUSH";
const PEER_SOCKET_TYPE: &[u8] = b"PULL";

const FLAG_MORE: u8 = 0x01;
const FLAG_LONG: u8 = 0x02;
const FLAG_COMMAND: u8 = 0x04;

/// Largest command frame accepted from the peer during the handshake.
const MAX_COMMAND_LEN: u64 = 64 * 1024;

pub(crate) struct PushConnection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl PushConnection {
    /// Connect to `address` (`host:port`) and exchange greetings and READY
    /// commands with the collector.
    pub async fn connect(address: &str, handshake_timeout: Duration) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut connection = Self { reader, writer };

        tokio::time::timeout(handshake_timeout, connection.handshake())
            .await
            .map_err(|_| LinkError::HandshakeTimeout(handshake_timeout))??;

        Ok(connection)
    }

    async fn handshake(&mut self) -> Result<(), LinkError> {
        self.writer.write_all(&greeting()).await?;
        let mut peer = [0u8; GREETING_LEN];
        self.reader
            .read_exact(&mut peer)
            .await
            .map_err(eof_as_closed)?;
        check_greeting(&peer)?;

        self.writer.write_all(&ready_command()).await?;
        let (flags, body) = self.read_frame().await?;
        if flags & FLAG_COMMAND == 0 {
            return Err(LinkError::Handshake("expected a READY command".into()));
        }
        check_ready(&body)
    }

    async fn read_frame(&mut self) -> Result<(u8, Bytes), LinkError> {
        let flags = self.reader.read_u8().await.map_err(eof_as_closed)?;
        let len = if flags & FLAG_LONG != 0 {
            self.reader.read_u64().await.map_err(eof_as_closed)?
        } else {
            u64::from(self.reader.read_u8().await.map_err(eof_as_closed)?)
        };
        if len > MAX_COMMAND_LEN {
            return Err(LinkError::Handshake(format!(
                "{len} byte frame during handshake"
            )));
        }

        let mut body = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(eof_as_closed)?;
        Ok((flags, Bytes::from(body)))
    }

    /// Write one multipart message.
    pub async fn send(&mut self, parts: &[Bytes]) -> Result<(), LinkError> {
        self.writer.write_all(&encode_message(parts)).await?;
        Ok(())
    }

    /// Resolves once the collector closes the connection or the socket fails.
    /// Cancel safe; stray inbound bytes are discarded.
    pub async fn lost(&mut self) -> LinkError {
        let mut scratch = [0u8; 256];
        loop {
            match self.reader.read(&mut scratch).await {
                Ok(0) => return LinkError::PeerClosed,
                Ok(_) => continue,
                Err(e) => return LinkError::Io(e),
            }
        }
    }
}

fn eof_as_closed(e: io::Error) -> LinkError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        LinkError::PeerClosed
    } else {
        LinkError::Io(e)
    }
}

fn greeting() -> [u8; GREETING_LEN] {
    let mut greeting = [0u8; GREETING_LEN];
    greeting[0] = 0xFF;
    greeting[9] = 0x7F;
    greeting[10] = 3;
    greeting[11] = 0;
    greeting[12..12 + MECHANISM.len()].copy_from_slice(MECHANISM);
    // as-server and filler stay zero
    greeting
}

fn check_greeting(peer: &[u8; GREETING_LEN]) -> Result<(), LinkError> {
    if peer[0] != 0xFF || peer[9] != 0x7F {
        return Err(LinkError::Handshake("peer is not a ZMTP endpoint".into()));
    }
    if peer[10] < 3 {
        return Err(LinkError::Handshake(format!(
            "unsupported ZMTP version {}.{}",
            peer[10], peer[11]
        )));
    }

    let field = &peer[12..32];
    let name = &field[..field.iter().position(|&b| b == 0).unwrap_or(field.len())];
    if name != MECHANISM {
        return Err(LinkError::Handshake(format!(
            "unsupported security mechanism {:?}",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

fn ready_command() -> BytesMut {
    let mut body = BytesMut::new();
    put_short(&mut body, b"READY");
    put_short(&mut body, b"Socket-Type");
    body.put_u32(SOCKET_TYPE.len() as u32);
    body.put_slice(SOCKET_TYPE);

    let mut frame = BytesMut::with_capacity(body.len() + 9);
    put_header(&mut frame, FLAG_COMMAND, body.len());
    frame.put(body);
    frame
}

fn check_ready(mut body: &[u8]) -> Result<(), LinkError> {
    let name = take_short(&mut body)?;
    if name != b"READY" {
        return Err(LinkError::Handshake(format!(
            "expected READY, got {:?}",
            String::from_utf8_lossy(name)
        )));
    }

    let mut socket_type = None;
    while !body.is_empty() {
        let property = take_short(&mut body)?;
        let value = take_long(&mut body)?;
        if property.eq_ignore_ascii_case(b"Socket-Type") {
            socket_type = Some(value);
        }
    }

    match socket_type {
        Some(PEER_SOCKET_TYPE) => Ok(()),
        Some(other) => Err(LinkError::Handshake(format!(
            "PUSH cannot talk to a {} socket",
            String::from_utf8_lossy(other)
        ))),
        None => Err(LinkError::Handshake("READY without Socket-Type".into())),
    }
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], LinkError> {
    if buf.len() < len {
        return Err(LinkError::Handshake("truncated READY command".into()));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_short<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LinkError> {
    let len = take(buf, 1)?[0];
    take(buf, usize::from(len))
}

fn take_long<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LinkError> {
    let len = take(buf, 4)?;
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]);
    take(buf, len as usize)
}

fn put_short(dst: &mut BytesMut, value: &[u8]) {
    dst.put_u8(value.len() as u8);
    dst.put_slice(value);
}

fn put_header(dst: &mut BytesMut, flags: u8, len: usize) {
    if len > u8::MAX as usize {
        dst.put_u8(flags | FLAG_LONG);
        dst.put_u64(len as u64);
    } else {
        dst.put_u8(flags);
        dst.put_u8(len as u8);
    }
}

/// Frame `parts` as one message: every part but the last carries MORE.
fn encode_message(parts: &[Bytes]) -> BytesMut {
    let mut out = BytesMut::with_capacity(parts.iter().map(|p| p.len() + 9).sum());
    for (i, part) in parts.iter().enumerate() {
        let flags = if i + 1 < parts.len() { FLAG_MORE } else { 0 };
        put_header(&mut out, flags, part.len());
        out.put_slice(part);
    }
    out
}
