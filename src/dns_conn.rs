//! Message-oriented connections to a resolver.
//!
//! A [`Connection`] looks like a plain byte stream to the codec, but every
//! `write` call carries exactly one DNS message and reads are served from
//! exactly one reply. Over UDP a reply is one datagram; over TCP it is one
//! length-prefixed frame (RFC 1035 §4.2.2). Once the reply has been consumed
//! further reads return EOF, so a short reply shows up as a short packet
//! rather than as a wait for bytes that will never come.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

const MAX_UDP_MESSAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => f.write_str("udp"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

enum Socket {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

pub struct Connection {
    socket: Socket,
    peer: SocketAddr,
    deadline: Option<Instant>,
    reply: Option<Bytes>,
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address for {addr}"),
        )
    })
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
}

// Socket timeouts surface as WouldBlock on unix.
fn map_timeout(e: io::Error) -> io::Error {
    match e.kind() {
        io::ErrorKind::WouldBlock => timed_out(),
        _ => e,
    }
}

impl Connection {
    /// Opens a connection to `addr`. For TCP the handshake must complete
    /// within `timeout`; a UDP "connection" only fixes the peer address.
    pub fn dial(proto: Protocol, addr: &str, timeout: Duration) -> io::Result<Self> {
        let peer = resolve(addr)?;

        let socket = match proto {
            Protocol::Udp => {
                let bind_addr: SocketAddr = if peer.is_ipv4() {
                    (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = UdpSocket::bind(bind_addr)?;
                socket.connect(peer)?;
                Socket::Udp(socket)
            }
            Protocol::Tcp => {
                let stream = TcpStream::connect_timeout(&peer, timeout).map_err(map_timeout)?;
                stream.set_nodelay(true)?;
                Socket::Tcp(stream)
            }
        };

        debug!(server = %peer, proto = %proto, "connected");

        Ok(Connection {
            socket,
            peer,
            deadline: None,
            reply: None,
        })
    }

    /// Every read and write after this call fails with `TimedOut` once
    /// `deadline` has passed.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    fn remaining(&self) -> io::Result<Option<Duration>> {
        match self.deadline {
            None => Ok(None),
            Some(d) => match d.checked_duration_since(Instant::now()) {
                Some(left) if !left.is_zero() => Ok(Some(left)),
                _ => Err(timed_out()),
            },
        }
    }

    fn arm_read(&self) -> io::Result<()> {
        let left = self.remaining()?;
        match &self.socket {
            Socket::Udp(s) => s.set_read_timeout(left),
            Socket::Tcp(s) => s.set_read_timeout(left),
        }
    }

    fn arm_write(&self) -> io::Result<()> {
        let left = self.remaining()?;
        match &self.socket {
            Socket::Udp(s) => s.set_write_timeout(left),
            Socket::Tcp(s) => s.set_write_timeout(left),
        }
    }

    fn recv_message(&mut self) -> io::Result<Bytes> {
        self.arm_read()?;

        let msg = match &mut self.socket {
            Socket::Udp(s) => {
                let mut buf = BytesMut::zeroed(MAX_UDP_MESSAGE_SIZE);
                let n = s.recv(&mut buf).map_err(map_timeout)?;
                buf.truncate(n);
                buf.freeze()
            }
            Socket::Tcp(s) => {
                let mut len = [0u8; 2];
                s.read_exact(&mut len).map_err(map_timeout)?;
                let mut buf = BytesMut::zeroed(u16::from_be_bytes(len) as usize);
                s.read_exact(&mut buf).map_err(map_timeout)?;
                buf.freeze()
            }
        };

        debug!(server = %self.peer, bytes_received = msg.len(), "reply received");
        Ok(msg)
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.reply.is_none() {
            self.reply = Some(self.recv_message()?);
        }

        let reply = match self.reply.as_mut() {
            Some(r) => r,
            None => return Ok(0),
        };
        let n = buf.len().min(reply.remaining());
        reply.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm_write()?;

        let sent = match &mut self.socket {
            Socket::Udp(s) => s.send(buf).map_err(map_timeout)?,
            Socket::Tcp(s) => {
                let len = u16::try_from(buf.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "message too large for tcp")
                })?;
                let mut frame = BytesMut::with_capacity(buf.len() + 2);
                frame.put_u16(len);
                frame.extend_from_slice(buf);
                s.write_all(&frame).map_err(map_timeout)?;
                buf.len()
            }
        };

        debug!(server = %self.peer, bytes_sent = sent, "query sent");
        Ok(sent)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.socket {
            Socket::Udp(_) => Ok(()),
            Socket::Tcp(s) => s.flush(),
        }
    }
}
