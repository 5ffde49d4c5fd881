use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::dns_conn::{Connection, Protocol};
use crate::dns_hdr::{receive_with, send, Message, Question};
use crate::dns_rr::{RRClass, RRType};
use crate::error::{Error, Result};

pub const DEFAULT_QUERY_ID: u16 = 0xabcd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryId {
    Fixed(u16),
    Random,
}

impl QueryId {
    fn next(&self) -> u16 {
        match self {
            QueryId::Fixed(id) => *id,
            QueryId::Random => rand::random(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub resolver: String,
    pub protocol: Protocol,
    pub timeout: Duration,
    pub qtype: RRType,
    pub qclass: RRClass,
    pub query_id: QueryId,
    pub max_questions: Option<u16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            resolver: "8.8.8.8:53".to_string(),
            protocol: Protocol::Udp,
            timeout: Duration::from_secs(10),
            qtype: RRType::ANY,
            qclass: RRClass::IN,
            query_id: QueryId::Fixed(DEFAULT_QUERY_ID),
            max_questions: None,
        }
    }
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub name: String,
    pub result: Result<Message>,
}

pub struct DNSScanner {
    config: ScanConfig,
}

impl DNSScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Queries every name concurrently, one thread and one connection per
    /// name, and returns once all of them have finished. Outcomes come back in
    /// the order of `names`.
    pub fn scan(&self, names: &[String]) -> Vec<ScanOutcome> {
        thread::scope(|s| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| {
                    thread::Builder::new()
                        .name(format!("lookup {name}"))
                        .spawn_scoped(s, move || self.lookup(name))
                })
                .collect();

            handles
                .into_iter()
                .zip(names)
                .map(|(h, name)| collect_outcome(name, h.map(|h| h.join())))
                .collect()
        })
    }

    fn lookup(&self, name: &str) -> ScanOutcome {
        let result = self.exchange(name);

        match &result {
            Ok(msg) => info!(name = %name, "OK {msg}"),
            Err(e) => warn!(name = %name, error = %e, "lookup failed"),
        }

        ScanOutcome {
            name: name.to_string(),
            result,
        }
    }

    fn exchange(&self, name: &str) -> Result<Message> {
        let cfg = &self.config;

        let question = Question::new(name, cfg.qtype, cfg.qclass)?;
        let query = Message::query(cfg.query_id.next(), question);

        let mut conn = Connection::dial(cfg.protocol, &cfg.resolver, cfg.timeout)?;
        conn.set_deadline(Instant::now() + cfg.timeout);

        send(&query, &mut conn)?;
        let reply = receive_with(&mut conn, cfg.max_questions)?;

        if reply.header.id != query.header.id {
            warn!(
                name = %name,
                expected = query.header.id,
                received = reply.header.id,
                "reply id does not match query"
            );
        }

        Ok(reply)
    }
}

/// Turns a lookup thread that could not be spawned, or that panicked, into a
/// failure for that name alone.
fn collect_outcome(name: &str, joined: io::Result<thread::Result<ScanOutcome>>) -> ScanOutcome {
    let error = match joined {
        Ok(Ok(outcome)) => return outcome,
        Ok(Err(_)) => io::Error::new(io::ErrorKind::Other, "lookup thread panicked"),
        Err(e) => e,
    };

    warn!(name = %name, error = %error, "lookup failed");
    ScanOutcome {
        name: name.to_string(),
        result: Err(Error::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, UdpSocket};

    use anyhow::Result;

    use super::*;
    use crate::dns_hdr::{receive, Flags};

    fn answer(query: &Message) -> Message {
        let mut reply = query.clone();
        reply.header.flags = Flags {
            qr: true,
            ra: true,
            ..query.header.flags
        };
        reply
    }

    /// Answers every query except those for names starting with "drop".
    fn spawn_udp_resolver() -> Result<String> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(Duration::from_secs(5)))?;
        let addr = socket.local_addr()?.to_string();

        thread::spawn(move || {
            let mut buf = [0u8; 512];
            while let Ok((size, source)) = socket.recv_from(&mut buf) {
                let Ok(query) = receive(&mut &buf[..size]) else {
                    continue;
                };
                if query.questions[0].domain().starts_with("drop") {
                    continue;
                }
                let _ = socket.send_to(&answer(&query).to_bytes(), source);
            }
        });

        Ok(addr)
    }

    fn config(resolver: String, protocol: Protocol) -> ScanConfig {
        ScanConfig {
            resolver,
            protocol,
            timeout: Duration::from_millis(500),
            qtype: RRType::A,
            ..ScanConfig::default()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scan_udp() -> Result<()> {
        let addr = spawn_udp_resolver()?;
        let scanner = DNSScanner::new(config(addr, Protocol::Udp));

        let outcomes = scanner.scan(&names(&["codecrafters.io", "stackoverflow.com"]));
        assert_eq!(outcomes.len(), 2);

        for outcome in &outcomes {
            let msg = outcome.result.as_ref().unwrap();
            assert_eq!(msg.header.id, DEFAULT_QUERY_ID);
            assert!(msg.header.flags.qr);
            assert!(msg.header.flags.rd);
            assert_eq!(msg.questions.len(), 1);
            assert_eq!(msg.questions[0].domain(), outcome.name);
            assert_eq!(msg.questions[0].qtype, RRType::A);
            assert_eq!(msg.questions[0].qclass, RRClass::IN);
        }
        Ok(())
    }

    #[test]
    fn test_timeout_is_isolated() -> Result<()> {
        let addr = spawn_udp_resolver()?;
        let scanner = DNSScanner::new(config(addr, Protocol::Udp));

        let outcomes = scanner.scan(&names(&["first.example", "drop.example", "last.example"]));
        assert_eq!(outcomes.len(), 3);

        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[2].result.is_ok());
        match &outcomes[1].result {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_invalid_name_is_isolated() -> Result<()> {
        let addr = spawn_udp_resolver()?;
        let scanner = DNSScanner::new(config(addr, Protocol::Udp));

        let outcomes = scanner.scan(&names(&["bad..name", "good.example"]));
        assert!(matches!(outcomes[0].result, Err(Error::EmptyLabel)));
        assert!(outcomes[1].result.is_ok());
        Ok(())
    }

    /// Answers framed queries one connection at a time. Connections asking for
    /// names starting with "drop" are held open without a reply.
    fn spawn_tcp_resolver() -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?.to_string();

        thread::spawn(move || {
            let mut silent = Vec::new();
            for mut stream in listener.incoming().flatten() {
                let mut len = [0u8; 2];
                if stream.read_exact(&mut len).is_err() {
                    continue;
                }
                let mut body = vec![0u8; u16::from_be_bytes(len) as usize];
                if stream.read_exact(&mut body).is_err() {
                    continue;
                }
                let Ok(query) = receive(&mut &body[..]) else {
                    continue;
                };
                if query.questions[0].domain().starts_with("drop") {
                    silent.push(stream);
                    continue;
                }
                let reply = answer(&query).to_bytes();
                let _ = stream.write_all(&(reply.len() as u16).to_be_bytes());
                let _ = stream.write_all(&reply);
            }
        });

        Ok(addr)
    }

    #[test]
    fn test_scan_tcp() -> Result<()> {
        let addr = spawn_tcp_resolver()?;
        let scanner = DNSScanner::new(config(addr, Protocol::Tcp));
        let outcomes = scanner.scan(&names(&["a.example", "b.example", "c.example"]));

        assert_eq!(outcomes.len(), 3);
        for outcome in &outcomes {
            let msg = outcome.result.as_ref().unwrap();
            assert_eq!(msg.questions[0].domain(), outcome.name);
        }
        Ok(())
    }

    #[test]
    fn test_tcp_silent_exchange_is_isolated() -> Result<()> {
        let addr = spawn_tcp_resolver()?;
        let scanner = DNSScanner::new(config(addr, Protocol::Tcp));
        let outcomes = scanner.scan(&names(&["a.example", "drop.example", "c.example"]));

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[1].name, "drop.example");
        match &outcomes[1].result {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
        for i in [0, 2] {
            let msg = outcomes[i].result.as_ref().unwrap();
            assert_eq!(msg.questions[0].domain(), outcomes[i].name);
        }
        Ok(())
    }

    #[test]
    fn test_unreachable_resolver() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?.to_string();
        drop(listener);

        let scanner = DNSScanner::new(config(addr, Protocol::Tcp));
        let outcomes = scanner.scan(&names(&["a.example", "b.example"]));

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o.result, Err(Error::Io(_)))));
        Ok(())
    }

    #[test]
    fn test_question_limit_applies_to_replies() -> Result<()> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(Duration::from_secs(5)))?;
        let addr = socket.local_addr()?.to_string();

        thread::spawn(move || {
            let mut buf = [0u8; 512];
            if let Ok((size, source)) = socket.recv_from(&mut buf) {
                // claim far more questions than are present
                buf[4] = 0x7f;
                let _ = socket.send_to(&buf[..size], source);
            }
        });

        let scanner = DNSScanner::new(ScanConfig {
            max_questions: Some(8),
            ..config(addr, Protocol::Udp)
        });
        let outcomes = scanner.scan(&names(&["example.com"]));

        assert!(matches!(
            outcomes[0].result,
            Err(Error::InvalidCount { count: 0x7f01, max: 8 })
        ));
        Ok(())
    }

    #[test]
    fn test_spawn_failure_is_per_name() {
        let refused = io::Error::new(io::ErrorKind::WouldBlock, "no more threads");
        let outcome = collect_outcome("a.example", Err(refused));
        assert_eq!(outcome.name, "a.example");
        match outcome.result {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            other => panic!("unexpected {other:?}"),
        }

        let outcome = collect_outcome("b.example", Ok(Err(Box::new("boom"))));
        assert!(matches!(outcome.result, Err(Error::Io(_))));

        let ok = ScanOutcome {
            name: "c.example".to_string(),
            result: Err(Error::EmptyLabel),
        };
        let outcome = collect_outcome("c.example", Ok(Ok(ok)));
        assert!(matches!(outcome.result, Err(Error::EmptyLabel)));
    }

    #[test]
    fn test_query_id() {
        assert_eq!(QueryId::Fixed(42).next(), 42);
        assert_eq!(ScanConfig::default().query_id.next(), DEFAULT_QUERY_ID);
    }
}
