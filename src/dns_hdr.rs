/*
                                1  1  1  1  1  1
  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                      ID                       |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    QDCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    ANCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    NSCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                    ARCOUNT                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
 */

use std::fmt;
use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use nom::{
    bits::complete::take,
    combinator::map,
    number::complete::be_u16,
    sequence::tuple,
};

use crate::dns_rr::{RRClass, RRType};
use crate::error::{Error, Result};

pub const DNS_HDR_SIZE: usize = 12;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_QUESTIONS: usize = u16::MAX as usize;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Flags {
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub rcode: u8,
}

impl Flags {
    pub fn compress_u16(&self) -> u16 {
        let flags_h: u8 = (u8::from(self.qr) << 7)
            | ((self.opcode & 0x0f) << 3)
            | (u8::from(self.aa) << 2)
            | (u8::from(self.tc) << 1)
            | u8::from(self.rd);
        let flags_l: u8 = (u8::from(self.ra) << 7) | (self.rcode & 0x0f);

        (flags_h as u16) << 8 | (flags_l as u16)
    }

    fn parse_flags(input: (&[u8], usize)) -> nom::IResult<(&[u8], usize), Flags> {
        map(
            tuple((
                take(1u8),
                take(4u8),
                take(1u8),
                take(1u8),
                take(1u8),
                take(1u8),
                take(3u8),
                take(4u8),
            )),
            |(qr, opcode, aa, tc, rd, ra, _, rcode): (u8, u8, u8, u8, u8, u8, u8, u8)| Flags {
                qr: qr != 0,
                opcode,
                aa: aa != 0,
                tc: tc != 0,
                rd: rd != 0,
                ra: ra != 0,
                rcode,
            },
        )(input)
    }
}

#[repr(u8)]
#[allow(dead_code)]
pub enum OpCode {
    QUERY = 0,
    IQUERY = 1,
    STATUS = 2,
}

impl OpCode {
    pub fn mnemonic(code: u8) -> Option<&'static str> {
        match code {
            0 => Some("QUERY"),
            1 => Some("IQUERY"),
            2 => Some("STATUS"),
            _ => None,
        }
    }
}

#[repr(u8)]
#[allow(dead_code)]
pub enum RCode {
    OK = 0,
    FmtError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
}

impl RCode {
    pub fn mnemonic(code: u8) -> Option<&'static str> {
        match code {
            0 => Some("NOERROR"),
            1 => Some("FORMERR"),
            2 => Some("SERVFAIL"),
            3 => Some("NXDOMAIN"),
            4 => Some("NOTIMP"),
            5 => Some("REFUSED"),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: Flags,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DNS_HDR_SIZE);
        self.put(&mut buf);
        buf.freeze()
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.id);
        buf.put_u16(self.flags.compress_u16());
        buf.put_u16(self.qdcount);
        buf.put_u16(self.ancount);
        buf.put_u16(self.nscount);
        buf.put_u16(self.arcount);
    }

    pub fn from_bytes(buf: &[u8]) -> nom::IResult<&[u8], Self> {
        let (rest, (id, flags, qdcount, ancount, nscount, arcount)) = tuple((
            be_u16,
            nom::bits::bits(Flags::parse_flags),
            be_u16,
            be_u16,
            be_u16,
            be_u16,
        ))(buf)?;

        Ok((
            rest,
            Header {
                id,
                flags,
                qdcount,
                ancount,
                nscount,
                arcount,
            },
        ))
    }

    /// Reads exactly one 12-byte header off the stream.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; DNS_HDR_SIZE];
        reader.read_exact(&mut buf).map_err(Error::from_read)?;

        let (_, hdr) = Header::from_bytes(&buf).map_err(|_| Error::PacketTooSmall)?;
        Ok(hdr)
    }
}

fn code_name(f: &mut fmt::Formatter<'_>, name: Option<&str>, code: u8) -> fmt::Result {
    match name {
        Some(n) => f.write_str(n),
        None => write!(f, "<{code}>"),
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fl = &self.flags;
        write!(f, "id={:#06x} qr={} opcode=", self.id, u8::from(fl.qr))?;
        code_name(f, OpCode::mnemonic(fl.opcode), fl.opcode)?;
        write!(
            f,
            " aa={} tc={} rd={} ra={} rcode=",
            u8::from(fl.aa),
            u8::from(fl.tc),
            u8::from(fl.rd),
            u8::from(fl.ra)
        )?;
        code_name(f, RCode::mnemonic(fl.rcode), fl.rcode)?;
        write!(
            f,
            " qd={} an={} ns={} ar={}",
            self.qdcount, self.ancount, self.nscount, self.arcount
        )
    }
}

/// One length-prefixed name component, stored exactly as it appears on the
/// wire: the length byte followed by the label body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label(Bytes);

impl Label {
    /// Builds a label from a raw section. The length byte is `len as u8`, so a
    /// section longer than 255 bytes gets a truncated (wrong) length prefix.
    /// Callers that put labels on the wire validate through [`Question::new`].
    pub fn new(section: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(section.len() + 1);
        buf.put_u8(section.len() as u8);
        buf.extend_from_slice(section);
        Label(buf.freeze())
    }

    pub fn root() -> Self {
        Label(Bytes::from_static(&[0]))
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1 && self.0[0] == 0
    }

    pub fn body(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Splits `name` on `.` into labels and appends the root label.
///
/// There is no escaping and no validation: the empty string (or a lone `.`)
/// yields just the root label, a single trailing dot is treated as the root,
/// and an empty interior section (`a..b`) yields a zero-length label.
pub fn labelize(name: &str) -> Vec<Label> {
    let name = name.strip_suffix('.').unwrap_or(name);

    let mut labels: Vec<Label> = if name.is_empty() {
        Vec::new()
    } else {
        name.split('.').map(|s| Label::new(s.as_bytes())).collect()
    };
    labels.push(Label::root());

    labels
}

/// Reads labels up to and including the root label, returning only the
/// non-root ones.
///
/// Compression pointers are not recognized: a length byte with the top two
/// bits set is taken as a plain length of 192..=255.
pub fn read_labels<R: Read>(reader: &mut R) -> Result<Vec<Label>> {
    let mut labels = Vec::new();

    loop {
        let mut len = [0u8; 1];
        reader.read_exact(&mut len).map_err(Error::from_read)?;
        if len[0] == 0 {
            return Ok(labels);
        }

        let mut chunk = BytesMut::zeroed(len[0] as usize + 1);
        chunk[0] = len[0];
        reader.read_exact(&mut chunk[1..]).map_err(Error::from_read)?;
        labels.push(Label(chunk.freeze()));
    }
}

/*
1  1  1  1  1  1
0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                                               |
/                     QNAME                     /
/                                               /
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                     QTYPE                     |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                     QCLASS                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// QNAME without the trailing root label; it is implied on the wire.
    pub name: Vec<Label>,
    pub qtype: RRType,
    pub qclass: RRClass,
}

fn parse_type_class(buf: &[u8]) -> nom::IResult<&[u8], (u16, u16)> {
    tuple((be_u16, be_u16))(buf)
}

impl Question {
    /// Builds a question for `name`, rejecting names that cannot be encoded:
    /// empty interior labels, labels over 63 bytes, or more than 255 bytes in
    /// total.
    pub fn new(name: &str, qtype: RRType, qclass: RRClass) -> Result<Self> {
        let mut labels = labelize(name);
        if labels.last().is_some_and(Label::is_root) {
            labels.pop();
        }

        let mut encoded = 1;
        for l in &labels {
            match l.body().len() {
                0 => return Err(Error::EmptyLabel),
                n if n > MAX_LABEL_LEN => return Err(Error::LabelTooLong(n)),
                n => encoded += n + 1,
            }
        }
        if encoded > MAX_NAME_LEN {
            return Err(Error::NameTooLong(encoded));
        }

        Ok(Question {
            name: labels,
            qtype,
            qclass,
        })
    }

    pub fn to_bytes(&self, buf: &mut BytesMut) {
        self.name.iter().for_each(|l| buf.extend_from_slice(l.as_bytes()));
        buf.put_u8(0);
        buf.put_u16(self.qtype.into());
        buf.put_u16(self.qclass.into());
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let name = read_labels(reader)?;

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).map_err(Error::from_read)?;
        let (_, (qtype, qclass)) = parse_type_class(&buf).map_err(|_| Error::PacketTooSmall)?;

        Ok(Question {
            name,
            qtype: qtype.into(),
            qclass: qclass.into(),
        })
    }

    pub fn domain(&self) -> String {
        if self.name.is_empty() {
            return ".".to_string();
        }

        self.name
            .iter()
            .map(|l| String::from_utf8_lossy(l.body()))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.domain(), self.qclass, self.qtype)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
}

impl Message {
    /// A recursive query carrying a single question.
    pub fn query(id: u16, question: Question) -> Self {
        Message {
            header: Header {
                id,
                flags: Flags {
                    rd: true,
                    ..Flags::default()
                },
                qdcount: 1,
                ..Header::default()
            },
            questions: vec![question],
        }
    }

    /// Header followed by every question in order. QDCOUNT is always written
    /// as the number of questions present; beyond 65535 questions only the
    /// first 65535 are encoded so the count still matches the wire.
    /// [`send`] refuses such messages outright.
    pub fn to_bytes(&self) -> Bytes {
        let count = self.questions.len().min(MAX_QUESTIONS);
        let mut buf = BytesMut::with_capacity(DNS_HDR_SIZE + 32 * count);

        Header {
            qdcount: count as u16,
            ..self.header
        }
        .put(&mut buf);

        for q in self.questions[..count].iter() {
            q.to_bytes(&mut buf);
        }

        buf.freeze()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        for q in &self.questions {
            write!(f, "; {q}")?;
        }
        Ok(())
    }
}

/// Marshals `msg` and hands it to `writer` in a single write call.
pub fn send<W: Write>(msg: &Message, writer: &mut W) -> Result<()> {
    if msg.questions.len() > MAX_QUESTIONS {
        return Err(Error::TooManyQuestions(msg.questions.len()));
    }
    let buf = msg.to_bytes();

    let written = writer.write(&buf)?;
    if written != buf.len() {
        return Err(Error::ShortWrite {
            written,
            expected: buf.len(),
        });
    }

    Ok(())
}

/// Reads a header and then exactly QDCOUNT questions. Answer, authority and
/// additional records are left unread on the stream.
#[allow(dead_code)]
pub fn receive<R: Read>(reader: &mut R) -> Result<Message> {
    receive_with(reader, None)
}

/// Like [`receive`], but fails with [`Error::InvalidCount`] before reading
/// any question when QDCOUNT exceeds `max_questions`.
pub fn receive_with<R: Read>(reader: &mut R, max_questions: Option<u16>) -> Result<Message> {
    let header = Header::read(reader)?;

    if let Some(max) = max_questions {
        if header.qdcount > max {
            return Err(Error::InvalidCount {
                count: header.qdcount,
                max,
            });
        }
    }

    let mut questions = Vec::with_capacity(header.qdcount.min(16) as usize);
    for _ in 0..header.qdcount {
        questions.push(Question::read(reader)?);
    }

    Ok(Message { header, questions })
}
