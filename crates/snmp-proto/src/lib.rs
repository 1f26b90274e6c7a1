//! Minimal SNMPv2c codec: BER-encoded community messages carrying a
//! get-request or response PDU, the only exchange a read-only scalar agent
//! needs. Get-next, bulk and set operations are deliberately out of scope.

use core::fmt;

use bytes::{Buf as _, BufMut as _};

// We re-export these types, because they are used in the public API.
#[rustfmt::skip]
pub use bytes::{Bytes, BytesMut};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_GET_REQUEST: u8 = 0xA0;
const TAG_RESPONSE: u8 = 0xA2;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;

/// SNMPv2c version field value (RFC 1901 wire value, not "2").
const VERSION_2C: i64 = 1;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    NotEnoughBytes {
        name: &'static str,
        received: usize,
        expected: usize,
    },
    InvalidPacket {
        name: &'static str,
        field: &'static str,
        reason: &'static str,
    },
    UnsupportedVersion {
        version: i64,
    },
    UnexpectedPduType {
        tag: u8,
    },
    InvalidOid {
        value: String,
        reason: &'static str,
    },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotEnoughBytes {
                name,
                received,
                expected,
            } => write!(
                f,
                "not enough bytes provided to decode {name}: received {received} bytes, expected {expected} bytes"
            ),
            Error::InvalidPacket { name, field, reason } => {
                write!(f, "invalid `{field}` in {name}: {reason}")
            }
            Error::UnsupportedVersion { version } => {
                write!(f, "unsupported protocol version: {version}")
            }
            Error::UnexpectedPduType { tag } => write!(f, "unexpected PDU type: 0x{tag:02X}"),
            Error::InvalidOid { value, reason } => write!(f, "invalid OID `{value}`: {reason}"),
        }
    }
}

/// Object identifier naming one manageable scalar attribute.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Oid(Vec<u32>);

// Arc-list debug output is noisy; the dotted form is what people grep for.
impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({self})")
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arcs = self.0.iter();
        if let Some(first) = arcs.next() {
            write!(f, "{first}")?;
        }
        for arc in arcs {
            write!(f, ".{arc}")?;
        }
        Ok(())
    }
}

impl Oid {
    pub fn from_arcs(arcs: Vec<u32>) -> Result<Self, Error> {
        let invalid = |reason| Error::InvalidOid {
            value: arcs
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join("."),
            reason,
        };

        if arcs.len() < 2 {
            return Err(invalid("at least two arcs are required"));
        }

        // The first two arcs must fit the single leading identifier octet.
        match (arcs[0], arcs[1]) {
            (0..=1, 0..=39) => {}
            (2, 0..=175) => {}
            (0..=2, _) => return Err(invalid("second arc too large")),
            _ => return Err(invalid("first arc must be 0, 1 or 2")),
        }

        Ok(Self(arcs))
    }

    pub fn parse_str(s: &str) -> Result<Self, Error> {
        let arcs = s
            .split('.')
            .map(|arc| {
                arc.parse::<u32>().map_err(|_| Error::InvalidOid {
                    value: s.to_owned(),
                    reason: "arc is not a decimal number",
                })
            })
            .collect::<Result<Vec<u32>, Error>>()?;

        Self::from_arcs(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    fn encode(&self, out: &mut BytesMut) {
        let mut content = BytesMut::new();

        let first = if self.0[0] == 2 {
            80 + self.0[1]
        } else {
            40 * self.0[0] + self.0[1]
        };
        content.put_u8(u8::try_from(first).expect("validated on construction"));

        for &arc in &self.0[2..] {
            let mut started = false;
            for shift in [28u32, 21, 14, 7] {
                let group = u8::try_from((arc >> shift) & 0x7F).expect("masked to 7 bits");
                if group != 0 || started {
                    content.put_u8(group | 0x80);
                    started = true;
                }
            }
            content.put_u8(u8::try_from(arc & 0x7F).expect("masked to 7 bits"));
        }

        encode_tlv(out, TAG_OBJECT_IDENTIFIER, &content);
    }

    fn decode_content(mut content: Bytes, name: &'static str) -> Result<Self, Error> {
        if content.is_empty() {
            return Err(Error::InvalidPacket {
                name,
                field: "object identifier",
                reason: "empty",
            });
        }

        let first = content.get_u8();
        let mut arcs = if first < 80 {
            vec![u32::from(first / 40), u32::from(first % 40)]
        } else {
            vec![2, u32::from(first) - 80]
        };

        let mut arc: u32 = 0;
        let mut continued = false;

        while content.has_remaining() {
            let octet = content.get_u8();
            arc = arc
                .checked_shl(7)
                .filter(|_| arc.leading_zeros() >= 7)
                .map(|shifted| shifted | u32::from(octet & 0x7F))
                .ok_or(Error::InvalidPacket {
                    name,
                    field: "object identifier",
                    reason: "arc overflow",
                })?;

            if octet & 0x80 == 0 {
                arcs.push(arc);
                arc = 0;
                continued = false;
            } else {
                continued = true;
            }
        }

        if continued {
            return Err(Error::InvalidPacket {
                name,
                field: "object identifier",
                reason: "truncated arc",
            });
        }

        Ok(Self(arcs))
    }
}

/// Scalar value carried by a variable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Bytes),
    Null,
    /// SNMPv2c exception reported for a name absent from the agent.
    NoSuchObject,
}

impl Value {
    fn encode(&self, out: &mut BytesMut) {
        match self {
            Value::Integer(value) => encode_integer(out, *value),
            Value::OctetString(bytes) => encode_tlv(out, TAG_OCTET_STRING, bytes),
            Value::Null => {
                out.put_u8(TAG_NULL);
                out.put_u8(0);
            }
            Value::NoSuchObject => {
                out.put_u8(TAG_NO_SUCH_OBJECT);
                out.put_u8(0);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub name: Oid,
    pub value: Value,
}

impl VarBind {
    pub const NAME: &'static str = "VAR BIND";

    pub fn new(name: Oid, value: Value) -> Self {
        Self { name, value }
    }

    fn encode(&self, out: &mut BytesMut) {
        let mut inner = BytesMut::new();
        self.name.encode(&mut inner);
        self.value.encode(&mut inner);
        encode_tlv(out, TAG_SEQUENCE, &inner);
    }

    fn decode_in(buf: &mut Bytes) -> Result<Self, Error> {
        let mut content = expect_tlv(buf, TAG_SEQUENCE, Self::NAME, "binding")?;

        let name_content = expect_tlv(&mut content, TAG_OBJECT_IDENTIFIER, Self::NAME, "name")?;
        let name = Oid::decode_content(name_content, Self::NAME)?;

        let (tag, value_content) = read_tlv(&mut content, Self::NAME)?;
        let value = match tag {
            TAG_INTEGER => Value::Integer(decode_integer(value_content, Self::NAME, "value")?),
            TAG_OCTET_STRING => Value::OctetString(value_content),
            TAG_NULL => Value::Null,
            TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
            _ => {
                return Err(Error::InvalidPacket {
                    name: Self::NAME,
                    field: "value",
                    reason: "unsupported value type",
                });
            }
        };

        Ok(Self { name, value })
    }
}

/// Scalar read request: one or more names to resolve.
#[derive(Debug, PartialEq, Eq)]
pub struct GetRequest {
    pub community: Bytes,
    pub request_id: i32,
    pub names: Vec<Oid>,
}

impl GetRequest {
    pub const NAME: &'static str = "GET REQUEST";

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut bindings = BytesMut::new();
        for name in &self.names {
            let mut inner = BytesMut::new();
            name.encode(&mut inner);
            Value::Null.encode(&mut inner);
            encode_tlv(&mut bindings, TAG_SEQUENCE, &inner);
        }

        encode_envelope(buf, TAG_GET_REQUEST, &self.community, self.request_id, &bindings);
    }

    pub fn decode(buf: Bytes) -> Result<Self, Error> {
        let mut parts = decode_envelope(buf, TAG_GET_REQUEST, Self::NAME)?;

        let mut names = Vec::new();
        while parts.bindings.has_remaining() {
            // Request bindings carry a placeholder NULL value; only the name matters.
            names.push(VarBind::decode_in(&mut parts.bindings)?.name);
        }

        Ok(Self {
            community: parts.community,
            request_id: parts.request_id,
            names,
        })
    }
}

/// Response to a scalar read: one binding per requested name.
#[derive(Debug, PartialEq, Eq)]
pub struct GetResponse {
    pub community: Bytes,
    pub request_id: i32,
    pub bindings: Vec<VarBind>,
}

impl GetResponse {
    pub const NAME: &'static str = "GET RESPONSE";

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut bindings = BytesMut::new();
        for binding in &self.bindings {
            binding.encode(&mut bindings);
        }

        encode_envelope(buf, TAG_RESPONSE, &self.community, self.request_id, &bindings);
    }

    pub fn decode(buf: Bytes) -> Result<Self, Error> {
        let mut parts = decode_envelope(buf, TAG_RESPONSE, Self::NAME)?;

        let mut bindings = Vec::new();
        while parts.bindings.has_remaining() {
            bindings.push(VarBind::decode_in(&mut parts.bindings)?);
        }

        Ok(Self {
            community: parts.community,
            request_id: parts.request_id,
            bindings,
        })
    }
}

struct EnvelopeParts {
    community: Bytes,
    request_id: i32,
    bindings: Bytes,
}

fn decode_envelope(mut buf: Bytes, pdu_tag: u8, name: &'static str) -> Result<EnvelopeParts, Error> {
    let mut message = expect_tlv(&mut buf, TAG_SEQUENCE, name, "message")?;

    let version = decode_integer(expect_tlv(&mut message, TAG_INTEGER, name, "version")?, name, "version")?;
    if version != VERSION_2C {
        return Err(Error::UnsupportedVersion { version });
    }

    let community = expect_tlv(&mut message, TAG_OCTET_STRING, name, "community")?;

    let (tag, mut pdu) = read_tlv(&mut message, name)?;
    if tag != pdu_tag {
        return Err(Error::UnexpectedPduType { tag });
    }

    let request_id = decode_integer(expect_tlv(&mut pdu, TAG_INTEGER, name, "request-id")?, name, "request-id")?;
    let request_id = i32::try_from(request_id).map_err(|_| Error::InvalidPacket {
        name,
        field: "request-id",
        reason: "out of range",
    })?;

    // error-status and error-index must be present but are not interpreted.
    let _ = decode_integer(expect_tlv(&mut pdu, TAG_INTEGER, name, "error-status")?, name, "error-status")?;
    let _ = decode_integer(expect_tlv(&mut pdu, TAG_INTEGER, name, "error-index")?, name, "error-index")?;

    let bindings = expect_tlv(&mut pdu, TAG_SEQUENCE, name, "variable bindings")?;

    Ok(EnvelopeParts {
        community,
        request_id,
        bindings,
    })
}

fn encode_envelope(buf: &mut BytesMut, pdu_tag: u8, community: &Bytes, request_id: i32, bindings: &[u8]) {
    let mut pdu = BytesMut::new();
    encode_integer(&mut pdu, i64::from(request_id));
    encode_integer(&mut pdu, 0); // error-status: noError
    encode_integer(&mut pdu, 0); // error-index
    encode_tlv(&mut pdu, TAG_SEQUENCE, bindings);

    let mut message = BytesMut::new();
    encode_integer(&mut message, VERSION_2C);
    encode_tlv(&mut message, TAG_OCTET_STRING, community);
    encode_tlv(&mut message, pdu_tag, &pdu);

    encode_tlv(buf, TAG_SEQUENCE, &message);
}

fn read_tlv(buf: &mut Bytes, name: &'static str) -> Result<(u8, Bytes), Error> {
    if buf.remaining() < 2 {
        return Err(Error::NotEnoughBytes {
            name,
            received: buf.remaining(),
            expected: 2,
        });
    }

    let tag = buf.get_u8();
    let first = buf.get_u8();

    let length = if first < 0x80 {
        usize::from(first)
    } else {
        let count = usize::from(first & 0x7F);
        if count == 0 {
            return Err(Error::InvalidPacket {
                name,
                field: "length",
                reason: "indefinite length is not allowed",
            });
        }
        if count > 4 {
            return Err(Error::InvalidPacket {
                name,
                field: "length",
                reason: "length of length too large",
            });
        }
        if buf.remaining() < count {
            return Err(Error::NotEnoughBytes {
                name,
                received: buf.remaining(),
                expected: count,
            });
        }
        let mut length = 0usize;
        for _ in 0..count {
            length = (length << 8) | usize::from(buf.get_u8());
        }
        length
    };

    if buf.remaining() < length {
        return Err(Error::NotEnoughBytes {
            name,
            received: buf.remaining(),
            expected: length,
        });
    }

    Ok((tag, buf.split_to(length)))
}

fn expect_tlv(buf: &mut Bytes, tag: u8, name: &'static str, field: &'static str) -> Result<Bytes, Error> {
    let (got, content) = read_tlv(buf, name)?;
    if got != tag {
        return Err(Error::InvalidPacket {
            name,
            field,
            reason: "unexpected tag",
        });
    }
    Ok(content)
}

fn decode_integer(mut content: Bytes, name: &'static str, field: &'static str) -> Result<i64, Error> {
    if content.is_empty() {
        return Err(Error::InvalidPacket {
            name,
            field,
            reason: "empty INTEGER",
        });
    }
    if content.len() > 8 {
        return Err(Error::InvalidPacket {
            name,
            field,
            reason: "INTEGER too large",
        });
    }

    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    while content.has_remaining() {
        value = (value << 8) | i64::from(content.get_u8());
    }

    Ok(value)
}

/// Writes `value` as a minimally-encoded two's complement INTEGER.
fn encode_integer(out: &mut BytesMut, value: i64) {
    let bytes = value.to_be_bytes();

    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = match (bytes[start], bytes[start + 1] & 0x80) {
            (0x00, 0) | (0xFF, 0x80) => true,
            _ => false,
        };
        if !redundant {
            break;
        }
        start += 1;
    }

    encode_tlv(out, TAG_INTEGER, &bytes[start..]);
}

fn encode_tlv(out: &mut BytesMut, tag: u8, content: &[u8]) {
    out.put_u8(tag);

    let length = content.len();
    if length < 0x80 {
        out.put_u8(u8::try_from(length).expect("checked against 0x80"));
    } else {
        let length_bytes = length.to_be_bytes();
        let significant = length_bytes
            .iter()
            .position(|&byte| byte != 0)
            .unwrap_or(length_bytes.len() - 1);
        let count = length_bytes.len() - significant;
        out.put_u8(0x80 | u8::try_from(count).expect("at most 8 length octets"));
        out.put_slice(&length_bytes[significant..]);
    }

    out.put_slice(content);
}
