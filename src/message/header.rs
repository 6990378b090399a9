use std::fmt;

use crate::error::FormatError;

/// Protocol version carried in every header.
pub const VERSION: u8 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 4;

/// Maximum number of token bytes.
pub const MAX_TOKEN_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn from_bits(bits: u8) -> MessageType {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

/// Request method or response status.
///
/// Codes outside the registered table decode to `Reserved`, which keeps the
/// raw byte so that a decoded message always re-encodes to the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Empty,

    Get,
    Post,
    Put,
    Delete,

    // 2.xx
    Created,
    Deleted,
    Valid,
    Changed,
    Content,

    // 4.xx
    BadRequest,
    Unauthorized,
    BadOption,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    PreconditionFailed,
    RequestEntityTooLarge,
    UnsupportedContentFormat,

    // 5.xx
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    ProxyingNotSupported,

    Reserved(u8),
}

impl Code {
    /// The 3-bit class, e.g. `2` for `2.05`.
    pub fn class(self) -> u8 {
        u8::from(self) >> 5
    }

    /// The 5-bit detail, e.g. `5` for `2.05`.
    pub fn detail(self) -> u8 {
        u8::from(self) & 0x1F
    }

    pub fn is_request(self) -> bool {
        self.class() == 0 && self != Code::Empty
    }

    pub fn is_response(self) -> bool {
        matches!(self.class(), 2..=5)
    }
}

impl From<u8> for Code {
    fn from(code: u8) -> Code {
        match code {
            0x00 => Code::Empty,

            0x01 => Code::Get,
            0x02 => Code::Post,
            0x03 => Code::Put,
            0x04 => Code::Delete,

            0x41 => Code::Created,
            0x42 => Code::Deleted,
            0x43 => Code::Valid,
            0x44 => Code::Changed,
            0x45 => Code::Content,

            0x80 => Code::BadRequest,
            0x81 => Code::Unauthorized,
            0x82 => Code::BadOption,
            0x83 => Code::Forbidden,
            0x84 => Code::NotFound,
            0x85 => Code::MethodNotAllowed,
            0x86 => Code::NotAcceptable,
            0x8C => Code::PreconditionFailed,
            0x8D => Code::RequestEntityTooLarge,
            0x8F => Code::UnsupportedContentFormat,

            0xA0 => Code::InternalServerError,
            0xA1 => Code::NotImplemented,
            0xA2 => Code::BadGateway,
            0xA3 => Code::ServiceUnavailable,
            0xA4 => Code::GatewayTimeout,
            0xA5 => Code::ProxyingNotSupported,

            other => Code::Reserved(other),
        }
    }
}

impl From<Code> for u8 {
    fn from(code: Code) -> u8 {
        match code {
            Code::Empty => 0x00,

            Code::Get => 0x01,
            Code::Post => 0x02,
            Code::Put => 0x03,
            Code::Delete => 0x04,

            Code::Created => 0x41,
            Code::Deleted => 0x42,
            Code::Valid => 0x43,
            Code::Changed => 0x44,
            Code::Content => 0x45,

            Code::BadRequest => 0x80,
            Code::Unauthorized => 0x81,
            Code::BadOption => 0x82,
            Code::Forbidden => 0x83,
            Code::NotFound => 0x84,
            Code::MethodNotAllowed => 0x85,
            Code::NotAcceptable => 0x86,
            Code::PreconditionFailed => 0x8C,
            Code::RequestEntityTooLarge => 0x8D,
            Code::UnsupportedContentFormat => 0x8F,

            Code::InternalServerError => 0xA0,
            Code::NotImplemented => 0xA1,
            Code::BadGateway => 0xA2,
            Code::ServiceUnavailable => 0xA3,
            Code::GatewayTimeout => 0xA4,
            Code::ProxyingNotSupported => 0xA5,

            Code::Reserved(raw) => raw,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// The fixed four byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub message_type: MessageType,
    pub token_length: u8,
    pub code: Code,
    pub message_id: u16,
}

impl Header {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let ver_type_tkl =
            VERSION << 6 | self.message_type.to_bits() << 4 | (self.token_length & 0x0F);
        let [id_hi, id_lo] = self.message_id.to_be_bytes();
        [ver_type_tkl, u8::from(self.code), id_hi, id_lo]
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Header, FormatError> {
        if buf.len() < HEADER_LEN {
            return Err(FormatError::TruncatedHeader(buf.len()));
        }

        let version = buf[0] >> 6;
        if version != VERSION {
            return Err(FormatError::InvalidVersion(version));
        }

        let token_length = buf[0] & 0x0F;
        if token_length as usize > MAX_TOKEN_LEN {
            return Err(FormatError::InvalidTokenLength(token_length));
        }

        Ok(Header {
            message_type: MessageType::from_bits(buf[0] >> 4),
            token_length,
            code: Code::from(buf[1]),
            message_id: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }
}
