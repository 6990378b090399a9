//! The CoAP message and its wire codec.

pub mod header;
pub mod options;

use crate::error::FormatError;

pub use header::{Code, MessageType, HEADER_LEN, MAX_TOKEN_LEN, VERSION};
pub use options::{
    decode_options, encode_options, ContentFormat, OptionEntry, OptionNumber, OptionValue,
    PAYLOAD_MARKER,
};

use header::Header;

/// A CoAP message.
///
/// Options are kept sorted by number; entries sharing a number keep the
/// order in which they were added, which is also their order on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    options: Vec<OptionEntry>,
    pub payload: Vec<u8>,
}

impl Default for Message {
    fn default() -> Self {
        Message::new(MessageType::Confirmable, Code::Empty, 0)
    }
}

impl Message {
    pub fn new(message_type: MessageType, code: Code, message_id: u16) -> Message {
        Message {
            message_type,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// The protocol version; every message this crate builds or accepts is version 1.
    pub fn version(&self) -> u8 {
        VERSION
    }

    pub fn is_confirmable(&self) -> bool {
        self.message_type == MessageType::Confirmable
    }

    pub fn with_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// All options in wire order.
    pub fn all_options(&self) -> &[OptionEntry] {
        &self.options
    }

    /// The first value of option `number`.
    pub fn option<N: Into<u16>>(&self, number: N) -> Option<&[u8]> {
        let number = number.into();
        self.options
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, value)| value.as_slice())
    }

    /// Every value of option `number`, in order.
    pub fn options<N: Into<u16>>(&self, number: N) -> Vec<&[u8]> {
        let number = number.into();
        self.options
            .iter()
            .filter(|(n, _)| *n == number)
            .map(|(_, value)| value.as_slice())
            .collect()
    }

    /// Appends a value for option `number` after any existing values of it.
    pub fn add_option<N: Into<u16>, V: Into<OptionValue>>(&mut self, number: N, value: V) {
        let number = number.into();
        let at = self.options.partition_point(|(n, _)| *n <= number);
        self.options.insert(at, (number, value.into().0));
    }

    /// Replaces every value of option `number` with `value`.
    pub fn set_option<N: Into<u16>, V: Into<OptionValue>>(&mut self, number: N, value: V) {
        let number = number.into();
        self.remove_option(number);
        self.add_option(number, value);
    }

    pub fn remove_option<N: Into<u16>>(&mut self, number: N) {
        let number = number.into();
        self.options.retain(|(n, _)| *n != number);
    }

    /// The Uri-Path segments.
    pub fn path(&self) -> Vec<String> {
        self.options(OptionNumber::UriPath)
            .into_iter()
            .map(|segment| String::from_utf8_lossy(segment).into_owned())
            .collect()
    }

    pub fn path_string(&self) -> String {
        self.path().join("/")
    }

    pub fn set_path<S: AsRef<str>>(&mut self, segments: &[S]) {
        self.remove_option(OptionNumber::UriPath);
        for segment in segments {
            self.add_option(OptionNumber::UriPath, segment.as_ref());
        }
    }

    /// Sets the Uri-Path from a `/`-separated string; empty segments are skipped.
    pub fn set_path_string(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.set_path(&segments);
    }

    pub fn content_format(&self) -> Option<ContentFormat> {
        self.option(OptionNumber::ContentFormat)
            .and_then(|value| u16::try_from(options::decode_uint(value)).ok())
            .and_then(ContentFormat::from_u16)
    }

    pub fn set_content_format(&mut self, format: ContentFormat) {
        self.set_option(OptionNumber::ContentFormat, format);
    }

    /// Encodes the message into its wire form.
    ///
    /// Fails only for a token longer than 8 bytes or an option value too long
    /// for the extended length field.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(FormatError::TokenTooLong(self.token.len()));
        }

        let header = Header {
            message_type: self.message_type,
            token_length: self.token.len() as u8,
            code: self.code,
            message_id: self.message_id,
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + self.token.len() + 1 + self.payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&self.token);
        options::write_options(&self.options, &mut buf)?;

        if !self.payload.is_empty() {
            buf.push(PAYLOAD_MARKER);
            buf.extend_from_slice(&self.payload);
        }

        Ok(buf)
    }

    /// Decodes a message from its wire form.
    pub fn decode(buf: &[u8]) -> Result<Message, FormatError> {
        let header = Header::from_bytes(buf)?;

        let token_end = HEADER_LEN + header.token_length as usize;
        let token = buf
            .get(HEADER_LEN..token_end)
            .ok_or(FormatError::TruncatedToken {
                expected: header.token_length as usize,
                available: buf.len() - HEADER_LEN,
            })?
            .to_vec();

        let (options, end) = decode_options(buf, token_end)?;

        let payload = if end < buf.len() {
            let payload = &buf[end + 1..];
            if payload.is_empty() {
                return Err(FormatError::EmptyPayload);
            }
            payload.to_vec()
        } else {
            Vec::new()
        };

        Ok(Message {
            message_type: header.message_type,
            code: header.code,
            message_id: header.message_id,
            token,
            options,
            payload,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};

    #[test]
    fn test_decode_message_with_options() {
        let buf = [
            0x44, 0x01, 0x84, 0x9e, 0x51, 0x55, 0x77, 0xe8, 0xb2, 0x48, 0x69, 0x04, 0x54, 0x65,
            0x73, 0x74, 0x43, 0x61, 0x3d, 0x31,
        ];
        let message = Message::decode(&buf).unwrap();
        assert_eq!(message.version(), 1);
        assert_eq!(message.message_type, MessageType::Confirmable);
        assert_eq!(message.code, Code::Get);
        assert_eq!(message.message_id, 33950);
        assert_eq!(message.token, vec![0x51, 0x55, 0x77, 0xE8]);
        assert_eq!(message.path(), vec!["Hi".to_string(), "Test".to_string()]);
        assert_eq!(message.options(OptionNumber::UriQuery), vec![b"a=1".as_slice()]);
        assert!(message.payload.is_empty());
    }

    #[test]
    fn test_decode_message_with_payload() {
        let buf = [
            0x64, 0x45, 0x13, 0xFD, 0xD0, 0xE2, 0x4D, 0xAC, 0xFF, 0x48, 0x65, 0x6C, 0x6C, 0x6F,
        ];
        let message = Message::decode(&buf).unwrap();
        assert_eq!(message.message_type, MessageType::Acknowledgement);
        assert_eq!(message.code, Code::Content);
        assert_eq!(message.message_id, 5117);
        assert_eq!(message.token, vec![0xD0, 0xE2, 0x4D, 0xAC]);
        assert_eq!(message.payload, b"Hello".to_vec());
    }

    #[test]
    fn test_encode_message_with_options() {
        let mut message = Message::new(MessageType::Confirmable, Code::Get, 33950)
            .with_token(vec![0x51, 0x55, 0x77, 0xE8]);
        message.add_option(OptionNumber::UriQuery, "a=1");
        message.add_option(OptionNumber::UriPath, "Hi");
        message.add_option(OptionNumber::UriPath, "Test");
        assert_eq!(
            message.encode().unwrap(),
            vec![
                0x44, 0x01, 0x84, 0x9e, 0x51, 0x55, 0x77, 0xe8, 0xb2, 0x48, 0x69, 0x04, 0x54,
                0x65, 0x73, 0x74, 0x43, 0x61, 0x3d, 0x31
            ]
        );
    }

    #[test]
    fn test_encode_message_with_payload() {
        let message = Message::new(MessageType::Acknowledgement, Code::Content, 5117)
            .with_token(vec![0xD0, 0xE2, 0x4D, 0xAC])
            .with_payload("Hello");
        assert_eq!(
            message.encode().unwrap(),
            vec![0x64, 0x45, 0x13, 0xFD, 0xD0, 0xE2, 0x4D, 0xAC, 0xFF, 0x48, 0x65, 0x6C, 0x6C, 0x6F]
        );
    }

    #[test]
    fn test_empty_message() {
        let message = Message::new(MessageType::Reset, Code::Empty, 7);
        let wire = message.encode().unwrap();
        assert_eq!(wire, vec![0x70, 0x00, 0x00, 0x07]);
        assert_eq!(Message::decode(&wire).unwrap(), message);
    }

    #[test]
    fn test_encode_rejects_long_token() {
        let message = Message::default().with_token(vec![0; 9]);
        assert_eq!(message.encode(), Err(FormatError::TokenTooLong(9)));
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(Message::decode(&[0x40, 0x01, 0x00]), Err(FormatError::TruncatedHeader(3)));
        assert_eq!(
            Message::decode(&[0x44, 0x01, 0x00, 0x01, 0xAA]),
            Err(FormatError::TruncatedToken { expected: 4, available: 1 })
        );
        assert_eq!(
            Message::decode(&[0x40, 0x01, 0x00, 0x01, 0xB5, 0x61]),
            Err(FormatError::TruncatedOption(5))
        );
        assert_eq!(
            Message::decode(&[0x40, 0x01, 0x00, 0x01, 0xFF]),
            Err(FormatError::EmptyPayload)
        );
        assert_eq!(
            Message::decode(&[0x40, 0x01, 0x00, 0x01, 0xB1, 0x61, 0xFF]),
            Err(FormatError::EmptyPayload)
        );
    }

    #[test]
    fn test_option_accessors() {
        let mut message = Message::new(MessageType::NonConfirmable, Code::Post, 1);
        message.set_content_format(ContentFormat::AppOctets);
        message.set_path_string("/req/path");
        message.add_option(OptionNumber::UriQuery, "a=1");
        message.add_option(OptionNumber::UriQuery, "b=2");

        assert_eq!(message.content_format(), Some(ContentFormat::AppOctets));
        assert_eq!(message.path_string(), "req/path");
        assert_eq!(message.option(OptionNumber::UriQuery), Some(b"a=1".as_slice()));
        assert_eq!(message.options(OptionNumber::UriQuery).len(), 2);

        let numbers: Vec<u16> = message.all_options().iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![11, 11, 12, 15, 15]);

        message.set_content_format(ContentFormat::TextPlain);
        assert_eq!(message.option(OptionNumber::ContentFormat), Some(&[][..]));
        assert_eq!(message.content_format(), Some(ContentFormat::TextPlain));

        message.remove_option(OptionNumber::UriQuery);
        assert!(message.option(OptionNumber::UriQuery).is_none());
    }

    #[derive(Debug, Clone)]
    struct ArbitraryMessage(Message);

    impl Arbitrary for ArbitraryMessage {
        fn arbitrary(g: &mut Gen) -> Self {
            let types = [
                MessageType::Confirmable,
                MessageType::NonConfirmable,
                MessageType::Acknowledgement,
                MessageType::Reset,
            ];
            let mut token = Vec::<u8>::arbitrary(g);
            token.truncate(MAX_TOKEN_LEN);

            let mut message = Message::new(
                *g.choose(&types).unwrap(),
                Code::from(u8::arbitrary(g)),
                u16::arbitrary(g),
            )
            .with_token(token)
            .with_payload(Vec::<u8>::arbitrary(g));

            for (number, value) in Vec::<(u16, Vec<u8>)>::arbitrary(g) {
                message.add_option(number, value);
            }
            ArbitraryMessage(message)
        }
    }

    #[test]
    fn test_round_trip() {
        fn run(message: ArbitraryMessage) -> bool {
            let wire = message.0.encode().unwrap();
            Message::decode(&wire) == Ok(message.0)
        }
        QuickCheck::new()
            .tests(2000)
            .quickcheck(run as fn(ArbitraryMessage) -> bool)
    }

    /// Random bytes up to a datagram's worth.
    #[derive(Debug, Clone)]
    struct RawPacket(Vec<u8>);

    impl Arbitrary for RawPacket {
        fn arbitrary(g: &mut Gen) -> Self {
            let len = usize::arbitrary(g) % 1500;
            RawPacket((0..len).map(|_| u8::arbitrary(g)).collect())
        }
    }

    #[test]
    fn test_malicious_packet() {
        fn run(packet: RawPacket) -> TestResult {
            let x = packet.0;
            match Message::decode(&x[..]) {
                Ok(message) => TestResult::from_bool(
                    message.token.len() == (x[0] & 0x0F) as usize
                        && message.encode().map(|wire| wire == x).unwrap_or(false),
                ),
                Err(_) => TestResult::passed(),
            }
        }
        QuickCheck::new()
            .tests(10000)
            .quickcheck(run as fn(RawPacket) -> TestResult)
    }

    #[test]
    fn test_wire_compatible_with_coap_lite() {
        let mut message = Message::new(MessageType::Confirmable, Code::Post, 9876)
            .with_token(vec![0x01, 0x02])
            .with_payload("Content sent by client");
        message.set_path_string("/req/path");
        message.set_content_format(ContentFormat::TextPlain);
        message.add_option(OptionNumber::NoResponse, 26u32);

        let wire = message.encode().unwrap();
        let packet = coap_lite::Packet::from_bytes(&wire).unwrap();
        assert_eq!(packet.header.message_id, 9876);
        assert_eq!(packet.get_token(), &[0x01, 0x02][..]);
        assert_eq!(packet.payload, b"Content sent by client".to_vec());
        assert_eq!(packet.to_bytes().unwrap(), wire);

        let decoded = Message::decode(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_codes_agree_with_coap_lite() {
        use coap_lite::{MessageClass, ResponseType};

        for byte in 0..=255u8 {
            if matches!(Code::from(byte), Code::Reserved(_)) {
                continue;
            }
            let theirs = MessageClass::from(byte);
            assert!(!matches!(theirs, MessageClass::Reserved(_)), "code {:#04x}", byte);
            assert_eq!(u8::from(theirs), byte);
        }

        let mut packet = coap_lite::Packet::new();
        packet.header.code = MessageClass::Response(ResponseType::InternalServerError);
        let decoded = Message::decode(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.code, Code::InternalServerError);
        assert_eq!(decoded.code.to_string(), "5.00");

        let reply = Message::new(MessageType::Acknowledgement, Code::ServiceUnavailable, 1);
        let packet = coap_lite::Packet::from_bytes(&reply.encode().unwrap()).unwrap();
        assert_eq!(packet.header.code, MessageClass::Response(ResponseType::ServiceUnavailable));
    }
}
