//! Option numbers, option values and the delta-compressed option list.

use crate::error::FormatError;

/// Separates the option list from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

const EXT_BYTE_BASE: usize = 13;
const EXT_WORD_BASE: usize = 269;
const MAX_EXTENDED: usize = EXT_WORD_BASE + 0xFFFF;

/// One `(number, value)` entry of the option list.
pub type OptionEntry = (u16, Vec<u8>);

/// Registered option numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionNumber {
    IfMatch,
    UriHost,
    ETag,
    IfNoneMatch,
    Observe,
    UriPort,
    LocationPath,
    UriPath,
    ContentFormat,
    MaxAge,
    UriQuery,
    Accept,
    LocationQuery,
    Block2,
    Block1,
    Size2,
    ProxyUri,
    ProxyScheme,
    Size1,
    NoResponse,
}

impl From<OptionNumber> for u16 {
    fn from(option: OptionNumber) -> u16 {
        match option {
            OptionNumber::IfMatch => 1,
            OptionNumber::UriHost => 3,
            OptionNumber::ETag => 4,
            OptionNumber::IfNoneMatch => 5,
            OptionNumber::Observe => 6,
            OptionNumber::UriPort => 7,
            OptionNumber::LocationPath => 8,
            OptionNumber::UriPath => 11,
            OptionNumber::ContentFormat => 12,
            OptionNumber::MaxAge => 14,
            OptionNumber::UriQuery => 15,
            OptionNumber::Accept => 17,
            OptionNumber::LocationQuery => 20,
            OptionNumber::Block2 => 23,
            OptionNumber::Block1 => 27,
            OptionNumber::Size2 => 28,
            OptionNumber::ProxyUri => 35,
            OptionNumber::ProxyScheme => 39,
            OptionNumber::Size1 => 60,
            OptionNumber::NoResponse => 258,
        }
    }
}

/// Critical options must be understood by the receiver.
pub fn is_critical(number: u16) -> bool {
    number & 0x01 != 0
}

/// Unsafe options must be understood by a forwarding proxy.
pub fn is_unsafe(number: u16) -> bool {
    number & 0x02 != 0
}

pub fn is_no_cache_key(number: u16) -> bool {
    number & 0x1E == 0x1C
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFormat {
    TextPlain,
    AppLinkFormat,
    AppXml,
    AppOctets,
    AppExi,
    AppJson,
    AppCbor,
}

impl ContentFormat {
    pub fn from_u16(value: u16) -> Option<ContentFormat> {
        match value {
            0 => Some(ContentFormat::TextPlain),
            40 => Some(ContentFormat::AppLinkFormat),
            41 => Some(ContentFormat::AppXml),
            42 => Some(ContentFormat::AppOctets),
            47 => Some(ContentFormat::AppExi),
            50 => Some(ContentFormat::AppJson),
            60 => Some(ContentFormat::AppCbor),
            _ => None,
        }
    }
}

impl From<ContentFormat> for u16 {
    fn from(format: ContentFormat) -> u16 {
        match format {
            ContentFormat::TextPlain => 0,
            ContentFormat::AppLinkFormat => 40,
            ContentFormat::AppXml => 41,
            ContentFormat::AppOctets => 42,
            ContentFormat::AppExi => 47,
            ContentFormat::AppJson => 50,
            ContentFormat::AppCbor => 60,
        }
    }
}

/// Raw option value bytes, built from the value kinds CoAP options carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptionValue(pub Vec<u8>);

impl From<Vec<u8>> for OptionValue {
    fn from(value: Vec<u8>) -> Self {
        OptionValue(value)
    }
}

impl From<&[u8]> for OptionValue {
    fn from(value: &[u8]) -> Self {
        OptionValue(value.to_vec())
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue(value.as_bytes().to_vec())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue(value.into_bytes())
    }
}

impl From<u32> for OptionValue {
    fn from(value: u32) -> Self {
        OptionValue(encode_uint(value))
    }
}

impl From<ContentFormat> for OptionValue {
    fn from(format: ContentFormat) -> Self {
        OptionValue(encode_uint(u16::from(format) as u32))
    }
}

/// Encodes an unsigned option value in as few big-endian bytes as possible;
/// zero is the empty value.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Decodes an unsigned option value; only the last four bytes are significant.
pub fn decode_uint(value: &[u8]) -> u32 {
    value
        .iter()
        .fold(0u32, |acc, byte| acc << 8 | *byte as u32)
}

enum Extended {
    None,
    Byte(u8),
    Word(u16),
}

fn split_extended(value: usize) -> Option<(u8, Extended)> {
    if value < EXT_BYTE_BASE {
        Some((value as u8, Extended::None))
    } else if value < EXT_WORD_BASE {
        Some((13, Extended::Byte((value - EXT_BYTE_BASE) as u8)))
    } else if value <= MAX_EXTENDED {
        Some((14, Extended::Word((value - EXT_WORD_BASE) as u16)))
    } else {
        None
    }
}

fn push_extended(out: &mut Vec<u8>, extended: Extended) {
    match extended {
        Extended::None => {}
        Extended::Byte(byte) => out.push(byte),
        Extended::Word(word) => out.extend_from_slice(&word.to_be_bytes()),
    }
}

/// Reads the value behind a delta or length nibble, advancing `idx` past
/// any extension bytes.
fn read_extended(
    buf: &[u8],
    idx: &mut usize,
    nibble: u8,
    reserved: FormatError,
) -> Result<usize, FormatError> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => {
            let byte = *buf.get(*idx).ok_or(FormatError::TruncatedOption(*idx))?;
            *idx += 1;
            Ok(byte as usize + EXT_BYTE_BASE)
        }
        14 => {
            let word = buf
                .get(*idx..*idx + 2)
                .ok_or(FormatError::TruncatedOption(*idx))?;
            *idx += 2;
            Ok(u16::from_be_bytes([word[0], word[1]]) as usize + EXT_WORD_BASE)
        }
        _ => Err(reserved),
    }
}

/// Appends the wire form of `options` to `out`.
///
/// Entries are emitted in non-decreasing number order; entries sharing a
/// number keep their relative order.
pub(crate) fn write_options(options: &[OptionEntry], out: &mut Vec<u8>) -> Result<(), FormatError> {
    let mut sorted: Vec<&OptionEntry> = options.iter().collect();
    sorted.sort_by_key(|(number, _)| *number);

    let mut previous = 0u16;
    for (number, value) in sorted {
        let delta = (*number - previous) as usize;
        let (delta_nibble, delta_ext) =
            split_extended(delta).ok_or(FormatError::OptionValueTooLong(delta))?;
        let (length_nibble, length_ext) =
            split_extended(value.len()).ok_or(FormatError::OptionValueTooLong(value.len()))?;

        out.reserve(5 + value.len());
        out.push(delta_nibble << 4 | length_nibble);
        push_extended(out, delta_ext);
        push_extended(out, length_ext);
        out.extend_from_slice(value);

        previous = *number;
    }
    Ok(())
}

/// Encodes an option list into its delta-compressed wire form.
pub fn encode_options(options: &[OptionEntry]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::new();
    write_options(options, &mut out)?;
    Ok(out)
}

/// Decodes the option list of `buf` starting at `offset`, the number of
/// bytes taken by the header and token.
///
/// Returns the options and the index where decoding stopped: either the end
/// of `buf` or the payload marker, which is left for the caller.
pub fn decode_options(buf: &[u8], offset: usize) -> Result<(Vec<OptionEntry>, usize), FormatError> {
    let mut options = Vec::new();
    let mut idx = offset;
    let mut number = 0u16;

    while idx < buf.len() {
        let byte = buf[idx];
        if byte == PAYLOAD_MARKER {
            break;
        }

        let start = idx;
        idx += 1;

        // Both nibbles are validated before reading any extension bytes.
        if byte >> 4 == 15 {
            return Err(FormatError::InvalidOptionDelta);
        }
        if byte & 0x0F == 15 {
            return Err(FormatError::InvalidOptionLength);
        }

        let delta = read_extended(buf, &mut idx, byte >> 4, FormatError::InvalidOptionDelta)?;
        let length = read_extended(buf, &mut idx, byte & 0x0F, FormatError::InvalidOptionLength)?;

        number = u16::try_from(number as usize + delta)
            .map_err(|_| FormatError::OptionNumberOverflow(start))?;

        let value = buf
            .get(idx..idx + length)
            .ok_or(FormatError::TruncatedOption(idx))?;
        options.push((number, value.to_vec()));
        idx += length;
    }

    Ok((options, idx))
}
