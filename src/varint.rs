//! Unsigned LEB128 varints: 7 data bits per byte, high bit set while more follow.

use crate::error::{Error, Result};

/// Longest accepted encoding. Nine bytes carry 63 data bits.
pub const MAX_VARINT_LEN: usize = 9;

pub fn encode_uvarint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a varint at the start of `data`, returning the value and bytes consumed.
pub fn decode_uvarint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;

    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = data.get(i) else {
            return Err(Error::Decode(
                "unexpected end of data while reading a varint".to_string(),
            ));
        };

        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(Error::Decode(format!(
        "varint longer than {MAX_VARINT_LEN} bytes"
    )))
}
