//! Minimal msgpack writers for *outgoing* room messages.
//!
//! The state protocol is decode-only on the client; the only encoding a
//! client performs is the type prefix of user messages it sends.

/// Appends a msgpack string (fixstr / str8 / str16 / str32 by length).
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    let len = s.len();
    if len <= 31 {
        buf.push(0xa0 | len as u8);
    } else if len <= 0xff {
        buf.push(0xd9);
        buf.push(len as u8);
    } else if len <= 0xffff {
        buf.push(0xda);
        buf.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        buf.push(0xdb);
        buf.extend_from_slice(&(len as u32).to_le_bytes());
    }
    buf.extend_from_slice(s.as_bytes());
}

/// Appends an unsigned number with the smallest msgpack prefix.
pub fn write_uint(buf: &mut Vec<u8>, n: u64) {
    if n < 0x80 {
        buf.push(n as u8);
    } else if n <= u8::MAX as u64 {
        buf.push(0xcc);
        buf.push(n as u8);
    } else if n <= u16::MAX as u64 {
        buf.push(0xcd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= u32::MAX as u64 {
        buf.push(0xce);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xcf);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}
