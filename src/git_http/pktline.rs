//! pkt-line framing: Git's 4-hex-digit length-prefixed wire format.

pub const FLUSH_PACKET: &[u8] = b"0000";

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Flush,
    Data(Vec<u8>),
}

/// Encode `payload` as a single pkt-line (4-hex length, including the
/// 4-byte header itself, followed by the payload).
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 4;
    let mut out = format!("{len:04x}").into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Reads pkt-lines out of an in-memory buffer. A malformed length prefix
/// poisons the reader - all further calls return `None` - rather than
/// panicking: a protocol error disables further parsing but never crashes
/// the transport.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    poisoned: bool,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            poisoned: false,
        }
    }
}

impl<'a> Iterator for Reader<'a> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.poisoned || self.pos + 4 > self.buf.len() {
            return None;
        }
        let len_hex = std::str::from_utf8(&self.buf[self.pos..self.pos + 4]).ok();
        let len = len_hex.and_then(|s| u32::from_str_radix(s, 16).ok());
        let Some(len) = len else {
            self.poisoned = true;
            return None;
        };
        let len = len as usize;

        if len == 0 {
            self.pos += 4;
            return Some(Packet::Flush);
        }
        if len <= 4 || self.pos + len > self.buf.len() {
            self.poisoned = true;
            return None;
        }
        let payload = self.buf[self.pos + 4..self.pos + len].to_vec();
        self.pos += len;
        Some(Packet::Data(payload))
    }
}
