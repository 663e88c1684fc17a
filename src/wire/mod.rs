//! ROP buffer codec
//!
//! A request or response buffer is one or more chunks, each an
//! `RPC_HEADER_EXT` followed by its payload:
//!
//! ```text
//!   [Version:2][Flags:2][Size:2][SizeActual:2]   header, little-endian
//!   [RopSize:2][rop bytes ...]                    RopSize counts itself
//!   [handle:4]*                                   server object handle table
//! ```
//!
//! The handle table fills whatever `Size` leaves after `RopSize`, so
//! `(Size - RopSize)` must divide evenly into 4-byte handles. The last
//! chunk of a buffer carries the `Last` flag.

mod notification;
mod rop;

pub use notification::{
    GlobalId, HierarchyChange, NewMail, NotificationData, NotificationFlags, NotificationType,
    PresentFields, RowChange, RowId, TAGS_UNSPECIFIED, TableEvent, TableEventType,
};
pub use rop::{
    CreatedFolder, FOLDER_GENERIC, FOLDER_SEARCH, FolderInfo, GhostInfo, LogonBody,
    LogonResponse, LogonTime, RopId, RopRequest, RopResponse, SPECIAL_FOLDER_COUNT, SavedMessage,
    decode_requests, decode_responses, encode_requests, encode_responses,
};

use crate::error::WireError;
use bitflags::bitflags;

/// Size of an `RPC_HEADER_EXT`.
pub const HEADER_SIZE: usize = 8;

/// Byte mask applied to payloads flagged `XorMagic`.
pub const XOR_MAGIC: u8 = 0xA5;

bitflags! {
    /// `RPC_HEADER_EXT` flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HeaderFlags: u16 {
        const COMPRESSED = 0x0001;
        const XOR_MAGIC = 0x0002;
        const LAST = 0x0004;
    }
}

/// One header+payload unit of a ROP buffer, already de-obfuscated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Concatenated ROP bytes (without the `RopSize` prefix).
    pub rops: Vec<u8>,
    /// Server object handle table carried after the ROPs.
    pub handles: Vec<u32>,
}

/// Build a single-chunk buffer from ROP bytes and a handle table.
///
/// # Errors
///
/// Returns `TooLarge` if the payload does not fit the 16-bit size fields.
pub fn encode_buffer(chunk: &Chunk, obfuscate: bool) -> Result<Vec<u8>, WireError> {
    encode_chunks(std::slice::from_ref(chunk), obfuscate)
}

/// Build a buffer from several chunks, flagging the final one `Last`.
///
/// # Errors
///
/// Returns `TooLarge` if any payload does not fit the 16-bit size fields.
pub fn encode_chunks(chunks: &[Chunk], obfuscate: bool) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let rop_size = to_u16(chunk.rops.len() + 2, "RopSize")?;
        let mut payload = Writer::with_capacity(usize::from(rop_size) + chunk.handles.len() * 4);
        payload.u16(rop_size);
        payload.bytes(&chunk.rops);
        for handle in &chunk.handles {
            payload.u32(*handle);
        }
        let mut payload = payload.into_inner();
        let size = to_u16(payload.len(), "Size")?;

        let mut flags = HeaderFlags::empty();
        if i + 1 == chunks.len() {
            flags |= HeaderFlags::LAST;
        }
        if obfuscate {
            flags |= HeaderFlags::XOR_MAGIC;
            xor_in_place(&mut payload);
        }

        let mut header = Writer::with_capacity(HEADER_SIZE);
        header.u16(0);
        header.u16(flags.bits());
        header.u16(size);
        header.u16(size);
        out.extend_from_slice(&header.into_inner());
        out.extend_from_slice(&payload);
    }
    Ok(out)
}

/// Split a buffer into chunks, stopping at the chunk flagged `Last`.
///
/// # Errors
///
/// Fails on truncated headers or payloads, a non-zero version, compressed
/// payloads, `Size`/`SizeActual` disagreement, a `RopSize` that overruns
/// `Size`, or a handle table whose length is not a multiple of four.
pub fn decode_chunks(buf: &[u8]) -> Result<Vec<Chunk>, WireError> {
    let mut reader = Reader::new(buf);
    let mut chunks = Vec::new();
    loop {
        let version = reader.u16()?;
        let flags = HeaderFlags::from_bits_retain(reader.u16()?);
        let size = usize::from(reader.u16()?);
        let size_actual = usize::from(reader.u16()?);

        if version != 0 {
            return Err(WireError::InvalidHeader(format!("version {version}")));
        }
        if flags.contains(HeaderFlags::COMPRESSED) {
            return Err(WireError::Compressed);
        }
        if size != size_actual {
            return Err(WireError::CountMismatch {
                field: "SizeActual",
                declared: size_actual,
                actual: size,
            });
        }

        let mut payload = reader.take(size)?.to_vec();
        if flags.contains(HeaderFlags::XOR_MAGIC) {
            xor_in_place(&mut payload);
        }
        chunks.push(decode_payload(&payload)?);

        if flags.contains(HeaderFlags::LAST) {
            break;
        }
    }
    Ok(chunks)
}

fn decode_payload(payload: &[u8]) -> Result<Chunk, WireError> {
    let mut reader = Reader::new(payload);
    let rop_size = usize::from(reader.u16()?);
    if rop_size < 2 || rop_size > payload.len() {
        return Err(WireError::InvalidHeader(format!(
            "RopSize {rop_size} outside payload of {} bytes",
            payload.len()
        )));
    }
    let rops = reader.take(rop_size - 2)?.to_vec();

    let rest = reader.remaining();
    if rest % 4 != 0 {
        return Err(WireError::InvalidHeader(format!(
            "handle table of {rest} bytes is not a multiple of 4"
        )));
    }
    let mut handles = Vec::with_capacity(rest / 4);
    while !reader.is_empty() {
        handles.push(reader.u32()?);
    }
    Ok(Chunk { rops, handles })
}

fn xor_in_place(payload: &mut [u8]) {
    for byte in payload {
        *byte ^= XOR_MAGIC;
    }
}

pub(crate) fn to_u16(len: usize, field: &'static str) -> Result<u16, WireError> {
    u16::try_from(len).map_err(|_| WireError::TooLarge { field, size: len })
}

/// Little-endian cursor over a borrowed byte slice.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.offset
    }

    /// Borrow the next `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` when fewer than `len` bytes remain.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::InsufficientData {
                needed: len,
                have: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Borrow everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        slice
    }

    /// # Errors
    ///
    /// Returns `InsufficientData` at end of input.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns `InsufficientData` at end of input.
    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.array::<1>()?[0])
    }

    /// # Errors
    ///
    /// Returns `InsufficientData` at end of input.
    pub fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// # Errors
    ///
    /// Returns `InsufficientData` at end of input.
    pub fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// # Errors
    ///
    /// Returns `InsufficientData` at end of input.
    pub fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Read a NUL-terminated 8-bit string, consuming the terminator.
    ///
    /// # Errors
    ///
    /// Returns `UnterminatedString` if no NUL byte is found.
    pub fn ascii_z(&mut self, field: &'static str) -> Result<String, WireError> {
        let rest = &self.bytes[self.offset..];
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(WireError::UnterminatedString(field))?;
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.offset += end + 1;
        Ok(text)
    }

    /// Read a NUL-terminated UTF-16LE string, consuming the terminator.
    ///
    /// # Errors
    ///
    /// Returns `UnterminatedString` if no aligned `00 00` unit is found.
    pub fn utf16_z(&mut self, field: &'static str) -> Result<String, WireError> {
        let rest = &self.bytes[self.offset..];
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();
        if units.len() * 2 + 2 > rest.len() {
            return Err(WireError::UnterminatedString(field));
        }
        self.offset += units.len() * 2 + 2;
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Little-endian byte sink.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn ascii_z(&mut self, v: &str) {
        self.buf.extend_from_slice(v.as_bytes());
        self.buf.push(0);
    }

    pub fn utf16_z(&mut self, v: &str) {
        for unit in v.encode_utf16() {
            self.u16(unit);
        }
        self.u16(0);
    }
}
