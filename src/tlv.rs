//! A forward-only cursor over BER-TLV encoded data.

use tracing::error;

use crate::{bytes2hex, PassportError};

/// Reads tags, lengths and values from a byte slice, never past its end.
///
/// Tags are one byte, or two bytes when the low nibble of the first byte is `0xF`
/// (e.g. `5F1F`, `7F61`). Lengths are in short form or in the long forms `81 xx`
/// and `82 xx xx`.
///
/// # Example
///
/// ```
/// # use emrtd_reader::PassportError;
/// #
/// # fn main() -> Result<(), PassportError> {
/// use emrtd_reader::tlv::TlvCursor;
/// use hex_literal::hex;
///
/// let data = hex!("5F0E 03 414243 5F10 01 31");
/// let mut cursor = TlvCursor::new(&data);
/// assert_eq!(cursor.next_tlv()?, (0x5F0E, &b"ABC"[..]));
/// assert_eq!(cursor.next_tlv()?, (0x5F10, &b"1"[..]));
/// assert!(cursor.is_empty());
/// #
/// #     Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TlvCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlvCursor<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Number of bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// The bytes that have not been consumed yet.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PassportError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            error!(
                "TLV data is incomplete, needed {len} bytes at offset {}, {} available",
                self.pos,
                self.data.len().saturating_sub(self.pos)
            );
            return Err(PassportError::ParseAsn1DataError(
                self.pos.saturating_add(len),
                self.data.len(),
            ));
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reads the next tag.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the data ends inside the tag.
    pub fn next_tag(&mut self) -> Result<u32, PassportError> {
        let first = self.take(1)?[0];
        if first & 0x0F == 0x0F {
            let second = self.take(1)?[0];
            Ok(u32::from(first) << 8 | u32::from(second))
        } else {
            Ok(u32::from(first))
        }
    }

    /// Returns the next tag without consuming it.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the data ends inside the tag.
    pub fn peek_tag(&self) -> Result<u32, PassportError> {
        self.clone().next_tag()
    }

    /// Reads the next length field.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the data ends inside the length or a length form
    ///   other than short, `81` or `82` is used.
    pub fn next_length(&mut self) -> Result<usize, PassportError> {
        let first = self.take(1)?[0];
        match first {
            0x00..=0x7F => Ok(usize::from(first)),
            0x81 => Ok(usize::from(self.take(1)?[0])),
            0x82 => {
                let bytes = self.take(2)?;
                Ok(usize::from(bytes[0]) << 8 | usize::from(bytes[1]))
            }
            _ => {
                error!("Unsupported TLV length form {first:02X}");
                Err(PassportError::ParseDataError(format!(
                    "Unsupported TLV length form {first:02X}"
                )))
            }
        }
    }

    /// Reads the next `len` bytes.
    ///
    /// # Errors
    ///
    /// * `PassportError` if fewer than `len` bytes remain.
    pub fn next_value(&mut self, len: usize) -> Result<&'a [u8], PassportError> {
        self.take(len)
    }

    /// Reads a complete tag, length and value triple.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the element is truncated.
    pub fn next_tlv(&mut self) -> Result<(u32, &'a [u8]), PassportError> {
        let tag = self.next_tag()?;
        let len = self.next_length()?;
        let value = self.next_value(len)?;
        Ok((tag, value))
    }

    /// Reads a complete element and checks that it carries `expected` as its tag.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the element is truncated or has another tag.
    pub fn expect_tlv(&mut self, expected: u32) -> Result<&'a [u8], PassportError> {
        let tag = self.next_tag()?;
        if tag != expected {
            error!("Invalid TLV tag, expected: {expected:02X}, found {tag:02X}");
            return Err(PassportError::ParseAsn1TagError(
                format!("{expected:02X}"),
                format!("{tag:02X}"),
            ));
        }
        let len = self.next_length()?;
        self.next_value(len)
    }
}

/// Returns the total size (header plus value) of the TLV element at the start of `header`.
///
/// Only the tag and length need to be present, which allows sizing a file from
/// its first few bytes.
///
/// # Errors
///
/// * `PassportError` if the tag or length can not be read.
pub fn element_size(header: &[u8]) -> Result<usize, PassportError> {
    let mut cursor = TlvCursor::new(header);
    cursor.next_tag()?;
    let len = cursor.next_length()?;
    cursor.position().checked_add(len).ok_or_else(|| {
        error!("TLV element size overflows: {}", bytes2hex(header));
        PassportError::ParseDataError(format!("TLV element size overflows: {}", bytes2hex(header)))
    })
}

/// Encodes a complete TLV element with a one or two byte tag.
#[must_use]
pub fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 6);
    if tag > 0xFF {
        out.push(((tag >> 8) & 0xFF) as u8);
    }
    out.push((tag & 0xFF) as u8);
    out.extend_from_slice(&crate::int2asn1len(value.len()));
    out.extend_from_slice(value);
    out
}
