//! Decoders for the LDS data groups read by the pipeline, ICAO Doc 9303-10 Section 4.7:
//! <https://www.icao.int/publications/Documents/9303_p10_cons_en.pdf>
//!
//! Each decoder takes the complete elementary file (outer tag included) and
//! either succeeds completely or fails with `PassportError::InvalidDataGroup`.

mod dg1;
mod dg11;
mod dg12;
mod dg2;

use core::fmt;

use tracing::{debug, error};

pub use self::dg1::Dg1;
pub use self::dg11::Dg11;
pub use self::dg12::Dg12;
pub use self::dg2::{Dg2, FaceImageInfo, ImageFormat};

use crate::tlv::TlvCursor;
use crate::{bytes2hex, PassportError};

/// The data groups this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataGroupId {
    Dg1,
    Dg2,
    Dg11,
    Dg12,
}

impl DataGroupId {
    /// Short file identifier of the elementary file.
    #[must_use]
    pub const fn sfi(self) -> u8 {
        match self {
            Self::Dg1 => 0x01,
            Self::Dg2 => 0x02,
            Self::Dg11 => 0x0B,
            Self::Dg12 => 0x0C,
        }
    }

    /// Tag of the outermost TLV element of the file.
    #[must_use]
    pub const fn tag(self) -> u32 {
        match self {
            Self::Dg1 => 0x61,
            Self::Dg2 => 0x75,
            Self::Dg11 => 0x6B,
            Self::Dg12 => 0x6C,
        }
    }
}

impl fmt::Display for DataGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dg1 => "EF.DG1",
            Self::Dg2 => "EF.DG2",
            Self::Dg11 => "EF.DG11",
            Self::Dg12 => "EF.DG12",
        };
        f.write_str(name)
    }
}

/// A decoded data group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataGroup {
    Dg1(Dg1),
    Dg2(Dg2),
    Dg11(Dg11),
    Dg12(Dg12),
}

impl DataGroup {
    #[must_use]
    pub const fn id(&self) -> DataGroupId {
        match self {
            Self::Dg1(_) => DataGroupId::Dg1,
            Self::Dg2(_) => DataGroupId::Dg2,
            Self::Dg11(_) => DataGroupId::Dg11,
            Self::Dg12(_) => DataGroupId::Dg12,
        }
    }
}

/// Decodes the contents of the elementary file of data group `id`.
///
/// # Errors
///
/// * `PassportError::InvalidDataGroup` if the file is truncated, carries an
///   unexpected tag or does not match the data group's structure.
///
/// # Example
///
/// ```
/// # use emrtd_reader::PassportError;
/// #
/// # fn main() -> Result<(), PassportError> {
/// use emrtd_reader::datagroups::{decode, DataGroup, DataGroupId};
/// use hex_literal::hex;
///
/// let ef_dg12 = hex!("6C 0D 5C 02 5F19 5F19 06 55544F505054");
/// let DataGroup::Dg12(dg12) = decode(DataGroupId::Dg12, &ef_dg12)? else {
///     unreachable!();
/// };
/// assert_eq!(dg12.issuing_authority.as_deref(), Some("UTOPPT"));
/// #
/// #     Ok(())
/// # }
/// ```
pub fn decode(id: DataGroupId, data: &[u8]) -> Result<DataGroup, PassportError> {
    let decoded = decode_body(id, data).map_err(|err| match err {
        PassportError::InvalidDataGroup(..) => err,
        other => PassportError::InvalidDataGroup(id, other.to_string()),
    });
    if let Err(err) = &decoded {
        error!("Failed to decode {id}: {err}");
    }
    decoded
}

fn decode_body(id: DataGroupId, data: &[u8]) -> Result<DataGroup, PassportError> {
    let mut cursor = TlvCursor::new(data);
    let body = cursor.expect_tlv(id.tag())?;
    if !cursor.is_empty() {
        return Err(invalid(
            id,
            format!("{} trailing bytes after the file", cursor.remaining().len()),
        ));
    }
    Ok(match id {
        DataGroupId::Dg1 => DataGroup::Dg1(Dg1::parse(body)?),
        DataGroupId::Dg2 => DataGroup::Dg2(Dg2::parse(body)?),
        DataGroupId::Dg11 => DataGroup::Dg11(Dg11::parse(body)?),
        DataGroupId::Dg12 => DataGroup::Dg12(Dg12::parse(body)?),
    })
}

pub(crate) fn invalid(id: DataGroupId, reason: impl Into<String>) -> PassportError {
    PassportError::InvalidDataGroup(id, reason.into())
}

/// Reads the `5C` tag list that starts DG11 and DG12.
pub(crate) fn read_tag_list(cursor: &mut TlvCursor<'_>) -> Result<Vec<u32>, PassportError> {
    let list = cursor.expect_tlv(0x5C)?;
    let mut tags = TlvCursor::new(list);
    let mut out = Vec::new();
    while !tags.is_empty() {
        out.push(tags.next_tag()?);
    }
    Ok(out)
}

pub(crate) fn text(id: DataGroupId, tag: u32, value: &[u8]) -> Result<String, PassportError> {
    String::from_utf8(value.to_vec())
        .map_err(|_| invalid(id, format!("element {tag:X} is not valid UTF-8: {}", bytes2hex(value))))
}

/// Dates are 4 bytes of BCD (`YYYYMMDD`) on some documents and text on others.
pub(crate) fn date(id: DataGroupId, tag: u32, value: &[u8]) -> Result<String, PassportError> {
    if value.len() == 4 {
        Ok(bytes2hex(value))
    } else {
        text(id, tag, value)
    }
}

/// Reads an `A0` template holding a `02` count followed by `entry_tag` text entries.
pub(crate) fn text_template(
    id: DataGroupId,
    value: &[u8],
    entry_tag: u32,
) -> Result<Vec<String>, PassportError> {
    let mut cursor = TlvCursor::new(value);
    let mut entries = Vec::new();
    while !cursor.is_empty() {
        let (tag, entry) = cursor.next_tlv()?;
        match tag {
            0x02 => {}
            t if t == entry_tag => entries.push(text(id, tag, entry)?),
            other => debug!("Skipping tag {other:X} inside {id} template"),
        }
    }
    Ok(entries)
}
