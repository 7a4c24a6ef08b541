//! EF.DG11, additional personal details.

use tracing::{debug, warn};

use super::{date, read_tag_list, text, text_template, DataGroupId};
use crate::tlv::TlvCursor;
use crate::PassportError;

const ID: DataGroupId = DataGroupId::Dg11;

/// Decoded EF.DG11. Elements absent from the file are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dg11 {
    /// Tags announced by the `5C` tag list.
    pub tag_list: Vec<u32>,
    /// Name of holder in full, `5F0E`.
    pub full_name: Option<String>,
    /// Other names, `A0` template of `5F0F` entries.
    pub other_names: Vec<String>,
    pub personal_number: Option<String>,
    /// `YYYYMMDD`, `5F2B`.
    pub full_date_of_birth: Option<String>,
    pub place_of_birth: Option<String>,
    pub address: Option<String>,
    pub telephone: Option<String>,
    pub profession: Option<String>,
    pub title: Option<String>,
    pub personal_summary: Option<String>,
    /// Compressed image of a proof of citizenship, `5F16`.
    pub proof_of_citizenship: Option<Vec<u8>>,
    /// Other valid travel document numbers, `5F17`.
    pub other_td_numbers: Option<String>,
    /// Custody information, `5F18`.
    pub custody_information: Option<String>,
}

impl Dg11 {
    pub(super) fn parse(body: &[u8]) -> Result<Self, PassportError> {
        let mut cursor = TlvCursor::new(body);
        let mut dg11 = Self {
            tag_list: read_tag_list(&mut cursor)?,
            ..Self::default()
        };

        let mut seen = Vec::new();
        while !cursor.is_empty() {
            let (tag, value) = cursor.next_tlv()?;
            seen.push(tag);
            match tag {
                0x5F0E => dg11.full_name = Some(text(ID, tag, value)?),
                0xA0 => dg11.other_names = text_template(ID, value, 0x5F0F)?,
                0x5F10 => dg11.personal_number = Some(text(ID, tag, value)?),
                0x5F2B => dg11.full_date_of_birth = Some(date(ID, tag, value)?),
                0x5F11 => dg11.place_of_birth = Some(text(ID, tag, value)?),
                0x5F42 => dg11.address = Some(text(ID, tag, value)?),
                0x5F12 => dg11.telephone = Some(text(ID, tag, value)?),
                0x5F13 => dg11.profession = Some(text(ID, tag, value)?),
                0x5F14 => dg11.title = Some(text(ID, tag, value)?),
                0x5F15 => dg11.personal_summary = Some(text(ID, tag, value)?),
                0x5F16 => dg11.proof_of_citizenship = Some(value.to_vec()),
                0x5F17 => dg11.other_td_numbers = Some(text(ID, tag, value)?),
                0x5F18 => dg11.custody_information = Some(text(ID, tag, value)?),
                other => debug!("Skipping unknown {ID} tag {other:X}"),
            }
        }
        if seen != dg11.tag_list {
            warn!("{ID} tag list {:X?} does not match the elements {seen:X?}", dg11.tag_list);
        }
        Ok(dg11)
    }
}
