//! EF.DG12, additional document details.

use tracing::{debug, warn};

use super::{date, read_tag_list, text, text_template, DataGroupId};
use crate::tlv::TlvCursor;
use crate::{bytes2hex, PassportError};

const ID: DataGroupId = DataGroupId::Dg12;

/// Decoded EF.DG12. Elements absent from the file are `None`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Dg12 {
    /// Tags announced by the `5C` tag list.
    pub tag_list: Vec<u32>,
    pub issuing_authority: Option<String>,
    /// `YYYYMMDD` when stored as BCD, `5F26`.
    pub date_of_issue: Option<String>,
    /// Names of other persons, `A0` template of `5F1A` entries.
    pub other_persons: Vec<String>,
    pub endorsements_or_observations: Option<String>,
    pub tax_or_exit_requirements: Option<String>,
    pub front_image: Option<Vec<u8>>,
    pub rear_image: Option<Vec<u8>>,
    /// `YYYYMMDDhhmmss`, `5F55`.
    pub personalization_time: Option<String>,
    pub personalization_device_serial: Option<String>,
}

impl core::fmt::Debug for Dg12 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dg12")
            .field("tag_list", &self.tag_list)
            .field("issuing_authority", &self.issuing_authority)
            .field("date_of_issue", &self.date_of_issue)
            .field("other_persons", &self.other_persons)
            .field("endorsements_or_observations", &self.endorsements_or_observations)
            .field("tax_or_exit_requirements", &self.tax_or_exit_requirements)
            .field("front_image_len", &self.front_image.as_ref().map(Vec::len))
            .field("rear_image_len", &self.rear_image.as_ref().map(Vec::len))
            .field("personalization_time", &self.personalization_time)
            .field("personalization_device_serial", &self.personalization_device_serial)
            .finish()
    }
}

impl Dg12 {
    pub(super) fn parse(body: &[u8]) -> Result<Self, PassportError> {
        let mut cursor = TlvCursor::new(body);
        let mut dg12 = Self {
            tag_list: read_tag_list(&mut cursor)?,
            ..Self::default()
        };

        let mut seen = Vec::new();
        while !cursor.is_empty() {
            let (tag, value) = cursor.next_tlv()?;
            seen.push(tag);
            match tag {
                0x5F19 => dg12.issuing_authority = Some(text(ID, tag, value)?),
                0x5F26 => dg12.date_of_issue = Some(date(ID, tag, value)?),
                0xA0 => dg12.other_persons = text_template(ID, value, 0x5F1A)?,
                0x5F1B => dg12.endorsements_or_observations = Some(text(ID, tag, value)?),
                0x5F1C => dg12.tax_or_exit_requirements = Some(text(ID, tag, value)?),
                0x5F1D => dg12.front_image = Some(value.to_vec()),
                0x5F1E => dg12.rear_image = Some(value.to_vec()),
                0x5F55 => dg12.personalization_time = Some(personalization_time(value)?),
                0x5F56 => dg12.personalization_device_serial = Some(text(ID, tag, value)?),
                other => debug!("Skipping unknown {ID} tag {other:X}"),
            }
        }
        if seen != dg12.tag_list {
            warn!("{ID} tag list {:X?} does not match the elements {seen:X?}", dg12.tag_list);
        }
        Ok(dg12)
    }
}

fn personalization_time(value: &[u8]) -> Result<String, PassportError> {
    if value.len() == 7 {
        Ok(bytes2hex(value))
    } else {
        text(ID, 0x5F55, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagroups::{decode, DataGroup};
    use crate::tlv::encode;
    use hex_literal::hex;

    fn decode_dg12(data: &[u8]) -> Result<Dg12, PassportError> {
        match decode(DataGroupId::Dg12, data)? {
            DataGroup::Dg12(dg12) => Ok(dg12),
            other => panic!("unexpected data group {:?}", other.id()),
        }
    }

    #[test]
    fn test_icao_example() -> Result<(), PassportError> {
        // Example taken from https://www.icao.int/publications/Documents/9303_p10_cons_en.pdf Section 4.7.12
        let body = [
            encode(0x5C, &hex!("5F19 5F26 5F1A")),
            encode(0x5F19, b"UNITED STATES OF AMERICA"),
            encode(0x5F26, &hex!("20020531")),
            encode(0xA0, &[encode(0x02, &[1]), encode(0x5F1A, b"SMITH<<BRENDA<P")].concat()),
        ]
        .concat();
        let dg12 = decode_dg12(&encode(0x6C, &body))?;
        assert_eq!(dg12.issuing_authority.as_deref(), Some("UNITED STATES OF AMERICA"));
        assert_eq!(dg12.date_of_issue.as_deref(), Some("20020531"));
        assert_eq!(dg12.other_persons, vec!["SMITH<<BRENDA<P"]);
        Ok(())
    }

    #[test]
    fn test_images_and_personalization() -> Result<(), PassportError> {
        let body = [
            encode(0x5C, &hex!("5F1D 5F1E 5F55 5F56 5F1B 5F1C")),
            encode(0x5F1D, &hex!("FFD8FFE0")),
            encode(0x5F1E, &hex!("FFD8FFE1")),
            encode(0x5F55, &hex!("20020531143015")),
            encode(0x5F56, b"SN-0042"),
            encode(0x5F1B, b"NONE"),
            encode(0x5F1C, b"EXEMPT"),
        ]
        .concat();
        let dg12 = decode_dg12(&encode(0x6C, &body))?;
        assert_eq!(dg12.front_image, Some(hex!("FFD8FFE0").to_vec()));
        assert_eq!(dg12.rear_image, Some(hex!("FFD8FFE1").to_vec()));
        assert_eq!(dg12.personalization_time.as_deref(), Some("20020531143015"));
        assert_eq!(dg12.personalization_device_serial.as_deref(), Some("SN-0042"));
        assert_eq!(dg12.endorsements_or_observations.as_deref(), Some("NONE"));
        assert_eq!(dg12.tax_or_exit_requirements.as_deref(), Some("EXEMPT"));
        assert!(format!("{dg12:?}").contains("front_image_len: Some(4)"));
        Ok(())
    }

    #[test]
    fn test_tag_list_decodes_to_announced_tags() -> Result<(), PassportError> {
        let body = [encode(0x5C, &hex!("5F19 5F26")), encode(0x5F19, b"UTO")].concat();
        let dg12 = decode_dg12(&encode(0x6C, &body))?;
        assert_eq!(dg12.tag_list, vec![0x5F19, 0x5F26]);
        assert_eq!(dg12.date_of_issue, None);
        Ok(())
    }

    #[test]
    fn test_template_entry_truncated() {
        let body = [
            encode(0x5C, &hex!("A0")),
            encode(0xA0, &hex!("020101 5F1A 05 5348")),
        ]
        .concat();
        assert!(decode_dg12(&encode(0x6C, &body))
            .is_err_and(|e| matches!(e, PassportError::InvalidDataGroup(DataGroupId::Dg12, _))));
    }
}
