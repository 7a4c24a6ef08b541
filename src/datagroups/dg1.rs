//! EF.DG1, the MRZ stored on the chip.

use std::collections::BTreeMap;

use super::{invalid, DataGroupId};
use crate::mrz::{GenericDocument, MrzParser, MrzType};
use crate::tlv::TlvCursor;
use crate::PassportError;

/// Data element tags of the MRZ, ICAO Doc 9303-10 Section 4.7.1.
pub mod tags {
    pub const DOCUMENT_CODE: u32 = 0x5F03;
    pub const ISSUING_STATE: u32 = 0x5F28;
    pub const NAME: u32 = 0x5B;
    pub const DOCUMENT_NUMBER: u32 = 0x5A;
    pub const DOCUMENT_NUMBER_CHECK_DIGIT: u32 = 0x5F04;
    pub const NATIONALITY: u32 = 0x5F2C;
    pub const DATE_OF_BIRTH: u32 = 0x5F57;
    pub const DATE_OF_BIRTH_CHECK_DIGIT: u32 = 0x5F05;
    pub const SEX: u32 = 0x5F35;
    pub const DATE_OF_EXPIRY: u32 = 0x59;
    pub const DATE_OF_EXPIRY_CHECK_DIGIT: u32 = 0x5F06;
    pub const OPTIONAL_DATA: u32 = 0x53;
    pub const OPTIONAL_DATA_CHECK_DIGIT: u32 = 0x5F02;
    pub const COMPOSITE_CHECK_DIGIT: u32 = 0x5F07;
    pub const MRZ: u32 = 0x5F1F;
}

/// Element layout per MRZ type as `(tag, start, end)` into the concatenated MRZ.
const TD1_LAYOUT: &[(u32, usize, usize)] = &[
    (tags::DOCUMENT_CODE, 0, 2),
    (tags::ISSUING_STATE, 2, 5),
    (tags::DOCUMENT_NUMBER, 5, 14),
    (tags::DOCUMENT_NUMBER_CHECK_DIGIT, 14, 15),
    (tags::DATE_OF_BIRTH, 30, 36),
    (tags::DATE_OF_BIRTH_CHECK_DIGIT, 36, 37),
    (tags::SEX, 37, 38),
    (tags::DATE_OF_EXPIRY, 38, 44),
    (tags::DATE_OF_EXPIRY_CHECK_DIGIT, 44, 45),
    (tags::NATIONALITY, 45, 48),
    (tags::COMPOSITE_CHECK_DIGIT, 59, 60),
    (tags::NAME, 60, 90),
];

const TD2_LAYOUT: &[(u32, usize, usize)] = &[
    (tags::DOCUMENT_CODE, 0, 2),
    (tags::ISSUING_STATE, 2, 5),
    (tags::NAME, 5, 36),
    (tags::DOCUMENT_NUMBER, 36, 45),
    (tags::DOCUMENT_NUMBER_CHECK_DIGIT, 45, 46),
    (tags::NATIONALITY, 46, 49),
    (tags::DATE_OF_BIRTH, 49, 55),
    (tags::DATE_OF_BIRTH_CHECK_DIGIT, 55, 56),
    (tags::SEX, 56, 57),
    (tags::DATE_OF_EXPIRY, 57, 63),
    (tags::DATE_OF_EXPIRY_CHECK_DIGIT, 63, 64),
    (tags::OPTIONAL_DATA, 64, 71),
    (tags::COMPOSITE_CHECK_DIGIT, 71, 72),
];

const TD3_LAYOUT: &[(u32, usize, usize)] = &[
    (tags::DOCUMENT_CODE, 0, 2),
    (tags::ISSUING_STATE, 2, 5),
    (tags::NAME, 5, 44),
    (tags::DOCUMENT_NUMBER, 44, 53),
    (tags::DOCUMENT_NUMBER_CHECK_DIGIT, 53, 54),
    (tags::NATIONALITY, 54, 57),
    (tags::DATE_OF_BIRTH, 57, 63),
    (tags::DATE_OF_BIRTH_CHECK_DIGIT, 63, 64),
    (tags::SEX, 64, 65),
    (tags::DATE_OF_EXPIRY, 65, 71),
    (tags::DATE_OF_EXPIRY_CHECK_DIGIT, 71, 72),
    (tags::OPTIONAL_DATA, 72, 86),
    (tags::OPTIONAL_DATA_CHECK_DIGIT, 86, 87),
    (tags::COMPOSITE_CHECK_DIGIT, 87, 88),
];

/// Decoded EF.DG1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dg1 {
    mrz: String,
    mrz_type: MrzType,
    elements: BTreeMap<u32, String>,
}

impl Dg1 {
    pub(super) fn parse(body: &[u8]) -> Result<Self, PassportError> {
        let mut cursor = TlvCursor::new(body);
        let value = cursor.expect_tlv(tags::MRZ)?;
        if !cursor.is_empty() {
            return Err(invalid(DataGroupId::Dg1, "unexpected data after the MRZ"));
        }
        if !value.is_ascii() {
            return Err(invalid(DataGroupId::Dg1, "MRZ contains non-ASCII bytes"));
        }
        let mrz = String::from_utf8(value.to_vec())
            .map_err(|_| invalid(DataGroupId::Dg1, "MRZ is not valid UTF-8"))?;

        let (mrz_type, layout) = match mrz.len() {
            90 => (MrzType::Td1, TD1_LAYOUT),
            72 => (MrzType::Td2, TD2_LAYOUT),
            88 => (MrzType::Td3, TD3_LAYOUT),
            len => {
                return Err(invalid(
                    DataGroupId::Dg1,
                    format!("MRZ length {len} does not match any layout"),
                ))
            }
        };

        let mut elements: BTreeMap<u32, String> = layout
            .iter()
            .map(|&(tag, start, end)| (tag, mrz[start..end].to_owned()))
            .collect();
        if mrz_type == MrzType::Td1 {
            // TD1 optional data is split across the first and second line.
            elements.insert(tags::OPTIONAL_DATA, format!("{}{}", &mrz[15..30], &mrz[48..59]));
        }
        elements.insert(tags::MRZ, mrz.clone());

        Ok(Self {
            mrz,
            mrz_type,
            elements,
        })
    }

    /// The MRZ as one string without line breaks.
    #[must_use]
    pub fn mrz(&self) -> &str {
        &self.mrz
    }

    #[must_use]
    pub const fn mrz_type(&self) -> MrzType {
        self.mrz_type
    }

    /// The MRZ split into its printed lines.
    #[must_use]
    pub fn mrz_lines(&self) -> Vec<&str> {
        let line_length = self.mrz_type.line_length();
        (0..self.mrz_type.line_count())
            .filter_map(|line| self.mrz.get(line * line_length..(line + 1) * line_length))
            .collect()
    }

    /// A data element by its ICAO tag, see [`tags`].
    #[must_use]
    pub fn element(&self, tag: u32) -> Option<&str> {
        self.elements.get(&tag).map(String::as_str)
    }

    /// All data elements keyed by tag.
    #[must_use]
    pub const fn elements(&self) -> &BTreeMap<u32, String> {
        &self.elements
    }

    /// Parses the stored MRZ into document fields.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the MRZ layout is not supported.
    pub fn document(&self, parser: &MrzParser) -> Result<GenericDocument, PassportError> {
        parser.parse_lines(&self.mrz_lines())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagroups::{decode, DataGroup};
    use crate::mrz::tests::{td1_specimen, td2_specimen, td3_specimen};
    use crate::tlv::encode;

    fn ef_dg1(lines: &[String]) -> Vec<u8> {
        encode(0x61, &encode(0x5F1F, lines.concat().as_bytes()))
    }

    fn decode_dg1(lines: &[String]) -> Result<Dg1, PassportError> {
        match decode(DataGroupId::Dg1, &ef_dg1(lines))? {
            DataGroup::Dg1(dg1) => Ok(dg1),
            other => panic!("unexpected data group {:?}", other.id()),
        }
    }

    #[test]
    fn test_td3_elements() -> Result<(), PassportError> {
        let dg1 = decode_dg1(&td3_specimen())?;
        assert_eq!(dg1.mrz_type(), MrzType::Td3);
        assert_eq!(dg1.element(tags::DOCUMENT_CODE), Some("P<"));
        assert_eq!(dg1.element(tags::ISSUING_STATE), Some("UTO"));
        assert_eq!(dg1.element(tags::DOCUMENT_NUMBER), Some("L898902C3"));
        assert_eq!(dg1.element(tags::DOCUMENT_NUMBER_CHECK_DIGIT), Some("6"));
        assert_eq!(dg1.element(tags::DATE_OF_BIRTH), Some("740812"));
        assert_eq!(dg1.element(tags::SEX), Some("F"));
        assert_eq!(dg1.element(tags::DATE_OF_EXPIRY), Some("120415"));
        assert_eq!(dg1.element(tags::OPTIONAL_DATA), Some("ZE184226B<<<<<"));
        assert_eq!(dg1.element(tags::OPTIONAL_DATA_CHECK_DIGIT), Some("1"));
        assert_eq!(dg1.element(tags::COMPOSITE_CHECK_DIGIT), Some("0"));
        assert_eq!(dg1.mrz_lines(), td3_specimen().to_vec());
        Ok(())
    }

    #[test]
    fn test_td1_elements() -> Result<(), PassportError> {
        let dg1 = decode_dg1(&td1_specimen())?;
        assert_eq!(dg1.mrz_type(), MrzType::Td1);
        assert_eq!(dg1.element(tags::DOCUMENT_NUMBER), Some("D23145890"));
        assert_eq!(dg1.element(tags::NATIONALITY), Some("UTO"));
        assert_eq!(dg1.element(tags::OPTIONAL_DATA).map(str::len), Some(26));
        assert_eq!(dg1.element(tags::NAME), Some(td1_specimen()[2].as_str()));
        assert_eq!(dg1.mrz_lines().len(), 3);
        Ok(())
    }

    #[test]
    fn test_td2_document() -> Result<(), PassportError> {
        let dg1 = decode_dg1(&td2_specimen())?;
        assert_eq!(dg1.mrz_type(), MrzType::Td2);
        assert_eq!(dg1.element(tags::DOCUMENT_NUMBER), Some("D23145890"));
        let document = dg1.document(&MrzParser::with_reference_year(false, 2024))?;
        assert!(document.all_check_digits_valid);
        assert_eq!(document.surnames, "ERIKSSON");
        Ok(())
    }

    #[test]
    fn test_invalid_length() {
        let result = decode(DataGroupId::Dg1, &encode(0x61, &encode(0x5F1F, b"P<UTO")));
        assert!(result.is_err_and(|e| matches!(e, PassportError::InvalidDataGroup(DataGroupId::Dg1, _))));
    }
}
