//! Machine Readable Zone parsing.
//!
//! Layouts are described in ICAO Doc 9303 parts 4 (TD3), 5 (TD1) and 6 (TD2):
//! <https://www.icao.int/publications/pages/publication.aspx?docnum=9303>

mod field;
mod td1;
mod td2;
mod td3;

pub use field::{
    calculate_check_digit, expiry_date, is_value_valid, FieldFormatter, FieldType, FieldValue,
    MrzField, Sex, MAX_OCR_VARIANT_POSITIONS,
};

use chrono::NaiveDate;
use tracing::{debug, error, info};

use crate::{bac, PassportError};

/// Physical MRZ layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MrzType {
    /// ID card size, 3 lines of 30 characters.
    Td1,
    /// 2 lines of 36 characters.
    Td2,
    /// Passport booklet, 2 lines of 44 characters.
    Td3,
}

impl MrzType {
    #[must_use]
    pub const fn line_count(self) -> usize {
        match self {
            Self::Td1 => 3,
            Self::Td2 | Self::Td3 => 2,
        }
    }

    #[must_use]
    pub const fn line_length(self) -> usize {
        match self {
            Self::Td1 => 30,
            Self::Td2 => 36,
            Self::Td3 => 44,
        }
    }

    /// Picks the layout matching the number and (uniform) length of `lines`.
    #[must_use]
    pub fn detect<S: AsRef<str>>(lines: &[S]) -> Option<Self> {
        let length = uniform_line_length(lines)?;
        [Self::Td1, Self::Td2, Self::Td3]
            .into_iter()
            .find(|mrz_type| {
                mrz_type.line_count() == lines.len() && mrz_type.line_length() == length
            })
    }
}

fn uniform_line_length<S: AsRef<str>>(lines: &[S]) -> Option<usize> {
    let length = lines.first()?.as_ref().chars().count();
    lines
        .iter()
        .all(|line| line.as_ref().chars().count() == length)
        .then_some(length)
}

/// Every field of an MRZ, before document number recovery.
#[derive(Debug, Clone)]
pub(crate) struct ParsedFields {
    pub(crate) mrz_type: MrzType,
    pub(crate) document_type: MrzField,
    pub(crate) country_code: MrzField,
    pub(crate) names: MrzField,
    pub(crate) document_number: MrzField,
    pub(crate) nationality: MrzField,
    pub(crate) birth_date: MrzField,
    pub(crate) sex: MrzField,
    pub(crate) expiry_date: MrzField,
    /// Personal number (TD3) or first optional data element.
    pub(crate) personal_number: MrzField,
    /// Second optional data element (TD1 only).
    pub(crate) personal_number2: Option<MrzField>,
    pub(crate) composite: Option<MrzField>,
}

impl ParsedFields {
    /// The data covered by the composite check digit, in layout order.
    fn composite_value(&self, document_number: &MrzField) -> String {
        match self.mrz_type {
            MrzType::Td1 => [
                document_number.composite_part(),
                self.personal_number.composite_part(),
                self.birth_date.composite_part(),
                self.expiry_date.composite_part(),
                self.personal_number2
                    .as_ref()
                    .map(MrzField::composite_part)
                    .unwrap_or_default(),
            ]
            .concat(),
            MrzType::Td2 | MrzType::Td3 => [
                document_number.composite_part(),
                self.birth_date.composite_part(),
                self.expiry_date.composite_part(),
                self.personal_number.composite_part(),
            ]
            .concat(),
        }
    }

    fn check_digits_valid(&self, document_number: &MrzField) -> bool {
        let fields_valid = [document_number, &self.birth_date, &self.expiry_date, &self.personal_number]
            .iter()
            .all(|field| field.is_valid().unwrap_or(true));
        let composite_valid = self.composite.as_ref().map_or(true, |composite| {
            composite
                .raw_value
                .chars()
                .next()
                .is_some_and(|check_digit| {
                    is_value_valid(&self.composite_value(document_number), check_digit)
                })
        });
        fields_valid && composite_valid
    }

    fn into_document(self, formatter: &FieldFormatter) -> GenericDocument {
        let mut all_check_digits_valid = self.check_digits_valid(&self.document_number);
        let mut document_number = self.document_number.clone();

        if document_number.is_valid() == Some(false) {
            let recovered = formatter
                .variants_with_check_digit(&document_number)
                .into_iter()
                .find(|candidate| self.check_digits_valid(candidate));
            if let Some(recovered) = recovered {
                info!(
                    "Recovered document number {} from OCR reading {}",
                    recovered.raw_value, document_number.raw_value
                );
                document_number = recovered;
                all_check_digits_valid = true;
            } else {
                debug!("No OCR variant of {} validates", document_number.raw_value);
            }
        }

        let (surnames, given_names) = match self.names.value {
            Some(FieldValue::Names {
                ref primary,
                ref secondary,
            }) => (primary.clone(), secondary.clone()),
            _ => (String::new(), String::new()),
        };

        GenericDocument {
            mrz_type: self.mrz_type,
            document_type: text_of(&self.document_type),
            country_code: text_of(&self.country_code),
            surnames,
            given_names,
            document_number: text_of(&document_number),
            nationality_country_code: text_of(&self.nationality),
            birth_date: self.birth_date.date(),
            sex: match self.sex.value {
                Some(FieldValue::Sex(sex)) => Some(sex),
                _ => None,
            },
            expiry_date: self.expiry_date.date(),
            personal_number: text_of(&self.personal_number),
            personal_number2: self.personal_number2.as_ref().map(text_of),
            is_document_number_valid: document_number.is_valid().unwrap_or(false),
            is_birth_date_valid: self.birth_date.is_valid().unwrap_or(false),
            is_expiry_date_valid: self.expiry_date.is_valid().unwrap_or(false),
            is_personal_number_valid: self.personal_number.is_valid(),
            all_check_digits_valid,
            document_number_raw: document_number.raw_value,
            birth_date_raw: self.birth_date.raw_value,
            expiry_date_raw: self.expiry_date.raw_value,
        }
    }
}

fn text_of(field: &MrzField) -> String {
    field.text().unwrap_or_default().to_owned()
}

/// A parsed TD1, TD2 or TD3 document (passport, visa or identity card).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericDocument {
    pub mrz_type: MrzType,
    pub document_type: String,
    /// Issuing state or organization.
    pub country_code: String,
    pub surnames: String,
    pub given_names: String,
    pub document_number: String,
    pub nationality_country_code: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub expiry_date: Option<NaiveDate>,
    pub personal_number: String,
    pub personal_number2: Option<String>,
    pub is_document_number_valid: bool,
    pub is_birth_date_valid: bool,
    pub is_expiry_date_valid: bool,
    /// `None` when the layout has no check digit for the personal number.
    pub is_personal_number_valid: Option<bool>,
    pub all_check_digits_valid: bool,
    document_number_raw: String,
    birth_date_raw: String,
    expiry_date_raw: String,
}

impl GenericDocument {
    /// The key material needed for Basic Access Control.
    ///
    /// # Errors
    ///
    /// * `PassportError::InvalidMrzError` if any check digit of the document fails.
    pub fn mrz_data(&self) -> Result<MrzData, PassportError> {
        if !self.all_check_digits_valid {
            error!("Can not derive access keys from an MRZ with invalid check digits");
            return Err(PassportError::InvalidMrzError(
                "MRZ check digits are not valid",
            ));
        }
        MrzData::new(
            self.document_number_raw.trim_end_matches('<'),
            &self.birth_date_raw,
            &self.expiry_date_raw,
            self.mrz_type,
            &self.country_code,
        )
    }
}

/// The MRZ values used to derive Basic Access Control keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MrzData {
    document_number: String,
    birth_date: String,
    expiration_date: String,
    mrz_type: MrzType,
    nationality: String,
}

impl MrzData {
    /// Creates the access data from its parts. Dates are `YYMMDD`.
    ///
    /// # Errors
    ///
    /// * `PassportError` if a field has an invalid length or character.
    ///
    /// # Example
    ///
    /// ```
    /// # use emrtd_reader::PassportError;
    /// #
    /// # fn main() -> Result<(), PassportError> {
    /// use emrtd_reader::mrz::{MrzData, MrzType};
    ///
    /// let mrz_data = MrzData::new("L898902C3", "740812", "120415", MrzType::Td3, "UTO")?;
    /// assert_eq!(mrz_data.mrz_information()?, "L898902C3674081221204159");
    /// #
    /// #     Ok(())
    /// # }
    /// ```
    pub fn new(
        document_number: &str,
        birth_date: &str,
        expiration_date: &str,
        mrz_type: MrzType,
        nationality: &str,
    ) -> Result<Self, PassportError> {
        bac::mrz_information(document_number, birth_date, expiration_date)?;
        Ok(Self {
            document_number: document_number.to_owned(),
            birth_date: birth_date.to_owned(),
            expiration_date: expiration_date.to_owned(),
            mrz_type,
            nationality: nationality.to_owned(),
        })
    }

    #[must_use]
    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    #[must_use]
    pub fn birth_date(&self) -> &str {
        &self.birth_date
    }

    #[must_use]
    pub fn expiration_date(&self) -> &str {
        &self.expiration_date
    }

    #[must_use]
    pub const fn mrz_type(&self) -> MrzType {
        self.mrz_type
    }

    #[must_use]
    pub fn nationality(&self) -> &str {
        &self.nationality
    }

    /// The "MRZ information" string hashed into the BAC key seed.
    ///
    /// # Errors
    ///
    /// * `PassportError` if a field contains an invalid character.
    pub fn mrz_information(&self) -> Result<String, PassportError> {
        bac::mrz_information(&self.document_number, &self.birth_date, &self.expiration_date)
    }
}

/// Parses MRZ text into a [`GenericDocument`].
#[derive(Debug, Clone, Copy)]
pub struct MrzParser {
    formatter: FieldFormatter,
}

impl MrzParser {
    #[must_use]
    pub fn new(ocr_correction: bool) -> Self {
        Self {
            formatter: FieldFormatter::new(ocr_correction),
        }
    }

    /// Uses `reference_year` instead of the current year for birth date centuries.
    #[must_use]
    pub const fn with_reference_year(ocr_correction: bool, reference_year: i32) -> Self {
        Self {
            formatter: FieldFormatter::with_reference_year(ocr_correction, reference_year),
        }
    }

    /// Parses MRZ lines.
    ///
    /// # Errors
    ///
    /// * `PassportError::UnsupportedMrzLayout` if the lines match no layout.
    pub fn parse_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<GenericDocument, PassportError> {
        let Some(mrz_type) = MrzType::detect(lines) else {
            let length = uniform_line_length(lines);
            error!(
                "No MRZ parser found for {} lines of length {length:?}",
                lines.len()
            );
            return Err(PassportError::UnsupportedMrzLayout(lines.len(), length));
        };
        debug!("Parsing MRZ as {mrz_type:?}");

        let lines: Vec<&str> = lines.iter().map(AsRef::as_ref).collect();
        let fields = match mrz_type {
            MrzType::Td1 => td1::parse(&lines, &self.formatter),
            MrzType::Td2 => td2::parse(&lines, &self.formatter),
            MrzType::Td3 => td3::parse(&lines, &self.formatter),
        };
        Ok(fields.into_document(&self.formatter))
    }

    /// Parses MRZ text with one line per row. Surrounding whitespace and empty lines are ignored.
    ///
    /// # Errors
    ///
    /// * `PassportError::UnsupportedMrzLayout` if the lines match no layout.
    ///
    /// # Example
    ///
    /// ```
    /// # use emrtd_reader::PassportError;
    /// #
    /// # fn main() -> Result<(), PassportError> {
    /// use emrtd_reader::mrz::MrzParser;
    ///
    /// let text = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\n\
    ///             L898902C36UTO7408122F1204159ZE184226B<<<<<10";
    /// let document = MrzParser::new(false).parse_str(text)?;
    /// assert!(document.all_check_digits_valid);
    /// assert_eq!(document.document_number, "L898902C3");
    /// #
    /// #     Ok(())
    /// # }
    /// ```
    pub fn parse_str(&self, text: &str) -> Result<GenericDocument, PassportError> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        self.parse_lines(&lines)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn td3_specimen() -> [String; 2] {
        [
            format!("{:<<44}", "P<UTOERIKSSON<<ANNA<MARIA"),
            "L898902C36UTO7408122F1204159ZE184226B<<<<<10".to_owned(),
        ]
    }

    pub(crate) fn td1_specimen() -> [String; 3] {
        [
            "I<UTOD231458907<<<<<<<<<<<<<<<".to_owned(),
            "7408122F1204159UTO<<<<<<<<<<<6".to_owned(),
            "ERIKSSON<<ANNA<MARIA<<<<<<<<<<".to_owned(),
        ]
    }

    pub(crate) fn td2_specimen() -> [String; 2] {
        [
            format!("{:<<36}", "I<UTOERIKSSON<<ANNA<MARIA"),
            "D231458907UTO7408122F1204159<<<<<<<6".to_owned(),
        ]
    }

    #[test]
    fn test_detect_layout() {
        assert_eq!(MrzType::detect(&td1_specimen()), Some(MrzType::Td1));
        assert_eq!(MrzType::detect(&td2_specimen()), Some(MrzType::Td2));
        assert_eq!(MrzType::detect(&td3_specimen()), Some(MrzType::Td3));
        assert_eq!(MrzType::detect(&["<".repeat(30), "<".repeat(30)]), None);
        assert_eq!(MrzType::detect(&["<".repeat(44), "<".repeat(36)]), None);
        assert_eq!(MrzType::detect::<&str>(&[]), None);
    }

    #[test]
    fn test_parse_td3_specimen() -> Result<(), PassportError> {
        let document = MrzParser::with_reference_year(false, 2024).parse_lines(&td3_specimen())?;
        assert_eq!(document.mrz_type, MrzType::Td3);
        assert_eq!(document.document_type, "P");
        assert_eq!(document.country_code, "UTO");
        assert_eq!(document.surnames, "ERIKSSON");
        assert_eq!(document.given_names, "ANNA MARIA");
        assert_eq!(document.document_number, "L898902C3");
        assert_eq!(document.nationality_country_code, "UTO");
        assert_eq!(document.birth_date, NaiveDate::from_ymd_opt(1974, 8, 12));
        assert_eq!(document.sex, Some(Sex::Female));
        assert_eq!(document.expiry_date, NaiveDate::from_ymd_opt(2012, 4, 15));
        assert_eq!(document.personal_number, "ZE184226B");
        assert_eq!(document.is_personal_number_valid, Some(true));
        assert!(document.all_check_digits_valid);

        let mrz_data = document.mrz_data()?;
        assert_eq!(mrz_data.document_number(), "L898902C3");
        assert_eq!(mrz_data.birth_date(), "740812");
        assert_eq!(mrz_data.expiration_date(), "120415");
        assert_eq!(mrz_data.nationality(), "UTO");
        Ok(())
    }

    #[test]
    fn test_parse_td1_specimen() -> Result<(), PassportError> {
        let document = MrzParser::with_reference_year(true, 2024).parse_lines(&td1_specimen())?;
        assert_eq!(document.mrz_type, MrzType::Td1);
        assert_eq!(document.document_type, "I");
        assert_eq!(document.document_number, "D23145890");
        assert_eq!(document.surnames, "ERIKSSON");
        assert_eq!(document.given_names, "ANNA MARIA");
        assert_eq!(document.personal_number2, Some(String::new()));
        assert_eq!(document.is_personal_number_valid, None);
        assert!(document.all_check_digits_valid);
        assert_eq!(document.mrz_data()?.mrz_type(), MrzType::Td1);
        Ok(())
    }

    #[test]
    fn test_parse_td2_specimen() -> Result<(), PassportError> {
        let document = MrzParser::with_reference_year(true, 2024).parse_lines(&td2_specimen())?;
        assert_eq!(document.mrz_type, MrzType::Td2);
        assert_eq!(document.document_number, "D23145890");
        assert_eq!(document.expiry_date, NaiveDate::from_ymd_opt(2012, 4, 15));
        assert!(document.all_check_digits_valid);
        Ok(())
    }

    #[test]
    fn test_composite_failure() -> Result<(), PassportError> {
        let [line1, line2] = td3_specimen();
        let line2 = line2.replace("<<<<<10", "<<<<<11");
        let document = MrzParser::with_reference_year(false, 2024).parse_lines(&[line1, line2])?;
        assert!(document.is_document_number_valid);
        assert!(!document.all_check_digits_valid);
        assert!(document
            .mrz_data()
            .is_err_and(|e| matches!(e, PassportError::InvalidMrzError(_))));
        Ok(())
    }

    #[test]
    fn test_document_number_ocr_recovery() -> Result<(), PassportError> {
        let [line1, line2] = td3_specimen();
        let line2 = line2.replacen("L898902C3", "LB98902C3", 1);

        let document = MrzParser::with_reference_year(true, 2024)
            .parse_lines(&[line1.as_str(), line2.as_str()])?;
        assert_eq!(document.document_number, "L898902C3");
        assert!(document.is_document_number_valid);
        assert!(document.all_check_digits_valid);

        let mrz_data = document.mrz_data()?;
        assert_eq!(mrz_data.mrz_information()?, "L898902C3674081221204159");
        Ok(())
    }

    #[test]
    fn test_parse_str_and_unsupported_layout() -> Result<(), PassportError> {
        let [line1, line2] = td3_specimen();
        let text = format!("  {line1}\r\n\n{line2}\n");
        let document = MrzParser::with_reference_year(false, 2024).parse_str(&text)?;
        assert!(document.all_check_digits_valid);

        let result = MrzParser::new(false).parse_str(&line1);
        assert!(result.is_err_and(|e| matches!(e, PassportError::UnsupportedMrzLayout(1, Some(44)))));

        let result = MrzParser::new(false).parse_lines(&[line1.as_str(), "L898902C3"]);
        assert!(result.is_err_and(|e| matches!(e, PassportError::UnsupportedMrzLayout(2, None))));
        Ok(())
    }

    #[test]
    fn test_mrz_data_equality() -> Result<(), PassportError> {
        let parser = MrzParser::with_reference_year(false, 2024);
        let first = parser.parse_lines(&td3_specimen())?.mrz_data()?;
        let second = parser.parse_lines(&td3_specimen())?.mrz_data()?;
        assert_eq!(first, second);
        assert_eq!(
            first,
            MrzData::new("L898902C3", "740812", "120415", MrzType::Td3, "UTO")?
        );
        Ok(())
    }
}
