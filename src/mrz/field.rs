//! Fixed-width MRZ field extraction, OCR correction and check digits.

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{error, trace, warn};

use crate::PassportError;

/// Upper bound on OCR-confusable positions explored by
/// [`FieldFormatter::variants_with_check_digit`]. Each position doubles the search.
pub const MAX_OCR_VARIANT_POSITIONS: usize = 12;

/// The kind of data a field holds, which drives both OCR correction and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    DocumentType,
    CountryCode,
    Names,
    DocumentNumber,
    Nationality,
    BirthDate,
    Sex,
    ExpiryDate,
    PersonalNumber,
    OptionalData,
    /// A composite check digit.
    Hash,
    Numeric,
    Alphabetic,
}

/// Sex as printed in the MRZ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Unspecified,
}

impl Sex {
    /// Decodes the single-character MRZ representation (`M`, `F`, `<` or `X`).
    #[must_use]
    pub fn from_mrz(value: &str) -> Option<Self> {
        match value {
            "M" => Some(Self::Male),
            "F" => Some(Self::Female),
            "<" | "X" => Some(Self::Unspecified),
            _ => None,
        }
    }
}

/// The semantic value of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Sex(Sex),
    Names { primary: String, secondary: String },
}

/// One MRZ field as read from a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrzField {
    /// Formatted value, `None` when the raw text could not be interpreted.
    pub value: Option<FieldValue>,
    /// The (possibly corrected) characters, exactly as wide as the field.
    pub raw_value: String,
    pub check_digit: Option<char>,
}

impl MrzField {
    /// Validates the field against its check digit, `None` for unchecked fields.
    #[must_use]
    pub fn is_valid(&self) -> Option<bool> {
        self.check_digit
            .map(|check_digit| is_value_valid(&self.raw_value, check_digit))
    }

    /// The text value, if the field holds text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self.value {
            Some(FieldValue::Text(ref text)) => Some(text),
            _ => None,
        }
    }

    /// The date value, if the field holds a valid date.
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        match self.value {
            Some(FieldValue::Date(date)) => Some(date),
            _ => None,
        }
    }

    /// Raw value followed by the check digit, as used in composite check digits.
    pub(crate) fn composite_part(&self) -> String {
        let mut part = self.raw_value.clone();
        if let Some(check_digit) = self.check_digit {
            part.push(check_digit);
        }
        part
    }
}

fn char_value(c: char) -> Option<u32> {
    match c {
        '<' => Some(0),
        '0'..='9' => c.to_digit(10),
        'A'..='Z' => Some(u32::from(c) - u32::from('A') + 10),
        _ => None,
    }
}

/// Calculates the check digit for the given data using a specific algorithm.
/// Calculation is explained at ICAO Doc 9303-3 Section 4.9:
/// <https://www.icao.int/publications/Documents/9303_p3_cons_en.pdf>
///
/// # Errors
///
/// * `PassportError` if an invalid character is given.
///
/// # Example
///
/// ```
/// # use emrtd_reader::PassportError;
/// #
/// # fn main() -> Result<(), PassportError> {
/// use emrtd_reader::mrz::calculate_check_digit;
/// assert_eq!(calculate_check_digit("520727")?, '3');
/// assert_eq!(calculate_check_digit("AB2134<<<")?, '5');
/// #
/// #     Ok(())
/// # }
/// ```
pub fn calculate_check_digit(data: &str) -> Result<char, PassportError> {
    let weights = [7, 3, 1];
    let mut total = 0;

    for (counter, value) in data.chars().enumerate() {
        let Some(weighted_value) = char_value(value) else {
            error!("Can not calculate check digit for invalid character: `{value}`");
            return Err(PassportError::ParseMrzCharError(value));
        };
        total = (total + weights[counter % 3] * weighted_value) % 10;
    }

    char::from_digit(total, 10).ok_or(PassportError::ParseMrzCharError('?'))
}

/// Whether `value` matches `check_digit`.
///
/// A filler check digit is accepted for a field that consists of fillers only.
#[must_use]
pub fn is_value_valid(value: &str, check_digit: char) -> bool {
    if check_digit == '<' {
        return value.chars().all(|c| c == '<');
    }
    calculate_check_digit(value).is_ok_and(|calculated| calculated == check_digit)
}

fn replace_digits(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '0' => 'O',
            '1' => 'I',
            '2' => 'Z',
            '8' => 'B',
            other => other,
        })
        .collect()
}

fn replace_letters(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'O' | 'Q' | 'U' | 'D' => '0',
            'I' => '1',
            'Z' => '2',
            'B' => '8',
            other => other,
        })
        .collect()
}

/// Characters a scanner confuses in document numbers, with their alternative reading.
const fn ocr_alternative(c: char) -> Option<char> {
    match c {
        '0' => Some('O'),
        'O' => Some('0'),
        'I' => Some('1'),
        '1' => Some('I'),
        '8' => Some('B'),
        'B' => Some('8'),
        _ => None,
    }
}

fn trim_fillers(value: &str) -> &str {
    value.trim_matches('<')
}

/// Builds [`MrzField`]s from MRZ lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFormatter {
    ocr_correction: bool,
    reference_year: i32,
}

impl FieldFormatter {
    /// Creates a formatter that infers birth date centuries from the current year.
    #[must_use]
    pub fn new(ocr_correction: bool) -> Self {
        Self::with_reference_year(ocr_correction, Utc::now().year())
    }

    /// Creates a formatter with an explicit reference year for birth date centuries.
    #[must_use]
    pub const fn with_reference_year(ocr_correction: bool, reference_year: i32) -> Self {
        Self {
            ocr_correction,
            reference_year,
        }
    }

    #[must_use]
    pub const fn ocr_correction(&self) -> bool {
        self.ocr_correction
    }

    /// Extracts `length` characters of `line` starting at `start`.
    ///
    /// When `check_digit_follows` is set, the character right after the field is
    /// taken as its check digit. Characters beyond the end of the line are
    /// absent, they never cause a panic.
    #[must_use]
    pub fn field(
        &self,
        field_type: FieldType,
        line: &str,
        start: usize,
        length: usize,
        check_digit_follows: bool,
    ) -> MrzField {
        let mut raw_value: String = line.chars().skip(start).take(length).collect();
        let mut check_digit = if check_digit_follows {
            line.chars().nth(start + length)
        } else {
            None
        };

        if self.ocr_correction {
            raw_value = Self::correct(&raw_value, field_type);
            check_digit = check_digit
                .and_then(|c| Self::correct(&c.to_string(), field_type).chars().next());
        }

        MrzField {
            value: self.format(&raw_value, field_type),
            raw_value,
            check_digit,
        }
    }

    /// Applies the OCR correction policy of `field_type` to `value`.
    #[must_use]
    pub fn correct(value: &str, field_type: FieldType) -> String {
        match field_type {
            FieldType::BirthDate | FieldType::ExpiryDate | FieldType::Hash | FieldType::Numeric => {
                replace_letters(value)
            }
            FieldType::Names
            | FieldType::DocumentType
            | FieldType::CountryCode
            | FieldType::Nationality
            | FieldType::Alphabetic => replace_digits(value),
            FieldType::Sex => value.replace('P', "F"),
            FieldType::DocumentNumber | FieldType::PersonalNumber | FieldType::OptionalData => {
                value.to_owned()
            }
        }
    }

    /// Formats a raw value according to `field_type`.
    #[must_use]
    pub fn format(&self, value: &str, field_type: FieldType) -> Option<FieldValue> {
        match field_type {
            FieldType::Names => {
                let mut identifiers = trim_fillers(value)
                    .split("<<")
                    .map(|identifier| identifier.replace('<', " "));
                let primary = identifiers.next().unwrap_or_default();
                let secondary = identifiers.next().unwrap_or_default();
                Some(FieldValue::Names { primary, secondary })
            }
            FieldType::BirthDate => self.birth_date(value).map(FieldValue::Date),
            FieldType::ExpiryDate => expiry_date(value).map(FieldValue::Date),
            FieldType::Sex => Sex::from_mrz(value).map(FieldValue::Sex),
            _ => Some(FieldValue::Text(trim_fillers(value).replace('<', " "))),
        }
    }

    /// Parses a `YYMMDD` birth date. The century is `19` when the two-digit year
    /// is later than the reference year, otherwise `20`.
    #[must_use]
    pub fn birth_date(&self, value: &str) -> Option<NaiveDate> {
        let (yy, mm, dd) = split_date(value)?;
        let century = if yy > self.reference_year - 2000 {
            1900
        } else {
            2000
        };
        NaiveDate::from_ymd_opt(century + yy, mm, dd)
    }

    /// Generates every OCR-confusable reading of a document number and keeps the
    /// ones that satisfy its check digit.
    ///
    /// Candidates are returned in a stable order: at each position the alternative
    /// reading is tried before the original character, earlier positions first.
    /// The search is bounded by [`MAX_OCR_VARIANT_POSITIONS`], beyond which no
    /// candidate is returned.
    #[must_use]
    pub fn variants_with_check_digit(&self, field: &MrzField) -> Vec<MrzField> {
        let Some(check_digit) = field.check_digit else {
            return Vec::new();
        };

        let cleaned: Vec<char> = field
            .raw_value
            .chars()
            .map(|c| match c {
                'a' | '@' => 'Q',
                other => other,
            })
            .collect();

        let positions: Vec<usize> = cleaned
            .iter()
            .enumerate()
            .filter(|(_, c)| ocr_alternative(**c).is_some())
            .map(|(i, _)| i)
            .collect();

        if positions.len() > MAX_OCR_VARIANT_POSITIONS {
            warn!(
                "Document number has {} OCR-confusable characters, skipping variant search",
                positions.len()
            );
            return Vec::new();
        }

        let n = positions.len();
        let mut candidates = Vec::new();
        for mask in (0..1_u32 << n).rev() {
            let mut variant = cleaned.clone();
            for (bit, &position) in positions.iter().enumerate() {
                if mask & (1 << (n - 1 - bit)) != 0 {
                    if let Some(alternative) = ocr_alternative(cleaned[position]) {
                        variant[position] = alternative;
                    }
                }
            }
            let raw_value: String = variant.into_iter().collect();
            if is_value_valid(&raw_value, check_digit) {
                trace!("OCR variant {raw_value} satisfies check digit {check_digit}");
                candidates.push(MrzField {
                    value: self.format(&raw_value, FieldType::DocumentNumber),
                    raw_value,
                    check_digit: Some(check_digit),
                });
            }
        }
        candidates
    }
}

fn split_date(value: &str) -> Option<(i32, u32, u32)> {
    if value.len() != 6 || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let yy = value.get(0..2)?.parse().ok()?;
    let mm = value.get(2..4)?.parse().ok()?;
    let dd = value.get(4..6)?.parse().ok()?;
    Some((yy, mm, dd))
}

/// Parses a `YYMMDD` expiry date. The century is `19` for years from 70 on, otherwise `20`.
#[must_use]
pub fn expiry_date(value: &str) -> Option<NaiveDate> {
    let (yy, mm, dd) = split_date(value)?;
    let century = if yy >= 70 { 1900 } else { 2000 };
    NaiveDate::from_ymd_opt(century + yy, mm, dd)
}
