//! TD1 (identity card) layout, 3 lines of 30 characters.

use super::{FieldFormatter, FieldType, MrzType, ParsedFields};

pub(super) fn parse(lines: &[&str], formatter: &FieldFormatter) -> ParsedFields {
    let (first, second, third) = (lines[0], lines[1], lines[2]);

    ParsedFields {
        mrz_type: MrzType::Td1,
        document_type: formatter.field(FieldType::DocumentType, first, 0, 2, false),
        country_code: formatter.field(FieldType::CountryCode, first, 2, 3, false),
        document_number: formatter.field(FieldType::DocumentNumber, first, 5, 9, true),
        personal_number: formatter.field(FieldType::OptionalData, first, 15, 15, false),
        birth_date: formatter.field(FieldType::BirthDate, second, 0, 6, true),
        sex: formatter.field(FieldType::Sex, second, 7, 1, false),
        expiry_date: formatter.field(FieldType::ExpiryDate, second, 8, 6, true),
        nationality: formatter.field(FieldType::Nationality, second, 15, 3, false),
        personal_number2: Some(formatter.field(FieldType::OptionalData, second, 18, 11, false)),
        composite: Some(formatter.field(FieldType::Hash, second, 29, 1, false)),
        names: formatter.field(FieldType::Names, third, 0, 30, false),
    }
}
