//! TD3 (passport booklet) and MRV-A (visa) layout, 2 lines of 44 characters.

use super::{FieldFormatter, FieldType, MrzType, ParsedFields};

pub(super) fn parse(lines: &[&str], formatter: &FieldFormatter) -> ParsedFields {
    let (first, second) = (lines[0], lines[1]);
    let is_visa = first.starts_with('V');

    let personal_number = if is_visa {
        formatter.field(FieldType::OptionalData, second, 28, 16, false)
    } else {
        formatter.field(FieldType::PersonalNumber, second, 28, 14, true)
    };

    ParsedFields {
        mrz_type: MrzType::Td3,
        document_type: formatter.field(FieldType::DocumentType, first, 0, 2, false),
        country_code: formatter.field(FieldType::CountryCode, first, 2, 3, false),
        names: formatter.field(FieldType::Names, first, 5, 39, false),
        document_number: formatter.field(FieldType::DocumentNumber, second, 0, 9, true),
        nationality: formatter.field(FieldType::Nationality, second, 10, 3, false),
        birth_date: formatter.field(FieldType::BirthDate, second, 13, 6, true),
        sex: formatter.field(FieldType::Sex, second, 20, 1, false),
        expiry_date: formatter.field(FieldType::ExpiryDate, second, 21, 6, true),
        personal_number,
        personal_number2: None,
        composite: (!is_visa).then(|| formatter.field(FieldType::Hash, second, 43, 1, false)),
    }
}
