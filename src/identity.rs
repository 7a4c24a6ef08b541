//! The identity record assembled from the data groups of one read.

use chrono::NaiveDate;

use crate::country;
use crate::datagroups::{DataGroup, Dg1, Dg11, Dg12, Dg2, ImageFormat};
use crate::mrz::{MrzParser, Sex};
use crate::PassportError;

/// Identity data of the document holder.
///
/// Filled progressively while data groups are read. A field keeps the first
/// value that was merged into it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IdentityRecord {
    // EF.DG1
    pub mrz: Option<String>,
    pub document_code: Option<String>,
    pub issuing_state: Option<String>,
    pub document_number: Option<String>,
    pub surnames: Option<String>,
    pub given_names: Option<String>,
    pub nationality: Option<String>,
    /// ISO 3166-1 alpha-2 code of the nationality, when known.
    pub nationality_alpha2: Option<&'static str>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub date_of_expiry: Option<NaiveDate>,
    pub optional_data: Option<String>,

    // EF.DG2
    pub facial_image: Option<Vec<u8>>,
    pub facial_image_format: Option<ImageFormat>,

    // EF.DG11
    pub full_name: Option<String>,
    pub other_names: Option<Vec<String>>,
    pub personal_number: Option<String>,
    pub full_date_of_birth: Option<String>,
    pub place_of_birth: Option<String>,
    pub address: Option<String>,
    pub telephone: Option<String>,
    pub profession: Option<String>,
    pub title: Option<String>,
    pub personal_summary: Option<String>,
    pub proof_of_citizenship: Option<Vec<u8>>,
    pub other_td_numbers: Option<String>,
    pub custody_information: Option<String>,

    // EF.DG12
    pub issuing_authority: Option<String>,
    pub date_of_issue: Option<String>,
    pub other_persons: Option<Vec<String>>,
    pub endorsements_or_observations: Option<String>,
    pub tax_or_exit_requirements: Option<String>,
    pub front_image: Option<Vec<u8>>,
    pub rear_image: Option<Vec<u8>>,
    pub personalization_time: Option<String>,
    pub personalization_device_serial: Option<String>,
}

impl core::fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("document_code", &self.document_code)
            .field("issuing_state", &self.issuing_state)
            .field("document_number", &self.document_number)
            .field("surnames", &self.surnames)
            .field("given_names", &self.given_names)
            .field("nationality", &self.nationality)
            .field("date_of_birth", &self.date_of_birth)
            .field("sex", &self.sex)
            .field("date_of_expiry", &self.date_of_expiry)
            .field("facial_image_len", &self.facial_image.as_ref().map(Vec::len))
            .field("full_name", &self.full_name)
            .field("issuing_authority", &self.issuing_authority)
            .field("date_of_issue", &self.date_of_issue)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn non_empty_list(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

impl IdentityRecord {
    /// Builds the fragment contributed by one data group.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the MRZ stored in EF.DG1 can not be parsed.
    pub fn from_data_group(data_group: &DataGroup, parser: &MrzParser) -> Result<Self, PassportError> {
        Ok(match data_group {
            DataGroup::Dg1(dg1) => Self::from_dg1(dg1, parser)?,
            DataGroup::Dg2(dg2) => Self::from_dg2(dg2),
            DataGroup::Dg11(dg11) => Self::from_dg11(dg11),
            DataGroup::Dg12(dg12) => Self::from_dg12(dg12),
        })
    }

    fn from_dg1(dg1: &Dg1, parser: &MrzParser) -> Result<Self, PassportError> {
        let document = dg1.document(parser)?;
        let optional_data = match &document.personal_number2 {
            Some(second) => format!("{}{second}", document.personal_number),
            None => document.personal_number.clone(),
        };
        Ok(Self {
            mrz: Some(dg1.mrz().to_owned()),
            document_code: non_empty(&document.document_type),
            issuing_state: non_empty(&document.country_code),
            document_number: non_empty(&document.document_number),
            surnames: non_empty(&document.surnames),
            given_names: non_empty(&document.given_names),
            nationality_alpha2: country::alpha2(&document.nationality_country_code),
            nationality: non_empty(&document.nationality_country_code),
            date_of_birth: document.birth_date,
            sex: document.sex,
            date_of_expiry: document.expiry_date,
            optional_data: non_empty(&optional_data),
            ..Self::default()
        })
    }

    fn from_dg2(dg2: &Dg2) -> Self {
        Self {
            facial_image: Some(dg2.image_data.clone()),
            facial_image_format: Some(dg2.image_format),
            ..Self::default()
        }
    }

    fn from_dg11(dg11: &Dg11) -> Self {
        Self {
            full_name: dg11.full_name.clone(),
            other_names: non_empty_list(&dg11.other_names),
            personal_number: dg11.personal_number.clone(),
            full_date_of_birth: dg11.full_date_of_birth.clone(),
            place_of_birth: dg11.place_of_birth.clone(),
            address: dg11.address.clone(),
            telephone: dg11.telephone.clone(),
            profession: dg11.profession.clone(),
            title: dg11.title.clone(),
            personal_summary: dg11.personal_summary.clone(),
            proof_of_citizenship: dg11.proof_of_citizenship.clone(),
            other_td_numbers: dg11.other_td_numbers.clone(),
            custody_information: dg11.custody_information.clone(),
            ..Self::default()
        }
    }

    fn from_dg12(dg12: &Dg12) -> Self {
        Self {
            issuing_authority: dg12.issuing_authority.clone(),
            date_of_issue: dg12.date_of_issue.clone(),
            other_persons: non_empty_list(&dg12.other_persons),
            endorsements_or_observations: dg12.endorsements_or_observations.clone(),
            tax_or_exit_requirements: dg12.tax_or_exit_requirements.clone(),
            front_image: dg12.front_image.clone(),
            rear_image: dg12.rear_image.clone(),
            personalization_time: dg12.personalization_time.clone(),
            personalization_device_serial: dg12.personalization_device_serial.clone(),
            ..Self::default()
        }
    }

    /// Fills the fields still unset in `self` from `fragment`.
    #[must_use]
    pub fn merge(self, fragment: Self) -> Self {
        Self {
            mrz: self.mrz.or(fragment.mrz),
            document_code: self.document_code.or(fragment.document_code),
            issuing_state: self.issuing_state.or(fragment.issuing_state),
            document_number: self.document_number.or(fragment.document_number),
            surnames: self.surnames.or(fragment.surnames),
            given_names: self.given_names.or(fragment.given_names),
            nationality: self.nationality.or(fragment.nationality),
            nationality_alpha2: self.nationality_alpha2.or(fragment.nationality_alpha2),
            date_of_birth: self.date_of_birth.or(fragment.date_of_birth),
            sex: self.sex.or(fragment.sex),
            date_of_expiry: self.date_of_expiry.or(fragment.date_of_expiry),
            optional_data: self.optional_data.or(fragment.optional_data),
            facial_image: self.facial_image.or(fragment.facial_image),
            facial_image_format: self.facial_image_format.or(fragment.facial_image_format),
            full_name: self.full_name.or(fragment.full_name),
            other_names: self.other_names.or(fragment.other_names),
            personal_number: self.personal_number.or(fragment.personal_number),
            full_date_of_birth: self.full_date_of_birth.or(fragment.full_date_of_birth),
            place_of_birth: self.place_of_birth.or(fragment.place_of_birth),
            address: self.address.or(fragment.address),
            telephone: self.telephone.or(fragment.telephone),
            profession: self.profession.or(fragment.profession),
            title: self.title.or(fragment.title),
            personal_summary: self.personal_summary.or(fragment.personal_summary),
            proof_of_citizenship: self.proof_of_citizenship.or(fragment.proof_of_citizenship),
            other_td_numbers: self.other_td_numbers.or(fragment.other_td_numbers),
            custody_information: self.custody_information.or(fragment.custody_information),
            issuing_authority: self.issuing_authority.or(fragment.issuing_authority),
            date_of_issue: self.date_of_issue.or(fragment.date_of_issue),
            other_persons: self.other_persons.or(fragment.other_persons),
            endorsements_or_observations: self
                .endorsements_or_observations
                .or(fragment.endorsements_or_observations),
            tax_or_exit_requirements: self
                .tax_or_exit_requirements
                .or(fragment.tax_or_exit_requirements),
            front_image: self.front_image.or(fragment.front_image),
            rear_image: self.rear_image.or(fragment.rear_image),
            personalization_time: self.personalization_time.or(fragment.personalization_time),
            personalization_device_serial: self
                .personalization_device_serial
                .or(fragment.personalization_device_serial),
        }
    }
}
