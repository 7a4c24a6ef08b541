//! EF.DG2, the encoded face.
//!
//! Only the first biometric instance is decoded. Its data block is an
//! ISO/IEC 19794-5 facial record.

use super::{invalid, DataGroupId};
use crate::tlv::TlvCursor;
use crate::PassportError;

const FACIAL_RECORD_IDENTIFIER: [u8; 4] = *b"FAC\0";
const FEATURE_POINT_SIZE: usize = 8;

const JPEG_HEADER: [u8; 10] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
const JPEG2000_HEADER: [u8; 10] = [0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A];
const JPEG2000_CODESTREAM_HEADER: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];

/// Encoding of the facial image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// JFIF.
    Jpeg,
    /// JPEG 2000 file format (JP2 signature box).
    Jpeg2000,
    /// Raw JPEG 2000 codestream.
    Jpeg2000Codestream,
}

impl ImageFormat {
    /// Recognizes the format from the first bytes of the image.
    #[must_use]
    pub fn detect(image: &[u8]) -> Option<Self> {
        if image.starts_with(&JPEG_HEADER) {
            Some(Self::Jpeg)
        } else if image.starts_with(&JPEG2000_HEADER) {
            Some(Self::Jpeg2000)
        } else if image.starts_with(&JPEG2000_CODESTREAM_HEADER) {
            Some(Self::Jpeg2000Codestream)
        } else {
            None
        }
    }
}

/// Header fields of the ISO/IEC 19794-5 facial record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceImageInfo {
    pub version_number: u32,
    pub length_of_record: u32,
    pub number_of_facial_images: u16,
    pub facial_record_data_length: u32,
    pub number_of_feature_points: u16,
    pub gender: u8,
    pub eye_color: u8,
    pub hair_color: u8,
    pub feature_mask: u32,
    pub expression: u16,
    pub pose_angle: [u8; 3],
    pub pose_angle_uncertainty: [u8; 3],
    pub face_image_type: u8,
    pub image_data_type: u8,
    pub image_width: u16,
    pub image_height: u16,
    pub image_color_space: u8,
    pub source_type: u8,
    pub device_type: u16,
    pub quality: u16,
}

/// Decoded EF.DG2.
#[derive(Clone, PartialEq, Eq)]
pub struct Dg2 {
    /// Number of biometric instances announced by the file.
    pub number_of_images: u8,
    pub info: FaceImageInfo,
    pub image_format: ImageFormat,
    pub image_data: Vec<u8>,
}

impl core::fmt::Debug for Dg2 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dg2")
            .field("number_of_images", &self.number_of_images)
            .field("info", &self.info)
            .field("image_format", &self.image_format)
            .field("image_data_len", &self.image_data.len())
            .finish()
    }
}

/// Big-endian fixed-width reader over the facial record.
struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PassportError> {
        let end = self.pos.saturating_add(len);
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(PassportError::ParseAsn1DataError(end, self.data.len()))?;
        self.pos = end;
        Ok(slice)
    }

    fn uint(&mut self, len: usize) -> Result<u32, PassportError> {
        Ok(self
            .take(len)?
            .iter()
            .fold(0, |acc, &byte| (acc << 8) | u32::from(byte)))
    }

    fn u8(&mut self) -> Result<u8, PassportError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PassportError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn array3(&mut self) -> Result<[u8; 3], PassportError> {
        let bytes = self.take(3)?;
        Ok([bytes[0], bytes[1], bytes[2]])
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }
}

impl Dg2 {
    pub(super) fn parse(body: &[u8]) -> Result<Self, PassportError> {
        // Biometric Information Template Group Template
        let group = TlvCursor::new(body).expect_tlv(0x7F61)?;
        let mut group = TlvCursor::new(group);
        let number_of_images = match group.expect_tlv(0x02)? {
            [count] if *count >= 1 => *count,
            _ => {
                return Err(invalid(
                    DataGroupId::Dg2,
                    "must contain at least one face image",
                ))
            }
        };

        // Only the first Biometric Information Template is read.
        let mut instance = TlvCursor::new(group.expect_tlv(0x7F60)?);
        // Skip the Biometric Header Template.
        instance.expect_tlv(0xA1)?;
        let (tag, record) = instance.next_tlv()?;
        if tag != 0x5F2E && tag != 0x7F2E {
            return Err(invalid(
                DataGroupId::Dg2,
                format!("expected biometric data block 5F2E or 7F2E, found {tag:X}"),
            ));
        }

        let (info, image_data) = parse_facial_record(record)?;
        let image_format = ImageFormat::detect(image_data).ok_or_else(|| {
            invalid(DataGroupId::Dg2, "image is neither JPEG nor JPEG 2000")
        })?;

        Ok(Self {
            number_of_images,
            info,
            image_format,
            image_data: image_data.to_vec(),
        })
    }
}

fn parse_facial_record(record: &[u8]) -> Result<(FaceImageInfo, &[u8]), PassportError> {
    let mut reader = RecordReader::new(record);
    if reader.take(4)? != FACIAL_RECORD_IDENTIFIER {
        return Err(invalid(DataGroupId::Dg2, "facial record identifier is not 'FAC'"));
    }

    // Facial Record Header
    let version_number = reader.uint(4)?;
    let length_of_record = reader.uint(4)?;
    let number_of_facial_images = reader.u16()?;

    // Facial Information
    let facial_record_data_length = reader.uint(4)?;
    let number_of_feature_points = reader.u16()?;
    let gender = reader.u8()?;
    let eye_color = reader.u8()?;
    let hair_color = reader.u8()?;
    let feature_mask = reader.uint(3)?;
    let expression = reader.u16()?;
    let pose_angle = reader.array3()?;
    let pose_angle_uncertainty = reader.array3()?;

    reader.take(usize::from(number_of_feature_points) * FEATURE_POINT_SIZE)?;

    // Image Information
    let info = FaceImageInfo {
        version_number,
        length_of_record,
        number_of_facial_images,
        facial_record_data_length,
        number_of_feature_points,
        gender,
        eye_color,
        hair_color,
        feature_mask,
        expression,
        pose_angle,
        pose_angle_uncertainty,
        face_image_type: reader.u8()?,
        image_data_type: reader.u8()?,
        image_width: reader.u16()?,
        image_height: reader.u16()?,
        image_color_space: reader.u8()?,
        source_type: reader.u8()?,
        device_type: reader.u16()?,
        quality: reader.u16()?,
    };

    Ok((info, reader.rest()))
}
