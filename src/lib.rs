//! # emrtd-reader
//!
//! A library that reads identity data from an electronic Machine Readable
//! Travel Document (eMRTD) following ICAO Doc 9303.
//!
//! It parses printed MRZs (TD1, TD2 and TD3, with optional OCR error
//! correction), establishes a Basic Access Control session with the chip,
//! protects every following command with 3DES secure messaging, and decodes
//! EF.DG1, EF.DG2, EF.DG11 and EF.DG12 into an [`IdentityRecord`].
//!
//! The chip is reached through any [`ApduTransceiver`]; an implementation is
//! provided for [`pcsc::Card`].
//!
//! ## Example
//!
//! ```no_run
//! use emrtd_reader::mrz::MrzParser;
//! use emrtd_reader::pipeline::{Pipeline, PipelineOptions};
//! use emrtd_reader::PassportError;
//! use tracing::{error, info};
//!
//! fn main() -> Result<(), PassportError> {
//!     tracing_subscriber::fmt()
//!         .with_max_level(tracing::Level::INFO)
//!         .init();
//!
//!     let document = MrzParser::new(true).parse_str(
//!         "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\n\
//!          L898902C36UTO7408122F1204159ZE184226B<<<<<10",
//!     )?;
//!     let mrz_data = document.mrz_data()?;
//!
//!     // Establish a PC/SC context.
//!     let ctx = match pcsc::Context::establish(pcsc::Scope::User) {
//!         Ok(ctx) => ctx,
//!         Err(err) => {
//!             error!("Failed to establish context: {err}");
//!             return Ok(());
//!         }
//!     };
//!
//!     // Use the first reader.
//!     let mut readers_buf = [0; 2048];
//!     let Some(reader) = ctx.list_readers(&mut readers_buf).map_err(PassportError::PcscError)?.next() else {
//!         error!("No readers are connected.");
//!         return Ok(());
//!     };
//!     let mut card = ctx
//!         .connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)
//!         .map_err(PassportError::PcscError)?;
//!
//!     let options = PipelineOptions {
//!         read_facial_image: true,
//!         ..PipelineOptions::default()
//!     };
//!     let identity = Pipeline::new(&mut card, mrz_data, options).run()?;
//!     info!("{identity:?}");
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod apdu;
pub mod bac;
pub mod country;
pub mod crypto;
pub mod datagroups;
pub mod identity;
pub mod mrz;
pub mod pipeline;
pub mod secure_messaging;
pub mod tlv;

use core::fmt::{self, Write};
use std::num::TryFromIntError;

pub use apdu::{ApduTransceiver, CommandApdu, ResponseApdu};
pub use bac::BacFailure;
pub use datagroups::DataGroupId;
pub use identity::IdentityRecord;
pub use mrz::{GenericDocument, MrzData, MrzParser, MrzType};
pub use secure_messaging::SessionKeys;

#[derive(Debug)]
#[non_exhaustive]
pub enum PassportError {
    RecvApduError(u8, u8),
    ParseMrzCharError(char),
    ParseMrzFieldError(&'static str, String),
    UnsupportedMrzLayout(usize, Option<usize>),
    InvalidMrzError(&'static str),
    ParseAsn1DataError(usize, usize),
    ParseAsn1TagError(String, String),
    InvalidDataGroup(DataGroupId, String),
    InvalidMacKeyError(usize, usize),
    ParseDataError(String),
    InvalidArgument(&'static str),
    AuthenticationError(BacFailure),
    VerifyMacError(),
    InvalidResponseError(),
    SecureMessagingError(String),
    OverflowSscError(),
    MissingSessionKeys(),
    CalculateHashError(&'static str),
    InvalidPadding(),
    PipelineAlreadyRun(),
    Cancelled(),
    PcscError(pcsc::Error),
    UnpadError(cipher::block_padding::UnpadError),
    IntCastError(TryFromIntError),
}

impl fmt::Display for PassportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::RecvApduError(ref sw1, ref sw2) => write!(
                f,
                "APDU command failed with status code: {sw1:02X} {sw2:02X}"
            ),
            Self::ParseMrzCharError(ref c) => {
                write!(f, "MRZ can not contain the character: {c}")
            }
            Self::ParseMrzFieldError(mrz_field, ref value) => {
                write!(f, "MRZ field {mrz_field} is invalid: {value}")
            }
            Self::UnsupportedMrzLayout(ref lines, ref length) => match length {
                Some(length) => write!(f, "No MRZ parser found for {lines} lines of {length} characters"),
                None => write!(f, "No MRZ parser found for {lines} lines of differing lengths"),
            },
            Self::InvalidMrzError(error_msg) => write!(f, "Invalid MRZ: {error_msg}"),
            Self::ParseAsn1DataError(ref e_len, ref f_len) => write!(
                f,
                "ASN.1 data is incomplete, expected len: {e_len}, found len: {f_len}"
            ),
            Self::ParseAsn1TagError(ref expected, ref found) => {
                write!(f, "Invalid ASN.1 tag, expected: {expected}, found: {found}")
            }
            Self::InvalidDataGroup(ref id, ref error_msg) => {
                write!(f, "Invalid {id}: {error_msg}")
            }
            Self::InvalidMacKeyError(ref e_len, ref f_len) => write!(
                f,
                "Invalid MAC key, expected len: {e_len}, found len: {f_len}"
            ),
            Self::ParseDataError(ref error) => write!(f, "Invalid data length: {error}"),
            Self::InvalidArgument(error_msg) => write!(f, "Invalid argument: {error_msg}"),
            Self::AuthenticationError(_) => write!(f, "Basic Access Control authentication failed"),
            Self::VerifyMacError() => {
                write!(f, "Encrypted message MAC is not correct")
            }
            Self::InvalidResponseError() => {
                write!(f, "Card response is invalid")
            }
            Self::SecureMessagingError(ref error_msg) => {
                write!(f, "Secure messaging response is invalid: {error_msg}")
            }
            Self::OverflowSscError() => write!(f, "SSC overflew error"),
            Self::MissingSessionKeys() => {
                write!(f, "Secure messaging requires an established session")
            }
            Self::CalculateHashError(error_msg) => {
                write!(f, "Failure during calculation of hashes: {error_msg}")
            }
            Self::InvalidPadding() => write!(f, "Data is not ISO/IEC 9797-1 padded"),
            Self::PipelineAlreadyRun() => {
                write!(f, "Pipeline has already run, create a new one to read again")
            }
            Self::Cancelled() => write!(f, "Reading was cancelled"),
            Self::PcscError(ref e) => fmt::Display::fmt(&e, f),
            Self::UnpadError(ref e) => fmt::Display::fmt(&e, f),
            Self::IntCastError(ref e) => fmt::Display::fmt(&e, f),
        }
    }
}

impl std::error::Error for PassportError {}

/// Broad class of a [`PassportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The reader or the connection to the chip failed.
    Transport,
    /// The chip answered with an error, or authentication or secure messaging failed.
    Protocol,
    /// Input or chip data is malformed.
    Format,
    /// The read was cancelled.
    Cancellation,
}

impl PassportError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PcscError(_) | Self::InvalidResponseError() => ErrorKind::Transport,
            Self::RecvApduError(..)
            | Self::AuthenticationError(_)
            | Self::VerifyMacError()
            | Self::SecureMessagingError(_)
            | Self::OverflowSscError()
            | Self::MissingSessionKeys()
            | Self::PipelineAlreadyRun() => ErrorKind::Protocol,
            Self::Cancelled() => ErrorKind::Cancellation,
            Self::ParseMrzCharError(_)
            | Self::ParseMrzFieldError(..)
            | Self::UnsupportedMrzLayout(..)
            | Self::InvalidMrzError(_)
            | Self::ParseAsn1DataError(..)
            | Self::ParseAsn1TagError(..)
            | Self::InvalidDataGroup(..)
            | Self::InvalidMacKeyError(..)
            | Self::ParseDataError(_)
            | Self::InvalidArgument(_)
            | Self::CalculateHashError(_)
            | Self::InvalidPadding()
            | Self::UnpadError(_)
            | Self::IntCastError(_) => ErrorKind::Format,
        }
    }
}

/// Helper function that converts a byte slice into a hex string.
///
/// # Example
///
/// ```
/// use emrtd_reader::bytes2hex;
///
/// assert_eq!(bytes2hex(&[0xDE, 0xAD, 0xBE, 0xEF]), "DEADBEEF");
/// ```
#[must_use]
pub fn bytes2hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, &byte| {
        // Writing to a String never fails.
        let _ = write!(&mut acc, "{byte:02X}");
        acc
    })
}

/// Encodes a BER length field, in short form below 128 and long form otherwise.
///
/// # Example
///
/// ```
/// use emrtd_reader::int2asn1len;
/// use hex_literal::hex;
///
/// assert_eq!(int2asn1len(42), hex!("2A").to_vec());
/// assert_eq!(int2asn1len(127), hex!("7F").to_vec());
/// assert_eq!(int2asn1len(200), hex!("81C8").to_vec());
/// assert_eq!(int2asn1len(2024), hex!("8207E8").to_vec());
/// ```
#[must_use]
pub fn int2asn1len(length: usize) -> Vec<u8> {
    let bytes = length.to_be_bytes();
    if length < 0x80 {
        return vec![bytes[bytes.len() - 1]];
    }
    let significant = &bytes[bytes.iter().take_while(|&&byte| byte == 0).count()..];
    let mut out = Vec::with_capacity(significant.len() + 1);
    // At most size_of::<usize>() octets follow.
    out.push(0x80 | (significant.len() as u8));
    out.extend_from_slice(significant);
    out
}
