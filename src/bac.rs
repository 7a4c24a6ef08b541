//! Basic Access Control, ICAO Doc 9303-11 Section 4.3:
//! <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>
//!
//! The handshake is split into pure steps so it can be driven by the command
//! pipeline: [`BasicAccessKeys::derive`], [`build_mutual_authenticate`] and
//! [`BacIntermediate::complete`].

use core::fmt;

use constant_time_eq::constant_time_eq;
use rand::{CryptoRng, RngCore};
use tracing::{error, trace};

use crate::apdu::{CommandApdu, ResponseApdu};
use crate::crypto::{
    derive_key, iso_pad, retail_mac, sha1, tdes_decrypt, tdes_encrypt, xor_slices, KeyType,
};
use crate::mrz::{calculate_check_digit, MrzData};
use crate::secure_messaging::SessionKeys;
use crate::PassportError;

/// Why a Basic Access Control handshake failed.
///
/// Only reported inside `PassportError::AuthenticationError`, whose `Display`
/// does not reveal it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BacFailure {
    /// GET CHALLENGE returned a status other than `90 00`.
    ChallengeStatus(u8, u8),
    /// GET CHALLENGE did not return 8 bytes.
    ChallengeLength(usize),
    /// MUTUAL AUTHENTICATE returned a status other than `90 00`.
    ResponseStatus(u8, u8),
    /// MUTUAL AUTHENTICATE did not return 40 bytes.
    ResponseLength(usize),
    /// The chip's cryptogram MAC did not verify.
    MacMismatch,
    /// The decrypted cryptogram did not echo both challenges.
    ChallengeMismatch,
}

fn failure(reason: BacFailure) -> PassportError {
    error!("Basic Access Control failed: {reason:?}");
    PassportError::AuthenticationError(reason)
}

fn validate_mrz_field(
    name: &'static str,
    value: &str,
    valid_length: impl Fn(usize) -> bool,
) -> Result<(), PassportError> {
    if !valid_length(value.len())
        || value
            .chars()
            .any(|c| !"0123456789<ABCDEFGHIJKLMNOPQRSTUVWXYZ".contains(c))
    {
        error!("MRZ field {name} has an invalid length or character, received {value}");
        return Err(PassportError::ParseMrzFieldError(name, value.to_owned()));
    }
    Ok(())
}

/// Builds the "MRZ information" used as the BAC secret.
///
/// Each field is followed by its check digit. Document numbers shorter than 9
/// characters are padded with `<`.
///
/// # Errors
///
/// * `PassportError` if an MRZ field has an invalid length or contains invalid characters.
///
/// # Example
///
/// ```
/// # use emrtd_reader::PassportError;
/// #
/// # fn main() -> Result<(), PassportError> {
/// use emrtd_reader::bac::mrz_information;
///
/// assert_eq!(mrz_information("L898902C3", "740812", "120415")?, "L898902C3674081221204159");
/// assert_eq!(mrz_information("L898902C", "690806", "940623")?, "L898902C<369080619406236");
/// #
/// #     Ok(())
/// # }
/// ```
pub fn mrz_information(
    document_number: &str,
    birth_date: &str,
    expiry_date: &str,
) -> Result<String, PassportError> {
    // Document numbers are up to 9 characters on TD3, 14 on TD2 and 22 on TD1.
    validate_mrz_field("Document number", document_number, |len| (1..=22).contains(&len))?;
    validate_mrz_field("Birth date", birth_date, |len| len == 6)?;
    validate_mrz_field("Expiry date", expiry_date, |len| len == 6)?;

    let document_number = format!("{document_number:<<9}");
    Ok(format!(
        "{document_number}{}{birth_date}{}{expiry_date}{}",
        calculate_check_digit(&document_number)?,
        calculate_check_digit(birth_date)?,
        calculate_check_digit(expiry_date)?
    ))
}

/// The first 16 bytes of SHA-1 over the MRZ information.
///
/// # Errors
///
/// * `PassportError` if hashing fails.
pub fn key_seed(mrz_information: &str) -> Result<[u8; 16], PassportError> {
    let digest = sha1(mrz_information.as_bytes())?;
    let mut seed = [0; 16];
    seed.copy_from_slice(&digest[..16]);
    Ok(seed)
}

/// The document basic access keys `K_enc` and `K_mac`.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAccessKeys {
    k_enc: [u8; 16],
    k_mac: [u8; 16],
}

impl fmt::Debug for BasicAccessKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAccessKeys").finish_non_exhaustive()
    }
}

impl BasicAccessKeys {
    /// Derives the keys from an MRZ information string, see [`mrz_information`].
    ///
    /// # Errors
    ///
    /// * `PassportError` if hashing fails.
    pub fn derive(mrz_information: &str) -> Result<Self, PassportError> {
        trace!("Computing basic access keys...");
        let seed = key_seed(mrz_information)?;
        Ok(Self {
            k_enc: derive_key(&seed, KeyType::Encryption)?,
            k_mac: derive_key(&seed, KeyType::Mac)?,
        })
    }

    /// Derives the keys from parsed MRZ data.
    ///
    /// # Errors
    ///
    /// * `PassportError` if an MRZ field is invalid or hashing fails.
    pub fn from_mrz_data(mrz_data: &MrzData) -> Result<Self, PassportError> {
        Self::derive(&mrz_data.mrz_information()?)
    }

    #[must_use]
    pub const fn k_enc(&self) -> &[u8; 16] {
        &self.k_enc
    }

    #[must_use]
    pub const fn k_mac(&self) -> &[u8; 16] {
        &self.k_mac
    }
}

/// State kept between sending MUTUAL AUTHENTICATE and verifying its response.
#[derive(Clone)]
pub struct BacIntermediate {
    keys: BasicAccessKeys,
    rnd_ic: [u8; 8],
    rnd_ifd: [u8; 8],
    k_ifd: [u8; 16],
    command: CommandApdu,
}

impl fmt::Debug for BacIntermediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacIntermediate")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Builds the MUTUAL AUTHENTICATE command from the chip's GET CHALLENGE response.
///
/// `rng` supplies RND.IFD (8 bytes) and then K.IFD (16 bytes).
///
/// # Errors
///
/// * `PassportError::AuthenticationError` if the challenge response is not a
///   successful 8 byte nonce.
pub fn build_mutual_authenticate<R: RngCore + CryptoRng>(
    keys: &BasicAccessKeys,
    challenge: &ResponseApdu,
    rng: &mut R,
) -> Result<BacIntermediate, PassportError> {
    if !challenge.is_success() {
        return Err(failure(BacFailure::ChallengeStatus(
            challenge.sw1,
            challenge.sw2,
        )));
    }
    let rnd_ic: [u8; 8] = challenge
        .data
        .as_slice()
        .try_into()
        .map_err(|_| failure(BacFailure::ChallengeLength(challenge.data.len())))?;

    let mut rnd_ifd = [0; 8];
    rng.fill_bytes(&mut rnd_ifd);
    let mut k_ifd = [0; 16];
    rng.fill_bytes(&mut k_ifd);

    let e_ifd = tdes_encrypt(&keys.k_enc, &[&rnd_ifd[..], &rnd_ic[..], &k_ifd[..]].concat())?;
    let m_ifd = retail_mac(&keys.k_mac, &iso_pad(&e_ifd))?;

    let command = CommandApdu::new(0x00, 0x82, 0x00, 0x00)
        .with_data([&e_ifd[..], &m_ifd[..]].concat())
        .with_le(0x28);

    Ok(BacIntermediate {
        keys: keys.clone(),
        rnd_ic,
        rnd_ifd,
        k_ifd,
        command,
    })
}

impl BacIntermediate {
    /// The MUTUAL AUTHENTICATE command to send.
    #[must_use]
    pub const fn command(&self) -> &CommandApdu {
        &self.command
    }

    /// Verifies the chip's cryptogram and derives the session keys.
    ///
    /// # Errors
    ///
    /// * `PassportError::AuthenticationError` on a bad status, length, MAC or
    ///   challenge echo.
    pub fn complete(&self, response: &ResponseApdu) -> Result<SessionKeys, PassportError> {
        if !response.is_success() {
            return Err(failure(BacFailure::ResponseStatus(
                response.sw1,
                response.sw2,
            )));
        }
        if response.data.len() != 40 {
            return Err(failure(BacFailure::ResponseLength(response.data.len())));
        }

        let (e_ic, m_ic) = response.data.split_at(32);
        let calculated = retail_mac(&self.keys.k_mac, &iso_pad(e_ic))?;
        if !constant_time_eq(&calculated, m_ic) {
            return Err(failure(BacFailure::MacMismatch));
        }

        let decrypted = tdes_decrypt(&self.keys.k_enc, e_ic)?;
        if !constant_time_eq(&decrypted[..8], &self.rnd_ic)
            || !constant_time_eq(&decrypted[8..16], &self.rnd_ifd)
        {
            return Err(failure(BacFailure::ChallengeMismatch));
        }

        let session_seed = xor_slices(&self.k_ifd, &decrypted[16..32])?;
        let mut ssc = [0; 8];
        ssc[..4].copy_from_slice(&decrypted[4..8]);
        ssc[4..].copy_from_slice(&decrypted[12..16]);

        trace!("Establishing session keys...");
        Ok(SessionKeys::new(
            derive_key(&session_seed, KeyType::Encryption)?,
            derive_key(&session_seed, KeyType::Mac)?,
            ssc,
        ))
    }
}
