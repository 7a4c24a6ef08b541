//! 3DES secure messaging, ICAO Doc 9303-11 Section 9.8.
//!
//! Both directions are pure functions of their input and the current
//! [`SessionKeys`]; each call returns the keys with the send sequence counter
//! advanced by one, the input keys are never modified.

use core::fmt;

use constant_time_eq::constant_time_eq;
use tracing::{error, trace};

use crate::apdu::CommandApdu;
use crate::crypto::{iso_pad, iso_unpad, retail_mac, tdes_decrypt, tdes_encrypt};
use crate::tlv::{self, TlvCursor};
use crate::{bytes2hex, PassportError};

/// Session keys established by Basic Access Control together with the send sequence counter.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    ks_enc: [u8; 16],
    ks_mac: [u8; 16],
    ssc: [u8; 8],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("ssc", &bytes2hex(&self.ssc))
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    #[must_use]
    pub const fn new(ks_enc: [u8; 16], ks_mac: [u8; 16], ssc: [u8; 8]) -> Self {
        Self {
            ks_enc,
            ks_mac,
            ssc,
        }
    }

    #[must_use]
    pub const fn ks_enc(&self) -> &[u8; 16] {
        &self.ks_enc
    }

    #[must_use]
    pub const fn ks_mac(&self) -> &[u8; 16] {
        &self.ks_mac
    }

    /// The send sequence counter.
    #[must_use]
    pub const fn ssc(&self) -> &[u8; 8] {
        &self.ssc
    }

    /// Returns the keys with the send sequence counter incremented by one (big-endian).
    ///
    /// # Errors
    ///
    /// * `PassportError::OverflowSscError` if the counter is already at its maximum.
    pub fn incremented(&self) -> Result<Self, PassportError> {
        let incremented = u64::from_be_bytes(self.ssc).checked_add(1).ok_or_else(|| {
            error!("SSC overflowed");
            PassportError::OverflowSscError()
        })?;
        Ok(Self {
            ssc: incremented.to_be_bytes(),
            ..self.clone()
        })
    }
}

/// Protects a command APDU.
///
/// The data field is encrypted into DO'87' (even INS, with padding indicator) or
/// DO'85' (odd INS), the expected length into DO'97' and the MAC into DO'8E'.
///
/// # Errors
///
/// * `PassportError` if the counter overflows or the protected command does not
///   fit a short APDU.
///
/// # Example
///
/// ```
/// # use emrtd_reader::PassportError;
/// #
/// # fn main() -> Result<(), PassportError> {
/// use emrtd_reader::apdu::CommandApdu;
/// use emrtd_reader::secure_messaging::{wrap, SessionKeys};
/// use hex_literal::hex;
///
/// // ICAO Doc 9303-11 Appendix D.4
/// let keys = SessionKeys::new(
///     hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"),
///     hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"),
///     hex!("887022120C06C226"),
/// );
/// let select = CommandApdu::new(0x00, 0xA4, 0x02, 0x0C).with_data(vec![0x01, 0x1E]);
/// let (protected, keys) = wrap(&select, &keys)?;
/// assert_eq!(
///     protected,
///     hex!("0CA4020C158709016375432908C044F68E08BF8B92D635FF24F800")
/// );
/// assert_eq!(keys.ssc(), &hex!("887022120C06C227"));
/// #
/// #     Ok(())
/// # }
/// ```
pub fn wrap(apdu: &CommandApdu, keys: &SessionKeys) -> Result<(Vec<u8>, SessionKeys), PassportError> {
    let keys = keys.incremented()?;
    let header = [apdu.cla | 0x0C, apdu.ins, apdu.p1, apdu.p2];

    let mut payload = Vec::new();
    if let Some(data) = apdu.data.as_deref().filter(|data| !data.is_empty()) {
        let encrypted_data = tdes_encrypt(&keys.ks_enc, &iso_pad(data))?;
        if apdu.ins % 2 == 0 {
            payload.extend(tlv::encode(0x87, &[&[0x01][..], &encrypted_data[..]].concat()));
        } else {
            payload.extend(tlv::encode(0x85, &encrypted_data));
        }
    }
    if let Some(le) = apdu.le {
        payload.extend(tlv::encode(0x97, &[le]));
    }

    let mac_input = iso_pad(&[&keys.ssc[..], &iso_pad(&header)[..], &payload[..]].concat());
    let mac = retail_mac(&keys.ks_mac, &mac_input)?;
    payload.extend(tlv::encode(0x8E, &mac));

    let lc = u8::try_from(payload.len()).map_err(PassportError::IntCastError)?;
    let protected = [&header[..], &[lc][..], &payload[..], &[0x00][..]].concat();
    trace!("Protected APDU: {}", bytes2hex(&protected));
    Ok((protected, keys))
}

/// Verifies and decrypts the data field of a protected response (without status words).
///
/// Returns an empty vector when the response carries no data object.
///
/// # Errors
///
/// * `PassportError::VerifyMacError` if the MAC does not match.
/// * `PassportError::SecureMessagingError` for unknown tags, a missing MAC or
///   malformed data objects.
pub fn unwrap(
    response: &[u8],
    keys: &SessionKeys,
) -> Result<(Vec<u8>, SessionKeys), PassportError> {
    let keys = keys.incremented()?;
    trace!("Protected response: {}", bytes2hex(response));

    let mut mac_input = keys.ssc.to_vec();
    let mut encrypted: Option<(u32, &[u8])> = None;
    let mut mac: Option<&[u8]> = None;

    let mut cursor = TlvCursor::new(response);
    while !cursor.is_empty() {
        let start = cursor.position();
        let (tag, value) = cursor.next_tlv()?;
        let element = &response[start..cursor.position()];
        match tag {
            0x85 | 0x87 => {
                encrypted = Some((tag, value));
                mac_input.extend_from_slice(element);
            }
            0x99 => {
                if value.len() != 2 {
                    return Err(sm_error(format!(
                        "DO'99' must hold 2 bytes, found {}",
                        value.len()
                    )));
                }
                mac_input.extend_from_slice(element);
            }
            0x8E => {
                if value.len() != 8 {
                    return Err(sm_error(format!(
                        "DO'8E' must hold 8 bytes, found {}",
                        value.len()
                    )));
                }
                mac = Some(value);
            }
            _ => {
                return Err(sm_error(format!(
                    "Tag {tag:02X} not supported in protected response"
                )));
            }
        }
    }

    let Some(mac) = mac else {
        return Err(sm_error("Protected response has no DO'8E'".to_owned()));
    };
    let calculated = retail_mac(&keys.ks_mac, &iso_pad(&mac_input))?;
    if !constant_time_eq(&calculated, mac) {
        error!("MAC verification failed");
        return Err(PassportError::VerifyMacError());
    }

    let Some((tag, value)) = encrypted else {
        return Ok((Vec::new(), keys));
    };
    let ciphertext = if tag == 0x87 {
        match value.split_first() {
            Some((&0x01, ciphertext)) => ciphertext,
            _ => {
                return Err(sm_error(
                    "DO'87' must start with padding indicator 01".to_owned(),
                ))
            }
        }
    } else {
        value
    };
    let decrypted = tdes_decrypt(&keys.ks_enc, ciphertext)?;
    let data = iso_unpad(&decrypted)?.to_vec();
    Ok((data, keys))
}

fn sm_error(message: String) -> PassportError {
    error!("{message}");
    PassportError::SecureMessagingError(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn appendix_d_keys() -> SessionKeys {
        // Example taken from https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf Appendix D.3
        SessionKeys::new(
            hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"),
            hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"),
            hex!("887022120C06C226"),
        )
    }

    #[test]
    fn test_appendix_d_exchange() -> Result<(), PassportError> {
        // Examples taken from https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf Appendix D.4
        let keys = appendix_d_keys();

        let select = CommandApdu::new(0x00, 0xA4, 0x02, 0x0C).with_data(hex!("011E").to_vec());
        let (protected, keys) = wrap(&select, &keys)?;
        assert_eq!(protected, hex!("0CA4020C158709016375432908C044F68E08BF8B92D635FF24F800"));

        let (data, keys) = unwrap(&hex!("990290008E08FA855A5D4C50A8ED"), &keys)?;
        assert!(data.is_empty());
        assert_eq!(keys.ssc(), &hex!("887022120C06C228"));

        let (protected, keys) = wrap(&CommandApdu::read_binary(0, 4), &keys)?;
        assert_eq!(protected, hex!("0CB000000D9701048E08ED6705417E96BA5500"));

        let (data, keys) = unwrap(
            &hex!("8709019FF0EC34F9922651990290008E08AD55CC17140B2DED"),
            &keys,
        )?;
        assert_eq!(data, hex!("60145F01").to_vec());

        let (protected, keys) = wrap(&CommandApdu::read_binary(4, 0x12), &keys)?;
        assert_eq!(protected, hex!("0CB000040D9701128E082EA28A70F3C7B53500"));

        let (data, keys) = unwrap(
            &hex!("871901FB9235F4E4037F2327DCC8964F1F9B8C30F42C8E2FFF224A990290008E08C8B2787EAEA07D74"),
            &keys,
        )?;
        assert_eq!(data, hex!("04303130365F36063034303030305C026175").to_vec());
        assert_eq!(keys.ssc(), &hex!("887022120C06C22C"));
        Ok(())
    }

    #[test]
    fn test_mac_mismatch() -> Result<(), PassportError> {
        let (_, keys) = wrap(&CommandApdu::read_binary(0, 4), &appendix_d_keys())?;
        let result = unwrap(&hex!("990290008E08FA855A5D4C50A8EE"), &keys);
        assert!(result.is_err_and(|e| matches!(e, PassportError::VerifyMacError())));
        Ok(())
    }

    #[test]
    fn test_malformed_responses() {
        let keys = appendix_d_keys();

        let result = unwrap(&hex!("99029000"), &keys);
        assert!(result.is_err_and(|e| matches!(e, PassportError::SecureMessagingError(_))));

        let result = unwrap(&hex!("53029000 8E08FA855A5D4C50A8ED"), &keys);
        assert!(result.is_err_and(|e| matches!(e, PassportError::SecureMessagingError(_))));

        let result = unwrap(&hex!("9902900000 8E08FA855A5D4C50A8ED"), &keys);
        assert!(result.is_err());

        let result = unwrap(&hex!("8719019FF0"), &keys);
        assert!(result.is_err_and(|e| matches!(e, PassportError::ParseAsn1DataError(_, _))));
    }

    #[test]
    fn test_ssc_carry_and_overflow() -> Result<(), PassportError> {
        let keys = SessionKeys::new([0; 16], [0; 16], hex!("00000000000000FF"));
        assert_eq!(keys.incremented()?.ssc(), &hex!("0000000000000100"));

        let keys = SessionKeys::new([0; 16], [0; 16], hex!("FFFFFFFFFFFFFFFF"));
        let result = keys.incremented();
        assert!(result.is_err_and(|e| matches!(e, PassportError::OverflowSscError())));
        Ok(())
    }

    #[test]
    fn test_round_trip_advances_ssc_by_two() -> Result<(), PassportError> {
        let keys = SessionKeys::new(
            hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"),
            hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"),
            hex!("00000000000000FF"),
        );
        let plain = b"0123456789ABCDEFGHIJ".to_vec();

        // Card side of the exchange, built with the same primitives.
        let (_, card_keys) = wrap(&CommandApdu::read_binary(0, 20), &keys)?;
        let reply_keys = card_keys.incremented()?;
        let do87 = tlv::encode(
            0x87,
            &[&[0x01][..], &tdes_encrypt(reply_keys.ks_enc(), &iso_pad(&plain))?[..]].concat(),
        );
        let do99 = hex!("99029000");
        let mac = retail_mac(
            reply_keys.ks_mac(),
            &iso_pad(&[&reply_keys.ssc()[..], &do87[..], &do99[..]].concat()),
        )?;
        let response = [do87, do99.to_vec(), tlv::encode(0x8E, &mac)].concat();

        let (data, keys) = unwrap(&response, &card_keys)?;
        assert_eq!(data, plain);
        assert_eq!(keys.ssc(), &hex!("0000000000000101"));
        Ok(())
    }

    #[test]
    fn test_odd_ins_uses_do85() -> Result<(), PassportError> {
        let apdu = CommandApdu::new(0x00, 0xB1, 0x00, 0x00).with_data(vec![0x54, 0x02, 0x00, 0x00]);
        let (protected, _) = wrap(&apdu, &appendix_d_keys())?;
        assert_eq!(protected[..4], hex!("0CB10000"));
        assert_eq!(protected[5..7], hex!("8508"));
        Ok(())
    }

    #[test]
    fn test_session_keys_debug_hides_keys() {
        let debug = format!("{:?}", appendix_d_keys());
        assert!(debug.contains("887022120C06C226"));
        assert!(!debug.contains("979EC13B"));
    }
}
