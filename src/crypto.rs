//! Symmetric primitives used by Basic Access Control and 3DES secure messaging.
//!
//! Everything here operates on the block sizes and key layouts described in
//! ICAO Doc 9303-11 Section 9.7:
//! <https://www.icao.int/publications/Documents/9303_p11_cons_en.pdf>

use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use sha1_checked::Sha1;
use tracing::error;

use crate::PassportError;

/// Block size of DES and 3DES.
pub const BLOCK_SIZE: usize = 8;

/// Selects the derivation counter of a key computed from a key seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Encryption,
    Mac,
}

impl KeyType {
    const fn counter(self) -> [u8; 4] {
        match self {
            Self::Encryption => [0x00, 0x00, 0x00, 0x01],
            Self::Mac => [0x00, 0x00, 0x00, 0x02],
        }
    }
}

/// Encrypts data using the specified block cipher in CBC mode, without padding.
///
/// # Errors
///
/// `PassportError` if the key, IV or data length does not fit the cipher.
fn encrypt<CM>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError>
where
    CM: BlockEncryptMut + KeyIvInit,
{
    if key.len() != CM::key_size() {
        error!(
            "Wrong key size for cipher encryption, expected {}, found {}",
            CM::key_size(),
            key.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong key size for cipher encryption",
        ));
    }
    if iv.len() != CM::iv_size() {
        error!(
            "Wrong IV size for cipher encryption, expected {}, found {}",
            CM::iv_size(),
            iv.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong IV size for cipher encryption",
        ));
    }
    if data.len() % CM::block_size() != 0 {
        error!(
            "Wrong data size for cipher encryption, expected multiple of {}, found {}",
            CM::block_size(),
            data.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong data size for cipher encryption",
        ));
    }

    Ok(CM::new(key.into(), iv.into())
        .encrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data))
}

/// Decrypts data using the specified block cipher in CBC mode, without padding.
///
/// # Errors
///
/// `PassportError` if the key, IV or data length does not fit the cipher.
fn decrypt<CM>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError>
where
    CM: BlockDecryptMut + KeyIvInit,
{
    if key.len() != CM::key_size() {
        error!(
            "Wrong key size for cipher decryption, expected {}, found {}",
            CM::key_size(),
            key.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong key size for cipher decryption",
        ));
    }
    if iv.len() != CM::iv_size() {
        error!(
            "Wrong IV size for cipher decryption, expected {}, found {}",
            CM::iv_size(),
            iv.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong IV size for cipher decryption",
        ));
    }
    if data.len() % CM::block_size() != 0 {
        error!(
            "Wrong data size for cipher decryption, expected multiple of {}, found {}",
            CM::block_size(),
            data.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong data size for cipher decryption",
        ));
    }

    CM::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data)
        .map_err(PassportError::UnpadError)
}

/// Encrypts a single block with the specified block cipher in ECB mode.
fn encrypt_ecb<CM>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError>
where
    CM: BlockEncryptMut + KeyInit,
{
    if key.len() != CM::key_size() || data.len() % CM::block_size() != 0 {
        error!(
            "Wrong key or data size for ECB encryption, key {}, data {}",
            key.len(),
            data.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong key or data size for ECB encryption",
        ));
    }

    Ok(CM::new(key.into()).encrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data))
}

/// Decrypts a single block with the specified block cipher in ECB mode.
fn decrypt_ecb<CM>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError>
where
    CM: BlockDecryptMut + KeyInit,
{
    if key.len() != CM::key_size() || data.len() % CM::block_size() != 0 {
        error!(
            "Wrong key or data size for ECB decryption, key {}, data {}",
            key.len(),
            data.len()
        );
        return Err(PassportError::InvalidArgument(
            "Wrong key or data size for ECB decryption",
        ));
    }

    CM::new(key.into())
        .decrypt_padded_vec_mut::<cipher::block_padding::NoPadding>(data)
        .map_err(PassportError::UnpadError)
}

/// Expands an 8, 16 or 24 byte key into a 24 byte three-key 3DES key.
///
/// An 8 byte key `K` becomes `K‖K‖K`, a 16 byte key `K1‖K2` becomes `K1‖K2‖K1`.
///
/// # Errors
///
/// * `PassportError` if the key has any other length.
///
/// # Example
///
/// ```
/// # use emrtd_reader::PassportError;
/// #
/// # fn main() -> Result<(), PassportError> {
/// use emrtd_reader::crypto::expand_tdes_key;
/// use hex_literal::hex;
///
/// let key = expand_tdes_key(&hex!("0123456789ABCDEF FEDCBA9876543210"))?;
/// assert_eq!(key, hex!("0123456789ABCDEF FEDCBA9876543210 0123456789ABCDEF"));
/// #
/// #     Ok(())
/// # }
/// ```
pub fn expand_tdes_key(key: &[u8]) -> Result<[u8; 24], PassportError> {
    let mut expanded = [0; 24];
    match key.len() {
        8 => {
            for chunk in expanded.chunks_exact_mut(8) {
                chunk.copy_from_slice(key);
            }
        }
        16 => {
            expanded[..16].copy_from_slice(key);
            expanded[16..].copy_from_slice(&key[..8]);
        }
        24 => expanded.copy_from_slice(key),
        len => {
            error!("3DES key must be 8, 16 or 24 bytes long, found {len}");
            return Err(PassportError::InvalidArgument(
                "3DES key must be 8, 16 or 24 bytes long",
            ));
        }
    }
    Ok(expanded)
}

/// Encrypts `data` with 3DES in CBC mode using a zero IV and no padding.
///
/// # Errors
///
/// * `PassportError` if the key length is not 8, 16 or 24 or `data` is not block aligned.
pub fn tdes_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
    let key = expand_tdes_key(key)?;
    encrypt::<cbc::Encryptor<des::TdesEde3>>(&key, &[0; BLOCK_SIZE], data)
}

/// Decrypts `data` with 3DES in CBC mode using a zero IV and no padding.
///
/// # Errors
///
/// * `PassportError` if the key length is not 8, 16 or 24 or `data` is not block aligned.
pub fn tdes_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
    let key = expand_tdes_key(key)?;
    decrypt::<cbc::Decryptor<des::TdesEde3>>(&key, &[0; BLOCK_SIZE], data)
}

/// Computes the ISO/IEC 9797-1 MAC algorithm 3 (retail MAC) with DES.
///
/// `data` must already be padded to a multiple of the block size, see [`iso_pad`].
/// Bytes 0..8 of the key form K1, bytes 8..16 form K2 and bytes 16..24 form K3.
/// A missing K2 or K3 falls back to K1.
///
/// # Errors
///
/// * `PassportError` if the key length is not 8, 16 or 24 or `data` is not block aligned.
///
/// # Example
///
/// ```
/// # use emrtd_reader::PassportError;
/// #
/// # fn main() -> Result<(), PassportError> {
/// use emrtd_reader::crypto::{iso_pad, retail_mac};
/// use hex_literal::hex;
///
/// let data = hex!("72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F2");
/// let mac = retail_mac(&hex!("7962D9ECE03D1ACD4C76089DCE131543"), &iso_pad(&data))?;
/// assert_eq!(mac, hex!("5F1448EEA8AD90A7"));
/// #
/// #     Ok(())
/// # }
/// ```
pub fn retail_mac(key: &[u8], data: &[u8]) -> Result<[u8; 8], PassportError> {
    if !matches!(key.len(), 8 | 16 | 24) {
        error!("Can not compute MAC, MAC key is invalid.");
        return Err(PassportError::InvalidMacKeyError(16, key.len()));
    }
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        error!("Can not compute MAC, data length is invalid.");
        return Err(PassportError::ParseDataError(format!(
            "MAC input should be a non-empty multiple of 8, but found {}",
            data.len()
        )));
    }

    let key1 = &key[..8];
    let key2 = key.get(8..16).unwrap_or(key1);
    let key3 = key.get(16..24).unwrap_or(key1);

    let chained = encrypt::<cbc::Encryptor<des::Des>>(key1, &[0; BLOCK_SIZE], data)?;
    let last_block = &chained[chained.len() - BLOCK_SIZE..];
    let mac = encrypt_ecb::<ecb::Encryptor<des::Des>>(
        key3,
        &decrypt_ecb::<ecb::Decryptor<des::Des>>(key2, last_block)?,
    )?;

    let mut out = [0; 8];
    out.copy_from_slice(&mac);
    Ok(out)
}

/// Pads the input with ISO/IEC 9797-1 padding method 2 to the next multiple of 8.
///
/// A `0x80` byte is always appended, followed by as many zero bytes as needed.
#[must_use]
pub fn iso_pad(data: &[u8]) -> Vec<u8> {
    let mut padded = Vec::with_capacity(data.len() + BLOCK_SIZE);
    padded.extend_from_slice(data);
    padded.push(0x80);
    while padded.len() % BLOCK_SIZE != 0 {
        padded.push(0x00);
    }
    padded
}

/// Removes ISO/IEC 9797-1 padding method 2.
///
/// # Errors
///
/// * `PassportError::InvalidPadding` if there is no `0x80` marker or a non-zero
///   byte follows it.
pub fn iso_unpad(data: &[u8]) -> Result<&[u8], PassportError> {
    for (i, &b) in data.iter().enumerate().rev() {
        match b {
            0x00 => continue,
            0x80 => return Ok(&data[..i]),
            _ => {
                error!("Invalid padding byte {b:02X} at position {i}");
                return Err(PassportError::InvalidPadding());
            }
        }
    }
    error!("Padding marker not found in {} bytes", data.len());
    Err(PassportError::InvalidPadding())
}

/// Calculates the SHA-1 digest of `data`, refusing inputs with a detected collision.
///
/// # Errors
///
/// * `PassportError` if a SHA-1 collision attack is detected.
pub fn sha1(data: &[u8]) -> Result<[u8; 20], PassportError> {
    let hash_result = Sha1::try_digest(data);
    if hash_result.has_collision() {
        error!("SHA1 hash calculation had collision");
        return Err(PassportError::CalculateHashError(
            "SHA1 hash calculation had collision",
        ));
    }
    let mut digest = [0; 20];
    digest.copy_from_slice(hash_result.hash().as_slice());
    Ok(digest)
}

/// Derives a 16 byte 3DES key (K1‖K2) from a key seed.
///
/// Calculation is explained at ICAO Doc 9303-11 Section 9.7.1.
///
/// # Errors
///
/// * `PassportError` if hashing fails.
pub fn derive_key(key_seed: &[u8], key_type: KeyType) -> Result<[u8; 16], PassportError> {
    let d = [key_seed, &key_type.counter()[..]].concat();
    let digest = sha1(&d)?;
    let mut key = [0; 16];
    key.copy_from_slice(&digest[..16]);
    des_adjust_parity_bits(&mut key);
    Ok(key)
}

/// XORs two byte slices of equal length.
///
/// # Errors
///
/// * `PassportError` if input `a` and `b` have different lengths.
pub(crate) fn xor_slices(a: &[u8], b: &[u8]) -> Result<Vec<u8>, PassportError> {
    if a.len() == b.len() {
        return Ok(a.iter().zip(b.iter()).map(|(&x, &y)| x ^ y).collect());
    }
    error!(
        "XORed slices must have the same length, found {}, {}",
        a.len(),
        b.len()
    );
    Err(PassportError::ParseDataError(format!(
        "XORed slices must have the same length, found {}, {}",
        a.len(),
        b.len()
    )))
}

/// Sets the lowest bit of each byte so every byte has odd parity.
fn des_adjust_parity_bits(key: &mut [u8]) {
    for byte in key {
        let mut bitmask = 1;
        let mut b = *byte;
        for _ in 0..8 {
            bitmask ^= b & 0x1;
            b >>= 1;
        }
        *byte ^= bitmask;
    }
}
