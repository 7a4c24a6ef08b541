//! Short ISO/IEC 7816-4 APDUs and the transport seam to the chip.

use tracing::{error, trace};

use crate::{bytes2hex, PassportError};

/// eMRTD application identifier, ICAO Doc 9303-10 Section 3.6.1.
pub const EMRTD_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];

/// A command APDU with short length fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    /// Command data field, its length is sent as Lc.
    pub data: Option<Vec<u8>>,
    /// Expected response length, `0x00` requests up to 256 bytes.
    pub le: Option<u8>,
}

impl CommandApdu {
    /// A header-only command.
    #[must_use]
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// SELECT of the eMRTD application by AID, without response data.
    #[must_use]
    pub fn select_emrtd_application() -> Self {
        Self::new(0x00, 0xA4, 0x04, 0x0C).with_data(EMRTD_AID.to_vec())
    }

    /// GET CHALLENGE for an 8 byte nonce.
    #[must_use]
    pub fn get_challenge() -> Self {
        Self::new(0x00, 0x84, 0x00, 0x00).with_le(0x08)
    }

    /// READ BINARY of the currently selected file at `offset` (15 bits).
    #[must_use]
    pub fn read_binary(offset: u16, le: u8) -> Self {
        let [high, low] = offset.to_be_bytes();
        Self::new(0x00, 0xB0, high & 0x7F, low).with_le(le)
    }

    /// READ BINARY selecting the file by short file identifier, starting at `offset`.
    #[must_use]
    pub fn read_binary_sfi(sfi: u8, offset: u8, le: u8) -> Self {
        Self::new(0x00, 0xB0, 0x80 | (sfi & 0x1F), offset).with_le(le)
    }

    /// CLA, INS, P1 and P2.
    #[must_use]
    pub const fn header(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Serializes the command as `header ‖ [Lc ‖ data] ‖ [Le]`.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the data field is empty or longer than 255 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PassportError> {
        let mut bytes = self.header().to_vec();
        if let Some(data) = &self.data {
            if data.is_empty() {
                error!("Command data field must not be empty when present");
                return Err(PassportError::InvalidArgument(
                    "Command data field must not be empty when present",
                ));
            }
            bytes.push(u8::try_from(data.len()).map_err(PassportError::IntCastError)?);
            bytes.extend_from_slice(data);
        }
        if let Some(le) = self.le {
            bytes.push(le);
        }
        Ok(bytes)
    }
}

/// A response APDU split into data and status words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ResponseApdu {
    /// Splits a raw response into data and the trailing status words.
    ///
    /// # Errors
    ///
    /// * `PassportError::InvalidResponseError` if fewer than two bytes were received.
    pub fn from_bytes(response: &[u8]) -> Result<Self, PassportError> {
        let Some((status, data)) = response
            .len()
            .checked_sub(2)
            .map(|split| (&response[split..], &response[..split]))
        else {
            error!(
                "Card response length should be greater than or equal to 2, found {}",
                response.len()
            );
            return Err(PassportError::InvalidResponseError());
        };
        Ok(Self {
            data: data.to_vec(),
            sw1: status[0],
            sw2: status[1],
        })
    }

    #[must_use]
    pub const fn status(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    /// Whether the status words are `90 00`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Fails with `RecvApduError` unless the status words are `90 00`.
    ///
    /// # Errors
    ///
    /// * `PassportError::RecvApduError` carrying the status words.
    pub fn check_status(self) -> Result<Self, PassportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PassportError::RecvApduError(self.sw1, self.sw2))
        }
    }
}

/// Sends raw APDUs to the chip and returns its response.
///
/// The transport is responsible for timeouts. A transport that learns the
/// session was cancelled reports `PassportError::Cancelled()`.
pub trait ApduTransceiver {
    /// Transmits a serialized command APDU.
    ///
    /// # Errors
    ///
    /// * `PassportError` if the exchange with the chip fails.
    fn transceive(&mut self, apdu: &[u8]) -> Result<ResponseApdu, PassportError>;
}

impl ApduTransceiver for pcsc::Card {
    fn transceive(&mut self, apdu: &[u8]) -> Result<ResponseApdu, PassportError> {
        let mut response_buffer = [0; pcsc::MAX_BUFFER_SIZE];
        match self.transmit(apdu, &mut response_buffer) {
            Ok(response) => ResponseApdu::from_bytes(response),
            Err(pcsc::Error::Cancelled | pcsc::Error::CancelledByUser) => {
                Err(PassportError::Cancelled())
            }
            Err(err) => Err(PassportError::PcscError(err)),
        }
    }
}

/// Sends `apdu` in plaintext and returns the response, whatever its status.
///
/// # Errors
///
/// * `PassportError` if serialization or the transport fails.
pub fn send_plain<C: ApduTransceiver + ?Sized>(
    card: &mut C,
    apdu: &CommandApdu,
) -> Result<ResponseApdu, PassportError> {
    let apdu_bytes = apdu.to_bytes()?;
    trace!("Sending APDU: {}", bytes2hex(&apdu_bytes));
    let response = card.transceive(&apdu_bytes)?;
    trace!(
        "APDU response ({:02X}{:02X}): {}",
        response.sw1,
        response.sw2,
        bytes2hex(&response.data)
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_encoding() -> Result<(), PassportError> {
        assert_eq!(
            CommandApdu::select_emrtd_application().to_bytes()?,
            hex!("00A4040C07A0000002471001").to_vec()
        );
        assert_eq!(CommandApdu::get_challenge().to_bytes()?, hex!("0084000008").to_vec());
        assert_eq!(
            CommandApdu::read_binary(0x01E0, 0xE0).to_bytes()?,
            hex!("00B001E0E0").to_vec()
        );
        assert_eq!(
            CommandApdu::read_binary(0xFFFF, 0x04).to_bytes()?,
            hex!("00B07FFF04").to_vec()
        );
        assert_eq!(
            CommandApdu::read_binary_sfi(0x0C, 0, 6).to_bytes()?,
            hex!("00B08C0006").to_vec()
        );
        assert_eq!(
            CommandApdu::new(0x00, 0x82, 0x00, 0x00)
                .with_data(vec![0xAA; 3])
                .with_le(0x28)
                .to_bytes()?,
            hex!("0082000003AAAAAA28").to_vec()
        );
        Ok(())
    }

    #[test]
    fn test_command_encoding_invalid_data() {
        let apdu = CommandApdu::new(0x00, 0xD6, 0x00, 0x00).with_data(vec![0; 256]);
        assert!(apdu
            .to_bytes()
            .is_err_and(|e| matches!(e, PassportError::IntCastError(_))));

        let apdu = CommandApdu::new(0x00, 0xD6, 0x00, 0x00).with_data(Vec::new());
        assert!(apdu.to_bytes().is_err());
    }

    #[test]
    fn test_response_parsing() -> Result<(), PassportError> {
        let response = ResponseApdu::from_bytes(&hex!("4608F91988702212 9000"))?;
        assert_eq!(response.data, hex!("4608F91988702212").to_vec());
        assert!(response.is_success());

        let response = ResponseApdu::from_bytes(&hex!("6A82"))?;
        assert!(response.data.is_empty());
        assert!(response
            .check_status()
            .is_err_and(|e| matches!(e, PassportError::RecvApduError(0x6A, 0x82))));

        let result = ResponseApdu::from_bytes(&hex!("90"));
        assert!(result.is_err_and(|e| matches!(e, PassportError::InvalidResponseError())));
        Ok(())
    }
}
