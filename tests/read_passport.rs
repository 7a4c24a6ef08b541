//! Reads documents from a simulated chip that implements the card side of
//! Basic Access Control and secure messaging.

use std::collections::HashMap;

use emrtd_reader::apdu::{ApduTransceiver, ResponseApdu};
use emrtd_reader::bac::BasicAccessKeys;
use emrtd_reader::crypto::{
    derive_key, iso_pad, retail_mac, tdes_decrypt, tdes_encrypt, KeyType,
};
use emrtd_reader::datagroups::ImageFormat;
use emrtd_reader::mrz::{MrzData, MrzParser, MrzType, Sex};
use emrtd_reader::pipeline::{CancellationToken, Pipeline, PipelineOptions, PipelineState, Step};
use emrtd_reader::secure_messaging::SessionKeys;
use emrtd_reader::tlv::{encode, TlvCursor};
use emrtd_reader::{ErrorKind, PassportError};
use hex_literal::hex;
use rand::{CryptoRng, RngCore};

// ICAO Doc 9303-11 Appendix D.3
const RND_IC: [u8; 8] = hex!("4608F91988702212");
const K_ICC: [u8; 16] = hex!("0B4F80323EB3191CB04970CB4052790B");
const RND_IFD_K_IFD: [u8; 24] = hex!("781723860C06C226 0B795240CB7049B01C19B33E32804F0B");

struct AppendixDRng(usize);

impl CryptoRng for AppendixDRng {}

impl RngCore for AppendixDRng {
    fn next_u32(&mut self) -> u32 {
        unimplemented!()
    }

    fn next_u64(&mut self) -> u64 {
        unimplemented!()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            *byte = RND_IFD_K_IFD[self.0 % RND_IFD_K_IFD.len()];
            self.0 += 1;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// The card side of an eMRTD holding a set of elementary files addressed by SFI.
struct SimulatedChip {
    access_keys: BasicAccessKeys,
    files: HashMap<u8, Vec<u8>>,
    selected: Option<u8>,
    session: Option<SessionKeys>,
    /// `Le` of every READ BINARY received under secure messaging.
    reads: Vec<(u8, usize)>,
    commands: usize,
    corrupt_response_mac: bool,
}

impl SimulatedChip {
    fn new(mrz_information: &str, files: HashMap<u8, Vec<u8>>) -> Self {
        Self {
            access_keys: BasicAccessKeys::derive(mrz_information).unwrap(),
            files,
            selected: None,
            session: None,
            reads: Vec::new(),
            commands: 0,
            corrupt_response_mac: false,
        }
    }

    fn mutual_authenticate(&mut self, data: &[u8]) -> Vec<u8> {
        let (e_ifd, m_ifd) = data.split_at(32);
        if retail_mac(self.access_keys.k_mac(), &iso_pad(e_ifd)).unwrap() != m_ifd {
            return hex!("6300").to_vec();
        }
        let decrypted = tdes_decrypt(self.access_keys.k_enc(), e_ifd).unwrap();
        let (rnd_ifd, rest) = decrypted.split_at(8);
        let (rnd_ic, k_ifd) = rest.split_at(8);
        if rnd_ic != RND_IC {
            return hex!("6300").to_vec();
        }

        let seed: Vec<u8> = k_ifd.iter().zip(K_ICC).map(|(a, b)| a ^ b).collect();
        let mut ssc = [0; 8];
        ssc[..4].copy_from_slice(&RND_IC[4..]);
        ssc[4..].copy_from_slice(&rnd_ifd[4..]);
        self.session = Some(SessionKeys::new(
            derive_key(&seed, KeyType::Encryption).unwrap(),
            derive_key(&seed, KeyType::Mac).unwrap(),
            ssc,
        ));

        let e_ic = tdes_encrypt(
            self.access_keys.k_enc(),
            &[&RND_IC[..], rnd_ifd, &K_ICC[..]].concat(),
        )
        .unwrap();
        let m_ic = retail_mac(self.access_keys.k_mac(), &iso_pad(&e_ic)).unwrap();
        [&e_ic[..], &m_ic[..], &hex!("9000")[..]].concat()
    }

    fn protected_read(&mut self, apdu: &[u8]) -> Vec<u8> {
        let Some(keys) = self.session.take() else {
            return hex!("6982").to_vec();
        };
        let keys = keys.incremented().unwrap();

        let (header, body) = apdu.split_at(4);
        let data = &body[1..=usize::from(body[0])];
        let (objects, mac_object) = data.split_at(data.len() - 10);
        let mac_input = iso_pad(&[&keys.ssc()[..], &iso_pad(header)[..], objects].concat());
        if retail_mac(keys.ks_mac(), &mac_input).unwrap() != mac_object[2..] {
            return hex!("6988").to_vec();
        }
        let mut cursor = TlvCursor::new(objects);
        let le = match cursor.next_tlv().unwrap() {
            (0x97, &[0x00]) => 256,
            (0x97, &[le]) => usize::from(le),
            other => panic!("unexpected data object {other:?}"),
        };

        let offset = if header[2] & 0x80 == 0x80 {
            self.selected = Some(header[2] & 0x1F);
            usize::from(header[3])
        } else {
            usize::from(u16::from_be_bytes([header[2], header[3]]))
        };
        let Some(file) = self.selected.and_then(|sfi| self.files.get(&sfi)) else {
            self.session = Some(keys);
            return hex!("6A82").to_vec();
        };
        let end = (offset + le).min(file.len());
        let content = file[offset..end].to_vec();
        self.reads.push((header[2], le));

        let keys = keys.incremented().unwrap();
        let do87 = encode(
            0x87,
            &[&[0x01][..], &tdes_encrypt(keys.ks_enc(), &iso_pad(&content)).unwrap()[..]].concat(),
        );
        let do99 = hex!("99029000");
        let mut mac = retail_mac(
            keys.ks_mac(),
            &iso_pad(&[&keys.ssc()[..], &do87[..], &do99[..]].concat()),
        )
        .unwrap();
        if self.corrupt_response_mac {
            mac[0] ^= 0x01;
        }
        self.session = Some(keys);
        [&do87[..], &do99[..], &encode(0x8E, &mac)[..], &hex!("9000")[..]].concat()
    }
}

impl ApduTransceiver for SimulatedChip {
    fn transceive(&mut self, apdu: &[u8]) -> Result<ResponseApdu, PassportError> {
        self.commands += 1;
        let response = match &apdu[..4] {
            [0x00, 0xA4, 0x04, 0x0C] if apdu[5..] == hex!("A0000002471001") => hex!("9000").to_vec(),
            [0x00, 0x84, 0x00, 0x00] => [&RND_IC[..], &hex!("9000")[..]].concat(),
            [0x00, 0x82, 0x00, 0x00] => self.mutual_authenticate(&apdu[5..45]),
            [0x0C, 0xB0, _, _] => self.protected_read(apdu),
            _ => hex!("6D00").to_vec(),
        };
        ResponseApdu::from_bytes(&response)
    }
}

fn td3_lines() -> [String; 2] {
    [
        format!("{:<<44}", "P<UTOERIKSSON<<ANNA<MARIA"),
        "L898902C36UTO7408122F1204159ZE184226B<<<<<10".to_owned(),
    ]
}

fn td1_lines() -> [String; 3] {
    [
        "I<UTOD231458907<<<<<<<<<<<<<<<".to_owned(),
        "7408122F1204159UTO<<<<<<<<<<<6".to_owned(),
        "ERIKSSON<<ANNA<MARIA<<<<<<<<<<".to_owned(),
    ]
}

fn ef_dg1(lines: &[String]) -> Vec<u8> {
    encode(0x61, &encode(0x5F1F, lines.concat().as_bytes()))
}

fn ef_dg2(image: &[u8]) -> Vec<u8> {
    let mut record = b"FAC\0010\0".to_vec();
    let total = u32::try_from(46 + image.len()).unwrap();
    record.extend_from_slice(&total.to_be_bytes());
    record.extend_from_slice(&hex!("0001"));
    record.extend_from_slice(&(total - 14).to_be_bytes());
    record.extend_from_slice(&hex!("0000 02 01 05 000001 0000 000000 000000"));
    record.extend_from_slice(&hex!("01 01 01E0 0280 01 02 0000 0000"));
    record.extend_from_slice(image);

    let instance = [encode(0xA1, &hex!("800201018101 08")), encode(0x5F2E, &record)].concat();
    let group = [encode(0x02, &[1]), encode(0x7F60, &instance)].concat();
    encode(0x75, &encode(0x7F61, &group))
}

fn ef_dg11() -> Vec<u8> {
    let body = [
        encode(0x5C, &hex!("5F0E 5F10 5F2B 5F11")),
        encode(0x5F0E, b"ERIKSSON<<ANNA<MARIA"),
        encode(0x5F10, b"123456782"),
        encode(0x5F2B, &hex!("19740812")),
        encode(0x5F11, b"ZENITH"),
    ]
    .concat();
    encode(0x6B, &body)
}

fn ef_dg12() -> Vec<u8> {
    let body = [
        encode(0x5C, &hex!("5F19 5F26")),
        encode(0x5F19, b"UTOPIA PASSPORT OFFICE"),
        encode(0x5F26, &hex!("20070416")),
    ]
    .concat();
    encode(0x6C, &body)
}

fn jpeg(len: usize) -> Vec<u8> {
    let mut image = hex!("FFD8FFE000104A464946").to_vec();
    image.resize(len, 0x3C);
    image
}

fn appendix_d_mrz_data() -> MrzData {
    MrzData::new("L898902C", "690806", "940623", MrzType::Td3, "UTO").unwrap()
}

#[test]
fn reads_td3_document_with_facial_image() {
    let image = jpeg(600);
    let files = HashMap::from([(1, ef_dg1(&td3_lines())), (2, ef_dg2(&image)), (12, ef_dg12())]);
    let mut chip = SimulatedChip::new("L898902C<369080619406236", files);

    let options = PipelineOptions {
        read_facial_image: true,
        ..PipelineOptions::default()
    };
    let mut progress = Vec::new();
    let mut pipeline = Pipeline::with_rng(&mut chip, appendix_d_mrz_data(), options, AppendixDRng(0))
        .with_parser(MrzParser::with_reference_year(false, 2024))
        .with_progress(|p| progress.push((p.completed, p.total)));
    let identity = pipeline.run().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Completed);
    drop(pipeline);

    assert_eq!(identity.document_number.as_deref(), Some("L898902C3"));
    assert_eq!(identity.surnames.as_deref(), Some("ERIKSSON"));
    assert_eq!(identity.given_names.as_deref(), Some("ANNA MARIA"));
    assert_eq!(identity.sex, Some(Sex::Female));
    assert_eq!(identity.date_of_birth, chrono::NaiveDate::from_ymd_opt(1974, 8, 12));
    assert_eq!(identity.issuing_authority.as_deref(), Some("UTOPIA PASSPORT OFFICE"));
    assert_eq!(identity.date_of_issue.as_deref(), Some("20070416"));
    assert_eq!(identity.facial_image_format, Some(ImageFormat::Jpeg));
    assert_eq!(identity.facial_image, Some(image));
    assert_eq!(identity.full_name, None);

    // 3 steps for the session and 3 for each of DG1, DG2 and DG12.
    assert_eq!(progress.len(), 12);
    assert!(progress.iter().enumerate().all(|(i, &(done, total))| done == i + 1 && total == 12));

    // Every data group starts with a 6 byte read by short file identifier.
    let sfi_reads: Vec<_> = chip.reads.iter().filter(|(p1, _)| p1 & 0x80 == 0x80).collect();
    assert_eq!(sfi_reads, vec![&(0x81, 6), &(0x82, 6), &(0x8C, 6)]);
    assert!(chip.reads.iter().all(|&(_, le)| le <= 0xE0));
    // The DG2 file needs several chunks after its header.
    assert!(chip.reads.iter().filter(|(p1, _)| p1 & 0x80 == 0).count() >= 3);

    // Both sides advanced the counter in lockstep: two per protected exchange.
    let protected_exchanges = u64::try_from(chip.reads.len()).unwrap();
    let ssc = u64::from_be_bytes(*chip.session.as_ref().unwrap().ssc());
    assert_eq!(ssc, u64::from_be_bytes(hex!("887022120C06C226")) + 2 * protected_exchanges);
}

#[test]
fn session_keys_match_published_values() {
    let mut chip = SimulatedChip::new("L898902C<369080619406236", HashMap::new());
    let result = Pipeline::with_rng(
        &mut chip,
        appendix_d_mrz_data(),
        PipelineOptions::default(),
        AppendixDRng(0),
    )
    .run();

    // EF.DG1 is missing on this chip.
    assert!(matches!(result, Err(PassportError::RecvApduError(0x6A, 0x82))));
    let session = chip.session.unwrap();
    assert_eq!(session.ks_enc(), &hex!("979EC13B1CBFE9DCD01AB0FED307EAE5"));
    assert_eq!(session.ks_mac(), &hex!("F1CB1F1FB5ADF208806B89DC579DC1F8"));
    assert_eq!(session.ssc(), &hex!("887022120C06C227"));
}

#[test]
fn reads_dg11_for_td1_documents() {
    let files = HashMap::from([(1, ef_dg1(&td1_lines())), (11, ef_dg11()), (12, ef_dg12())]);
    let document = MrzParser::with_reference_year(false, 2024)
        .parse_lines(&td1_lines())
        .unwrap();
    let mrz_data = document.mrz_data().unwrap();
    assert_eq!(mrz_data.mrz_type(), MrzType::Td1);
    let mut chip = SimulatedChip::new(&mrz_data.mrz_information().unwrap(), files);

    let identity = Pipeline::with_rng(&mut chip, mrz_data, PipelineOptions::default(), AppendixDRng(0))
        .run()
        .unwrap();

    assert_eq!(identity.document_code.as_deref(), Some("I"));
    assert_eq!(identity.document_number.as_deref(), Some("D23145890"));
    assert_eq!(identity.full_name.as_deref(), Some("ERIKSSON<<ANNA<MARIA"));
    assert_eq!(identity.personal_number.as_deref(), Some("123456782"));
    assert_eq!(identity.full_date_of_birth.as_deref(), Some("19740812"));
    assert_eq!(identity.place_of_birth.as_deref(), Some("ZENITH"));
    assert_eq!(identity.issuing_authority.as_deref(), Some("UTOPIA PASSPORT OFFICE"));
}

#[test]
fn wrong_access_data_fails_authentication() {
    let files = HashMap::from([(1, ef_dg1(&td3_lines()))]);
    let mut chip = SimulatedChip::new("L898902C<369080619406236", files);
    let wrong = MrzData::new("L898902C3", "740812", "120415", MrzType::Td3, "UTO").unwrap();

    let err = Pipeline::with_rng(&mut chip, wrong, PipelineOptions::default(), AppendixDRng(0))
        .run()
        .unwrap_err();
    assert!(matches!(err, PassportError::AuthenticationError(_)));
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.to_string(), "Basic Access Control authentication failed");
    assert!(chip.session.is_none());
    assert_eq!(chip.commands, 3);
}

#[test]
fn tampered_response_mac_aborts() {
    let files = HashMap::from([(1, ef_dg1(&td3_lines())), (12, ef_dg12())]);
    let mut chip = SimulatedChip::new("L898902C<369080619406236", files);
    chip.corrupt_response_mac = true;

    let err = Pipeline::with_rng(&mut chip, appendix_d_mrz_data(), PipelineOptions::default(), AppendixDRng(0))
        .run()
        .unwrap_err();
    assert!(matches!(err, PassportError::VerifyMacError()));
    // Nothing is sent after the first protected exchange.
    assert_eq!(chip.commands, 4);
}

#[test]
fn cancellation_between_steps() {
    let files = HashMap::from([(1, ef_dg1(&td3_lines())), (12, ef_dg12())]);
    let mut chip = SimulatedChip::new("L898902C<369080619406236", files);
    let token = CancellationToken::new();
    let canceller = token.clone();

    let mut pipeline = Pipeline::with_rng(&mut chip, appendix_d_mrz_data(), PipelineOptions::default(), AppendixDRng(0))
        .with_cancellation(token)
        .with_progress(move |p| {
            if p.step == Step::MutualAuthenticate {
                canceller.cancel();
            }
        });
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancellation);
    assert_eq!(pipeline.state(), PipelineState::Failed(ErrorKind::Cancellation));
    drop(pipeline);
    assert_eq!(chip.commands, 3);
}
