//! The command pipeline that reads a document end to end.
//!
//! A [`Pipeline`] holds an ordered list of [`Step`]s and runs them one after
//! the other. Each step receives the [`CommandContext`] left by the previous
//! one and returns a new context. The first failure stops the pipeline.
//!
//! ```text
//! SELECT eMRTD application
//!   -> GET CHALLENGE (BAC)
//!   -> MUTUAL AUTHENTICATE
//!   -> for every data group: read length -> extract bytes -> decode
//! ```

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{rngs::OsRng, CryptoRng, RngCore};
use tracing::{debug, error, info, trace};

use crate::apdu::{send_plain, ApduTransceiver, CommandApdu, ResponseApdu};
use crate::bac::{build_mutual_authenticate, BacIntermediate, BasicAccessKeys};
use crate::datagroups::{self, DataGroupId};
use crate::identity::IdentityRecord;
use crate::mrz::{MrzData, MrzParser, MrzType};
use crate::secure_messaging::{self, SessionKeys};
use crate::tlv::element_size;
use crate::{bytes2hex, ErrorKind, PassportError};

/// Bytes requested by the first READ BINARY of a data group, enough for any tag and length.
const HEADER_READ_LENGTH: u8 = 6;
/// Largest offset READ BINARY can address with a 15 bit P1-P2.
const MAX_READ_OFFSET: usize = 0x7FFF;

/// Reading options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Also read EF.DG2, the facial image.
    pub read_facial_image: bool,
    /// Largest number of bytes requested by one READ BINARY.
    pub read_chunk_size: u8,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            read_facial_image: false,
            read_chunk_size: 0xE0,
        }
    }
}

/// One protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SelectApplication,
    /// GET CHALLENGE and preparation of the MUTUAL AUTHENTICATE command.
    BasicAccessControl,
    MutualAuthenticate,
    /// Reads the header of the data group to learn its size.
    ReadLength(DataGroupId),
    /// Reads the whole data group in chunks.
    ExtractBytes(DataGroupId),
    Decode(DataGroupId),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectApplication => write!(f, "select eMRTD application"),
            Self::BasicAccessControl => write!(f, "basic access control"),
            Self::MutualAuthenticate => write!(f, "mutual authenticate"),
            Self::ReadLength(id) => write!(f, "read length of {id}"),
            Self::ExtractBytes(id) => write!(f, "extract {id}"),
            Self::Decode(id) => write!(f, "decode {id}"),
        }
    }
}

/// What a step hands to the next one.
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Total size of the data group and the bytes already read from its start.
    ExpectedLength { length: usize, head: Vec<u8> },
    RawBytes(Vec<u8>),
    /// Identity fields decoded from one data group.
    Fragment(IdentityRecord),
    BacIntermediate(BacIntermediate),
}

impl Payload {
    const fn name(&self) -> &'static str {
        match self {
            Self::Empty => "nothing",
            Self::ExpectedLength { .. } => "an expected length",
            Self::RawBytes(_) => "raw bytes",
            Self::Fragment(_) => "an identity fragment",
            Self::BacIntermediate(_) => "a BAC handshake",
        }
    }
}

/// State passed from step to step.
#[derive(Debug, Default)]
pub struct CommandContext {
    pub session_keys: Option<SessionKeys>,
    pub payload: Payload,
    /// Identity fields merged so far.
    pub identity: IdentityRecord,
}

/// Lifecycle of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running(Step),
    Completed,
    Failed(ErrorKind),
}

/// Progress reported after every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// The step that just completed.
    pub step: Step,
}

/// Cancels a running pipeline from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The data groups read for a document, in reading order.
#[must_use]
pub fn data_groups(mrz_type: MrzType, options: &PipelineOptions) -> Vec<DataGroupId> {
    let mut groups = vec![DataGroupId::Dg1];
    if options.read_facial_image {
        groups.push(DataGroupId::Dg2);
    }
    if mrz_type == MrzType::Td1 {
        groups.push(DataGroupId::Dg11);
    }
    groups.push(DataGroupId::Dg12);
    groups
}

/// The full step list for a document.
#[must_use]
pub fn steps(mrz_type: MrzType, options: &PipelineOptions) -> Vec<Step> {
    let mut steps = vec![
        Step::SelectApplication,
        Step::BasicAccessControl,
        Step::MutualAuthenticate,
    ];
    for id in data_groups(mrz_type, options) {
        steps.extend([Step::ReadLength(id), Step::ExtractBytes(id), Step::Decode(id)]);
    }
    steps
}

/// Reads one document. A pipeline runs once; reading again needs a new
/// pipeline and therefore a new BAC session.
pub struct Pipeline<'c, C: ApduTransceiver + ?Sized, R: RngCore + CryptoRng = OsRng> {
    card: &'c mut C,
    rng: R,
    mrz_data: MrzData,
    options: PipelineOptions,
    parser: MrzParser,
    steps: Vec<Step>,
    state: PipelineState,
    cancellation: CancellationToken,
    on_progress: Option<Box<dyn FnMut(Progress) + 'c>>,
}

impl<'c, C: ApduTransceiver + ?Sized> Pipeline<'c, C, OsRng> {
    /// Creates a pipeline drawing BAC nonces from the operating system.
    #[must_use]
    pub fn new(card: &'c mut C, mrz_data: MrzData, options: PipelineOptions) -> Self {
        Self::with_rng(card, mrz_data, options, OsRng)
    }
}

impl<'c, C: ApduTransceiver + ?Sized, R: RngCore + CryptoRng> Pipeline<'c, C, R> {
    #[must_use]
    pub fn with_rng(card: &'c mut C, mrz_data: MrzData, options: PipelineOptions, rng: R) -> Self {
        let steps = steps(mrz_data.mrz_type(), &options);
        Self {
            card,
            rng,
            mrz_data,
            options,
            parser: MrzParser::new(false),
            steps,
            state: PipelineState::Pending,
            cancellation: CancellationToken::new(),
            on_progress: None,
        }
    }

    /// Uses `parser` to interpret the MRZ stored in EF.DG1.
    #[must_use]
    pub fn with_parser(mut self, parser: MrzParser) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Calls `on_progress` after every completed step.
    #[must_use]
    pub fn with_progress(mut self, on_progress: impl FnMut(Progress) + 'c) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs every step and returns the merged identity record.
    ///
    /// # Errors
    ///
    /// * `PassportError::PipelineAlreadyRun` if this pipeline already ran.
    /// * `PassportError::Cancelled` if the token was cancelled or the transport
    ///   reported a cancellation.
    /// * Any transport, protocol or format error of the first failing step.
    pub fn run(&mut self) -> Result<IdentityRecord, PassportError> {
        if self.state != PipelineState::Pending {
            error!("Pipeline already ran, state {:?}", self.state);
            return Err(PassportError::PipelineAlreadyRun());
        }

        match self.run_steps() {
            Ok(context) => {
                self.state = PipelineState::Completed;
                info!("Finished reading the document");
                Ok(context.identity)
            }
            Err(err) => {
                self.state = PipelineState::Failed(err.kind());
                if err.kind() == ErrorKind::Cancellation {
                    info!("Reading cancelled");
                } else {
                    error!("Reading failed: {err}");
                }
                Err(err)
            }
        }
    }

    fn run_steps(&mut self) -> Result<CommandContext, PassportError> {
        let total = self.steps.len();
        let mut context = CommandContext::default();
        for (index, step) in self.steps.clone().into_iter().enumerate() {
            self.check_cancelled()?;
            self.state = PipelineState::Running(step);
            debug!("Running step {}/{total}: {step}", index + 1);

            context = self.execute(step, context)?;
            context = match context.payload {
                Payload::Fragment(fragment) => CommandContext {
                    session_keys: context.session_keys,
                    payload: Payload::Empty,
                    identity: context.identity.merge(fragment),
                },
                payload => CommandContext { payload, ..context },
            };

            let progress = Progress {
                completed: index + 1,
                total,
                step,
            };
            info!("Progress {}/{}: {step}", progress.completed, progress.total);
            if let Some(on_progress) = self.on_progress.as_mut() {
                on_progress(progress);
            }
        }
        Ok(context)
    }

    fn check_cancelled(&self) -> Result<(), PassportError> {
        if self.cancellation.is_cancelled() {
            return Err(PassportError::Cancelled());
        }
        Ok(())
    }

    fn execute(&mut self, step: Step, context: CommandContext) -> Result<CommandContext, PassportError> {
        match step {
            Step::SelectApplication => self.select_application(context),
            Step::BasicAccessControl => self.basic_access_control(context),
            Step::MutualAuthenticate => self.mutual_authenticate(context),
            Step::ReadLength(id) => self.read_length(id, context),
            Step::ExtractBytes(id) => self.extract_bytes(id, context),
            Step::Decode(id) => self.decode(id, context),
        }
    }

    fn select_application(&mut self, context: CommandContext) -> Result<CommandContext, PassportError> {
        trace!("Selecting eMRTD application...");
        send_plain(&mut *self.card, &CommandApdu::select_emrtd_application())?.check_status()?;
        Ok(context)
    }

    fn basic_access_control(&mut self, context: CommandContext) -> Result<CommandContext, PassportError> {
        let keys = BasicAccessKeys::from_mrz_data(&self.mrz_data)?;
        let challenge = send_plain(&mut *self.card, &CommandApdu::get_challenge())?;
        let intermediate = build_mutual_authenticate(&keys, &challenge, &mut self.rng)?;
        Ok(CommandContext {
            payload: Payload::BacIntermediate(intermediate),
            ..context
        })
    }

    fn mutual_authenticate(&mut self, context: CommandContext) -> Result<CommandContext, PassportError> {
        let intermediate = match context.payload {
            Payload::BacIntermediate(intermediate) => intermediate,
            other => return Err(unexpected_payload(Step::MutualAuthenticate, &other)),
        };
        let response = send_plain(&mut *self.card, intermediate.command())?;
        let session_keys = intermediate.complete(&response)?;
        info!("Basic Access Control session established");
        Ok(CommandContext {
            session_keys: Some(session_keys),
            payload: Payload::Empty,
            identity: context.identity,
        })
    }

    fn read_length(&mut self, id: DataGroupId, context: CommandContext) -> Result<CommandContext, PassportError> {
        let keys = required_keys(&context)?;
        trace!("Reading first {HEADER_READ_LENGTH} bytes of {id}...");
        let apdu = CommandApdu::read_binary_sfi(id.sfi(), 0, HEADER_READ_LENGTH);
        let (head, keys) = send_protected(&mut *self.card, &apdu, keys)?;
        let length = element_size(&head)?;
        debug!("{id} is {length} bytes long");
        Ok(CommandContext {
            session_keys: Some(keys),
            payload: Payload::ExpectedLength { length, head },
            identity: context.identity,
        })
    }

    fn extract_bytes(&mut self, id: DataGroupId, context: CommandContext) -> Result<CommandContext, PassportError> {
        let keys = required_keys(&context)?;
        let (length, head) = match context.payload {
            Payload::ExpectedLength { length, head } => (length, head),
            other => return Err(unexpected_payload(Step::ExtractBytes(id), &other)),
        };
        if self.options.read_chunk_size == 0 {
            return Err(PassportError::InvalidArgument("Read chunk size must not be zero"));
        }
        if length > MAX_READ_OFFSET + 1 {
            error!("{id} is {length} bytes long, larger than READ BINARY can address");
            return Err(PassportError::ParseDataError(format!(
                "{id} length {length} exceeds the addressable size"
            )));
        }

        let mut data = head;
        data.truncate(length);
        let mut keys = keys;
        while data.len() < length {
            self.check_cancelled()?;
            let offset = data.len();
            let le = u8::try_from(length - offset)
                .unwrap_or(u8::MAX)
                .min(self.options.read_chunk_size);
            trace!("Reading {le} bytes of {id} at offset {offset}...");
            let offset = u16::try_from(offset).map_err(PassportError::IntCastError)?;
            let (chunk, next_keys) = send_protected(&mut *self.card, &CommandApdu::read_binary(offset, le), keys)?;
            keys = next_keys;
            if chunk.is_empty() {
                error!("Card returned no data for {id} at offset {offset}");
                return Err(PassportError::InvalidResponseError());
            }
            data.extend_from_slice(&chunk);
        }
        data.truncate(length);

        Ok(CommandContext {
            session_keys: Some(keys),
            payload: Payload::RawBytes(data),
            identity: context.identity,
        })
    }

    fn decode(&mut self, id: DataGroupId, context: CommandContext) -> Result<CommandContext, PassportError> {
        let data = match context.payload {
            Payload::RawBytes(data) => data,
            other => return Err(unexpected_payload(Step::Decode(id), &other)),
        };
        trace!("Data from the {id}: {}", bytes2hex(&data));
        let data_group = datagroups::decode(id, &data)?;
        let fragment = IdentityRecord::from_data_group(&data_group, &self.parser)?;
        Ok(CommandContext {
            payload: Payload::Fragment(fragment),
            ..context
        })
    }
}

fn required_keys(context: &CommandContext) -> Result<SessionKeys, PassportError> {
    context.session_keys.clone().ok_or_else(|| {
        error!("Secure messaging requested before a session was established");
        PassportError::MissingSessionKeys()
    })
}

fn unexpected_payload(step: Step, payload: &Payload) -> PassportError {
    error!("Step {step} received {}", payload.name());
    PassportError::InvalidArgument("Step received an unexpected payload")
}

/// Sends `apdu` under secure messaging and returns the decrypted response data
/// together with the advanced session keys.
///
/// # Errors
///
/// * `PassportError::RecvApduError` if the card answers with a status other than `90 00`.
/// * `PassportError` if the transport fails or the response does not verify.
pub fn send_protected<C: ApduTransceiver + ?Sized>(
    card: &mut C,
    apdu: &CommandApdu,
    keys: SessionKeys,
) -> Result<(Vec<u8>, SessionKeys), PassportError> {
    trace!("Sending protected APDU: {}", bytes2hex(&apdu.to_bytes()?));
    let (protected, keys) = secure_messaging::wrap(apdu, &keys)?;
    let response: ResponseApdu = card.transceive(&protected)?;
    trace!(
        "APDU response ({:02X}{:02X}): {}",
        response.sw1,
        response.sw2,
        bytes2hex(&response.data)
    );
    let response = response.check_status().map_err(|err| {
        error!("Protected command failed: {err}");
        err
    })?;
    let (data, keys) = secure_messaging::unwrap(&response.data, &keys)?;
    trace!("Decrypted response: {}", bytes2hex(&data));
    Ok((data, keys))
}
