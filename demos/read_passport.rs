use std::env;

use emrtd_reader::mrz::{MrzData, MrzParser, MrzType};
use emrtd_reader::pipeline::{CancellationToken, Pipeline, PipelineOptions};
use emrtd_reader::PassportError;
use tracing::{error, info};

/// Access data from `MRZ` (the full printed MRZ, lines separated by newlines)
/// or from `DOCNO`, `BIRTHDATE` and `EXPIRYDATE`.
fn mrz_data_from_env() -> Result<MrzData, PassportError> {
    if let Ok(mrz) = env::var("MRZ") {
        let document = MrzParser::new(true).parse_str(&mrz)?;
        info!(
            "Parsed {:?} MRZ of {} {}",
            document.mrz_type, document.given_names, document.surnames
        );
        return document.mrz_data();
    }

    let (Ok(doc_no), Ok(birthdate), Ok(expirydate)) = (
        env::var("DOCNO"),
        env::var("BIRTHDATE"),
        env::var("EXPIRYDATE"),
    ) else {
        error!("Please set MRZ, or DOCNO, BIRTHDATE and EXPIRYDATE environment variables");
        std::process::exit(1);
    };
    // Without the printed MRZ the layout is unknown; DG11 is only read for TD1.
    let mrz_type = match env::var("MRZTYPE").as_deref() {
        Ok("TD1") => MrzType::Td1,
        Ok("TD2") => MrzType::Td2,
        _ => MrzType::Td3,
    };
    MrzData::new(&doc_no, &birthdate, &expirydate, mrz_type, "")
}

fn main() -> Result<(), PassportError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .init();

    let mrz_data = mrz_data_from_env()?;

    // Establish a PC/SC context.
    let ctx = match pcsc::Context::establish(pcsc::Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {err}");
            std::process::exit(1);
        }
    };

    // List available readers.
    let mut readers_buf = [0; 2048];
    let mut readers = match ctx.list_readers(&mut readers_buf) {
        Ok(readers) => readers,
        Err(err) => {
            error!("Failed to list readers: {err}");
            std::process::exit(1);
        }
    };

    // Use the first reader.
    let Some(reader) = readers.next() else {
        error!("No readers are connected.");
        std::process::exit(1);
    };
    info!("Using reader: {reader:?}");

    // Connect to the card.
    let mut card = match ctx.connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY) {
        Ok(card) => card,
        Err(pcsc::Error::NoSmartcard) => {
            error!("A smartcard is not present in the reader.");
            std::process::exit(1);
        }
        Err(err) => {
            error!("Failed to connect to card: {err}");
            std::process::exit(1);
        }
    };

    let options = PipelineOptions {
        read_facial_image: env::var("READ_FACE").is_ok(),
        ..PipelineOptions::default()
    };
    let identity = Pipeline::new(&mut card, mrz_data, options)
        .with_cancellation(CancellationToken::new())
        .with_progress(|progress| {
            info!("{}/{} {}", progress.completed, progress.total, progress.step);
        })
        .run()?;

    info!("Document number: {:?}", identity.document_number);
    info!("Name: {:?} {:?}", identity.given_names, identity.surnames);
    info!(
        "Nationality: {:?} ({:?})",
        identity.nationality, identity.nationality_alpha2
    );
    info!("Date of birth: {:?}", identity.date_of_birth);
    info!("Date of expiry: {:?}", identity.date_of_expiry);
    info!("Issuing authority: {:?}", identity.issuing_authority);
    info!("Date of issue: {:?}", identity.date_of_issue);

    if let (Some(image), Some(format)) = (&identity.facial_image, identity.facial_image_format) {
        let file_name = match format {
            emrtd_reader::datagroups::ImageFormat::Jpeg => "face.jpg",
            _ => "face.jp2",
        };
        match std::fs::write(file_name, image) {
            Ok(()) => info!("Facial image written to {file_name}"),
            Err(err) => error!("Error writing {file_name}: {err}"),
        }
    }

    Ok(())
}
