use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use nfc_core::protocol::colon_hex;
use nfc_core::{
    CardImage, ChannelReporter, Pn533Driver, ReaderDriver, Reported, ResultReporter, ScanEvent,
    ScanSession, SessionConfig, TracingReporter, UltralightImage, WriteOptions,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mifare card reader for PN533 devices", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the library version
    Version,
    /// List attached readers
    List {
        /// Maximum number of readers to list
        #[arg(long, default_value_t = 16)]
        max: usize,
    },
    /// Read cards until interrupted
    Read {
        #[command(flatten)]
        reader: ReaderArgs,
        /// Stop after the first card
        #[arg(long)]
        once: bool,
    },
    /// Write a 64-byte image to the next Ultralight card
    Write {
        #[command(flatten)]
        reader: ReaderArgs,
        /// Image file
        #[arg(long)]
        file: PathBuf,
        /// Also write the lock bytes (page 2)
        #[arg(long)]
        write_lock: bool,
        /// Also write the OTP page (page 3)
        #[arg(long)]
        write_otp: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ReaderArgs {
    /// Reader connection string, e.g. pn53x_usb:001:004
    #[arg(long)]
    device: Option<String>,
    /// Session configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ReaderArgs {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if self.device.is_some() {
            config.device = self.device.clone();
        }
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args.command) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    let driver = Pn533Driver::new();

    match command {
        Command::Version => {
            println!("version: {}", driver.library_version());
        }
        Command::List { max } => {
            let devices = driver.list_devices(max)?;
            if devices.is_empty() {
                println!("No readers found");
            }
            for device in devices {
                println!("{}", device);
            }
        }
        Command::Read { reader, once } => read(&driver, reader.session_config()?, once)?,
        Command::Write {
            reader,
            file,
            write_lock,
            write_otp,
        } => {
            let bytes =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let image = UltralightImage::from_bytes(&bytes)?;
            let options = WriteOptions {
                write_lock,
                write_otp,
            };
            write(&driver, reader.session_config()?, image, options)?;
        }
    }

    Ok(())
}

/// Start a session and stop it on Ctrl-C.
fn start(
    driver: &Pn533Driver,
    config: SessionConfig,
) -> Result<(ScanSession, Receiver<Reported>)> {
    let (reporter, rx) = ChannelReporter::new();
    let session = ScanSession::start(driver, config, Arc::new(reporter))?;

    let token = session.stop_token();
    ctrlc::set_handler(move || {
        eprintln!(" received, stopping...");
        token.cancel();
    })?;

    info!(device = %session.device().connstring, "Waiting for cards (Ctrl-C to stop)");
    Ok((session, rx))
}

fn read(driver: &Pn533Driver, config: SessionConfig, once: bool) -> Result<()> {
    let (mut session, rx) = start(driver, config)?;
    let mut failure = None;

    for item in rx.iter() {
        match item {
            Reported::Read(image) => {
                print_image(&image);
                if once {
                    session.stop();
                }
            }
            Reported::Error(message) => {
                error!("{}", message);
                failure = Some(message);
            }
            Reported::Stopped => {
                println!("stopped");
                break;
            }
            Reported::Event(event) => TracingReporter.on_event(&event),
        }
    }

    session.wait();
    match failure {
        Some(message) => bail!(message),
        None => Ok(()),
    }
}

fn write(
    driver: &Pn533Driver,
    config: SessionConfig,
    image: UltralightImage,
    options: WriteOptions,
) -> Result<()> {
    let (mut session, rx) = start(driver, config)?;
    session.request_write(image, options);
    let mut outcome = Ok(());

    for item in rx.iter() {
        match item {
            Reported::Event(ScanEvent::WriteFinished {
                uid,
                pages_written,
                error,
            }) => {
                println!("{}: {} pages written", uid, pages_written);
                if let Some(e) = error {
                    outcome = Err(anyhow::anyhow!("write to {} incomplete: {}", uid, e));
                }
                session.stop();
            }
            Reported::Event(ScanEvent::WriteSkipped { uid, kind }) => {
                warn!(uid = %uid, kind = %kind, "Only Ultralight cards can be written");
                outcome = Err(anyhow::anyhow!("{} is a {} card", uid, kind));
                session.stop();
            }
            Reported::Error(message) => {
                outcome = Err(anyhow::anyhow!(message));
            }
            Reported::Stopped => break,
            Reported::Event(event) => TracingReporter.on_event(&event),
            Reported::Read(_) => {}
        }
    }

    session.wait();
    outcome
}

fn print_image(image: &CardImage) {
    println!("device: {} ({})", image.device_id, image.device_name);
    println!("uid:    {}", image.uid);
    println!("type:   0x{:02x} ({})", image.type_byte, image.kind);
    if let Some(error) = &image.error {
        println!("error:  {}", error);
    }
    let payload = image.payload();
    let base = image.first_block as usize * 16 + image.offset;
    for (i, chunk) in payload.chunks(16).enumerate() {
        println!("{:04x}: {}", base + i * 16, colon_hex(chunk));
    }
}
