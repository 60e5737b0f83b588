use secure_auth::{
    biometric::{BiometricCapture, CameraFaceCapture},
    camera::Camera,
    common::{system_config_file, Config, DevMode},
    core::{cosine_similarity, identity, LoggingHost, Step},
    device_controller,
    storage::EnrollmentStore,
    ErrorKind,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser)]
#[command(name = "secure-auth")]
#[command(about = "Multi-factor secure verification: bot check, Aadhaar, face capture")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full verification session in the terminal
    Verify {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        user_id: String,
        /// 12-digit Aadhaar number
        #[arg(short, long)]
        aadhaar: String,
        /// Name as on the Aadhaar card
        #[arg(short, long, default_value = "")]
        name: String,
        /// Do not grant consent (verification will be refused)
        #[arg(long)]
        no_consent: bool,
    },
    /// Check an Aadhaar number locally
    ValidateId {
        number: String,
        #[arg(long)]
        no_consent: bool,
    },
    /// List cameras and show the auto-detected one
    DetectCamera,
    /// Capture a test frame
    TestCamera,
    /// Capture a reference face descriptor for a subject
    Enroll {
        #[arg(short, long)]
        user_id: String,
        /// Capture attempts before giving up
        #[arg(short = 'n', long, default_value = "10")]
        attempts: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;

    match cli.command {
        Commands::Verify { email, user_id, aadhaar, name, no_consent } => {
            let config = load_config(cli.config.as_deref(), &dev_mode)?;
            let verified = run_verification(&config, &dev_mode, &email, &user_id, &aadhaar, &name, !no_consent).await?;
            println!("Verification: {}", if verified { "SUCCESS" } else { "NOT COMPLETED" });
        }
        Commands::ValidateId { number, no_consent } => {
            match identity::validate(&number, !no_consent) {
                Ok(()) => println!("✓ {} is well formed", identity::mask(&number)),
                Err(e) => {
                    println!("✗ {:?}: {}", e.kind, e);
                    std::process::exit(1);
                }
            }
        }
        Commands::DetectCamera => {
            let cameras = Camera::list_all_cameras()?;
            if cameras.is_empty() {
                println!("No cameras found!");
                println!("  Ensure you have permission to access /dev/video*");
                return Ok(());
            }
            for camera in &cameras {
                println!("/dev/video{}: {}", camera.index, camera.name);
                for feature in &camera.features {
                    println!("   - {}", feature);
                }
            }
            let selected = Camera::detect_default_camera()?;
            println!("\nAuto-detected camera: /dev/video{} (used when device_index = 999)", selected);
        }
        Commands::TestCamera => {
            let config = load_config(cli.config.as_deref(), &dev_mode)?;
            let frame = tokio::task::spawn_blocking(move || Camera::capture_single(&config)).await??;
            let save_path = dev_mode.get_capture_path("test_capture");
            frame.save(&save_path)?;
            println!("Saved test image to {:?}", save_path);
        }
        Commands::Enroll { user_id, attempts } => {
            let config = load_config(cli.config.as_deref(), &dev_mode)?;
            enroll(&config, &dev_mode, &user_id, attempts).await?;
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&std::path::Path>, dev_mode: &DevMode) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => [dev_mode.config_file(), Some(system_config_file())]
            .into_iter()
            .flatten()
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("configs/secure-auth.toml")),
    };
    Config::load_from_path(&path).with_context(|| format!("loading {}", path.display()))
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, text: &str) -> Result<String> {
    println!("{}", text);
    Ok(lines.next_line().await?.unwrap_or_else(|| "q".to_string()).trim().to_lowercase())
}

async fn run_verification(
    config: &Config,
    dev_mode: &DevMode,
    email: &str,
    user_id: &str,
    aadhaar: &str,
    name: &str,
    consent: bool,
) -> Result<bool> {
    let store = EnrollmentStore::new_with_dev_mode(dev_mode, config.storage.enrollment_dir.as_deref())?;
    let controller = device_controller(config, LoggingHost).with_reference_store(Arc::new(store));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    controller.start(email, user_id).await?;
    controller.set_identity(aadhaar, consent, name)?;

    let outcome = loop {
        let Some(state) = controller.current_state() else { break false };

        match state.step {
            Step::Done => break true,
            Step::FallbackInitiated => {
                println!("An alternate verification has been started. Check your email or phone.");
                break false;
            }
            Step::BotCheck | Step::Identity | Step::Submitting | Step::Error => {
                if let Err(e) = controller.advance().await {
                    println!("✗ {}", e);
                    if matches!(e.kind, ErrorKind::InvalidIdentityFormat | ErrorKind::ConsentRequired) {
                        break false;
                    }
                    if prompt(&mut lines, "Press Enter to retry, q to quit").await? == "q" {
                        break false;
                    }
                }
            }
            Step::Biometric if !state.camera_live => {
                println!("Starting camera...");
                if let Err(e) = controller.start_camera().await {
                    println!("✗ {}", e);
                    match prompt(&mut lines, "Enter to retry, f for alternate verification, q to quit").await?.as_str() {
                        "f" => {
                            if let Err(e) = controller.request_fallback(None).await {
                                println!("✗ {}", e);
                            }
                        }
                        "q" => break false,
                        _ => {}
                    }
                }
            }
            Step::Biometric => {
                match prompt(&mut lines, "Look at the camera. Enter to capture, f for alternate verification, b to go back, q to quit").await?.as_str() {
                    "q" => break false,
                    "b" => {
                        if let Err(e) = controller.retreat().await {
                            println!("✗ {}", e);
                        }
                    }
                    "f" => {
                        if let Err(e) = controller.request_fallback(None).await {
                            println!("✗ {}", e);
                        }
                    }
                    _ => match controller.capture_once().await {
                        Ok(Step::Done) => println!("✓ Face verified"),
                        Ok(_) => {}
                        Err(e) if e.kind.is_locally_recoverable() => {
                            println!("✗ {} Adjust and try again.", e);
                        }
                        Err(e) => println!("✗ {} Press f for alternate verification.", e),
                    },
                }
            }
        }
    };

    controller.close().await;
    Ok(outcome)
}

async fn enroll(config: &Config, dev_mode: &DevMode, user_id: &str, attempts: u32) -> Result<()> {
    let store = EnrollmentStore::new_with_dev_mode(dev_mode, config.storage.enrollment_dir.as_deref())?;
    let previous = store.get(user_id).ok().and_then(|r| r.averaged_descriptor);

    let capture = CameraFaceCapture::new(config);
    capture.ensure_loaded().await?;
    let handle = capture.acquire_stream().await?;

    println!("Look at the camera...");
    let mut result = None;
    for attempt in 1..=attempts {
        match capture.detect_and_describe(&handle).await {
            Ok(descriptor) if descriptor.len() == config.biometric.descriptor_length => {
                result = Some(descriptor);
                break;
            }
            Ok(descriptor) => {
                println!("Attempt {}: descriptor has {} values, expected {}",
                         attempt, descriptor.len(), config.biometric.descriptor_length);
            }
            Err(e) => println!("Attempt {}: {}", attempt, e),
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
    capture.release_stream(handle).await;

    let descriptor = result.context("no usable face captured")?;
    if let Some(previous) = previous {
        println!("Similarity to existing enrollment: {:.3}",
                 cosine_similarity(descriptor.as_slice(), &previous));
    }
    let record = store.enroll(user_id, &descriptor)?;
    println!("✅ Enrolled {} ({} descriptor(s))", user_id, record.descriptors.len());
    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .init();
    }
}
