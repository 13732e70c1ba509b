use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::quality::DEFAULT_SHARPNESS_THRESHOLD;
use rollcall_core::{Assessment, Descriptor, Frame, QualityConfig, QualityGate};
use rollcall_ledger::{export_report, ExportFormat, FaceOutcome, ReportRow};
use std::path::{Path, PathBuf};

// D-Bus proxy; `#[zbus::proxy]` generates `AttendanceProxy` (async).
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn mark(&self, descriptors_json: &str) -> zbus::Result<String>;
    async fn assess(&self, width: u32, height: u32, pixels: &[u8]) -> zbus::Result<String>;
    async fn report(&self, day: &str, group: &str) -> zbus::Result<String>;
    async fn reload(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether an image is sharp enough to use for recognition
    Assess {
        /// Image file (any format the `image` crate decodes)
        image: PathBuf,
        /// Laplacian-variance threshold (local check only)
        #[arg(long, default_value_t = DEFAULT_SHARPNESS_THRESHOLD)]
        threshold: f64,
        /// Ask the daemon instead of checking locally
        #[arg(long)]
        remote: bool,
    },
    /// Mark attendance from a JSON file of face descriptors (one per face)
    Mark {
        descriptors: PathBuf,
    },
    /// Export an attendance report
    Report {
        /// Calendar day, YYYY-MM-DD
        #[arg(long)]
        day: Option<NaiveDate>,
        /// Department / group
        #[arg(long)]
        group: Option<String>,
        /// csv or json
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// Directory to write the report into
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Reload roster and reference descriptors in the daemon
    Reload,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Assess {
            image,
            threshold,
            remote,
        } => {
            let frame = load_frame(&image)?;
            let verdict = if remote {
                let proxy = connect().await?;
                proxy.assess(frame.width, frame.height, &frame.data).await?
            } else {
                let gate = QualityGate::new(QualityConfig {
                    sharpness_threshold: threshold,
                    ..QualityConfig::default()
                });
                match gate.assess(&frame) {
                    Assessment::Accept { sharpness } => {
                        println!(
                            "sharpness: {sharpness:.1}, brightness: {:.1}",
                            frame.avg_brightness()
                        );
                        "accept".to_string()
                    }
                    Assessment::Reject(reason) => reason.to_string(),
                }
            };
            if verdict != "accept" {
                bail!("{}: {verdict}", image.display());
            }
            println!("{}: ok", image.display());
        }
        Commands::Mark { descriptors } => {
            let text = std::fs::read_to_string(&descriptors)
                .with_context(|| format!("failed to read {}", descriptors.display()))?;
            let faces: Vec<Descriptor> = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a JSON array of descriptors", descriptors.display()))?;
            if faces.is_empty() {
                bail!("no face detected; recapture");
            }

            let proxy = connect().await?;
            let reply = proxy.mark(&serde_json::to_string(&faces)?).await?;
            let outcomes: Vec<FaceOutcome> = serde_json::from_str(&reply)?;
            for (i, outcome) in outcomes.iter().enumerate() {
                println!("face {}: {}", i + 1, outcome.message());
            }
        }
        Commands::Report {
            day,
            group,
            format,
            out_dir,
        } => {
            let proxy = connect().await?;
            let reply = proxy
                .report(
                    &day.map(|d| d.to_string()).unwrap_or_default(),
                    group.as_deref().unwrap_or(""),
                )
                .await?;
            let rows: Vec<ReportRow> = serde_json::from_str(&reply)?;

            match export_report(&rows, format, &out_dir, Local::now().naive_local())? {
                Some(path) => println!("Report generated: {} ({} rows)", path.display(), rows.len()),
                None => println!("No matching records found"),
            }
        }
        Commands::Reload => {
            let proxy = connect().await?;
            let summary: serde_json::Value = serde_json::from_str(&proxy.reload().await?)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Status => match connect().await {
            Ok(proxy) => println!("{}", proxy.status().await?),
            Err(e) => println!("rollcalld: not connected ({e})"),
        },
    }

    Ok(())
}

async fn connect() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not running")
}

/// Decode an image file to a grayscale frame.
fn load_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    frame_from_luma(img.to_luma8())
}

fn frame_from_luma(gray: image::GrayImage) -> Result<Frame> {
    let (width, height) = gray.dimensions();
    Ok(Frame::from_luma(width, height, gray.into_raw())?)
}
