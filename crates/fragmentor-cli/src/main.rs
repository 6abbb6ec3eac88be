use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fragmentor_hw::Camera;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;

#[zbus::proxy(
    interface = "org.fragmentor.Fragmentor1",
    default_service = "org.fragmentor.Fragmentor1",
    default_path = "/org/fragmentor/Fragmentor1"
)]
trait Fragmentor {
    async fn trigger(&self) -> zbus::Result<bool>;
    async fn reset(&self) -> zbus::Result<bool>;
    async fn dismiss_error(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn tags(&self) -> zbus::Result<String>;
    async fn save_overlay(&self, path: &str) -> zbus::Result<bool>;
}

#[derive(Parser, Debug)]
#[command(name = "fragmentor", about = "Fragmentor face HUD control CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Start the capture countdown
    Trigger,
    /// Clear the displayed identity and go back to scanning
    Reset,
    /// Show daemon session state
    Status {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// List the displayed identity tags
    Tags {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear the current error message
    Dismiss,
    /// Save the mirrored frame with the HUD overlay as PNG
    Overlay {
        /// Output path (daemon default when omitted)
        path: Option<String>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = fragmentor_hw::camera::DEFAULT_WIDTH)]
        width: u32,
        #[arg(long, default_value_t = fragmentor_hw::camera::DEFAULT_HEIGHT)]
        height: u32,
        /// Number of frames to capture
        #[arg(short, long, default_value_t = 10)]
        frames: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Trigger => {
            if proxy().await?.trigger().await? {
                println!("Countdown started");
            } else {
                println!("Trigger ignored (no face, models loading, or a cycle is already running)");
            }
        }
        Commands::Reset => {
            if proxy().await?.reset().await? {
                println!("Identity cleared");
            } else {
                println!("Nothing to reset");
            }
        }
        Commands::Status { json } => {
            let raw = proxy().await?.status().await?;
            if json {
                println!("{raw}");
            } else {
                let status: Value = serde_json::from_str(&raw).context("daemon sent invalid status")?;
                print!("{}", format_status(&status));
            }
        }
        Commands::Tags { json } => {
            let raw = proxy().await?.tags().await?;
            if json {
                println!("{raw}");
            } else {
                let tags: Vec<Value> = serde_json::from_str(&raw).context("daemon sent invalid tags")?;
                if tags.is_empty() {
                    println!("No identity displayed");
                }
                for tag in &tags {
                    println!("{}", format_tag(tag));
                }
            }
        }
        Commands::Dismiss => {
            proxy().await?.dismiss_error().await?;
        }
        Commands::Overlay { path } => {
            // The daemon resolves relative paths against its own working directory.
            let path = match path {
                Some(p) if Path::new(&p).is_relative() => {
                    std::env::current_dir()?.join(p).to_string_lossy().into_owned()
                }
                Some(p) => p,
                None => String::new(),
            };
            proxy().await?.save_overlay(&path).await?;
            println!("Overlay saved{}", if path.is_empty() { String::new() } else { format!(" to {path}") });
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test {
            device,
            width,
            height,
            frames,
        } => run_camera_test(&device, width, height, frames)?,
    }

    Ok(())
}

async fn proxy() -> Result<FragmentorProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    FragmentorProxy::new(&conn)
        .await
        .context("fragmentord is not reachable")
}

fn run_camera_test(device: &str, width: u32, height: u32, count: usize) -> Result<()> {
    println!("Opening {device} at {width}x{height}...");
    let camera = Camera::open(device, width, height)?;
    println!(
        "Negotiated {}x{} ({:?})",
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    let started = Instant::now();
    let frames = camera.capture_frames(count)?;
    let elapsed = started.elapsed();

    let dark = frames.iter().filter(|f| f.is_dark).count();
    for f in &frames {
        println!(
            "  frame seq={:<6} brightness={:>6.1}{}",
            f.sequence,
            f.avg_brightness(),
            if f.is_dark { "  (dark)" } else { "" }
        );
    }
    let fps = frames.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("Captured {} frames in {:.2}s ({fps:.1} fps), {dark} dark", frames.len(), elapsed.as_secs_f64());
    Ok(())
}

fn format_status(status: &Value) -> String {
    let str_of = |key: &str| status[key].as_str().unwrap_or("-").to_string();
    let mut out = format!(
        "fragmentord {}\n  state:      {}\n",
        str_of("version"),
        str_of("state")
    );
    if status["state"] == "countdown" {
        out.push_str(&format!("  countdown:  {}\n", status["countdown"]));
    }
    out.push_str(&format!(
        "  face:       {}\n  expression: {}\n  frame:      {}x{}\n",
        if status["face_detected"].as_bool().unwrap_or(false) { "detected" } else { "none" },
        str_of("expression"),
        status["frame_width"],
        status["frame_height"],
    ));
    if let Some(error) = status["error"].as_str() {
        out.push_str(&format!("  error:      {error}\n"));
    }
    out
}

fn format_tag(tag: &Value) -> String {
    let marker = if tag["primary"].as_bool().unwrap_or(false) { "*" } else { " " };
    let x = tag["position"]["x"].as_f64().unwrap_or(0.0);
    let y = tag["position"]["y"].as_f64().unwrap_or(0.0);
    format!(
        "{marker} [{}] {} @ ({x:.1}%, {y:.1}%)  {}",
        tag["bias_type"].as_str().unwrap_or(""),
        tag["label"].as_str().unwrap_or(""),
        tag["text"].as_str().unwrap_or(""),
    )
}
