use lenscheck::{
    camera::{self, SensorHandle, V4l2Camera},
    cli::{self, AsciiRenderer, ConsolePresenter, WatchKey},
    common::{CameraConfig, Config, DevMode},
    core::{
        CameraRole, CaptureOrchestrator, CaptureSettings, CycleOutcome, LineSpoofDetector,
        OnnxClassifier, OrchestratorHandle, OrchestratorOptions,
    },
    storage::PhotoAlbum,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::terminal;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[derive(Parser)]
#[command(name = "lenscheck")]
#[command(about = "Two-camera capture with recapture (screen/print) rejection")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (default: configs/lenscheck.toml, then the system path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one capture cycle and print the verdict
    Capture {
        /// Serve this image as the primary camera instead of the configured source
        #[arg(long)]
        primary_image: Option<PathBuf>,
        /// Serve this image as the auxiliary camera instead of the configured source
        #[arg(long)]
        aux_image: Option<PathBuf>,
        /// Print the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Live preview; space triggers a cycle, c cancels, Esc or q quits
    Watch,
    /// List video devices and suggest primary/auxiliary indices
    DetectCameras,
    /// Grab one frame from a camera and save it
    TestCamera {
        #[arg(short, long, value_enum, default_value = "primary")]
        role: RoleArg,
        /// Show an ASCII preview until Esc instead of a single grab
        #[arg(short, long)]
        preview: bool,
    },
    /// Run the line detector on an image file
    SpoofCheck {
        image: PathBuf,
        /// Where to write the annotated image (default: debug/capture path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Primary,
    Auxiliary,
}

impl From<RoleArg> for CameraRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Primary => CameraRole::Primary,
            RoleArg::Auxiliary => CameraRole::Auxiliary,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;

    match cli.command {
        Commands::Capture { primary_image, aux_image, json } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(path) = primary_image {
                config.primary = still_camera(&config.primary, path);
            }
            if let Some(path) = aux_image {
                config.auxiliary = still_camera(&config.auxiliary, path);
            }
            config.validate()?;
            run_capture(&config, &dev_mode, json).await?;
        }
        Commands::Watch => {
            let config = load_config(cli.config.as_ref())?;
            run_watch(&config, &dev_mode).await?;
        }
        Commands::DetectCameras => detect_cameras()?,
        Commands::TestCamera { role, preview } => {
            let config = load_config(cli.config.as_ref())?;
            test_camera(&config, role.into(), preview, &dev_mode).await?;
        }
        Commands::SpoofCheck { image, output } => {
            let config = load_config(cli.config.as_ref()).ok();
            spoof_check(config, &image, output, &dev_mode)?;
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

fn still_camera(base: &CameraConfig, path: PathBuf) -> CameraConfig {
    CameraConfig {
        device_index: None,
        image_path: Some(path),
        ..base.clone()
    }
}

fn sensor_for(config: &Config, role: CameraRole) -> Result<SensorHandle> {
    let camera_config = match role {
        CameraRole::Primary => &config.primary,
        CameraRole::Auxiliary => &config.auxiliary,
    };
    let device = camera::camera_from_config(camera_config)
        .with_context(|| format!("Failed to set up {} camera", role))?;
    Ok(SensorHandle::new(role, device))
}

fn build_orchestrator(config: &Config, dev_mode: &DevMode, raw_mode: bool) -> Result<CaptureOrchestrator> {
    let primary = sensor_for(config, CameraRole::Primary)?;
    let auxiliary = sensor_for(config, CameraRole::Auxiliary)?;

    let classifier = Arc::new(OnnxClassifier::new(&config.classifier)?);
    let spoof = Arc::new(LineSpoofDetector::new(config.spoof.clone())?);

    let album = match PhotoAlbum::from_config(&config.storage, dev_mode) {
        Ok(album) => Some(album),
        Err(e) => {
            tracing::warn!("Photo album unavailable, results will not be saved: {}", e);
            None
        }
    };
    let presenter = Box::new(ConsolePresenter::new(album).with_raw_mode(raw_mode));

    let orchestrator = CaptureOrchestrator::new(
        primary,
        auxiliary,
        classifier,
        spoof,
        presenter,
        OrchestratorOptions::from(config),
    );
    Ok(orchestrator)
}

async fn run_capture(config: &Config, dev_mode: &DevMode, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config, dev_mode, false)?;
    let (handle, task) = orchestrator.spawn();

    let report = handle.capture().await;
    handle.shutdown().await.ok();
    task.await.context("Orchestrator task failed")?;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &report.outcome {
            CycleOutcome::Completed { verdict } => {
                println!("Cycle {}: {} ({} ms)", report.cycle, verdict, report.elapsed_ms);
            }
            CycleOutcome::Failed { stage, reason } => {
                println!("Cycle {} failed during {}: {}", report.cycle, stage, reason);
            }
        }
    }

    if matches!(report.outcome, CycleOutcome::Failed { .. }) {
        std::process::exit(2);
    }
    Ok(())
}

async fn run_watch(config: &Config, dev_mode: &DevMode) -> Result<()> {
    let orchestrator = build_orchestrator(config, dev_mode, true)?;
    let (handle, task) = orchestrator.spawn();

    terminal::enable_raw_mode().context("Failed to enable raw mode")?;
    crossterm::execute!(io::stdout(), crossterm::cursor::Hide).ok();
    cli::clear_screen().ok();

    let result = watch_loop(&handle).await;

    crossterm::execute!(io::stdout(), crossterm::cursor::Show).ok();
    terminal::disable_raw_mode().ok();
    println!();

    handle.shutdown().await.ok();
    task.await.context("Orchestrator task failed")?;
    result
}

async fn watch_loop(handle: &OrchestratorHandle) -> Result<()> {
    let renderer = AsciiRenderer::new(None, None);
    let mut transitions = handle.subscribe();
    let mut state = handle.state();

    // crossterm polling blocks, so keys come in from a plain thread
    let (key_tx, mut keys) = mpsc::channel(8);
    std::thread::spawn(move || loop {
        match cli::poll_key(Duration::from_millis(50)) {
            Ok(Some(key)) => {
                if key_tx.blocking_send(key).is_err() {
                    break;
                }
            }
            Ok(None) if key_tx.is_closed() => break,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Keyboard input failed: {}", e);
                break;
            }
        }
    });

    let mut refresh = tokio::time::interval(Duration::from_millis(150));
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            key = keys.recv() => match key {
                Some(WatchKey::Trigger) => {
                    if let Err(e) = handle.trigger().await {
                        tracing::info!("{}", e);
                    }
                }
                Some(WatchKey::Cancel) => handle.cancel().await?,
                Some(WatchKey::Quit) | None => return Ok(()),
            },
            next = transitions.recv() => match next {
                Ok(next) => state = next,
                Err(broadcast::error::RecvError::Lagged(_)) => state = handle.state(),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = refresh.tick() => {
                let status = format!(" {} ", state.name());
                let screen = if state.is_idle() {
                    match handle.preview_frame().await {
                        Ok(Some(frame)) => renderer.render_frame(&frame, Some(&status)),
                        Ok(None) => renderer.render_message(&status),
                        Err(_) => renderer.render_message("preview unavailable"),
                    }
                } else {
                    renderer.render_message(&status)
                };
                crossterm::execute!(
                    io::stdout(),
                    crossterm::cursor::MoveTo(0, 0),
                    crossterm::style::Print(&screen),
                    crossterm::cursor::MoveTo(0, (renderer.height() + 2) as u16),
                    crossterm::style::Print("SPACE capture   c cancel   ESC quit          ")
                ).ok();
            }
        }
    }
}

fn detect_cameras() -> Result<()> {
    println!("🔍 Detecting available cameras...\n");

    let cameras = V4l2Camera::list_all_cameras()?;

    if cameras.is_empty() {
        println!("❌ No cameras found!");
        println!("\nTroubleshooting:");
        println!("  1. Check if cameras are connected");
        println!("  2. Ensure you have permission to access /dev/video*");
        return Ok(());
    }

    let mut wide = Vec::new();
    let mut other = Vec::new();
    for camera in &cameras {
        println!("📷 /dev/video{}: {}", camera.index, camera.name);
        for feature in &camera.features {
            println!("   - {}", feature);
        }
        println!();
        if camera.likely_wide_angle {
            wide.push(camera.index);
        } else {
            other.push(camera.index);
        }
    }

    println!("═══════════════════════════════════════════════════════");
    let primary = other.first().or(wide.get(1)).copied();
    let auxiliary = wide.first().or(other.get(1)).copied();
    match (primary, auxiliary) {
        (Some(p), Some(a)) if p != a => {
            println!("✅ Suggested configuration:");
            println!("\n   [primary]");
            println!("   device_index = {}", p);
            println!("\n   [auxiliary]");
            println!("   device_index = {}", a);
        }
        _ => println!("⚠️  Need two distinct capture devices; found {}", cameras.len()),
    }

    println!("\n🔧 After editing, test with:");
    println!("   lenscheck test-camera --role auxiliary");
    Ok(())
}

async fn test_camera(config: &Config, role: CameraRole, preview: bool, dev_mode: &DevMode) -> Result<()> {
    let sensor = sensor_for(config, role)?;
    sensor.start().await?;

    let result = if preview {
        preview_until_escape(&sensor).await
    } else {
        let frame = sensor.capture_one(&CaptureSettings::default()).await?;
        let save_path = dev_mode.get_capture_path(&format!("test_{}", role));
        frame.image.save(&save_path)?;
        println!("Saved test image to {:?}", save_path);
        Ok(())
    };

    sensor.stop().await?;
    result
}

async fn preview_until_escape(sensor: &SensorHandle) -> Result<()> {
    let renderer = AsciiRenderer::new(None, None);
    terminal::enable_raw_mode().context("Failed to enable raw mode")?;
    cli::clear_screen().ok();

    let result = async {
        loop {
            let frame = sensor.capture_one(&CaptureSettings::default()).await?;
            let ascii = renderer.render_frame(&frame.image, Some(&format!(" {} ", sensor.role())));
            crossterm::execute!(
                io::stdout(),
                crossterm::cursor::MoveTo(0, 0),
                crossterm::style::Print(&ascii),
                crossterm::cursor::MoveTo(0, (renderer.height() + 2) as u16),
                crossterm::style::Print("Press ESC to stop preview          ")
            )
            .ok();

            let key = tokio::task::spawn_blocking(|| cli::poll_key(Duration::from_millis(30))).await??;
            if key == Some(WatchKey::Quit) {
                return Ok::<(), anyhow::Error>(());
            }
        }
    }
    .await;

    terminal::disable_raw_mode().ok();
    println!();
    result
}

fn spoof_check(config: Option<Config>, path: &PathBuf, output: Option<PathBuf>, dev_mode: &DevMode) -> Result<()> {
    let params = config.map(|c| c.spoof).unwrap_or_default();
    let detector = LineSpoofDetector::new(params)?;
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let (verdict, lines) = detector.analyze_with_lines(&img);
    if verdict.lines_detected {
        println!("🚫 {} line(s) detected: likely a screen or print", lines.len());
    } else {
        println!("✅ No lines detected");
    }

    if let Some(annotated) = verdict.annotated_image {
        let path = output.unwrap_or_else(|| dev_mode.get_debug_path("spoof_check"));
        annotated.save(&path)?;
        println!("Annotated image saved to {:?}", path);
    }
    io::stdout().flush().ok();
    Ok(())
}
