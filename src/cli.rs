// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the filter pipeline
//!
//! This module provides command-line functionality for:
//! - Listing filters and cameras
//! - Running the preview pipeline headless
//! - Recording the filtered preview

use chrono::Local;
use filtercam::backends::camera::synthetic::SyntheticCamera;
use filtercam::constants::timing;
use filtercam::gpu::{ContextProvider, WgpuContext};
use filtercam::{
    CameraHardware, Config, FilterCatalog, FilterType, RecordingController, RecordingRequest,
    SurfaceHost, TextureRecorder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default folder name for saved recordings and snapshots
const DEFAULT_SAVE_FOLDER: &str = "filtercam";

/// List all filter ids
pub fn list_filters() -> Result<(), Box<dyn std::error::Error>> {
    println!("Available filters:");
    for filter in FilterType::ALL {
        println!("  {}", filter.id());
    }
    Ok(())
}

/// List all available cameras
pub fn list_cameras(synthetic: bool) -> Result<(), Box<dyn std::error::Error>> {
    let hardware = camera_hardware(synthetic);
    let devices = hardware.list_devices();

    if devices.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {} ({}, {})", index, device.name, device.id, device.facing);

        // The handle is released when it goes out of scope
        match hardware.open(&device.id).and_then(|handle| handle.capabilities()) {
            Ok(caps) => {
                let mut sizes = caps.sizes.clone();
                sizes.sort_by(|a, b| (b.width * b.height).cmp(&(a.width * a.height)));
                let sizes: Vec<String> = sizes.iter().take(3).map(|s| s.to_string()).collect();
                println!("      Sizes: {}", sizes.join(", "));
            }
            Err(e) => println!("      Unavailable: {}", e),
        }
        println!();
    }

    Ok(())
}

/// Run the preview pipeline for `seconds`, optionally saving a snapshot
pub fn run_preview(
    filter: Option<&str>,
    seconds: u64,
    snapshot: Option<PathBuf>,
    synthetic: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let filter = parse_filter(filter, &config)?;

    let gpu = WgpuContext::new()?;
    println!("GPU: {}", gpu.adapter_name());
    let recorder: Arc<dyn RecordingController> =
        Arc::new(TextureRecorder::new(FilterCatalog::new(config.beauty_level()))?);

    let mut host = start_host(&config, synthetic, gpu, recorder)?;
    host.change_filter(filter);
    println!("Filter: {}", filter);

    println!("Previewing... (press Ctrl+C to stop early)");
    run_for(&host, seconds, "Preview")?;

    if let Some(path) = snapshot {
        match host.snapshot()? {
            Some(image) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)?;
                }
                image.save(&path)?;
                println!("Snapshot saved: {}", path.display());
            }
            None => println!("No frame available for snapshot"),
        }
    }

    print_stats(&host);
    host.destroy();
    Ok(())
}

/// Record the filtered preview for `seconds`
pub fn record_video(
    filter: Option<&str>,
    seconds: u64,
    output: Option<PathBuf>,
    synthetic: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let filter = parse_filter(filter, &config)?;

    let output_path = if let Some(path) = output {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        path
    } else {
        let dir = config
            .output_dir
            .clone()
            .unwrap_or_else(get_default_video_dir);
        std::fs::create_dir_all(&dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        dir.join(format!("video_{}.y4m", timestamp))
    };

    let gpu = WgpuContext::new()?;
    let recorder = Arc::new(TextureRecorder::new(FilterCatalog::new(
        config.beauty_level(),
    ))?);
    let controller: Arc<dyn RecordingController> = recorder.clone();

    let mut host = start_host(&config, synthetic, gpu, controller)?;
    host.change_filter(filter);

    let (width, height) = host.surface_size();
    let bitrate = config.bitrate_preset.bitrate_kbps(width, height);
    println!("Output: {}", output_path.display());
    println!(
        "Recording: {}x{} @ {}fps, {} filter, {} ({} kbps)",
        width,
        height,
        config.target_fps,
        filter,
        config.bitrate_preset.display_name(),
        bitrate
    );

    host.start_recording(RecordingRequest::new(
        output_path.clone(),
        width,
        height,
        config.target_fps,
        bitrate,
    ));

    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    run_for(&host, seconds, "Recording")?;

    host.stop_recording();
    let deadline = Instant::now() + timing::PREPARE_TIMEOUT;
    while host.is_recording() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    print_stats(&host);
    host.destroy();

    println!("Frames encoded: {}", recorder.frames_encoded());
    println!("Video saved: {}", output_path.display());
    Ok(())
}

fn camera_hardware(synthetic: bool) -> Arc<dyn CameraHardware> {
    if synthetic {
        return Arc::new(SyntheticCamera::new());
    }
    native_camera()
}

#[cfg(target_os = "linux")]
fn native_camera() -> Arc<dyn CameraHardware> {
    Arc::new(filtercam::backends::camera::v4l2::V4l2Camera::new())
}

#[cfg(not(target_os = "linux"))]
fn native_camera() -> Arc<dyn CameraHardware> {
    println!("No native camera backend on this platform, using test pattern");
    Arc::new(SyntheticCamera::new())
}

fn start_host(
    config: &Config,
    synthetic: bool,
    gpu: WgpuContext,
    recorder: Arc<dyn RecordingController>,
) -> Result<SurfaceHost, Box<dyn std::error::Error>> {
    let hardware = camera_hardware(synthetic);
    if hardware.list_devices().is_empty() {
        return Err("No cameras found (try --synthetic)".into());
    }

    let gpu: Arc<dyn ContextProvider> = Arc::new(gpu);
    let mut host = SurfaceHost::new(config, hardware, gpu, recorder)?;
    host.resume();
    if !host.wait_prepared(timing::PREPARE_TIMEOUT) {
        return Err("Render surface did not become ready".into());
    }
    if let Some(e) = host.fatal_error() {
        return Err(e.into());
    }
    Ok(host)
}

/// Keep the pipeline running until `seconds` pass or Ctrl+C
fn run_for(host: &SurfaceHost, seconds: u64, label: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(seconds);

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        if let Some(e) = host.fatal_error() {
            println!();
            return Err(e.into());
        }

        let elapsed = start.elapsed().as_secs();
        print!("\r{}: {:02}:{:02}", label, elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();
    Ok(())
}

fn print_stats(host: &SurfaceHost) {
    if let Some(stats) = host.stats() {
        println!(
            "Frames drawn: {} (filter {}, {} program switches)",
            stats.frames_drawn, stats.filter, stats.program_switches
        );
    }
}

fn parse_filter(
    filter: Option<&str>,
    config: &Config,
) -> Result<FilterType, Box<dyn std::error::Error>> {
    let Some(id) = filter else {
        return Ok(config.default_filter);
    };
    FilterType::ALL
        .into_iter()
        .find(|f| f.id() == id)
        .ok_or_else(|| format!("Unknown filter '{}' (see 'filtercam filters')", id).into())
}

/// Get default video directory
fn get_default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
