// Camguard - multi-camera recorder with schedule and motion triggered capture
// Main library entry point

pub mod camera;
pub mod capture;
pub mod config;
pub mod encoding;
pub mod frame;
pub mod gstreamer_init;
pub mod hub;
pub mod motion;
pub mod schedule;
pub mod storage;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camera::database::CameraDatabase;
use camera::CameraId;
use capture::GstCaptureBackend;
use config::AppConfig;
use encoding::GstVideoSinkFactory;
use hub::CameraHub;
use storage::{DiskSpaceManager, SysinfoDiskProbe};

/// Interval at which camera feeds are polled for new frames
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run the recorder until Ctrl-C
pub fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if !gstreamer_init::init_gstreamer_env() {
        anyhow::bail!("GStreamer is not available");
    }

    let config = AppConfig::load_or_default();
    let missing = gstreamer_init::missing_elements(config.recording_codec);
    if !missing.is_empty() {
        log::warn!(
            "Missing GStreamer elements for {} recording: {}",
            config.recording_codec.display_name(),
            missing.join(", ")
        );
    }

    let database_path = config.camera_database_path();
    let database = match CameraDatabase::load(&database_path) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to load camera database {}: {}", database_path.display(), e);
            CameraDatabase::new(&database_path)
        }
    };

    let videos_folder = config.videos_folder();
    std::fs::create_dir_all(&videos_folder)?;

    let _disk_manager = match DiskSpaceManager::new(
        &videos_folder,
        config.retention_policy(),
        config.disk_check_period(),
        Arc::new(SysinfoDiskProbe),
    ) {
        Ok(manager) => Some(manager),
        Err(e) => {
            log::error!("Failed to start disk space manager: {}", e);
            None
        }
    };

    let connect_on_startup = config.connect_to_cameras_on_startup;
    let sinks = Arc::new(GstVideoSinkFactory::new(config.recording_codec));
    let mut hub = CameraHub::new(config, Arc::new(GstCaptureBackend::default()), sinks);

    if connect_on_startup {
        for camera in database.cameras().iter().filter(|c| c.is_valid()) {
            if let Err(e) = hub.connect(camera) {
                log::error!("Failed to connect {}: {}", camera.camera_id, e);
            }
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(poll_until_ctrl_c(&hub));

    log::info!("Shutting down");
    hub.disconnect_all();
    Ok(())
}

/// Poll feeds and log recording state changes until Ctrl-C
async fn poll_until_ctrl_c(hub: &CameraHub) {
    let mut interval = tokio::time::interval(FEED_POLL_INTERVAL);
    let mut recording: HashMap<CameraId, bool> = HashMap::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = interval.tick() => {
                for feed in hub.poll_feeds() {
                    let was_recording = recording.insert(feed.id, feed.recording);
                    if was_recording != Some(feed.recording) {
                        log::info!(
                            "{}: {} ({}x{} @ {:.2} fps)",
                            feed.id,
                            if feed.recording { "recording" } else { "idle" },
                            feed.frame.width,
                            feed.frame.height,
                            feed.fps
                        );
                    }
                }
            }
        }
    }
}
