//! GStreamer initialization
//!
//! On Windows a private GStreamer deployment next to the executable is
//! preferred over a system installation.

use std::sync::OnceLock;

use crate::encoding::VideoCodec;

static GSTREAMER_READY: OnceLock<bool> = OnceLock::new();

/// Initialize GStreamer once. Returns whether it is usable.
pub fn init_gstreamer_env() -> bool {
    *GSTREAMER_READY.get_or_init(|| {
        #[cfg(target_os = "windows")]
        setup_private_gstreamer_windows();

        match gstreamer::init() {
            Ok(()) => {
                let (major, minor, micro, _) = gstreamer::version();
                log::info!("GStreamer {}.{}.{} initialized", major, minor, micro);
                true
            }
            Err(e) => {
                log::error!("Failed to initialize GStreamer: {}", e);
                log::error!("Video capture and recording will not be available");
                false
            }
        }
    })
}

#[cfg(target_os = "windows")]
fn setup_private_gstreamer_windows() {
    let Some(app_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
    else {
        return;
    };

    let root = app_dir.join("gstreamer");
    let bin_dir = root.join("bin");
    if !bin_dir.exists() {
        log::debug!("No private GStreamer deployment at {:?}", root);
        return;
    }

    log::info!("Using private GStreamer deployment at {:?}", root);
    let path = std::env::var("PATH").unwrap_or_default();
    std::env::set_var("PATH", format!("{};{}", bin_dir.display(), path));

    let plugin_dir = root.join("lib").join("gstreamer-1.0");
    if plugin_dir.exists() {
        std::env::set_var("GST_PLUGIN_PATH", &plugin_dir);
    }
    if let Some(local_app_data) = dirs::data_local_dir() {
        let registry = local_app_data.join("camguard").join("gst-registry.bin");
        if let Some(parent) = registry.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::env::set_var("GST_REGISTRY", &registry);
    }
}

/// Elements a recording with `codec` needs that are not installed
pub fn missing_elements(codec: VideoCodec) -> Vec<&'static str> {
    let mut needed = vec![
        "appsrc",
        "appsink",
        "videoconvert",
        "uridecodebin",
        codec.gst_encoder(),
        codec.container().gst_muxer(),
    ];
    needed.extend(codec.gst_parser());
    needed
        .into_iter()
        .filter(|name| gstreamer::ElementFactory::find(name).is_none())
        .collect()
}
