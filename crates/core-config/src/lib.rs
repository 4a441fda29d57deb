//! Configuration loading and per-transaction option snapshots.
//!
//! Parses `stave.toml` (or an override path provided by the binary). Every
//! section is optional; unknown fields are ignored so older binaries keep
//! reading newer files. A missing or unparsable file falls back to defaults.
//!
//! Views never share a mutable options object. Each one asks the loaded
//! `Config` for a `ViewOptions` snapshot (its page plus the render settings)
//! and passes that value along with the calls it submits.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Zoom bounds (engine scale, percent).
pub const MIN_SCALE: u32 = 10;
pub const MAX_SCALE: u32 = 500;

/// System break handling requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breaks {
    #[default]
    Auto,
    Line,
    Encoded,
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "RenderConfig::default_scale")]
    pub scale: u32,
    #[serde(default = "RenderConfig::default_page_width")]
    pub page_width: u32,
    #[serde(default = "RenderConfig::default_page_height")]
    pub page_height: u32,
    #[serde(default)]
    pub breaks: Breaks,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            scale: Self::default_scale(),
            page_width: Self::default_page_width(),
            page_height: Self::default_page_height(),
            breaks: Breaks::default(),
        }
    }
}

impl RenderConfig {
    const fn default_scale() -> u32 {
        40
    }
    const fn default_page_width() -> u32 {
        2100 // A4 portrait, tenths of mm
    }
    const fn default_page_height() -> u32 {
        2970
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayoutConfig {
    #[serde(default = "LayoutConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

impl LayoutConfig {
    const fn default_debounce_ms() -> u64 {
        250
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PeersConfig {
    /// Caller-side bound on waiting for a peer's `ready`; the proxy itself
    /// never times out.
    #[serde(default = "PeersConfig::default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Schema handed to the validator at startup.
    #[serde(default)]
    pub schema: Option<String>,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: Self::default_ready_timeout_ms(),
            schema: None,
        }
    }
}

impl PeersConfig {
    const fn default_ready_timeout_ms() -> u64 {
        5000
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub peers: PeersConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
    pub effective_scale: u32,
}

/// Immutable options captured when a view submits work. Serializes to the
/// engine's `setOptions` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOptions {
    #[serde(skip)]
    pub page: u32,
    pub scale: u32,
    pub page_width: u32,
    pub page_height: u32,
    pub breaks: Breaks,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Config::default().with_effective_defaults().view_options(1)
    }
}

impl ViewOptions {
    pub fn on_page(self, page: u32) -> Self {
        Self { page, ..self }
    }
}

/// Best-effort config path following platform conventions (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("stave.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("stave").join("stave.toml");
    }
    PathBuf::from("stave.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let config = match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Config {
                raw: Some(content),
                file,
                effective_scale: 0,
            },
            Err(e) => {
                warn!(target: "config", path = %path.display(), %e, "config_parse_failed_using_defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    };
    Ok(config.with_effective_defaults())
}

impl Config {
    fn with_effective_defaults(mut self) -> Self {
        let requested = self.file.render.scale;
        self.apply_zoom(requested);
        self
    }

    /// Clamp a requested zoom into `[MIN_SCALE, MAX_SCALE]`, store and return it.
    pub fn apply_zoom(&mut self, requested: u32) -> u32 {
        let clamped = requested.clamp(MIN_SCALE, MAX_SCALE);
        if clamped != requested {
            info!(
                target: "config",
                requested,
                clamped,
                min = MIN_SCALE,
                max = MAX_SCALE,
                "zoom_scale_clamped"
            );
        }
        self.effective_scale = clamped;
        clamped
    }

    /// `Some(new_scale)` when the effective zoom changed.
    pub fn recompute_zoom(&mut self, requested: u32) -> Option<u32> {
        let prev = self.effective_scale;
        let current = self.apply_zoom(requested);
        if current != prev { Some(current) } else { None }
    }

    /// Snapshot for a view currently showing `page`.
    pub fn view_options(&self, page: u32) -> ViewOptions {
        let render = &self.file.render;
        ViewOptions {
            page: page.max(1),
            scale: self.effective_scale,
            page_width: render.page_width,
            page_height: render.page_height,
            breaks: render.breaks,
        }
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.file.layout.debounce_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.file.peers.ready_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferWriter {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (Self { inner: buf.clone() }, buf)
        }
    }

    struct LockedWriter<'a> {
        guard: MutexGuard<'a, Vec<u8>>,
    }

    impl<'a> Write for LockedWriter<'a> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = LockedWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            LockedWriter {
                guard: self.inner.lock().expect("log buffer poisoned"),
            }
        }
    }

    fn load_str(content: &str) -> Config {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), content).unwrap();
        load_from(Some(tmp.path().to_path_buf())).unwrap()
    }

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.file.render.scale, 40);
        assert_eq!(cfg.effective_scale, 40);
        assert_eq!(cfg.file.layout.debounce_ms, 250);
        assert_eq!(cfg.ready_timeout(), Duration::from_secs(5));
        assert!(cfg.raw.is_none());
    }

    #[test]
    fn parses_render_and_peer_sections() {
        let cfg = load_str(
            "[render]\nscale = 60\nbreaks = \"encoded\"\n[peers]\nready_timeout_ms = 750\nschema = \"mei-all.rng\"\n",
        );
        assert_eq!(cfg.effective_scale, 60);
        assert_eq!(cfg.file.render.breaks, Breaks::Encoded);
        assert_eq!(cfg.file.render.page_width, 2100, "unspecified keys keep defaults");
        assert_eq!(cfg.ready_timeout(), Duration::from_millis(750));
        assert_eq!(cfg.file.peers.schema.as_deref(), Some("mei-all.rng"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let cfg = load_str("[render\nscale = = 3");
        assert_eq!(cfg.effective_scale, 40);
        assert!(cfg.raw.is_none());
    }

    #[test]
    fn zoom_is_clamped_and_change_reported() {
        let mut cfg = load_str("[render]\nscale = 900\n");
        assert_eq!(cfg.effective_scale, MAX_SCALE);
        assert_eq!(cfg.recompute_zoom(80), Some(80));
        assert_eq!(cfg.recompute_zoom(80), None);
        assert_eq!(cfg.recompute_zoom(1), Some(MIN_SCALE));
    }

    #[test]
    fn view_options_snapshot_is_independent() {
        let mut cfg = load_str("[render]\nscale = 50\n");
        let before = cfg.view_options(3);
        cfg.apply_zoom(120);
        let after = cfg.view_options(3);
        assert_eq!(before.scale, 50);
        assert_eq!(after.scale, 120);
        assert_eq!(cfg.view_options(0).page, 1, "pages are 1-based");
        assert_eq!(before.on_page(7).page, 7);
    }

    #[test]
    fn view_options_serialize_to_engine_shape() {
        let opts = ViewOptions::default();
        let value = serde_json::to_value(opts).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "scale": 40,
                "pageWidth": 2100,
                "pageHeight": 2970,
                "breaks": "auto"
            })
        );
    }

    #[test]
    fn clamp_logging_uses_config_target() {
        let mut cfg = load_from(Some(PathBuf::from("__nonexistent_zoom__.toml"))).unwrap();
        let (writer, buffer) = BufferWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();

        with_default(subscriber, || {
            cfg.apply_zoom(5000);
        });

        let log_output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(log_output.contains("INFO config:"));
        assert!(log_output.contains("zoom_scale_clamped"));
        assert_eq!(cfg.effective_scale, MAX_SCALE);
    }
}
