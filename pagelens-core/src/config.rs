//! Optional `config.toml` with startup defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ViewerError;
use crate::view::{Rotation, ViewState};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ViewerConfig {
    #[serde(default)]
    pub view: ViewDefaults,

    /// Explicit pdfium shared library to bind instead of searching for one.
    #[serde(default)]
    pub pdfium_library: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ViewDefaults {
    #[serde(default)]
    pub zoom: Option<f64>,
    #[serde(default)]
    pub rotation: Option<Rotation>,
    #[serde(default)]
    pub inverted: Option<bool>,
    #[serde(default)]
    pub fullscreen: Option<bool>,
}

impl ViewerConfig {
    pub const FILE_NAME: &'static str = "config.toml";

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ViewerError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(ViewerError::Config {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                })
            }
        };
        let config = Self::parse(&text).map_err(|reason| ViewerError::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        config.initial_view().map_err(|err| ViewerError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    /// The view the session starts with.
    pub fn initial_view(&self) -> Result<ViewState, ViewerError> {
        let mut view = ViewState::new(
            self.view.zoom.unwrap_or(1.0),
            self.view.rotation.unwrap_or_default(),
            self.view.inverted.unwrap_or(false),
        )?;
        if self.view.fullscreen.unwrap_or(false) {
            view.toggle_fullscreen();
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Surface;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ViewerConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.initial_view().unwrap(), ViewState::default());
    }

    #[test]
    fn view_table_sets_startup_state() {
        let config = ViewerConfig::parse(
            r#"
            pdfium_library = "/opt/pdfium/libpdfium.so"

            [view]
            zoom = 1.5
            rotation = 270
            inverted = true
            fullscreen = true
            "#,
        )
        .unwrap();
        let view = config.initial_view().unwrap();
        assert_eq!(view.zoom(), 1.5);
        assert_eq!(view.rotation(), Rotation::Deg270);
        assert!(view.inverted());
        assert_eq!(view.active_surface(), Surface::Fullscreen);
        assert_eq!(
            config.pdfium_library,
            Some(PathBuf::from("/opt/pdfium/libpdfium.so"))
        );
    }

    #[test]
    fn unknown_keys_and_bad_rotation_are_rejected() {
        assert!(ViewerConfig::parse("[view]\nzom = 2.0\n").is_err());
        assert!(ViewerConfig::parse("[view]\nrotation = 45\n").is_err());
    }

    #[test]
    fn out_of_range_zoom_is_a_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[view]\nzoom = 9.0\n").unwrap();
        match ViewerConfig::load(&path) {
            Err(ViewerError::Config { reason, .. }) => assert!(reason.contains("5.000")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
