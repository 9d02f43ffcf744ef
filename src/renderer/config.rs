use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Whether both eyes share one viewport or the surface is split in two halves
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    Mono,
    Stereo,
}

impl ViewMode {
    /// Number of view passes the surface is built with
    pub fn pass_count(self) -> usize {
        match self {
            ViewMode::Mono => 1,
            ViewMode::Stereo => 2,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Mono => ViewMode::Stereo,
            ViewMode::Stereo => ViewMode::Mono,
        }
    }
}

impl FromStr for ViewMode {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mono" => Ok(ViewMode::Mono),
            "stereo" => Ok(ViewMode::Stereo),
            other => Err(eyre!("Unknown view mode: {}", other)),
        }
    }
}

/// Contains configuration options for the renderer. Owned by the caller, read at startup.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub view_mode: ViewMode,
    pub enable_validation: bool,
    pub enable_api_dump: bool,
    pub frames_in_flight: usize,
    /// Viewing distance of the observer in mm
    pub distance_mm: f32,
    /// Physical size of one display pixel in mm
    pub pixel_pitch_mm: f32,
    /// Index into the ranked list of suitable devices
    pub device_index: Option<usize>,
    /// PNG or JPEG shown as an extra stimulus
    pub image_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            view_mode: ViewMode::Mono,
            enable_validation: cfg!(debug_assertions),
            enable_api_dump: false,
            frames_in_flight: 2,
            distance_mm: 500.0,
            pixel_pitch_mm: 0.25,
            device_index: None,
            image_path: None,
        }
    }
}

impl RenderConfig {
    /// Defaults overridden by `VISTIM_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup("VISTIM_VIEW_MODE") {
            config.view_mode = mode.parse()?;
        }
        if let Some(flag) = lookup("VISTIM_VALIDATION") {
            config.enable_validation = parse_flag("VISTIM_VALIDATION", &flag)?;
        }
        if let Some(flag) = lookup("VISTIM_API_DUMP") {
            config.enable_api_dump = parse_flag("VISTIM_API_DUMP", &flag)?;
        }
        if let Some(frames) = lookup("VISTIM_FRAMES_IN_FLIGHT") {
            config.frames_in_flight = frames.parse()?;
            if config.frames_in_flight == 0 {
                return Err(eyre!("VISTIM_FRAMES_IN_FLIGHT must be at least 1"));
            }
        }
        if let Some(distance) = lookup("VISTIM_DISTANCE_MM") {
            config.distance_mm = distance.parse()?;
        }
        if let Some(pitch) = lookup("VISTIM_PIXEL_PITCH_MM") {
            config.pixel_pitch_mm = pitch.parse()?;
        }
        if let Some(index) = lookup("VISTIM_DEVICE") {
            config.device_index = Some(index.parse()?);
        }
        if let Some(path) = lookup("VISTIM_IMAGE") {
            config.image_path = Some(PathBuf::from(path));
        }

        // The dump layer rides on top of the validation layers
        if config.enable_api_dump {
            config.enable_validation = true;
        }

        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(eyre!("Invalid value for {}: {}", key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.view_mode, ViewMode::Mono);
        assert_eq!(config.frames_in_flight, 2);
        assert!(!config.enable_api_dump);
        assert!(config.device_index.is_none());
        assert!(config.image_path.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = RenderConfig::from_lookup(lookup_from(&[
            ("VISTIM_VIEW_MODE", "Stereo"),
            ("VISTIM_FRAMES_IN_FLIGHT", "3"),
            ("VISTIM_DISTANCE_MM", "570"),
            ("VISTIM_DEVICE", "1"),
            ("VISTIM_IMAGE", "stimuli/face.png"),
        ]))
        .unwrap();
        assert_eq!(config.view_mode, ViewMode::Stereo);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.distance_mm, 570.0);
        assert_eq!(config.device_index, Some(1));
        assert_eq!(config.image_path, Some(PathBuf::from("stimuli/face.png")));
    }

    #[test]
    fn test_api_dump_implies_validation() {
        let config = RenderConfig::from_lookup(lookup_from(&[
            ("VISTIM_VALIDATION", "off"),
            ("VISTIM_API_DUMP", "on"),
        ]))
        .unwrap();
        assert!(config.enable_validation);
        assert!(config.enable_api_dump);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(RenderConfig::from_lookup(lookup_from(&[("VISTIM_VIEW_MODE", "cyclops")])).is_err());
        assert!(RenderConfig::from_lookup(lookup_from(&[("VISTIM_FRAMES_IN_FLIGHT", "0")])).is_err());
        assert!(RenderConfig::from_lookup(lookup_from(&[("VISTIM_VALIDATION", "maybe")])).is_err());
    }

    #[test]
    fn test_view_mode_pass_count() {
        assert_eq!(ViewMode::Mono.pass_count(), 1);
        assert_eq!(ViewMode::Stereo.pass_count(), 2);
        assert_eq!(ViewMode::Mono.toggled(), ViewMode::Stereo);
    }
}
