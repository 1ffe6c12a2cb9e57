//! Capture constraints

use serde::{Deserialize, Serialize};

/// Requested video capture settings; `None` means "whatever the device offers"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl VideoConstraints {
    pub fn hd() -> Self {
        Self {
            width: Some(1280),
            height: Some(720),
            frame_rate: Some(30),
        }
    }

    pub fn is_basic(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.frame_rate.is_none()
    }
}

/// What to capture for a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }

    /// Same devices, no resolution or frame-rate requirements
    pub fn basic(&self) -> Self {
        Self {
            audio: self.audio,
            video: self.video.as_ref().map(|_| VideoConstraints::default()),
        }
    }

    pub fn wants_video(&self) -> bool {
        self.video.is_some()
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::hd()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_keeps_devices_but_drops_settings() {
        let preferred = MediaConstraints::default();
        let basic = preferred.basic();

        assert!(basic.audio);
        assert!(basic.wants_video());
        assert!(basic.video.unwrap().is_basic());
    }

    #[test]
    fn test_basic_audio_only_stays_audio_only() {
        let basic = MediaConstraints::audio_only().basic();
        assert!(basic.audio);
        assert!(!basic.wants_video());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let constraints: MediaConstraints =
            serde_json::from_str(r#"{"video": {"width": 640}}"#).unwrap();
        assert!(constraints.audio);
        assert_eq!(constraints.video.unwrap().width, Some(640));
    }
}
