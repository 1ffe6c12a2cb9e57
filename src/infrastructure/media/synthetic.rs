//! Synthetic capture devices
//!
//! A deterministic stand-in for a microphone and camera. The inventory
//! decides which failure an acquisition hits, in the order a browser-style
//! capture API reports them; successful acquisitions hand out generated
//! tracks whose liveness can be inspected afterwards.

use crate::domain::media::{
    MediaConstraints, MediaError, MediaSource, MediaStream, MediaTrack, TrackHandle, TrackKind,
    VideoConstraints,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Available,
    Missing,
    /// Present but held by another application
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPolicy {
    Grant,
    Deny,
}

#[derive(Debug, Clone)]
pub struct DeviceInventory {
    pub microphone: DeviceStatus,
    pub camera: DeviceStatus,
    pub permission: PermissionPolicy,
    pub secure_context: bool,
    /// Capture API present at all
    pub supported: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub max_frame_rate: u32,
    /// Delay before each acquisition resolves
    pub latency: Option<Duration>,
}

impl Default for DeviceInventory {
    fn default() -> Self {
        Self {
            microphone: DeviceStatus::Available,
            camera: DeviceStatus::Available,
            permission: PermissionPolicy::Grant,
            secure_context: true,
            supported: true,
            max_width: 1920,
            max_height: 1080,
            max_frame_rate: 60,
            latency: None,
        }
    }
}

impl DeviceInventory {
    /// Microphone only; any video request fails with `DeviceNotFound`
    pub fn audio_only() -> Self {
        Self {
            camera: DeviceStatus::Missing,
            ..Self::default()
        }
    }

    fn check(&self, constraints: &MediaConstraints) -> Result<(), MediaError> {
        if !self.supported {
            return Err(MediaError::Unsupported);
        }
        if !self.secure_context {
            return Err(MediaError::SecurityBlocked);
        }
        if self.permission == PermissionPolicy::Deny {
            return Err(MediaError::PermissionDenied);
        }

        let mut requested = Vec::with_capacity(2);
        if constraints.audio {
            requested.push(self.microphone);
        }
        if constraints.wants_video() {
            requested.push(self.camera);
        }
        if requested.contains(&DeviceStatus::Missing) {
            return Err(MediaError::DeviceNotFound);
        }
        if requested.contains(&DeviceStatus::Busy) {
            return Err(MediaError::DeviceBusy);
        }

        if let Some(video) = &constraints.video {
            if !self.satisfies(video) {
                return Err(MediaError::ConstraintsUnsupported);
            }
        }
        Ok(())
    }

    fn satisfies(&self, video: &VideoConstraints) -> bool {
        video.width.map_or(true, |w| w <= self.max_width)
            && video.height.map_or(true, |h| h <= self.max_height)
            && video.frame_rate.map_or(true, |f| f <= self.max_frame_rate)
    }
}

/// In-memory [`MediaSource`]
#[derive(Default)]
pub struct SyntheticMediaSource {
    inventory: Mutex<DeviceInventory>,
    failures: Mutex<VecDeque<MediaError>>,
    issued: Mutex<Vec<Arc<TrackHandle>>>,
    acquisitions: AtomicUsize,
}

impl SyntheticMediaSource {
    pub fn new(inventory: DeviceInventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            ..Self::default()
        }
    }

    /// Change the devices for later acquisitions
    pub fn update(&self, change: impl FnOnce(&mut DeviceInventory)) {
        change(&mut self.inventory.lock());
    }

    /// Make the next acquisition fail with `error`, whatever the inventory says
    pub fn fail_next(&self, error: MediaError) {
        self.failures.lock().push_back(error);
    }

    /// Tracks handed out and not yet stopped
    pub fn live_track_count(&self) -> usize {
        self.issued.lock().iter().filter(|t| t.is_live()).count()
    }

    pub fn issued_track_count(&self) -> usize {
        self.issued.lock().len()
    }

    /// Number of `acquire` calls, successful or not
    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let latency = self.inventory.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.failures.lock().pop_front() {
            debug!("Injected media failure: {}", error.kind());
            return Err(error);
        }
        let inventory = self.inventory.lock().clone();
        inventory.check(constraints)?;

        let mut tracks = Vec::with_capacity(2);
        if constraints.audio {
            tracks.push(Arc::new(TrackHandle::new(TrackKind::Audio)));
        }
        if constraints.wants_video() {
            tracks.push(Arc::new(TrackHandle::new(TrackKind::Video)));
        }
        self.issued.lock().extend(tracks.iter().cloned());
        debug!("Opened {} synthetic tracks", tracks.len());

        let tracks = tracks
            .into_iter()
            .map(|t| t as Arc<dyn MediaTrack>)
            .collect();
        Ok(MediaStream::new(format!("local-{}", Uuid::new_v4()), tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::acquire_local_media;

    #[tokio::test]
    async fn test_acquires_requested_tracks() {
        let source = SyntheticMediaSource::default();
        let stream = source.acquire(&MediaConstraints::default()).await.unwrap();

        assert!(stream.audio_track().is_some());
        assert!(stream.video_track().is_some());
        assert_eq!(source.live_track_count(), 2);
    }

    #[tokio::test]
    async fn test_error_precedence() {
        let source = SyntheticMediaSource::new(DeviceInventory {
            secure_context: false,
            permission: PermissionPolicy::Deny,
            ..DeviceInventory::default()
        });
        let constraints = MediaConstraints::default();
        assert_eq!(
            source.acquire(&constraints).await.unwrap_err(),
            MediaError::SecurityBlocked
        );

        source.update(|inv| inv.secure_context = true);
        assert_eq!(
            source.acquire(&constraints).await.unwrap_err(),
            MediaError::PermissionDenied
        );

        source.update(|inv| {
            inv.permission = PermissionPolicy::Grant;
            inv.camera = DeviceStatus::Busy;
        });
        assert_eq!(source.acquire(&constraints).await.unwrap_err(), MediaError::DeviceBusy);

        source.update(|inv| inv.supported = false);
        assert_eq!(source.acquire(&constraints).await.unwrap_err(), MediaError::Unsupported);
        assert_eq!(source.issued_track_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_camera_only_matters_for_video() {
        let source = SyntheticMediaSource::new(DeviceInventory::audio_only());
        assert_eq!(
            source.acquire(&MediaConstraints::default()).await.unwrap_err(),
            MediaError::DeviceNotFound
        );
        assert!(source.acquire(&MediaConstraints::audio_only()).await.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_video_falls_back_to_basic() {
        let source = SyntheticMediaSource::new(DeviceInventory {
            max_width: 640,
            max_height: 480,
            ..DeviceInventory::default()
        });

        let media = acquire_local_media(&source, &MediaConstraints::default())
            .await
            .unwrap();

        assert!(media.stream().video_track().is_some());
        assert_eq!(source.acquisition_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let source = SyntheticMediaSource::default();
        source.fail_next(MediaError::Aborted);

        assert_eq!(
            source.acquire(&MediaConstraints::default()).await.unwrap_err(),
            MediaError::Aborted
        );
        assert!(source.acquire(&MediaConstraints::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_released_media_leaves_no_live_tracks() {
        let source = SyntheticMediaSource::default();
        let media = acquire_local_media(&source, &MediaConstraints::default())
            .await
            .unwrap();
        assert_eq!(source.live_track_count(), 2);

        media.release();
        assert_eq!(source.live_track_count(), 0);
        assert_eq!(source.issued_track_count(), 2);
    }
}
