//! Media source port and acquisition policy

use crate::domain::media::constraints::MediaConstraints;
use crate::domain::media::error::MediaError;
use crate::domain::media::track::{LocalMedia, MediaStream};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Local capture devices (camera/microphone)
///
/// Implementations must be all-or-nothing: on error no track may be left
/// open, and dropping an in-flight `acquire` future must release anything it
/// already opened.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;
}

/// Acquire local media, retrying once with basic constraints when the
/// preferred ones are not supported. Every other failure is returned as is.
pub async fn acquire_local_media(
    source: &dyn MediaSource,
    constraints: &MediaConstraints,
) -> Result<LocalMedia, MediaError> {
    match source.acquire(constraints).await {
        Ok(stream) => checked(stream, constraints),
        Err(e) if e.is_constraint_failure() => {
            let basic = constraints.basic();
            warn!("Preferred media constraints unsupported, retrying with basic constraints");
            let stream = source.acquire(&basic).await?;
            checked(stream, &basic)
        }
        Err(e) => {
            debug!("Media acquisition failed: {}", e.kind());
            Err(e)
        }
    }
}

/// Reject a stream that is missing a requested device, stopping what it did open
fn checked(stream: MediaStream, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
    let local = LocalMedia::new(stream);
    let missing_audio = constraints.audio && local.stream().audio_track().is_none();
    let missing_video = constraints.wants_video() && local.stream().video_track().is_none();
    if missing_audio || missing_video || local.stream().tracks().is_empty() {
        warn!("Media source returned an incomplete stream");
        return Err(MediaError::DeviceNotFound);
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::media::track::{MediaTrack, TrackHandle, TrackKind};
    use std::sync::Arc;

    fn full_stream() -> MediaStream {
        MediaStream::new(
            "local",
            vec![
                Arc::new(TrackHandle::new(TrackKind::Audio)) as Arc<dyn MediaTrack>,
                Arc::new(TrackHandle::new(TrackKind::Video)),
            ],
        )
    }

    #[tokio::test]
    async fn test_constraints_failure_retries_once_with_basic() {
        let mut source = MockMediaSource::new();
        source
            .expect_acquire()
            .withf(|c| c.video.as_ref().map(|v| !v.is_basic()).unwrap_or(false))
            .times(1)
            .returning(|_| Err(MediaError::ConstraintsUnsupported));
        source
            .expect_acquire()
            .withf(|c| c.video.as_ref().map(|v| v.is_basic()).unwrap_or(false))
            .times(1)
            .returning(|_| Ok(full_stream()));

        let local = acquire_local_media(&source, &MediaConstraints::default())
            .await
            .unwrap();
        assert_eq!(local.stream().tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_second_constraints_failure_is_final() {
        let mut source = MockMediaSource::new();
        source
            .expect_acquire()
            .times(2)
            .returning(|_| Err(MediaError::ConstraintsUnsupported));

        let result = acquire_local_media(&source, &MediaConstraints::default()).await;
        assert_eq!(result.unwrap_err(), MediaError::ConstraintsUnsupported);
    }

    #[tokio::test]
    async fn test_other_failures_do_not_retry() {
        for error in [
            MediaError::PermissionDenied,
            MediaError::DeviceNotFound,
            MediaError::DeviceBusy,
            MediaError::SecurityBlocked,
            MediaError::Aborted,
            MediaError::Unsupported,
        ] {
            let mut source = MockMediaSource::new();
            let returned = error.clone();
            source
                .expect_acquire()
                .times(1)
                .returning(move |_| Err(returned.clone()));

            let result = acquire_local_media(&source, &MediaConstraints::default()).await;
            assert_eq!(result.unwrap_err(), error);
        }
    }

    #[tokio::test]
    async fn test_incomplete_stream_is_released() {
        let audio = Arc::new(TrackHandle::new(TrackKind::Audio));
        let partial = MediaStream::new("local", vec![audio.clone() as Arc<dyn MediaTrack>]);

        let mut source = MockMediaSource::new();
        source
            .expect_acquire()
            .times(1)
            .return_once(move |_| Ok(partial));

        let result = acquire_local_media(&source, &MediaConstraints::default()).await;
        assert_eq!(result.unwrap_err(), MediaError::DeviceNotFound);
        assert!(!audio.is_live());
    }
}
