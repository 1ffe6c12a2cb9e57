//! Media bounded context - local capture, tracks and the acquisition error taxonomy

pub mod constraints;
pub mod error;
pub mod source;
pub mod track;

pub use constraints::{MediaConstraints, VideoConstraints};
pub use error::MediaError;
pub use source::{acquire_local_media, MediaSource};
pub use track::{LocalMedia, MediaStream, MediaTrack, TrackHandle, TrackKind};
