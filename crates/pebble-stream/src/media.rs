//! File-backed media for publishing without a capture layer.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pebble_common::{Error, Result};
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::io::h264_reader::{H264Reader, NalUnitType};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::whip::MediaStream;

const READER_CAPACITY: usize = 1_048_576;

/// Replays an Annex-B H.264 file into a sample track at a fixed frame rate,
/// starting over at end of file.
pub struct H264FileSource {
    path: PathBuf,
    frame_duration: Duration,
    track: Arc<TrackLocalStaticSample>,
}

impl H264FileSource {
    pub fn new(path: impl AsRef<Path>, fps: u32) -> Result<Self> {
        if fps == 0 {
            return Err(Error::validation("frame rate must be positive"));
        }
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                ..Default::default()
            },
            "video".to_string(),
            "pebble".to_string(),
        ));
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            frame_duration: Duration::from_secs(1) / fps,
            track,
        })
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    pub fn media_stream(&self) -> MediaStream {
        MediaStream::new(vec![self.track() as Arc<dyn TrackLocal + Send + Sync>])
    }

    async fn load(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::config(format!("cannot open {}: {}", self.path.display(), e)))
    }

    /// Feeds the track until the task is dropped. Fails only when the file
    /// cannot be read or holds no NAL units.
    pub async fn run(&self) -> Result<()> {
        let data = self.load().await?;
        info!(
            "replaying {} ({} bytes) at {:?} per frame",
            self.path.display(),
            data.len(),
            self.frame_duration
        );
        let mut ticker = tokio::time::interval(self.frame_duration);
        let mut passes = 0u64;

        loop {
            let mut reader = H264Reader::new(Cursor::new(data.as_slice()), READER_CAPACITY);
            let mut units = 0u64;

            while let Ok(nal) = reader.next_nal() {
                units += 1;
                let is_frame = matches!(
                    nal.unit_type,
                    NalUnitType::CodedSliceIdr | NalUnitType::CodedSliceNonIdr
                );
                if let Err(e) = self
                    .track
                    .write_sample(&Sample {
                        data: nal.data.freeze(),
                        duration: self.frame_duration,
                        ..Default::default()
                    })
                    .await
                {
                    debug!("dropping sample: {}", e);
                }
                if is_frame {
                    ticker.tick().await;
                }
            }

            if units == 0 {
                return Err(Error::validation(format!(
                    "{} contains no H.264 NAL units",
                    self.path.display()
                )));
            }
            passes += 1;
            debug!(passes, units, "reached end of file, looping");
            tokio::task::yield_now().await;
        }
    }
}
