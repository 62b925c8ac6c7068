//! Encoded and decoded frame types, plus the per-submission metadata that
//! has to be carried across the decoder boundary.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, Result};

/// Presentation (RTP) timestamp used to correlate a completion with its submission.
pub type TimestampKey = u32;

/// Clockwise rotation to apply when rendering a frame.
///
/// The discriminant is the rotation in degrees, so raw values coming from
/// capture metadata can be converted with `VideoRotation::try_from(90u16)`.
///
/// # Examples
///
/// ```
/// use decode_correlator::VideoRotation;
///
/// let rotation = VideoRotation::try_from(270u16).unwrap();
/// assert_eq!(rotation, VideoRotation::Rotate270);
/// assert!(VideoRotation::try_from(45u16).is_err());
/// ```
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum VideoRotation {
    Rotate0 = 0,
    Rotate90 = 90,
    Rotate180 = 180,
    Rotate270 = 270,
}

// Not derived: num_enum would treat a `#[default]` variant as the fallback
// for unknown degree values.
impl Default for VideoRotation {
    fn default() -> Self {
        Self::Rotate0
    }
}

/// Codec family a decoder is configured for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VideoCodecType {
    VP8,
    VP9,
    H264,
    I420,
    Generic,
    #[default]
    Unknown,
}

/// Codec-specific side information delivered with an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecSpecificInfo {
    VP8 {
        picture_id: Option<u16>,
        non_reference: bool,
        temporal_idx: u8,
    },
    VP9 {
        picture_id: Option<u16>,
        inter_pic_predicted: bool,
    },
    H264,
    Generic {
        simulcast_idx: u8,
    },
}

/// Partition layout of an encoded frame, as produced by the packetizer.
///
/// Each entry describes one fragment as `(offset, length)` into the frame payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentationHeader {
    pub fragments: Vec<(usize, usize)>,
}

impl FragmentationHeader {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Whether a frame can be decoded on its own.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    KeyFrame,
    #[default]
    DeltaFrame,
}

/// The encoded payload handed to the decoder.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EncodedImage {
    /// Presentation timestamp; decoders copy it into the frames they produce.
    pub timestamp: TimestampKey,
    /// Sender capture time in NTP milliseconds, or 0 if not yet known.
    pub ntp_time_ms: i64,
    pub frame_type: FrameType,
    pub width: u32,
    pub height: u32,
    pub complete_frame: bool,
    pub data: Vec<u8>,
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("timestamp", &self.timestamp)
            .field("ntp_time_ms", &self.ntp_time_ms)
            .field("frame_type", &self.frame_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("complete_frame", &self.complete_frame)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// A reassembled, encoded frame ready to be submitted for decoding.
///
/// Use [`EncodedFrame::builder`] to construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Local-clock time (ms) at which the frame is meant to be shown.
    pub render_time_ms: i64,
    pub rotation: VideoRotation,
    /// Set when one or more preceding frames were lost.
    pub missing_frame: bool,
    pub image: EncodedImage,
    pub fragmentation: Option<FragmentationHeader>,
    pub codec_specific: Option<CodecSpecificInfo>,
}

impl EncodedFrame {
    /// Create a builder for configuring an encoded frame
    pub fn builder(timestamp: TimestampKey) -> EncodedFrameBuilder {
        EncodedFrameBuilder::new(timestamp)
    }

    /// The correlation key for the decoded output.
    pub fn timestamp(&self) -> TimestampKey {
        self.image.timestamp
    }
}

/// Builder for [`EncodedFrame`] with ergonomic method chaining
///
/// # Examples
///
/// ```
/// use decode_correlator::{EncodedFrame, FrameType, VideoRotation};
///
/// let frame = EncodedFrame::builder(3000)
///     .render_time_ms(1_250)
///     .rotation(VideoRotation::Rotate90)
///     .frame_type(FrameType::KeyFrame)
///     .data(vec![0u8; 64])
///     .build();
///
/// assert_eq!(frame.timestamp(), 3000);
/// assert!(frame.image.complete_frame);
/// ```
#[derive(Debug, Clone)]
pub struct EncodedFrameBuilder {
    timestamp: TimestampKey,
    ntp_time_ms: i64,
    render_time_ms: Option<i64>,
    rotation: Option<VideoRotation>,
    missing_frame: bool,
    frame_type: Option<FrameType>,
    resolution: Option<(u32, u32)>,
    complete_frame: Option<bool>,
    data: Vec<u8>,
    fragmentation: Option<FragmentationHeader>,
    codec_specific: Option<CodecSpecificInfo>,
}

impl EncodedFrameBuilder {
    /// Create a new builder for the frame with the given timestamp
    pub fn new(timestamp: TimestampKey) -> Self {
        Self {
            timestamp,
            ntp_time_ms: 0,
            render_time_ms: None,
            rotation: None,
            missing_frame: false,
            frame_type: None,
            resolution: None,
            complete_frame: None,
            data: Vec::new(),
            fragmentation: None,
            codec_specific: None,
        }
    }

    /// Set the intended render time in local-clock milliseconds
    #[must_use]
    pub fn render_time_ms(mut self, render_time_ms: i64) -> Self {
        self.render_time_ms = Some(render_time_ms);
        self
    }

    #[must_use]
    pub fn rotation(mut self, rotation: VideoRotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Set the sender capture time in NTP milliseconds
    #[must_use]
    pub fn ntp_time_ms(mut self, ntp_time_ms: i64) -> Self {
        self.ntp_time_ms = ntp_time_ms;
        self
    }

    /// Mark that frames preceding this one were lost
    #[must_use]
    pub fn missing_frame(mut self, missing: bool) -> Self {
        self.missing_frame = missing;
        self
    }

    #[must_use]
    pub fn frame_type(mut self, frame_type: FrameType) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    #[must_use]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }

    #[must_use]
    pub fn complete_frame(mut self, complete: bool) -> Self {
        self.complete_frame = Some(complete);
        self
    }

    /// Set the encoded payload
    #[must_use]
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn fragmentation(mut self, header: FragmentationHeader) -> Self {
        self.fragmentation = Some(header);
        self
    }

    #[must_use]
    pub fn codec_specific(mut self, info: CodecSpecificInfo) -> Self {
        self.codec_specific = Some(info);
        self
    }

    /// Build the EncodedFrame
    pub fn build(self) -> EncodedFrame {
        let (width, height) = self.resolution.unwrap_or((0, 0));
        EncodedFrame {
            render_time_ms: self.render_time_ms.unwrap_or(0),
            rotation: self.rotation.unwrap_or_default(),
            missing_frame: self.missing_frame,
            image: EncodedImage {
                timestamp: self.timestamp,
                ntp_time_ms: self.ntp_time_ms,
                frame_type: self.frame_type.unwrap_or_default(),
                width,
                height,
                complete_frame: self.complete_frame.unwrap_or(true),
                data: self.data,
            },
            fragmentation: self.fragmentation,
            codec_specific: self.codec_specific,
        }
    }
}

/// Metadata captured at submission time that the decoder does not preserve.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Local-clock time (ms) captured immediately before the decode call.
    pub decode_start_ms: i64,
    pub render_time_ms: i64,
    pub rotation: VideoRotation,
}

impl FrameMetadata {
    /// Capture the metadata for `frame` submitted at `now_ms`.
    pub fn capture(frame: &EncodedFrame, now_ms: i64) -> Self {
        Self {
            decode_start_ms: now_ms,
            render_time_ms: frame.render_time_ms,
            rotation: frame.rotation,
        }
    }
}

/// A frame produced by the decoder.
///
/// Decoders fill in the timestamp, origin time, and pixel data. Render time and
/// rotation are restored from the submission metadata before the frame reaches
/// the application.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    pub timestamp: TimestampKey,
    /// Sender wall-clock capture time in NTP milliseconds, or 0 if not yet known.
    pub ntp_time_ms: i64,
    pub render_time_ms: i64,
    pub rotation: VideoRotation,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl DecodedFrame {
    /// Create a decoded frame with no pixel payload.
    pub fn new(timestamp: TimestampKey) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Start the output frame for `image`, carrying over its timestamp,
    /// origin time, and dimensions.
    pub fn from_image(image: &EncodedImage) -> Self {
        Self {
            timestamp: image.timestamp,
            ntp_time_ms: image.ntp_time_ms,
            width: image.width,
            height: image.height,
            ..Self::default()
        }
    }

    /// Attach pixel data and dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is smaller than an I420 image of the given size.
    pub fn with_i420(mut self, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = i420_buffer_size(width, height);
        if data.len() < expected {
            return Err(Error::InvalidConfiguration(format!(
                "I420 buffer for {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        self.width = width;
        self.height = height;
        self.data = data;
        Ok(self)
    }

    #[must_use]
    pub fn with_ntp_time_ms(mut self, ntp_time_ms: i64) -> Self {
        self.ntp_time_ms = ntp_time_ms;
        self
    }

    /// Restore the submission-time fields. Pixel data and dimensions are untouched.
    pub(crate) fn merge(&mut self, metadata: &FrameMetadata) {
        self.render_time_ms = metadata.render_time_ms;
        self.rotation = metadata.rotation;
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("timestamp", &self.timestamp)
            .field("ntp_time_ms", &self.ntp_time_ms)
            .field("render_time_ms", &self.render_time_ms)
            .field("rotation", &self.rotation)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Size in bytes of a planar 4:2:0 image with odd dimensions rounded up for chroma.
pub(crate) fn i420_buffer_size(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    let chroma = w.div_ceil(2) * h.div_ceil(2);
    w * h + 2 * chroma
}
