//! Decoder capability and the adapter that drives it.
//!
//! [`DecoderAdapter`] sits between the frame buffer and a concrete
//! [`VideoDecoder`]. For every submission it records the metadata the decoder
//! will not carry through, registers it with the [`CompletionCorrelator`]
//! under the frame's timestamp, and only then calls the decoder, since
//! decoders are allowed to deliver the output from inside `decode`.

use std::{fmt, sync::Arc};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    completion::{CompletionCorrelator, DecodeCompleteCallback},
    frame_info::FrameInfoStore,
    frames::{
        CodecSpecificInfo, EncodedFrame, EncodedImage, FragmentationHeader, FrameMetadata,
        VideoCodecType,
    },
    Error, Result,
};

/// Status codes returned by decoder operations.
///
/// Negative values are failures. `NoOutput` and `RequestSli` are informational:
/// the call succeeded but no decoded frame will be delivered for it.
///
/// Decoders injected from outside Rust usually speak raw integers; convert
/// with [`CodecStatus::from_raw`].
///
/// ```
/// use decode_correlator::CodecStatus;
///
/// assert_eq!(CodecStatus::from_raw(1).unwrap(), CodecStatus::NoOutput);
/// assert!(CodecStatus::from_raw(-3).unwrap().is_failure());
/// assert!(CodecStatus::from_raw(-99).is_err());
/// ```
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CodecStatus {
    RequestSli = 2,
    NoOutput = 1,
    Ok = 0,
    GenericError = -1,
    LevelExceeded = -2,
    Memory = -3,
    ErrParameter = -4,
    ErrSize = -5,
    Timeout = -6,
    Uninitialized = -7,
    ErrRequestSli = -12,
    FallbackSoftware = -13,
}

impl CodecStatus {
    /// Converts a raw status code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStatus`] for codes outside the known set.
    pub fn from_raw(code: i32) -> Result<Self> {
        Self::try_from(code).map_err(|_| Error::UnknownStatus(code))
    }

    pub fn is_failure(self) -> bool {
        i32::from(self) < 0
    }

    /// Whether the decode succeeded without producing a frame to deliver.
    pub fn is_no_output(self) -> bool {
        matches!(self, CodecStatus::NoOutput | CodecStatus::RequestSli)
    }
}

/// Where a decoder implementation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    Software,
    Hardware,
    /// Registered by the application rather than built in.
    External,
}

/// Settings passed to [`VideoDecoder::init_decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: VideoCodecType,
    pub width: u32,
    pub height: u32,
    pub max_framerate: u32,
}

impl DecoderConfig {
    /// Create a builder for configuring decoder settings
    pub fn builder(codec: VideoCodecType) -> DecoderConfigBuilder {
        DecoderConfigBuilder::new(codec)
    }
}

/// Builder for [`DecoderConfig`]
///
/// # Examples
///
/// ```
/// use decode_correlator::{DecoderConfig, VideoCodecType};
///
/// let config = DecoderConfig::builder(VideoCodecType::VP8)
///     .resolution(1280, 720)
///     .max_framerate(60)
///     .build()?;
/// assert_eq!(config.width, 1280);
/// # Ok::<(), decode_correlator::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DecoderConfigBuilder {
    codec: VideoCodecType,
    resolution: Option<(u32, u32)>,
    max_framerate: Option<u32>,
}

impl DecoderConfigBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Default settings:
    /// - `resolution`: 640x480
    /// - `max_framerate`: 30
    pub fn new(codec: VideoCodecType) -> Self {
        Self {
            codec,
            resolution: None,
            max_framerate: None,
        }
    }

    #[must_use]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some((width, height));
        self
    }

    #[must_use]
    pub fn max_framerate(mut self, fps: u32) -> Self {
        self.max_framerate = Some(fps);
        self
    }

    /// Build the DecoderConfig
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for a zero dimension or frame rate.
    pub fn build(self) -> Result<DecoderConfig> {
        let (width, height) = self.resolution.unwrap_or((640, 480));
        let max_framerate = self.max_framerate.unwrap_or(30);
        if width == 0 || height == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "resolution must be non-zero, got {width}x{height}"
            )));
        }
        if max_framerate == 0 {
            return Err(Error::InvalidConfiguration(
                "max framerate must be non-zero".into(),
            ));
        }
        Ok(DecoderConfig {
            codec: self.codec,
            width,
            height,
            max_framerate,
        })
    }
}

/// A concrete video decoder: software, hardware-accelerated, or externally injected.
///
/// Decoded output is reported through the callback given to
/// [`register_decode_complete_callback`](VideoDecoder::register_decode_complete_callback),
/// from any thread, zero or more times per `decode` call, possibly before
/// `decode` returns.
pub trait VideoDecoder: Send {
    fn init_decode(&mut self, config: &DecoderConfig, number_of_cores: u32) -> CodecStatus;

    fn decode(
        &mut self,
        image: &EncodedImage,
        missing_frames: bool,
        fragmentation: Option<&FragmentationHeader>,
        codec_specific: Option<&CodecSpecificInfo>,
        render_time_ms: i64,
    ) -> CodecStatus;

    fn register_decode_complete_callback(
        &mut self,
        callback: Arc<dyn DecodeCompleteCallback>,
    ) -> CodecStatus;

    fn release(&mut self) -> CodecStatus;

    fn reset(&mut self) -> CodecStatus;
}

/// Drives a [`VideoDecoder`] and keeps submissions correlated with their output.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use decode_correlator::*;
///
/// // A decoder that accepts every frame and holds on to the completion sink.
/// #[derive(Default)]
/// struct Passthrough(Option<Arc<dyn DecodeCompleteCallback>>);
///
/// impl VideoDecoder for Passthrough {
///     fn init_decode(&mut self, _: &DecoderConfig, _: u32) -> CodecStatus { CodecStatus::Ok }
///     fn decode(&mut self, _: &EncodedImage, _: bool, _: Option<&FragmentationHeader>,
///               _: Option<&CodecSpecificInfo>, _: i64) -> CodecStatus {
///         CodecStatus::Ok
///     }
///     fn register_decode_complete_callback(
///         &mut self,
///         cb: Arc<dyn DecodeCompleteCallback>,
///     ) -> CodecStatus {
///         self.0 = Some(cb);
///         CodecStatus::Ok
///     }
///     fn release(&mut self) -> CodecStatus { CodecStatus::Ok }
///     fn reset(&mut self) -> CodecStatus { CodecStatus::Ok }
/// }
///
/// struct NoTiming;
/// impl TimingEstimator for NoTiming {
///     fn stop_decode_timer(&self, _: u32, _: i64, _: i64, _: i64) {}
/// }
///
/// # fn main() -> decode_correlator::Result<()> {
/// let clock = Arc::new(SimulatedClock::new(0));
/// let correlator = Arc::new(CompletionCorrelator::new(Arc::new(NoTiming), clock));
///
/// let mut adapter = DecoderAdapter::new(Box::new(Passthrough::default()), DecoderKind::Software);
/// adapter.init_decode(&DecoderConfig::builder(VideoCodecType::VP8).build()?, 1)?;
/// adapter.register_decode_complete_callback(correlator.clone())?;
///
/// let status = adapter.decode(&EncodedFrame::builder(3000).render_time_ms(40).build(), 10)?;
/// assert_eq!(status, CodecStatus::Ok);
/// assert_eq!(correlator.pending(), 1);
/// # Ok(())
/// # }
/// ```
pub struct DecoderAdapter {
    decoder: Box<dyn VideoDecoder>,
    kind: DecoderKind,
    frame_infos: FrameInfoStore,
    correlator: Option<Arc<CompletionCorrelator>>,
    codec: VideoCodecType,
}

impl DecoderAdapter {
    /// Wraps `decoder` with the default number of metadata slots.
    pub fn new(decoder: Box<dyn VideoDecoder>, kind: DecoderKind) -> Self {
        Self {
            decoder,
            kind,
            frame_infos: FrameInfoStore::default(),
            correlator: None,
            codec: VideoCodecType::Unknown,
        }
    }

    /// Wraps `decoder`, allowing up to `capacity` outstanding decodes before
    /// the oldest submission's metadata is overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `capacity` is zero.
    pub fn with_capacity(
        decoder: Box<dyn VideoDecoder>,
        kind: DecoderKind,
        capacity: usize,
    ) -> Result<Self> {
        Ok(Self {
            decoder,
            kind,
            frame_infos: FrameInfoStore::new(capacity)?,
            correlator: None,
            codec: VideoCodecType::Unknown,
        })
    }

    /// Initializes the wrapped decoder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecoderInit`] if the decoder reports anything but `Ok`.
    pub fn init_decode(&mut self, config: &DecoderConfig, number_of_cores: u32) -> Result<()> {
        self.codec = config.codec;
        match self.decoder.init_decode(config, number_of_cores) {
            CodecStatus::Ok => {
                log::debug!(
                    "Initialized {:?} {:?} decoder at {}x{} on {number_of_cores} core(s)",
                    self.kind,
                    config.codec,
                    config.width,
                    config.height
                );
                Ok(())
            }
            status => Err(Error::DecoderInit {
                codec: config.codec,
                status,
            }),
        }
    }

    /// Submits `frame` for decoding. `now_ms` is recorded as the decode start.
    ///
    /// Returns the decoder's status on success, including the informational
    /// `NoOutput` and `RequestSli`. For those, and for failures, the frame's
    /// correlation entry is released before returning because no output will
    /// follow.
    ///
    /// # Errors
    ///
    /// - [`Error::CallbackNotRegistered`] if no correlator is registered; the
    ///   decoder is not called.
    /// - [`Error::Decode`] if the decoder reports a failure.
    pub fn decode(&mut self, frame: &EncodedFrame, now_ms: i64) -> Result<CodecStatus> {
        let correlator = self
            .correlator
            .as_ref()
            .ok_or(Error::CallbackNotRegistered)?;

        let slot = self
            .frame_infos
            .reserve(FrameMetadata::capture(frame, now_ms));
        correlator.map(frame.timestamp(), slot);

        let status = self.decoder.decode(
            &frame.image,
            frame.missing_frame,
            frame.fragmentation.as_ref(),
            frame.codec_specific.as_ref(),
            frame.render_time_ms,
        );

        if status.is_failure() {
            log::warn!(
                "Failed to decode frame with timestamp {}, error code: {}",
                frame.timestamp(),
                i32::from(status)
            );
            release_entry(correlator, frame.timestamp());
            return Err(Error::Decode {
                timestamp: frame.timestamp(),
                status,
            });
        }

        if status.is_no_output() {
            release_entry(correlator, frame.timestamp());
        }
        Ok(status)
    }

    /// Releases the wrapped decoder's resources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the decoder reports a failure.
    pub fn release(&mut self) -> Result<()> {
        check("release", self.decoder.release())
    }

    /// Resets the wrapped decoder.
    ///
    /// Completions already in flight are still correlated if their entries
    /// survive; otherwise they are dropped as not-found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the decoder reports a failure.
    pub fn reset(&mut self) -> Result<()> {
        check("reset", self.decoder.reset())
    }

    /// Makes `correlator` the decoder's completion sink.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the decoder refuses the callback. Any
    /// previously registered correlator stays in place.
    pub fn register_decode_complete_callback(
        &mut self,
        correlator: Arc<CompletionCorrelator>,
    ) -> Result<()> {
        check(
            "callback registration",
            self.decoder
                .register_decode_complete_callback(Arc::clone(&correlator) as Arc<dyn DecodeCompleteCallback>),
        )?;
        self.correlator = Some(correlator);
        Ok(())
    }

    pub fn correlator(&self) -> Option<&Arc<CompletionCorrelator>> {
        self.correlator.as_ref()
    }

    pub fn is_external(&self) -> bool {
        self.kind == DecoderKind::External
    }

    pub fn kind(&self) -> DecoderKind {
        self.kind
    }

    /// Codec from the last `init_decode`, or `Unknown` before that.
    pub fn codec_type(&self) -> VideoCodecType {
        self.codec
    }

    pub fn frame_info_capacity(&self) -> usize {
        self.frame_infos.capacity()
    }
}

impl fmt::Debug for DecoderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderAdapter")
            .field("kind", &self.kind)
            .field("codec", &self.codec)
            .field("frame_infos", &self.frame_infos)
            .field("callback_set", &self.correlator.is_some())
            .finish()
    }
}

fn release_entry(correlator: &CompletionCorrelator, timestamp: u32) {
    if correlator.pop(timestamp).is_none() {
        // The decoder already delivered (or the entry was evicted) before returning.
        log::debug!("No correlation entry left to release for timestamp {timestamp}");
    }
}

fn check(operation: &'static str, status: CodecStatus) -> Result<()> {
    if status == CodecStatus::Ok {
        Ok(())
    } else {
        Err(Error::Codec { operation, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SimulatedClock, latency::TimingEstimator};
    use std::sync::Mutex;

    struct NoTiming;

    impl TimingEstimator for NoTiming {
        fn stop_decode_timer(&self, _: u32, _: i64, _: i64, _: i64) {}
    }

    #[derive(Default)]
    struct Script {
        init: Option<CodecStatus>,
        register: Option<CodecStatus>,
        decode: Vec<CodecStatus>,
        calls: Vec<(usize, bool, Option<usize>, i64)>,
    }

    struct ScriptedDecoder(Arc<Mutex<Script>>);

    impl VideoDecoder for ScriptedDecoder {
        fn init_decode(&mut self, _: &DecoderConfig, _: u32) -> CodecStatus {
            self.0.lock().unwrap().init.unwrap_or(CodecStatus::Ok)
        }

        fn decode(
            &mut self,
            image: &EncodedImage,
            missing_frames: bool,
            fragmentation: Option<&FragmentationHeader>,
            _: Option<&CodecSpecificInfo>,
            render_time_ms: i64,
        ) -> CodecStatus {
            let mut script = self.0.lock().unwrap();
            script.calls.push((
                image.data.len(),
                missing_frames,
                fragmentation.map(FragmentationHeader::len),
                render_time_ms,
            ));
            if script.decode.is_empty() {
                CodecStatus::Ok
            } else {
                script.decode.remove(0)
            }
        }

        fn register_decode_complete_callback(
            &mut self,
            _: Arc<dyn DecodeCompleteCallback>,
        ) -> CodecStatus {
            self.0.lock().unwrap().register.unwrap_or(CodecStatus::Ok)
        }

        fn release(&mut self) -> CodecStatus {
            CodecStatus::Uninitialized
        }

        fn reset(&mut self) -> CodecStatus {
            CodecStatus::Ok
        }
    }

    fn adapter(script: Script) -> (Arc<Mutex<Script>>, Arc<CompletionCorrelator>, DecoderAdapter) {
        let script = Arc::new(Mutex::new(script));
        let correlator = Arc::new(CompletionCorrelator::new(
            Arc::new(NoTiming),
            Arc::new(SimulatedClock::new(0)),
        ));
        let mut adapter = DecoderAdapter::with_capacity(
            Box::new(ScriptedDecoder(script.clone())),
            DecoderKind::Hardware,
            4,
        )
        .unwrap();
        adapter
            .register_decode_complete_callback(correlator.clone())
            .unwrap();
        (script, correlator, adapter)
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(CodecStatus::from_raw(0).unwrap(), CodecStatus::Ok);
        assert_eq!(CodecStatus::from_raw(2).unwrap(), CodecStatus::RequestSli);
        assert_eq!(CodecStatus::from_raw(-13).unwrap(), CodecStatus::FallbackSoftware);
        assert!(matches!(CodecStatus::from_raw(3), Err(Error::UnknownStatus(3))));
        assert!(CodecStatus::Timeout.is_failure());
        assert!(!CodecStatus::NoOutput.is_failure());
        assert!(CodecStatus::RequestSli.is_no_output());
        assert!(!CodecStatus::Ok.is_no_output());
    }

    #[test]
    fn test_decode_without_callback() {
        let script = Arc::new(Mutex::new(Script::default()));
        let mut adapter =
            DecoderAdapter::new(Box::new(ScriptedDecoder(script.clone())), DecoderKind::Software);
        let result = adapter.decode(&EncodedFrame::builder(1).build(), 0);
        assert!(matches!(result, Err(Error::CallbackNotRegistered)));
        assert!(script.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn test_decode_passes_frame_fields() {
        let (script, correlator, mut adapter) = adapter(Script::default());
        let frame = EncodedFrame::builder(900)
            .render_time_ms(77)
            .missing_frame(true)
            .data(vec![0; 12])
            .fragmentation(FragmentationHeader {
                fragments: vec![(0, 6), (6, 6)],
            })
            .build();

        assert_eq!(adapter.decode(&frame, 5).unwrap(), CodecStatus::Ok);
        assert_eq!(script.lock().unwrap().calls, vec![(12, true, Some(2), 77)]);
        assert_eq!(correlator.pending(), 1);
    }

    #[test]
    fn test_failure_releases_entry() {
        let (_script, correlator, mut adapter) = adapter(Script {
            decode: vec![CodecStatus::ErrSize],
            ..Script::default()
        });
        let result = adapter.decode(&EncodedFrame::builder(500).build(), 0);
        assert!(matches!(
            result,
            Err(Error::Decode {
                timestamp: 500,
                status: CodecStatus::ErrSize
            })
        ));
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn test_no_output_releases_entry() {
        let (_script, correlator, mut adapter) = adapter(Script {
            decode: vec![CodecStatus::NoOutput, CodecStatus::RequestSli],
            ..Script::default()
        });
        assert_eq!(
            adapter.decode(&EncodedFrame::builder(1).build(), 0).unwrap(),
            CodecStatus::NoOutput
        );
        assert_eq!(
            adapter.decode(&EncodedFrame::builder(2).build(), 0).unwrap(),
            CodecStatus::RequestSli
        );
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn test_init_failure() {
        let (_script, _correlator, mut adapter) = adapter(Script {
            init: Some(CodecStatus::Memory),
            ..Script::default()
        });
        let config = DecoderConfig::builder(VideoCodecType::H264).build().unwrap();
        assert!(matches!(
            adapter.init_decode(&config, 2),
            Err(Error::DecoderInit {
                codec: VideoCodecType::H264,
                status: CodecStatus::Memory
            })
        ));
    }

    #[test]
    fn test_lifecycle_delegation() {
        let (_script, _correlator, mut adapter) = adapter(Script::default());
        let config = DecoderConfig::builder(VideoCodecType::VP9).build().unwrap();
        adapter.init_decode(&config, 4).unwrap();
        assert_eq!(adapter.codec_type(), VideoCodecType::VP9);
        assert!(adapter.reset().is_ok());
        assert!(matches!(
            adapter.release(),
            Err(Error::Codec {
                operation: "release",
                status: CodecStatus::Uninitialized
            })
        ));
        assert_eq!(adapter.kind(), DecoderKind::Hardware);
        assert!(!adapter.is_external());
        assert_eq!(adapter.frame_info_capacity(), 4);
    }

    #[test]
    fn test_config_builder_validation() {
        let config = DecoderConfig::builder(VideoCodecType::Generic).build().unwrap();
        assert_eq!((config.width, config.height, config.max_framerate), (640, 480, 30));
        assert!(DecoderConfig::builder(VideoCodecType::VP8)
            .resolution(0, 720)
            .build()
            .is_err());
        assert!(DecoderConfig::builder(VideoCodecType::VP8)
            .max_framerate(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_refused_callback_not_kept() {
        let script = Arc::new(Mutex::new(Script {
            register: Some(CodecStatus::ErrParameter),
            ..Script::default()
        }));
        let correlator = Arc::new(CompletionCorrelator::new(
            Arc::new(NoTiming),
            Arc::new(SimulatedClock::new(0)),
        ));
        let mut adapter =
            DecoderAdapter::new(Box::new(ScriptedDecoder(script.clone())), DecoderKind::Software);

        assert!(matches!(
            adapter.register_decode_complete_callback(correlator.clone()),
            Err(Error::Codec {
                operation: "callback registration",
                status: CodecStatus::ErrParameter
            })
        ));
        assert!(adapter.correlator().is_none());
        assert!(matches!(
            adapter.decode(&EncodedFrame::builder(1).build(), 0),
            Err(Error::CallbackNotRegistered)
        ));
        assert_eq!(correlator.pending(), 0);
        assert!(script.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let script = Arc::new(Mutex::new(Script::default()));
        assert!(matches!(
            DecoderAdapter::with_capacity(
                Box::new(ScriptedDecoder(script)),
                DecoderKind::External,
                0,
            ),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
