//! Clip decoding
//!
//! Encoded clip bytes are turned into a [`SampleBuffer`] by a pluggable
//! [`AudioDecoder`]. WAV goes through hound, everything else through
//! Symphonia. [`ClipLoader`] combines fetching and decoding into one
//! asynchronous, cancellable operation whose progress is observable as a
//! [`DecodeStatus`].

use std::io::Cursor;
use std::sync::{Arc, OnceLock};

use symphonia::core::audio::SampleBuffer as PacketBuffer;
use symphonia::core::codecs::{CodecParameters, CodecRegistry, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::SampleBuffer;
use crate::api::{ApiError, ClipFetcher};
use crate::clip::ClipSource;

/// Why a byte stream could not be decoded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("audio stream is truncated: {0}")]
    Truncated(String),
    #[error("unsupported audio format: {0}")]
    Unsupported(String),
}

/// Host audio decoding capability.
pub trait AudioDecoder: Send + Sync + 'static {
    fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer, DecodeError>;
}

/// PCM WAV decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
        let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(map_hound_error)?;
        let spec = reader.spec();

        log::debug!(
            "WAV spec channels={}, sample_rate={}Hz, bits_per_sample={}, format={:?}",
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample,
            spec.sample_format
        );

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(map_hound_error)?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(DecodeError::Unsupported(format!(
                        "{} bits per sample",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(map_hound_error)?
            }
        };

        Ok(SampleBuffer::from_interleaved(
            &interleaved,
            spec.channels as usize,
            spec.sample_rate,
        ))
    }
}

fn map_hound_error(e: hound::Error) -> DecodeError {
    match e {
        hound::Error::IoError(io) => DecodeError::Truncated(io.to_string()),
        hound::Error::Unsupported => DecodeError::Unsupported("WAV variant".to_string()),
        other => DecodeError::Unsupported(other.to_string()),
    }
}

/// Symphonia's bundled codecs, plus Opus when the `opus` feature is on.
fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        symphonia::default::register_enabled_codecs(&mut registry);
        #[cfg(feature = "opus")]
        registry.register_all::<super::opus_codec::OpusDecoder>();
        registry
    })
}

/// Container/codec-agnostic decoder (Ogg, FLAC, MP3, MKV/WebM, ...).
///
/// A stream that declares its length must deliver all of it; one that ends
/// early is [`DecodeError::Truncated`]. Streams without a declared length
/// (live WebM recordings, for one) are taken as complete at end of data.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("no audio track found".to_string()))?;

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channel_count = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(1);

        let mut decoder = codec_registry()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut packet_buf: Option<PacketBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                // End of data. Whether it came too early is checked below.
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Truncated(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::Truncated(e.to_string())),
            };

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if packet_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                sample_rate = spec.rate;
                channel_count = spec.channels.count();
                packet_buf = Some(PacketBuffer::new(decoded.capacity() as u64, spec));
            }

            if let Some(ref mut buf) = packet_buf {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        if sample_rate == 0 {
            return Err(DecodeError::Unsupported("unknown sample rate".to_string()));
        }

        // Containers such as Ogg only learn the length once the last page is read.
        let decoded_frames = samples.len() / channel_count.max(1);
        if let Some(expected) = format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .and_then(|t| declared_frames(&t.codec_params))
        {
            if (decoded_frames as u64) < expected {
                return Err(DecodeError::Truncated(format!(
                    "decoded {} of {} frames",
                    decoded_frames, expected
                )));
            }
        }

        Ok(SampleBuffer::from_interleaved(
            &samples,
            channel_count,
            sample_rate,
        ))
    }
}

/// Frames a complete stream is guaranteed to decode to, if the container says.
fn declared_frames(params: &CodecParameters) -> Option<u64> {
    let n_frames = params.n_frames?;
    // Encoder delay and padding may or may not be trimmed by the codec.
    let slack = u64::from(params.delay.unwrap_or(0)) + u64::from(params.padding.unwrap_or(0));
    Some(n_frames.saturating_sub(slack))
}

/// Picks WAV for RIFF/WAVE input and Symphonia for everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDecoder;

impl AutoDecoder {
    fn is_wav(bytes: &[u8]) -> bool {
        bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
    }
}

impl AudioDecoder for AutoDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
        if Self::is_wav(bytes) {
            WavDecoder.decode(bytes)
        } else {
            SymphoniaDecoder.decode(bytes)
        }
    }
}

/// Failure of a complete load (fetch + decode).
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] ApiError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("decode task failed: {0}")]
    Join(String),
}

/// Observable progress of one decode.
#[derive(Debug, Clone)]
pub enum DecodeStatus {
    Pending,
    Ready(Arc<SampleBuffer>),
    Failed(String),
}

impl DecodeStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, DecodeStatus::Pending)
    }
}

/// Fetches clip bytes and decodes them off the async threads.
pub struct ClipLoader<F, D> {
    fetcher: Arc<F>,
    decoder: Arc<D>,
}

impl<F, D> Clone for ClipLoader<F, D> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            decoder: self.decoder.clone(),
        }
    }
}

impl<F, D> ClipLoader<F, D>
where
    F: ClipFetcher,
    D: AudioDecoder,
{
    pub fn new(fetcher: Arc<F>, decoder: Arc<D>) -> Self {
        Self { fetcher, decoder }
    }

    /// Obtain the encoded bytes and decode them.
    pub async fn load(&self, source: &ClipSource) -> Result<SampleBuffer, LoadError> {
        let bytes: Arc<[u8]> = match source {
            ClipSource::Memory(bytes) => bytes.clone(),
            ClipSource::Remote(id) => self.fetcher.fetch(*id).await?.into(),
            ClipSource::Url(url) => self.fetcher.fetch_url(url).await?.into(),
        };

        log::debug!("Decoding {} bytes", bytes.len());

        let decoder = self.decoder.clone();
        let buffer = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| LoadError::Join(e.to_string()))??;

        log::info!(
            "Decoded clip: {} channels, {} Hz, {:.2}s",
            buffer.channel_count(),
            buffer.sample_rate(),
            buffer.duration()
        );
        Ok(buffer)
    }

    /// Start a load in the background and observe it through a watch channel.
    ///
    /// Cancelling `cancel` abandons the load; the status then stays `Pending`.
    pub fn spawn_load(
        &self,
        source: ClipSource,
        cancel: CancellationToken,
    ) -> watch::Receiver<DecodeStatus> {
        let (status_tx, status_rx) = watch::channel(DecodeStatus::Pending);
        let loader = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    log::debug!("Clip load cancelled");
                }

                result = loader.load(&source) => {
                    let status = match result {
                        Ok(buffer) => DecodeStatus::Ready(Arc::new(buffer)),
                        Err(e) => {
                            log::warn!("Failed to load clip: {}", e);
                            DecodeStatus::Failed(e.to_string())
                        }
                    };
                    let _ = status_tx.send(status);
                }
            }
        });

        status_rx
    }
}
