//! Opus codec for Symphonia
//!
//! Symphonia demuxes Opus out of Ogg and Matroska/WebM but has no Opus codec
//! of its own. Browser recorders produce exactly that, so this decoder plugs
//! libopus into the codec registry used by [`SymphoniaDecoder`].
//!
//! [`SymphoniaDecoder`]: super::SymphoniaDecoder

use std::sync::Mutex;

use symphonia::core::audio::{
    AsAudioBufferRef, AudioBuffer, AudioBufferRef, Channels, Signal, SignalSpec,
};
use symphonia::core::codecs::{
    CodecDescriptor, CodecParameters, Decoder, DecoderOptions, FinalizeResult, CODEC_TYPE_OPUS,
};
use symphonia::core::errors::{unsupported_error, Error, Result};
use symphonia::core::formats::Packet;

/// libopus output rate, whatever the input rate was
const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Longest Opus packet: 120 ms at 48 kHz
const MAX_FRAMES_PER_PACKET: usize = 5_760;

pub struct OpusDecoder {
    params: CodecParameters,
    /// libopus state is `Send` but not `Sync`
    opus: Mutex<opus::Decoder>,
    channel_count: usize,
    interleaved: Vec<f32>,
    buf: AudioBuffer<f32>,
}

impl OpusDecoder {
    fn decode_inner(&mut self, packet: &Packet) -> Result<()> {
        let opus = self
            .opus
            .get_mut()
            .map_err(|_| Error::DecodeError("opus: decoder state poisoned"))?;

        let frames = opus
            .decode_float(packet.buf(), &mut self.interleaved, false)
            .map_err(|e| {
                log::warn!("Opus packet rejected: {}", e);
                Error::DecodeError("opus: invalid packet")
            })?;

        let channel_count = self.channel_count;
        self.buf.clear();
        self.buf.render_reserved(Some(frames));
        for ch in 0..channel_count {
            let plane = self.buf.chan_mut(ch);
            for (frame, sample) in plane.iter_mut().enumerate() {
                *sample = self.interleaved[frame * channel_count + ch];
            }
        }
        Ok(())
    }
}

impl Decoder for OpusDecoder {
    fn try_new(params: &CodecParameters, _options: &DecoderOptions) -> Result<Self> {
        let channel_count = params.channels.map(|c| c.count()).unwrap_or(1);
        let (opus_channels, layout) = match channel_count {
            1 => (opus::Channels::Mono, Channels::FRONT_LEFT),
            2 => (
                opus::Channels::Stereo,
                Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
            ),
            _ => return unsupported_error("opus: only mono and stereo streams are supported"),
        };

        let opus = opus::Decoder::new(OPUS_SAMPLE_RATE, opus_channels).map_err(|e| {
            log::error!("Failed to create Opus decoder: {}", e);
            Error::Unsupported("opus: libopus decoder unavailable")
        })?;

        let mut params = params.clone();
        params
            .with_sample_rate(OPUS_SAMPLE_RATE)
            .with_channels(layout);

        log::debug!("Opus decoder ready: {} channel(s)", channel_count);

        Ok(Self {
            params,
            opus: Mutex::new(opus),
            channel_count,
            interleaved: vec![0.0; MAX_FRAMES_PER_PACKET * channel_count],
            buf: AudioBuffer::new(
                MAX_FRAMES_PER_PACKET as u64,
                SignalSpec::new(OPUS_SAMPLE_RATE, layout),
            ),
        })
    }

    fn supported_codecs() -> &'static [CodecDescriptor] {
        &[CodecDescriptor {
            codec: CODEC_TYPE_OPUS,
            short_name: "opus",
            long_name: "Opus (libopus)",
            inst_func: |params, options| Ok(Box::new(OpusDecoder::try_new(params, options)?)),
        }]
    }

    fn reset(&mut self) {
        if let Ok(opus) = self.opus.get_mut() {
            if let Err(e) = opus.reset_state() {
                log::warn!("Failed to reset Opus decoder: {}", e);
            }
        }
    }

    fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    fn decode(&mut self, packet: &Packet) -> Result<AudioBufferRef<'_>> {
        if let Err(e) = self.decode_inner(packet) {
            self.buf.clear();
            return Err(e);
        }
        Ok(self.buf.as_audio_buffer_ref())
    }

    fn finalize(&mut self) -> FinalizeResult {
        FinalizeResult::default()
    }

    fn last_decoded(&self) -> AudioBufferRef<'_> {
        self.buf.as_audio_buffer_ref()
    }
}
