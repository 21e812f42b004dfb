//! Streams a [`SynthHost`] to the default output device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::SynthHost;
use crate::{MetronomeError, Result};

/// Keeps the output stream alive. Dropping it silences the host.
pub struct DeviceOutput {
    host: SynthHost,
    channels: usize,
    _stream: cpal::Stream,
}

impl DeviceOutput {
    /// Opens the default output device. Any failure means the metronome has
    /// no audio and is reported as [`MetronomeError::AudioUnavailable`].
    pub fn open_default() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| unavailable("no default output device"))?;
        let default = device.default_output_config().map_err(unavailable)?;

        let supported = if default.sample_format() == cpal::SampleFormat::F32 {
            default
        } else {
            let ranges = device.supported_output_configs().map_err(unavailable)?;
            let picked = pick_f32_config(ranges, default.sample_rate()).ok_or_else(|| {
                unavailable(format!(
                    "no f32 output config (default format is {:?})",
                    default.sample_format()
                ))
            })?;
            tracing::debug!(
                default_format = ?default.sample_format(),
                sample_rate = picked.sample_rate().0,
                "default output config is not f32, using a supported f32 one"
            );
            picked
        };

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let host = SynthHost::new(sample_rate);
        let renderer = host.clone();
        let mut mono: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                &supported.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    mono.resize(frames, 0.0);
                    renderer.render_into(&mut mono);
                    for (frame, sample) in data.chunks_mut(channels).zip(&mono) {
                        frame.fill(*sample);
                    }
                },
                |err| tracing::error!(%err, "output stream error"),
                None,
            )
            .map_err(unavailable)?;
        stream.play().map_err(unavailable)?;

        tracing::info!(sample_rate, channels, "opened output device");
        Ok(Self {
            host,
            channels,
            _stream: stream,
        })
    }

    /// Host whose clock follows the frames consumed by the device.
    pub fn host(&self) -> SynthHost {
        self.host.clone()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl std::fmt::Debug for DeviceOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOutput")
            .field("host", &self.host)
            .field("channels", &self.channels)
            .finish()
    }
}

/// Picks an f32 config, keeping `preferred_rate` when some f32 range allows
/// it and falling back to the highest rate of the first f32 range.
fn pick_f32_config(
    ranges: impl IntoIterator<Item = cpal::SupportedStreamConfigRange>,
    preferred_rate: cpal::SampleRate,
) -> Option<cpal::SupportedStreamConfig> {
    let f32_ranges: Vec<_> = ranges
        .into_iter()
        .filter(|range| range.sample_format() == cpal::SampleFormat::F32)
        .collect();

    let matching = f32_ranges.iter().find(|range| {
        range.min_sample_rate() <= preferred_rate && preferred_rate <= range.max_sample_rate()
    });
    match matching {
        Some(range) => Some(range.clone().with_sample_rate(preferred_rate)),
        None => f32_ranges.into_iter().next().map(|range| range.with_max_sample_rate()),
    }
}

fn unavailable(err: impl ToString) -> MetronomeError {
    MetronomeError::AudioUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SampleRate, SupportedBufferSize, SupportedStreamConfigRange};

    fn range(format: SampleFormat, min: u32, max: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            2,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn keeps_the_default_rate_when_an_f32_range_covers_it() {
        let ranges = vec![
            range(SampleFormat::I16, 8_000, 192_000),
            range(SampleFormat::F32, 44_100, 96_000),
        ];

        let picked = pick_f32_config(ranges, SampleRate(48_000)).unwrap();

        assert_eq!(picked.sample_format(), SampleFormat::F32);
        assert_eq!(picked.sample_rate(), SampleRate(48_000));
    }

    #[test]
    fn falls_back_to_the_highest_f32_rate() {
        let ranges = vec![
            range(SampleFormat::I16, 8_000, 192_000),
            range(SampleFormat::F32, 22_050, 32_000),
        ];

        let picked = pick_f32_config(ranges, SampleRate(48_000)).unwrap();

        assert_eq!(picked.sample_format(), SampleFormat::F32);
        assert_eq!(picked.sample_rate(), SampleRate(32_000));
    }

    #[test]
    fn no_f32_range_means_no_config() {
        let ranges = vec![range(SampleFormat::I16, 8_000, 192_000)];
        assert!(pick_f32_config(ranges, SampleRate(48_000)).is_none());
    }
}
