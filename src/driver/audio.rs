// Audio driver - ticks the transport from the cpal output callback
//
// The sequencer produces no samples itself: the callback writes silence
// and uses the stream only as a steady clock. Stream errors are reported
// as xruns or as a lost device through the telemetry and status.

use super::DriverTelemetry;
use crate::backend::{AtomicDeviceStatus, DeviceStatus};
use crate::error::BackendError;
use crate::transport::Transport;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct AudioDriver {
    _device: Device,
    _stream: Stream,
    sample_rate: u32,
    status: AtomicDeviceStatus,
}

impl AudioDriver {
    /// Open the default output device and hand `transport` to its callback
    pub fn start(transport: Transport) -> Result<Self, BackendError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BackendError::Unavailable("no audio output device".to_string()))?;
        log::info!(
            "Audio driver device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let supported = device
            .default_output_config()
            .map_err(|e| BackendError::Unavailable(format!("audio configuration: {}", e)))?;
        let sample_format = supported.sample_format();
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: StreamConfig = supported.into();
        log::debug!("Audio driver config: {:?} ({:?})", config, sample_format);

        let telemetry = transport.telemetry();
        let status = AtomicDeviceStatus::new(DeviceStatus::Connecting);

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(
                &device,
                &config,
                channels,
                transport,
                telemetry,
                status.clone(),
            ),
            SampleFormat::I16 => Self::build_stream::<i16>(
                &device,
                &config,
                channels,
                transport,
                telemetry,
                status.clone(),
            ),
            SampleFormat::U16 => Self::build_stream::<u16>(
                &device,
                &config,
                channels,
                transport,
                telemetry,
                status.clone(),
            ),
            other => {
                return Err(BackendError::Unavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )));
            }
        }?;

        stream
            .play()
            .map_err(|e| BackendError::Unavailable(format!("audio stream: {}", e)))?;
        status.set(DeviceStatus::Connected);
        log::info!("Audio driver running at {} Hz, {} channels", sample_rate, channels);

        Ok(Self {
            _device: device,
            _stream: stream,
            sample_rate,
            status,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.get()
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        channels: usize,
        mut transport: Transport,
        telemetry: Arc<DriverTelemetry>,
        status: AtomicDeviceStatus,
    ) -> Result<Stream, BackendError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let sample_rate = config.sample_rate.0.max(1) as f64;
        let error_telemetry = Arc::clone(&telemetry);
        let mut frames_per_buffer = 0usize;
        let mut period = Duration::ZERO;
        let mut expected: Option<Instant> = None;

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    // No I/O and no blocking locks. The transport allocates only on
                    // state changes and edits, never per buffer.
                    let now = Instant::now();
                    let frames = data.len() / channels.max(1);
                    if frames != frames_per_buffer && frames > 0 {
                        frames_per_buffer = frames;
                        period = Duration::from_secs_f64(frames as f64 / sample_rate);
                        transport.set_tick_period(period);
                    }
                    if let Some(expected) = expected {
                        telemetry.record_tick(now.saturating_duration_since(expected));
                    }
                    expected = now.checked_add(period);

                    transport.on_tick(now);

                    for sample in data.iter_mut() {
                        *sample = Sample::from_sample::<f32>(0.0);
                    }
                },
                move |err| {
                    // Runs outside the audio callback
                    log::error!("Audio stream error: {}", err);
                    match err {
                        cpal::StreamError::DeviceNotAvailable => status.set(DeviceStatus::Error),
                        cpal::StreamError::BackendSpecific { .. } => error_telemetry.add_xrun(),
                    }
                },
                None,
            )
            .map_err(|e| BackendError::Unavailable(format!("audio stream creation: {}", e)))
    }
}
