// Engine - assembles the transport and runs it on its dispatch driver
//
// The engine owns the single dispatch thread (timer driver) or the audio
// stream whose callback ticks the transport (audio driver). Everything else
// talks to the transport through the returned `TransportHandle`.

use crate::backend::Backend;
use crate::composition::SharedComposition;
use crate::config::EngineConfig;
use crate::driver::TimerDriver;
use crate::error::{EngineError, EngineResult};
use crate::transport::{SharedTransportState, Transport, TransportHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

#[cfg(feature = "audio")]
use crate::driver::AudioDriver;

/// What calls `Transport::on_tick`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Timer,
    #[cfg(feature = "audio")]
    Audio,
}

pub struct Engine {
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    #[cfg(feature = "audio")]
    audio: Option<AudioDriver>,
    shared: Arc<SharedTransportState>,
}

impl Engine {
    /// Open the backend, build the transport and start ticking
    pub fn start(
        config: EngineConfig,
        composition: SharedComposition,
        mut backend: Box<dyn Backend>,
        driver: DriverKind,
    ) -> EngineResult<(Self, TransportHandle)> {
        backend.start()?;
        log::info!("Backend '{}' started", backend.name());
        let interval = config.timing.tick_interval();
        let (transport, handle) = Transport::new(config, composition, backend, Instant::now())?;
        let shared = transport.shared_state();

        match driver {
            DriverKind::Timer => {
                let timer = TimerDriver::new(interval, transport.telemetry());
                let running = timer.running_flag();
                let thread = Self::spawn_dispatch_thread(timer, transport)?;
                Ok((
                    Self {
                        running,
                        thread: Some(thread),
                        #[cfg(feature = "audio")]
                        audio: None,
                        shared,
                    },
                    handle,
                ))
            }
            #[cfg(feature = "audio")]
            DriverKind::Audio => {
                let audio = AudioDriver::start(transport)?;
                Ok((
                    Self {
                        running: Arc::new(AtomicBool::new(true)),
                        thread: None,
                        audio: Some(audio),
                        shared,
                    },
                    handle,
                ))
            }
        }
    }

    fn spawn_dispatch_thread(
        timer: TimerDriver,
        mut transport: Transport,
    ) -> EngineResult<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("seqsync-dispatch".to_string())
            .spawn(move || {
                timer.run(|now| {
                    transport.on_tick(now);
                });
                // Leave nothing sounding behind
                if let Err(e) = transport.stop(Instant::now()) {
                    log::error!("Final stop failed: {}", e);
                }
            })
            .map_err(|e| EngineError::Thread(e.to_string()))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shared_state(&self) -> Arc<SharedTransportState> {
        Arc::clone(&self.shared)
    }

    /// Stop ticking and wait for the dispatch thread
    pub fn shutdown(&mut self) -> EngineResult<()> {
        self.running.store(false, Ordering::Release);
        #[cfg(feature = "audio")]
        {
            self.audio = None;
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| EngineError::Thread("dispatch thread panicked".to_string()))?;
            log::info!("Dispatch thread joined");
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{}", e);
        }
    }
}
