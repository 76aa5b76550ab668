use bytes::Bytes;

use crate::MediaBufferError;

/// Platform media buffer for one track (the MSE source buffer or its
/// native equivalent). Receives complete CMAF segments.
pub trait SinkBuffer: Send {
    fn append(&mut self, segment: &Bytes) -> Result<(), MediaBufferError>;

    /// Earliest buffered position, seconds.
    fn buffered_start(&self) -> Option<f64>;

    /// Latest buffered position, seconds.
    fn buffered_end(&self) -> Option<f64>;

    /// Discard buffer contents before a new initialization segment.
    fn reset(&mut self);
}

/// The rendering element: playhead, rate, pause state.
pub trait RenderSink: Send {
    /// Playhead position, seconds.
    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, seconds: f64);

    fn set_playback_rate(&mut self, rate: f64);

    fn pause(&mut self);

    fn play(&mut self);

    fn paused(&self) -> bool;
}

/// Notifications from the rendering element, fed by the embedder.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    TimeUpdate,
    Progress,
    /// Rendering starved.
    Waiting,
    /// Rendering can resume.
    CanPlay,
    /// A seek finished.
    Seeked,
    /// Fatal element error with human-readable detail.
    Error(String),
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Sink buffer that records segments and reports a scripted range.
    #[derive(Clone, Default)]
    pub struct MockBuffer {
        pub segments: Arc<Mutex<Vec<Vec<u8>>>>,
        pub resets: Arc<Mutex<usize>>,
        pub fail_next: Arc<Mutex<Option<fn() -> MediaBufferError>>>,
        pub start: Arc<Mutex<Option<f64>>>,
        pub end: Arc<Mutex<Option<f64>>>,
    }

    impl MockBuffer {
        pub fn set_range(&self, start: f64, end: f64) {
            *self.start.lock().unwrap() = Some(start);
            *self.end.lock().unwrap() = Some(end);
        }
    }

    impl SinkBuffer for MockBuffer {
        fn append(&mut self, segment: &Bytes) -> Result<(), MediaBufferError> {
            if let Some(make) = self.fail_next.lock().unwrap().take() {
                return Err(make());
            }
            self.segments.lock().unwrap().push(segment.to_vec());
            Ok(())
        }

        fn buffered_start(&self) -> Option<f64> {
            *self.start.lock().unwrap()
        }

        fn buffered_end(&self) -> Option<f64> {
            *self.end.lock().unwrap()
        }

        fn reset(&mut self) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    /// Render sink that records playhead and rate changes.
    #[derive(Clone)]
    pub struct MockRender {
        pub current: Arc<Mutex<f64>>,
        pub paused: Arc<Mutex<bool>>,
        pub rate: Arc<Mutex<f64>>,
        pub seeks: Arc<Mutex<Vec<f64>>>,
    }

    impl Default for MockRender {
        fn default() -> Self {
            Self {
                current: Arc::new(Mutex::new(0.0)),
                paused: Arc::new(Mutex::new(false)),
                rate: Arc::new(Mutex::new(1.0)),
                seeks: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl RenderSink for MockRender {
        fn current_time(&self) -> f64 {
            *self.current.lock().unwrap()
        }

        fn set_current_time(&mut self, seconds: f64) {
            *self.current.lock().unwrap() = seconds;
            self.seeks.lock().unwrap().push(seconds);
        }

        fn set_playback_rate(&mut self, rate: f64) {
            *self.rate.lock().unwrap() = rate;
        }

        fn pause(&mut self) {
            *self.paused.lock().unwrap() = true;
        }

        fn play(&mut self) {
            *self.paused.lock().unwrap() = false;
        }

        fn paused(&self) -> bool {
            *self.paused.lock().unwrap()
        }
    }
}
