use std::sync::atomic::{AtomicU32, Ordering};

use crate::Resolution;

/// Host-capability handle injected at player construction.
///
/// The maximum display resolution is refreshed by the embedder on the host's
/// resize notification; everything else is fixed for the session. There is no
/// runtime platform detection in the core.
#[derive(Debug)]
pub struct Environment {
    max_width: AtomicU32,
    max_height: AtomicU32,
    /// The sink changes playback rate without audible glitches; when false
    /// the dynamic-rate adjustment is suppressed.
    pub smooth_rate_change: bool,
    /// The sink is a managed media source (constrains buffer strategy).
    pub managed_media_source: bool,
}

impl Environment {
    pub fn new(max_resolution: Resolution, smooth_rate_change: bool, managed_media_source: bool) -> Self {
        Self {
            max_width: AtomicU32::new(max_resolution.width),
            max_height: AtomicU32::new(max_resolution.height),
            smooth_rate_change,
            managed_media_source,
        }
    }

    pub fn max_resolution(&self) -> Resolution {
        Resolution::new(
            self.max_width.load(Ordering::Acquire),
            self.max_height.load(Ordering::Acquire),
        )
    }

    /// Host resize notification.
    pub fn set_max_resolution(&self, resolution: Resolution) {
        self.max_width.store(resolution.width, Ordering::Release);
        self.max_height.store(resolution.height, Ordering::Release);
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(Resolution::new(u32::MAX, u32::MAX), true, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_is_visible() {
        let env = Environment::default();
        env.set_max_resolution(Resolution::new(1920, 1080));
        assert_eq!(env.max_resolution(), Resolution::new(1920, 1080));
    }
}
