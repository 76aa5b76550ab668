/// Fill level of the playback buffers.
///
/// `None` is only the pre-play state; once playback has buffered past the
/// middle threshold for the first time it never returns. Transitions may
/// jump non-adjacent states (e.g. `High` straight to `Low` on a stall).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BufferState {
    #[default]
    None,
    Low,
    Ok,
    High,
}

impl BufferState {
    /// Playback has started at least once.
    pub fn is_started(&self) -> bool {
        !matches!(self, Self::None)
    }
}
