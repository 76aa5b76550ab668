use bytes::Bytes;

/// Clear/encrypted byte split of one encryption subsample.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubSample {
    pub clear_bytes: u16,
    pub encrypted_bytes: u32,
}

/// One demultiplexed media or data sample.
///
/// `time` and `duration` are in milliseconds. A negative `duration` means
/// "extendable up to `duration.abs()`": the source normalizes it and may
/// stretch the sample to close a live-edge hole before it reaches playback.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub time: u64,
    pub duration: i64,
    pub data: Bytes,
    pub composition_offset: Option<i32>,
    pub is_key_frame: bool,
    pub sub_samples: Vec<SubSample>,
}

impl Sample {
    pub fn new(time: u64, duration: i64, data: Bytes) -> Self {
        Self {
            time,
            duration,
            data,
            composition_offset: None,
            is_key_frame: false,
            sub_samples: Vec::new(),
        }
    }

    /// End of the sample on the media timeline, treating an extendable
    /// (negative) duration as its absolute value.
    pub fn end_time(&self) -> u64 {
        self.time.saturating_add(self.duration.unsigned_abs())
    }
}
