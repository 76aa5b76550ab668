use bytes::Bytes;

/// Position of an open box's size placeholder.
#[derive(Debug)]
#[must_use = "an open box must be closed to patch its size"]
pub(crate) struct Mark(usize);

/// Append-only ISO-BMFF box writer with size back-patching.
///
/// Sizes of container boxes are written as placeholders by [`BoxWriter::open`]
/// and patched by [`BoxWriter::close`]; `trun` data offsets and `saio` entries
/// use the raw [`BoxWriter::placeholder_u32`] / [`BoxWriter::patch_u32`] pair.
#[derive(Debug, Default)]
pub(crate) struct BoxWriter {
    buf: Vec<u8>,
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a plain box: size placeholder + fourcc.
    pub fn open(&mut self, fourcc: &[u8; 4]) -> Mark {
        let mark = Mark(self.buf.len());
        self.u32(0);
        self.bytes(fourcc);
        mark
    }

    /// Begin a full box: size placeholder + fourcc + version + 24-bit flags.
    pub fn open_full(&mut self, fourcc: &[u8; 4], version: u8, flags: u32) -> Mark {
        let mark = self.open(fourcc);
        self.u32(u32::from(version) << 24 | (flags & 0x00ff_ffff));
        mark
    }

    /// Patch the box size to cover everything written since `open`.
    pub fn close(&mut self, mark: Mark) {
        let size = (self.buf.len() - mark.0) as u32;
        self.patch_u32(mark.0, size);
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn placeholder_u32(&mut self) -> usize {
        let at = self.buf.len();
        self.u32(0);
        at
    }

    pub fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_back_patched() {
        let mut w = BoxWriter::new();
        let outer = w.open(b"moov");
        let inner = w.open(b"mvhd");
        w.u32(0xdead_beef);
        w.close(inner);
        w.close(outer);
        let out = w.finish();

        assert_eq!(&out[0..4], &20u32.to_be_bytes());
        assert_eq!(&out[4..8], b"moov");
        assert_eq!(&out[8..12], &12u32.to_be_bytes());
        assert_eq!(&out[12..16], b"mvhd");
    }

    #[test]
    fn full_box_header() {
        let mut w = BoxWriter::new();
        let m = w.open_full(b"tfdt", 1, 0x000002);
        w.close(m);
        let out = w.finish();
        assert_eq!(&out[8..12], &[1, 0, 0, 2]);
    }
}
