/// Default CCSDS attached sync marker.
pub const ASM: [u8; 4] = [0x1a, 0xcf, 0xfc, 0x1d];

/// Offset of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Iterates over the frames of an in-memory capture.
///
/// Created using [split_frames]. Cloning gives an independent iterator positioned
/// at the same frame, so iteration can be restarted from a saved clone.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    data: &'a [u8],
    marker: &'a [u8],
    // Start of the next frame, i.e., the byte after a marker. `None` when done.
    cursor: Option<usize>,
}

impl<'a> Frames<'a> {
    fn new(data: &'a [u8], marker: &'a [u8]) -> Self {
        Frames {
            data,
            marker,
            cursor: find(data, marker).map(|idx| idx + marker.len()),
        }
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.cursor?;
        let rest = &self.data[start..];
        match find(rest, self.marker) {
            Some(len) => {
                self.cursor = Some(start + len + self.marker.len());
                Some(&rest[..len])
            }
            None => {
                self.cursor = None;
                Some(rest)
            }
        }
    }
}

/// Creates an iterator over the frames in `data` delimited by `marker`.
///
/// Each frame is the run of bytes between consecutive markers, or between the last
/// marker and the end of the data. Bytes before the first marker are discarded and
/// data with no marker produces no frames. Adjacent markers produce an empty frame.
///
/// Frames are not validated in any way; see [Packet::decode](super::Packet::decode).
///
/// # Example
/// ```
/// use downlink::framing::{split_frames, ASM};
///
/// let dat: &[u8] = &[0xff, 0x1a, 0xcf, 0xfc, 0x1d, 0x01, 0x02, 0x1a, 0xcf, 0xfc, 0x1d, 0x03];
/// let frames: Vec<&[u8]> = split_frames(dat, &ASM).collect();
/// assert_eq!(frames.len(), 2);
/// assert_eq!(frames[0], [0x01, 0x02]);
/// assert_eq!(frames[1], [0x03]);
/// ```
#[must_use]
pub fn split_frames<'a>(data: &'a [u8], marker: &'a [u8]) -> Frames<'a> {
    Frames::new(data, marker)
}
