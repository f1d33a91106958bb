use serde::{Deserialize, Serialize};

use crate::shader_constants::FRAMES_IN_FLIGHT;

/// Frame in flight index.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame(usize);

impl Frame {
    /// The slot used after this one.
    #[inline(always)]
    pub fn next(self) -> Frame {
        Frame((self.0 + 1) % FRAMES_IN_FLIGHT)
    }

    /// Slot that frame number `frame_number` lands in.
    #[inline(always)]
    pub fn for_frame_number(frame_number: u64) -> Frame {
        Frame((frame_number % FRAMES_IN_FLIGHT as u64) as usize)
    }
}

impl From<usize> for Frame {
    fn from(value: usize) -> Self {
        Frame(value)
    }
}

impl From<Frame> for usize {
    fn from(value: Frame) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin() {
        let mut frame = Frame::default();
        for i in 0..(FRAMES_IN_FLIGHT * 3) {
            assert_eq!(usize::from(frame), i % FRAMES_IN_FLIGHT);
            assert_eq!(frame, Frame::for_frame_number(i as u64));
            frame = frame.next();
        }
    }
}
