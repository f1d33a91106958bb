use ember_render_base::{Frame, FRAMES_IN_FLIGHT};
use thiserror::Error;

/// Where the frame being produced is in its life cycle.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameState {
    #[default]
    Idle,
    AcquiringImage,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Error)]
pub enum FrameError<E: std::error::Error + 'static> {
    #[error("illegal frame transition from {from:?} to {to:?}")]
    InvalidTransition { from: FrameState, to: FrameState },
    #[error("{0}")]
    Slot(#[source] E),
}

/// Resources of one frame in flight, guarded by a fence the GPU signals once it is done with
/// them.
pub trait FrameSlot {
    type Error: std::error::Error + 'static;

    /// Blocks until work previously submitted from the slot has finished.
    fn wait(&self) -> Result<(), Self::Error>;

    /// Unsignals the fence right before the slot's work is resubmitted.
    fn reset(&self) -> Result<(), Self::Error>;
}

/// Round robin ring of frame slots driving the frame state machine.
///
/// A slot can only be borrowed mutably after its fence was observed signaled, so the CPU never
/// touches resources the GPU may still be reading.
pub struct FrameRing<S: FrameSlot> {
    slots: Vec<S>,
    current: Frame,
    frame_number: u64,
    state: FrameState,
}

impl FrameState {
    /// Determines if moving from this state to `to` is legal.
    pub fn can_transition(self, to: FrameState) -> bool {
        matches!(
            (self, to),
            (FrameState::Idle, FrameState::AcquiringImage)
                | (FrameState::AcquiringImage, FrameState::Recording)
                // Out of date swapchains abandon the frame before anything is recorded
                | (FrameState::AcquiringImage, FrameState::Idle)
                | (FrameState::Recording, FrameState::Submitted)
                // Recording failed, nothing was submitted
                | (FrameState::Recording, FrameState::Idle)
                | (FrameState::Submitted, FrameState::Presenting)
                | (FrameState::Presenting, FrameState::Idle)
        )
    }
}

impl<S: FrameSlot> FrameRing<S> {
    /// Makes a ring from exactly `FRAMES_IN_FLIGHT` slots.
    pub fn new(slots: Vec<S>) -> Self {
        debug_assert_eq!(slots.len(), FRAMES_IN_FLIGHT);
        Self {
            slots,
            current: Frame::default(),
            frame_number: 0,
            state: FrameState::Idle,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline(always)]
    pub fn current(&self) -> Frame {
        self.current
    }

    /// Number of frames finished so far.
    #[inline(always)]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Shared access to a slot. Only handles and other immutable state may be read through this.
    #[inline(always)]
    pub fn slot(&self, frame: Frame) -> &S {
        &self.slots[usize::from(frame)]
    }

    #[inline(always)]
    pub fn slots(&self) -> &[S] {
        &self.slots
    }

    /// Starts a new frame by waiting for the current slot's previous work to finish.
    pub fn begin(&mut self) -> Result<Frame, FrameError<S::Error>> {
        self.check(FrameState::AcquiringImage)?;
        self.slots[usize::from(self.current)]
            .wait()
            .map_err(FrameError::Slot)?;
        self.state = FrameState::AcquiringImage;
        Ok(self.current)
    }

    /// Gives up on the frame before recording. The slot is left untouched so its fence is still
    /// signaled for the next attempt.
    pub fn abandon(&mut self) -> Result<(), FrameError<S::Error>> {
        self.return_to_idle(FrameState::AcquiringImage)
    }

    /// Gives up on a frame whose recording failed. Nothing was submitted and the fence was never
    /// reset, so the slot can be reused right away.
    pub fn cancel(&mut self) -> Result<(), FrameError<S::Error>> {
        self.return_to_idle(FrameState::Recording)
    }

    /// Mutable access to the current slot for recording.
    pub fn record(&mut self) -> Result<&mut S, FrameError<S::Error>> {
        self.check(FrameState::Recording)?;
        self.state = FrameState::Recording;
        Ok(&mut self.slots[usize::from(self.current)])
    }

    /// Resets the slot's fence and hands the slot to `submit`, which must queue work that
    /// signals the fence.
    ///
    /// If `submit` fails the fence will never be signaled, so the error should be treated as
    /// fatal.
    pub fn submit(
        &mut self,
        submit: impl FnOnce(&S) -> Result<(), S::Error>,
    ) -> Result<(), FrameError<S::Error>> {
        self.check(FrameState::Submitted)?;
        let slot = &self.slots[usize::from(self.current)];
        slot.reset().map_err(FrameError::Slot)?;
        submit(slot).map_err(FrameError::Slot)?;
        self.state = FrameState::Submitted;
        Ok(())
    }

    pub fn present(&mut self) -> Result<(), FrameError<S::Error>> {
        self.check(FrameState::Presenting)?;
        self.state = FrameState::Presenting;
        Ok(())
    }

    /// Finishes the frame and moves on to the next slot.
    pub fn finish(&mut self) -> Result<(), FrameError<S::Error>> {
        self.return_to_idle(FrameState::Presenting)?;
        self.frame_number += 1;
        self.current = self.current.next();
        Ok(())
    }

    fn return_to_idle(&mut self, from: FrameState) -> Result<(), FrameError<S::Error>> {
        if self.state != from {
            return Err(FrameError::InvalidTransition {
                from: self.state,
                to: FrameState::Idle,
            });
        }
        self.state = FrameState::Idle;
        Ok(())
    }

    #[inline]
    fn check(&self, to: FrameState) -> Result<(), FrameError<S::Error>> {
        if self.state.can_transition(to) {
            Ok(())
        } else {
            Err(FrameError::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }
}

/// Tracks the size the swapchain should have and whether it must be rebuilt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResizeTracker {
    applied: (u32, u32),
    requested: (u32, u32),
    stale: bool,
}

impl ResizeTracker {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            applied: (width, height),
            requested: (width, height),
            stale: false,
        }
    }

    /// Records a new window size.
    #[inline]
    pub fn request(&mut self, width: u32, height: u32) {
        self.requested = (width, height);
    }

    /// Forces a rebuild at the requested size, used when the swapchain reports it is out of date
    /// or suboptimal.
    #[inline]
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// A zero sized window can't have a swapchain.
    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.requested.0 == 0 || self.requested.1 == 0
    }

    #[inline(always)]
    pub fn applied(&self) -> (u32, u32) {
        self.applied
    }

    /// Size to rebuild swapchain bound resources at, if they need rebuilding. Once returned the
    /// size counts as applied.
    pub fn take(&mut self) -> Option<(u32, u32)> {
        if self.is_minimized() {
            return None;
        }
        if self.requested == self.applied && !self.stale {
            return None;
        }
        self.applied = self.requested;
        self.stale = false;
        Some(self.applied)
    }
}
