//! Hooks for recording and replaying input sessions.

/// Observer of the points where recorded sessions synchronize with emulation.
///
/// Input is polled when the guest reads controllers through the PIF, and `frame` is called at
/// every vertical interrupt. Both happen on the emulation thread, at deterministic points.
pub trait Vcr: Send {
    /// Returns the button state of `controller`, in the layout of the "read buttons" response.
    fn poll_input(&mut self, controller: usize) -> u32;

    /// Called at every frame boundary.
    fn frame(&mut self) {}
}

/// A [`Vcr`] with no buttons pressed and no recording.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl Vcr for NoInput {
    fn poll_input(&mut self, _: usize) -> u32 {
        0
    }
}
