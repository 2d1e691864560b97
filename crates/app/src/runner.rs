//! Runs a session on its own emulation thread.
//!
//! The thread parks on a condition variable whenever it is paused. Every operation that needs
//! the whole state first waits for the thread to acknowledge it is parked between two slices of
//! execution, so no instruction is ever in flight while the state is accessed.
use cobalt::{
    Cobalt,
    system::scheduler::Event,
    vcr::{NoInput, Vcr},
};
use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
};
use tracing::{debug, error, info};

/// What the emulation thread should be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Run {
    Paused,
    Running,
    /// Run the given amount of frames, then pause.
    Frames(u64),
    /// Run the given amount of Count ticks, then pause.
    Cycles(u64),
}

struct Control {
    run: Run,
    /// Whether the emulation thread is parked.
    parked: bool,
    closing: bool,
}

struct Shared {
    state: Mutex<Cobalt>,
    control: Mutex<Control>,
    changed: Condvar,
    frames: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards input to the session's original [`Vcr`] while counting frames.
struct FrameCounter {
    inner: Box<dyn Vcr>,
    frames: Arc<AtomicU64>,
}

impl Vcr for FrameCounter {
    fn poll_input(&mut self, controller: usize) -> u32 {
        self.inner.poll_input(controller)
    }

    fn frame(&mut self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.inner.frame();
    }
}

/// Upper bound of a single slice of execution, in Count ticks.
const MAX_SLICE: u64 = 1 << 16;

/// Parks until there is something to run. Returns `None` once the runner is closing.
fn wait_for_work(shared: &Shared) -> Option<Run> {
    let mut control = lock(&shared.control);
    loop {
        if control.closing {
            return None;
        }

        match control.run {
            Run::Paused | Run::Frames(0) | Run::Cycles(0) => {
                control.run = Run::Paused;
                if !control.parked {
                    control.parked = true;
                    shared.changed.notify_all();
                }

                control = shared
                    .changed
                    .wait(control)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            run => {
                control.parked = false;
                return Some(run);
            }
        }
    }
}

fn worker(shared: Arc<Shared>) {
    while let Some(run) = wait_for_work(&shared) {
        let (cycles, frames, stopped) = {
            let mut cobalt = lock(&shared.state);

            // end slices right after frame boundaries so frame advances stop on them
            let until_frame = cobalt.system.scheduler.until(Event::Vi).unwrap_or(MAX_SLICE);
            let slice = match run {
                Run::Cycles(remaining) => remaining.min(MAX_SLICE),
                _ => MAX_SLICE,
            }
            .min(until_frame.max(1));

            let before = shared.frames.load(Ordering::Relaxed);
            let executed = cobalt.exec(slice);
            let frames = shared.frames.load(Ordering::Relaxed) - before;

            (executed.cycles, frames, cobalt.system.stopped)
        };

        let mut control = lock(&shared.control);
        control.run = match control.run {
            Run::Frames(n) => Run::Frames(n.saturating_sub(frames)),
            Run::Cycles(n) => Run::Cycles(n.saturating_sub(cycles)),
            run => run,
        };

        if stopped {
            error!("session stopped by the guest");
            control.run = Run::Paused;
        }
    }

    debug!("emulation thread exiting");
}

/// Owner of the emulation thread.
pub struct Runner {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Runner {
    /// Moves the session into a new, paused, emulation thread.
    pub fn new(mut cobalt: Cobalt) -> std::io::Result<Self> {
        let frames = Arc::new(AtomicU64::new(0));
        let inner = std::mem::replace(&mut cobalt.system.vcr, Box::new(NoInput));
        cobalt.system.vcr = Box::new(FrameCounter {
            inner,
            frames: frames.clone(),
        });

        let shared = Arc::new(Shared {
            state: Mutex::new(cobalt),
            control: Mutex::new(Control {
                run: Run::Paused,
                parked: false,
                closing: false,
            }),
            changed: Condvar::new(),
            frames,
        });

        let thread = std::thread::Builder::new()
            .name("cobalt runner".into())
            .spawn({
                let shared = shared.clone();
                move || worker(shared)
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    fn set(&self, run: Run) {
        lock(&self.shared.control).run = run;
        self.shared.changed.notify_all();
    }

    /// Runs until paused.
    pub fn start(&self) {
        self.set(Run::Running);
    }

    /// Runs `frames` frames, then pauses.
    pub fn frame_advance(&self, frames: u64) {
        self.set(Run::Frames(frames));
    }

    /// Runs `cycles` Count ticks, then pauses.
    pub fn run_cycles(&self, cycles: u64) {
        self.set(Run::Cycles(cycles));
    }

    /// Frames completed since the runner was created.
    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    /// Blocks until the emulation thread is parked. Returns what it was doing.
    pub fn pause(&self) -> Run {
        let mut control = lock(&self.shared.control);
        let previous = control.run;
        control.run = Run::Paused;
        self.shared.changed.notify_all();

        while !control.parked {
            control = self
                .shared
                .changed
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }

        previous
    }

    /// Blocks until the emulation thread runs out of work and parks on its own.
    pub fn wait(&self) {
        let mut control = lock(&self.shared.control);
        while !(control.parked && control.run == Run::Paused) {
            control = self
                .shared
                .changed
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Pauses the emulation thread, calls `f` with exclusive access to the session, then lets the
    /// thread resume what it was doing.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut Cobalt) -> R) -> R {
        let previous = self.pause();
        let result = f(&mut lock(&self.shared.state));
        self.set(previous);

        result
    }

    /// Stops the emulation thread and releases the session, freeing every compiled block.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        {
            let mut control = lock(&self.shared.control);
            control.closing = true;
            self.shared.changed.notify_all();
        }

        if thread.join().is_err() {
            error!("emulation thread panicked");
        }

        info!(frames = self.frames(), "session closed");
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
