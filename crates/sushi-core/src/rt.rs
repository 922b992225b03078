//! Realtime-thread marking
//!
//! The audio callback and the render workers flag themselves so code with
//! both RT and non-RT callers can assert which domain it is running in.

use std::cell::Cell;

thread_local! {
    static RT_PROCESSING: Cell<bool> = const { Cell::new(false) };
}

/// RAII marker: the current thread is processing realtime audio for the
/// lifetime of this value.
pub struct ThreadRtFlag {
    previous: bool,
}

impl ThreadRtFlag {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let previous = RT_PROCESSING.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for ThreadRtFlag {
    fn drop(&mut self) {
        let previous = self.previous;
        RT_PROCESSING.with(|flag| flag.set(previous));
    }
}

/// True while the current thread is inside realtime audio processing.
pub fn running_in_rt_thread() -> bool {
    RT_PROCESSING.with(|flag| flag.get())
}
