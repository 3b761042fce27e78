/// Sink a backend reports the progress of a long-running operation to
pub trait Meter {
    /// Begin a new phase labelled `label` expecting `total` units of work
    fn start(&mut self, label: &str, total: u64);

    /// Report absolute progress within the current phase
    fn set(&mut self, current: u64);

    /// Free-form status message
    fn notify(&mut self, msg: &str);

    /// The current phase is complete
    fn finished(&mut self);
}

/// Meter that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl Meter for NullProgress {
    fn start(&mut self, _label: &str, _total: u64) {}

    fn set(&mut self, _current: u64) {}

    fn notify(&mut self, _msg: &str) {}

    fn finished(&mut self) {}
}
