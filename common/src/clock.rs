use chrono::{DateTime, FixedOffset};

/// Wall-clock provider referenced by a device's `time_id`.
///
/// Returns `None` until the underlying time source is synchronised.
pub trait Clock: Send {
    fn now(&self) -> Option<DateTime<FixedOffset>>;
}

impl<C: Clock + Sync + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Option<DateTime<FixedOffset>> {
        (**self).now()
    }
}
