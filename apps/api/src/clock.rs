use chrono::{DateTime, Utc};

/// Time source injected wherever "now" matters, so window arithmetic and
/// rate limiting stay testable without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
