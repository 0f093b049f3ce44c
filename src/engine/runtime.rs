//! Time and UUID generation behind injectable providers, so engine output is
//! reproducible under test.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait UuidGenerator: Send + Sync {
    fn next(&self) -> Uuid;
}

// --- Real implementations ---

#[derive(Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Default)]
pub struct RealUuidGenerator;

impl UuidGenerator for RealUuidGenerator {
    fn next(&self) -> Uuid {
        Uuid::new_v4()
    }
}

// --- Fake implementations ---

/// Returns a fixed instant, advancing by a fixed step on each call when one
/// is configured.
pub struct FakeTimeProvider {
    start: DateTime<Utc>,
    step_millis: i64,
    calls: AtomicU64,
}

impl FakeTimeProvider {
    pub fn new(start: DateTime<Utc>) -> Self {
        FakeTimeProvider {
            start,
            step_millis: 0,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_step(start: DateTime<Utc>, step_millis: i64) -> Self {
        FakeTimeProvider {
            start,
            step_millis,
            calls: AtomicU64::new(0),
        }
    }
}

impl Default for FakeTimeProvider {
    fn default() -> Self {
        FakeTimeProvider::new(Utc.with_ymd_and_hms(2018, 4, 11, 18, 24, 30).unwrap())
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
        self.start + chrono::Duration::milliseconds(call * self.step_millis)
    }
}

/// Generates sequential UUIDs `…-000000000000`, `…-000000000001`, and so on.
pub struct FakeUuidGenerator {
    counter: AtomicU64,
}

impl FakeUuidGenerator {
    pub fn new() -> Self {
        FakeUuidGenerator {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for FakeUuidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UuidGenerator for FakeUuidGenerator {
    fn next(&self) -> Uuid {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        Uuid::parse_str(&format!("00000000-0000-4000-8000-{:012x}", id)).expect("valid uuid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_time_fixed() {
        let provider = FakeTimeProvider::default();
        assert_eq!(provider.now(), provider.now());
    }

    #[test]
    fn test_fake_time_stepped() {
        let start = Utc.with_ymd_and_hms(2018, 4, 11, 18, 24, 30).unwrap();
        let provider = FakeTimeProvider::with_step(start, 1000);
        let first = provider.now();
        let second = provider.now();
        assert_eq!(second - first, chrono::Duration::seconds(1));
    }

    #[test]
    fn test_fake_uuids_sequential() {
        let generator = FakeUuidGenerator::new();
        assert_eq!(
            generator.next().to_string(),
            "00000000-0000-4000-8000-000000000000"
        );
        assert_eq!(
            generator.next().to_string(),
            "00000000-0000-4000-8000-000000000001"
        );
    }
}
