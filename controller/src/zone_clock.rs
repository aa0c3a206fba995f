use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use anyhow::anyhow;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;

use acp24_common::Clock;

/// Wall clock in the configured IANA zone.
///
/// Cloning shares the zone and sync flag, so the controller and the HTTP
/// handlers see timezone updates immediately.
#[derive(Clone)]
pub struct ZoneClock {
    zone: Arc<RwLock<Tz>>,
    synced: Arc<AtomicBool>,
}

impl ZoneClock {
    /// Unknown zone names fall back to UTC.
    pub fn new(timezone: &str) -> Self {
        let zone = timezone.parse::<Tz>().unwrap_or(Tz::UTC);
        Self {
            zone: Arc::new(RwLock::new(zone)),
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_timezone(&self, timezone: &str) -> anyhow::Result<()> {
        let zone = timezone
            .parse::<Tz>()
            .map_err(|_| anyhow!("unknown timezone `{timezone}`"))?;
        let mut current = self
            .zone
            .write()
            .map_err(|_| anyhow!("timezone lock poisoned"))?;
        *current = zone;
        Ok(())
    }

    pub fn timezone(&self) -> String {
        self.zone().name().to_string()
    }

    pub fn mark_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::Relaxed);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }

    fn zone(&self) -> Tz {
        self.zone.read().map(|zone| *zone).unwrap_or(Tz::UTC)
    }

    fn local(&self, utc: DateTime<Utc>) -> DateTime<FixedOffset> {
        let local = utc.with_timezone(&self.zone());
        local.with_timezone(&local.offset().fix())
    }
}

impl Clock for ZoneClock {
    fn now(&self) -> Option<DateTime<FixedOffset>> {
        self.is_synced().then(|| self.local(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unsynced_clock_reports_no_time() {
        let clock = ZoneClock::new("Europe/Budapest");
        assert_eq!(clock.now(), None);

        clock.mark_synced(true);
        assert!(clock.now().is_some());
    }

    #[test]
    fn applies_zone_offset_including_dst() {
        let clock = ZoneClock::new("Europe/Budapest");

        let winter = clock.local(Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap());
        let summer = clock.local(Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap());

        assert_eq!(winter.offset().local_minus_utc(), 3600);
        assert_eq!(summer.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn rejects_unknown_zone_and_keeps_previous() {
        let clock = ZoneClock::new("Europe/Budapest");
        assert!(clock.set_timezone("Mars/Olympus").is_err());
        assert_eq!(clock.timezone(), "Europe/Budapest");

        clock.set_timezone("America/New_York").unwrap();
        assert_eq!(clock.timezone(), "America/New_York");
    }

    #[test]
    fn unknown_initial_zone_falls_back_to_utc() {
        assert_eq!(ZoneClock::new("nowhere").timezone(), "UTC");
    }
}
