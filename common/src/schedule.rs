use chrono::{DateTime, Datelike, FixedOffset, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::{
    config::DeviceConfig,
    types::{ClimateMode, FanLevel},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

/// One weekly program point. Missing target or fan leave the current value alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub day: DayOfWeek,
    #[serde(rename = "startMinutes")]
    pub start_minutes: u16,
    pub mode: ClimateMode,
    #[serde(rename = "targetTemp", default, skip_serializing_if = "Option::is_none")]
    pub target_temp_c: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan: Option<FanLevel>,
}

impl ScheduleEntry {
    pub fn validate(&self, config: &DeviceConfig) -> bool {
        self.start_minutes < 24 * 60
            && config.supports_mode(self.mode)
            && self
                .target_temp_c
                .map_or(true, |target| config.contains_temperature(target))
            && self.fan.map_or(true, |fan| config.supports_fan(fan))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub enabled: bool,
    pub entries: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleAction {
    pub mode: ClimateMode,
    pub target_temp_c: Option<f32>,
    pub fan: Option<FanLevel>,
}

impl Schedule {
    /// Drops entries the device cannot honour and sorts the rest by week position.
    pub fn normalize(&mut self, config: &DeviceConfig) {
        self.entries.retain(|entry| entry.validate(config));
        self.entries
            .sort_by_key(|entry| (entry.day.index(), entry.start_minutes));
    }

    /// The entry at or before `now`, wrapping back through the previous week.
    pub fn current_action(&self, now: DateTime<FixedOffset>) -> Option<ScheduleAction> {
        self.closest_entry(now, |delta| (-delta).rem_euclid(MINUTES_PER_WEEK))
            .map(|(entry, _)| ScheduleAction {
                mode: entry.mode,
                target_temp_c: entry.target_temp_c,
                fan: entry.fan,
            })
    }

    /// Start of the first entry strictly after the current minute. An entry at
    /// the current minute next fires a week later.
    pub fn next_event_epoch(&self, now: DateTime<FixedOffset>) -> Option<i64> {
        let (_, minutes_ahead) = self.closest_entry(now, |delta| {
            match delta.rem_euclid(MINUTES_PER_WEEK) {
                0 => MINUTES_PER_WEEK,
                ahead => ahead,
            }
        })?;

        let minute_start = now.timestamp() - i64::from(now.second());
        Some(minute_start + minutes_ahead * 60)
    }

    fn closest_entry(
        &self,
        now: DateTime<FixedOffset>,
        distance: impl Fn(i64) -> i64,
    ) -> Option<(&ScheduleEntry, i64)> {
        if !self.enabled {
            return None;
        }

        let now_minute = week_minute(
            DayOfWeek::from_chrono(now.weekday()),
            i64::from(now.hour() * 60 + now.minute()),
        );

        self.entries
            .iter()
            .map(|entry| {
                let delta = week_minute(entry.day, i64::from(entry.start_minutes)) - now_minute;
                (entry, distance(delta))
            })
            .min_by_key(|(_, distance)| *distance)
    }
}

const MINUTES_PER_DAY: i64 = 24 * 60;
const MINUTES_PER_WEEK: i64 = 7 * MINUTES_PER_DAY;

/// Minutes since Monday 00:00.
fn week_minute(day: DayOfWeek, minutes: i64) -> i64 {
    day.index() as i64 * MINUTES_PER_DAY + minutes
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DeviceSettings;

    fn config() -> DeviceConfig {
        DeviceConfig::from_settings(DeviceSettings::default()).unwrap()
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 6, day, hour, minute, 0)
            .unwrap()
    }

    fn entry(day: DayOfWeek, hour: u16, mode: ClimateMode, target: Option<f32>) -> ScheduleEntry {
        ScheduleEntry {
            day,
            start_minutes: hour * 60,
            mode,
            target_temp_c: target,
            fan: None,
        }
    }

    #[test]
    fn saturday_evening_entry_covers_monday_morning() {
        let mut schedule = Schedule {
            enabled: true,
            entries: vec![entry(DayOfWeek::Sat, 22, ClimateMode::Off, None)],
        };
        schedule.normalize(&config());

        // 2026-06-01 is a Monday.
        let action = schedule.current_action(at(1, 7, 30)).unwrap();
        assert_eq!(
            action,
            ScheduleAction {
                mode: ClimateMode::Off,
                target_temp_c: None,
                fan: None,
            }
        );
    }

    #[test]
    fn latest_entry_at_or_before_now_wins() {
        let mut schedule = Schedule {
            enabled: true,
            entries: vec![
                entry(DayOfWeek::Mon, 18, ClimateMode::Off, None),
                entry(DayOfWeek::Mon, 8, ClimateMode::Cool, Some(23.0)),
            ],
        };
        schedule.normalize(&config());

        assert_eq!(schedule.entries[0].start_minutes, 8 * 60);
        let action = schedule.current_action(at(1, 12, 0)).unwrap();
        assert_eq!(action.mode, ClimateMode::Cool);
        assert_eq!(action.target_temp_c, Some(23.0));
        assert_eq!(schedule.current_action(at(1, 18, 0)).unwrap().mode, ClimateMode::Off);
    }

    #[test]
    fn normalize_drops_entries_the_device_cannot_honour() {
        let mut schedule = Schedule {
            enabled: true,
            entries: vec![
                entry(DayOfWeek::Tue, 7, ClimateMode::Heat, Some(22.0)),
                entry(DayOfWeek::Tue, 8, ClimateMode::Cool, Some(40.0)),
                entry(DayOfWeek::Tue, 25, ClimateMode::Cool, None),
                ScheduleEntry {
                    fan: Some(FanLevel::High),
                    ..entry(DayOfWeek::Tue, 9, ClimateMode::FanOnly, None)
                },
            ],
        };
        schedule.normalize(&config());

        assert_eq!(schedule.entries.len(), 1);
        assert_eq!(schedule.entries[0].mode, ClimateMode::FanOnly);
    }

    #[test]
    fn disabled_schedule_yields_nothing() {
        let schedule = Schedule {
            enabled: false,
            entries: vec![entry(DayOfWeek::Mon, 8, ClimateMode::Cool, None)],
        };
        assert_eq!(schedule.current_action(at(1, 9, 0)), None);
        assert_eq!(schedule.next_event_epoch(at(1, 9, 0)), None);
    }

    #[test]
    fn next_event_is_later_today_or_wraps_the_week() {
        let mut schedule = Schedule {
            enabled: true,
            entries: vec![
                entry(DayOfWeek::Mon, 8, ClimateMode::Cool, Some(24.0)),
                entry(DayOfWeek::Mon, 18, ClimateMode::Off, None),
            ],
        };
        schedule.normalize(&config());

        assert_eq!(
            schedule.next_event_epoch(at(1, 8, 1)),
            Some(at(1, 18, 0).timestamp())
        );
        assert_eq!(
            schedule.next_event_epoch(at(1, 19, 0)),
            Some(at(8, 8, 0).timestamp())
        );
    }

    #[test]
    fn entry_at_the_current_minute_next_fires_a_week_later() {
        let schedule = Schedule {
            enabled: true,
            entries: vec![entry(DayOfWeek::Tue, 6, ClimateMode::Cool, None)],
        };

        // 2026-06-02 is a Tuesday; seconds past the minute are dropped.
        let now = at(2, 6, 0) + chrono::Duration::seconds(42);
        assert_eq!(
            schedule.next_event_epoch(now),
            Some(at(9, 6, 0).timestamp())
        );
        assert_eq!(schedule.current_action(now).unwrap().mode, ClimateMode::Cool);
    }

    #[test]
    fn empty_schedule_has_no_action_or_event() {
        let schedule = Schedule {
            enabled: true,
            entries: Vec::new(),
        };
        assert_eq!(schedule.current_action(at(1, 9, 0)), None);
        assert_eq!(schedule.next_event_epoch(at(1, 9, 0)), None);
    }

    #[test]
    fn entries_parse_without_optional_fields() {
        let raw = r#"{"enabled":true,"entries":[{"day":"FRI","startMinutes":420,"mode":"COOL"}]}"#;
        let schedule: Schedule = serde_json::from_str(raw).unwrap();
        assert_eq!(schedule.entries[0].day, DayOfWeek::Fri);
        assert_eq!(schedule.entries[0].target_temp_c, None);
        assert_eq!(schedule.entries[0].fan, None);
    }
}
