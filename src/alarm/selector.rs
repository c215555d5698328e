use chrono::{DateTime, Utc};

use crate::alarm::config::ResolvedWindow;
use crate::staging::{SleepStage, StagePoint};

/// Earliest light-sleep instant strictly after `now` inside the window, or
/// the window start when there is none.
pub fn select_wake_time(
    window: &ResolvedWindow,
    timeline: &[StagePoint],
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    timeline
        .iter()
        .filter(|point| point.stage == SleepStage::Light)
        .map(|point| point.timestamp)
        .filter(|&at| at > now && window.contains(at))
        .min()
        .unwrap_or(window.start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    fn window() -> ResolvedWindow {
        ResolvedWindow {
            start: at(6, 30),
            end: at(7, 0),
        }
    }

    fn point(h: u32, m: u32, stage: SleepStage) -> StagePoint {
        StagePoint {
            timestamp: at(h, m),
            stage,
        }
    }

    #[test]
    fn test_picks_light_instant_in_window() {
        let timeline = vec![
            point(6, 20, SleepStage::Light),
            point(6, 35, SleepStage::Deep),
            point(6, 45, SleepStage::Light),
            point(6, 50, SleepStage::Light),
        ];
        assert_eq!(select_wake_time(&window(), &timeline, at(5, 0)), at(6, 45));
    }

    #[test]
    fn test_falls_back_to_window_start() {
        let timeline = vec![
            point(6, 20, SleepStage::Light),
            point(6, 40, SleepStage::Rem),
            point(6, 50, SleepStage::Deep),
            point(7, 5, SleepStage::Light),
        ];
        assert_eq!(select_wake_time(&window(), &timeline, at(5, 0)), at(6, 30));
        assert_eq!(select_wake_time(&window(), &[], at(5, 0)), at(6, 30));
    }

    #[test]
    fn test_ignores_instants_not_after_now() {
        let timeline = vec![point(6, 35, SleepStage::Light), point(6, 55, SleepStage::Light)];
        assert_eq!(select_wake_time(&window(), &timeline, at(6, 35)), at(6, 55));
    }

    #[test]
    fn test_window_edges_are_inclusive() {
        let timeline = vec![point(7, 0, SleepStage::Light)];
        assert_eq!(select_wake_time(&window(), &timeline, at(5, 0)), at(7, 0));
    }

    fn stage_strategy() -> impl Strategy<Value = SleepStage> {
        prop_oneof![
            Just(SleepStage::Awake),
            Just(SleepStage::Light),
            Just(SleepStage::Deep),
            Just(SleepStage::Rem),
        ]
    }

    proptest! {
        #[test]
        fn prop_result_is_start_or_inside_window(
            points in proptest::collection::vec((0i64..240, stage_strategy()), 0..120),
            now_offset in 0i64..240,
        ) {
            let base = at(5, 0);
            let timeline: Vec<StagePoint> = points
                .iter()
                .map(|&(minute, stage)| StagePoint {
                    timestamp: base + Duration::minutes(minute),
                    stage,
                })
                .collect();
            let now = base + Duration::minutes(now_offset);
            let chosen = select_wake_time(&window(), &timeline, now);
            prop_assert!(chosen == window().start || window().contains(chosen));
        }
    }
}
