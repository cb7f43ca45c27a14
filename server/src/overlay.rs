//! Read-only summaries for the stream overlay: the live stat panel and the
//! ticker of stat facts. Everything here is computed from fact rows already
//! loaded for the live player/game.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::warn;

use crate::db::models::GameStat;

const PLACEHOLDER: &str = "---";
const WINS_LABEL: &str = "WINS";

/// Stat types shown for the first tier of ticker facts.
const BASIC_STAT_TYPES: usize = 3;
/// Stat types covered by the descriptive and spread tiers.
const DETAILED_STAT_TYPES: usize = 2;
const DESCRIPTIVE_MIN_MATCHES: usize = 3;
const SPREAD_MIN_MATCHES: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimePeriod {
    #[serde(rename = "TODAY")]
    Today,
    #[serde(rename = "PAST")]
    Past,
    #[serde(rename = "N/A")]
    NoHistory,
    #[serde(rename = "NEW GAME")]
    NewGame,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SlotValue {
    Number(i64),
    Placeholder(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelSlot {
    pub label: String,
    pub value: SlotValue,
}

impl PanelSlot {
    fn new(label: impl Into<String>, value: SlotValue) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivePanel {
    pub player_id: i32,
    pub game_id: i32,
    pub slots: Vec<PanelSlot>,
    pub time_period: TimePeriod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticker {
    pub facts: Vec<String>,
    pub games_played: usize,
}

/// The overlay's `tz` parameter as an IANA zone. Missing or unknown zones
/// fall back to UTC.
pub fn parse_zone(tz: Option<&str>) -> Tz {
    let Some(name) = tz.map(str::trim).filter(|name| !name.is_empty()) else {
        return Tz::UTC;
    };
    name.parse().unwrap_or_else(|_| {
        warn!("Unknown time zone '{}', using UTC", name);
        Tz::UTC
    })
}

/// Short uppercase panel label: "Total Eliminations" becomes "ELIMS".
pub fn abbreviate(label: &str) -> String {
    let cleaned = label.replace("Total", "").replace("Average", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return "XXXX".to_string();
    }
    if cleaned.chars().count() > 8 {
        let head: String = cleaned.chars().take(4).collect();
        format!("{}S", head.to_uppercase())
    } else {
        cleaned.to_uppercase()
    }
}

/// Stat types with the lowest positive average across the whole game.
fn panel_stat_types(game_facts: &[GameStat], count: usize) -> Vec<String> {
    let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    for fact in game_facts
        .iter()
        .filter(|f| f.stat_value > 0 && !f.stat_type.trim().is_empty())
    {
        let entry = totals.entry(fact.stat_type.as_str()).or_default();
        entry.0 += fact.stat_value as i64;
        entry.1 += 1;
    }

    let mut averages: Vec<(&str, f64)> = totals
        .into_iter()
        .map(|(stat_type, (sum, n))| (stat_type, sum as f64 / n as f64))
        .collect();
    averages.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    averages
        .into_iter()
        .take(count)
        .map(|(stat_type, _)| stat_type.to_string())
        .collect()
}

/// Builds the live panel for `player_id` from every fact of the game.
/// "Today" and the day a fact belongs to are taken in `tz`.
pub fn live_panel(
    player_id: i32,
    game_id: i32,
    game_facts: &[GameStat],
    now: DateTime<Utc>,
    tz: Tz,
) -> LivePanel {
    let panel = |slots, time_period| LivePanel {
        player_id,
        game_id,
        slots,
        time_period,
    };

    let win_tracking = game_facts.iter().any(|f| f.win.is_some());
    let stat_types = panel_stat_types(game_facts, if win_tracking { 2 } else { 3 });

    if stat_types.is_empty() && !win_tracking {
        let slots = (1..=3)
            .map(|i| PanelSlot::new(format!("STAT {}", i), SlotValue::Number(0)))
            .collect();
        return panel(slots, TimePeriod::NewGame);
    }

    let player_facts: Vec<&GameStat> = game_facts.iter().filter(|f| f.player_id == player_id).collect();
    let day_of = |fact: &GameStat| -> NaiveDate { fact.played_at.with_timezone(&tz).date_naive() };
    let today = now.with_timezone(&tz).date_naive();

    let (period, day) = if player_facts.iter().any(|f| day_of(f) == today) {
        (TimePeriod::Today, today)
    } else if let Some(last) = player_facts.iter().map(|f| day_of(f)).filter(|d| *d < today).max() {
        (TimePeriod::Past, last)
    } else {
        let mut slots = Vec::new();
        if win_tracking {
            slots.push(PanelSlot::new(WINS_LABEL, SlotValue::Placeholder(PLACEHOLDER)));
        }
        slots.extend(
            stat_types
                .iter()
                .map(|t| PanelSlot::new(abbreviate(t), SlotValue::Placeholder(PLACEHOLDER))),
        );
        return panel(slots, TimePeriod::NoHistory);
    };

    let on_day: Vec<&GameStat> = player_facts.into_iter().filter(|f| day_of(f) == day).collect();
    let mut slots = Vec::new();

    if win_tracking {
        // A match counts once however many of its facts carry the flag
        let wins = on_day
            .iter()
            .filter(|f| f.win == Some(true))
            .map(|f| f.played_at)
            .collect::<BTreeSet<_>>()
            .len();
        slots.push(PanelSlot::new(WINS_LABEL, SlotValue::Number(wins as i64)));
    }

    for stat_type in &stat_types {
        let values: Vec<i64> = on_day
            .iter()
            .filter(|f| &f.stat_type == stat_type)
            .map(|f| f.stat_value as i64)
            .collect();
        let total: i64 = values.iter().sum();
        let value = match period {
            TimePeriod::Today => total,
            _ if values.is_empty() => 0,
            _ => (total as f64 / values.len() as f64).round() as i64,
        };
        slots.push(PanelSlot::new(abbreviate(stat_type), SlotValue::Number(value)));
    }

    panel(slots, period)
}

/// Mean, median, mode and range of one stat.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    /// Most frequent value, only when it occurs more than once.
    pub mode: Option<i32>,
    pub min: i32,
    pub max: i32,
    pub range: i64,
}

pub fn describe(values: &[i32]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();

    let mean = sorted.iter().map(|v| *v as f64).sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
    };

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for v in &sorted {
        *counts.entry(*v).or_default() += 1;
    }
    // Ties go to the smallest value
    let mode = counts
        .iter()
        .fold(None, |best: Option<(i32, usize)>, (v, c)| match best {
            Some((_, best_count)) if best_count >= *c => best,
            _ => Some((*v, *c)),
        })
        .filter(|(_, count)| *count > 1)
        .map(|(v, _)| v);

    let min = sorted[0];
    let max = sorted[n - 1];
    Some(Summary {
        mean,
        median,
        mode,
        min,
        max,
        range: max as i64 - min as i64,
    })
}

/// Population spread of one stat.
#[derive(Debug, Clone, PartialEq)]
pub struct Spread {
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
}

/// `None` for fewer than two values.
pub fn spread(values: &[i32]) -> Option<Spread> {
    if values.len() < 2 {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().map(|v| *v as f64).collect();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;

    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    Some(Spread {
        mean,
        variance,
        std_dev: variance.sqrt(),
        p25: percentile(&sorted, 0.25),
        p50: percentile(&sorted, 0.50),
        p75: percentile(&sorted, 0.75),
    })
}

/// Linear interpolation between closest ranks of an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = (sorted.len() - 1) as f64 * p;
    let floor = k.floor() as usize;
    let fraction = k - floor as f64;
    match sorted.get(floor + 1) {
        Some(next) => sorted[floor] + fraction * (next - sorted[floor]),
        None => sorted[floor],
    }
}

/// Whole numbers print without decimals, anything else with one.
fn number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

/// Tiered stat facts for one player's history in one game. A match is a
/// distinct `played_at`; dates print in `tz`.
pub fn ticker(player_name: &str, game_name: &str, facts: &[GameStat], tz: Tz) -> Ticker {
    let games_played = facts.iter().map(|f| f.played_at).collect::<BTreeSet<_>>().len();
    if games_played == 0 {
        return Ticker {
            facts: vec!["No stats recorded yet. Start playing to see stat facts!".to_string()],
            games_played,
        };
    }

    let stat_types: Vec<&str> = facts
        .iter()
        .map(|f| f.stat_type.as_str())
        .filter(|t| !t.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let values_of = |stat_type: &str| -> Vec<i32> {
        facts
            .iter()
            .filter(|f| f.stat_type == stat_type)
            .map(|f| f.stat_value)
            .collect()
    };

    let mut lines = Vec::new();

    for stat_type in stat_types.iter().take(BASIC_STAT_TYPES) {
        // Earliest match wins a tie
        let best = facts
            .iter()
            .filter(|f| f.stat_type == *stat_type)
            .max_by(|a, b| a.stat_value.cmp(&b.stat_value).then_with(|| b.played_at.cmp(&a.played_at)));
        if let Some(best) = best {
            lines.push(format!(
                "{}'s best {} in {} was {} on {}.",
                player_name,
                stat_type,
                game_name,
                best.stat_value,
                best.played_at.with_timezone(&tz).format("%B %d, %Y")
            ));
        }
    }

    let highest = facts
        .iter()
        .max_by(|a, b| a.stat_value.cmp(&b.stat_value).then_with(|| b.stat_type.cmp(&a.stat_type)));
    if let Some(highest) = highest {
        lines.push(format!(
            "The highest {} recorded for {} is {}.",
            highest.stat_type, game_name, highest.stat_value
        ));
    }

    if games_played >= DESCRIPTIVE_MIN_MATCHES {
        for stat_type in stat_types.iter().take(DETAILED_STAT_TYPES) {
            let Some(summary) = describe(&values_of(*stat_type)) else {
                continue;
            };
            lines.push(format!(
                "On average, {} gets {:.1} {} per game in {}.",
                player_name, summary.mean, stat_type, game_name
            ));
            lines.push(format!(
                "The median {} for {} in {} is {}.",
                stat_type,
                player_name,
                game_name,
                number(summary.median)
            ));
            if let Some(mode) = summary.mode {
                lines.push(format!(
                    "{} most frequently scores {} {} in {}.",
                    player_name, mode, stat_type, game_name
                ));
            }
            lines.push(format!(
                "{}'s {} in {} ranges from {} (minimum) to {} (maximum).",
                player_name, stat_type, game_name, summary.min, summary.max
            ));
            lines.push(format!(
                "The range of {} scores in {} is {}.",
                stat_type, game_name, summary.range
            ));
        }
    }

    if games_played >= SPREAD_MIN_MATCHES {
        for stat_type in stat_types.iter().take(DETAILED_STAT_TYPES) {
            let Some(spread) = spread(&values_of(*stat_type)) else {
                continue;
            };
            let variability = if spread.std_dev > spread.mean * 0.3 { "high" } else { "low" };
            lines.push(format!(
                "The standard deviation of {} in {} is {:.2}, showing {} variability in performance.",
                stat_type, game_name, spread.std_dev, variability
            ));
            lines.push(format!(
                "The variance of {}'s {} in {} is {:.2}.",
                player_name, stat_type, game_name, spread.variance
            ));
            lines.push(format!(
                "25% of {}'s games have {} below {:.1}, while 75% are below {:.1}.",
                player_name, stat_type, spread.p25, spread.p75
            ));
            lines.push(format!(
                "The median (50th percentile) {} is {:.1} for {} in {}.",
                stat_type, spread.p50, player_name, game_name
            ));
        }
    }

    Ticker {
        facts: lines,
        games_played,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn fact(player_id: i32, day: u32, hour: u32, stat_type: &str, value: i32, win: Option<bool>) -> GameStat {
        GameStat {
            id: 0,
            game_id: 1,
            player_id,
            stat_type: stat_type.to_string(),
            stat_value: value,
            game_mode: None,
            game_level: None,
            win,
            ranked: None,
            pre_match_rank: None,
            post_match_rank: None,
            played_at: Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap()
    }

    fn game_facts() -> Vec<GameStat> {
        vec![
            fact(1, 10, 10, "Kills", 5, Some(true)),
            fact(1, 10, 10, "Deaths", 3, Some(true)),
            fact(1, 10, 12, "Kills", 7, Some(false)),
            fact(1, 10, 12, "Deaths", 1, Some(false)),
            fact(2, 1, 9, "Kills", 20, Some(true)),
            fact(2, 1, 9, "Deaths", 4, Some(true)),
            fact(2, 1, 11, "Kills", 10, Some(false)),
            fact(2, 1, 11, "Deaths", 7, Some(false)),
        ]
    }

    fn numbers(panel: &LivePanel) -> Vec<(String, SlotValue)> {
        panel.slots.iter().map(|s| (s.label.clone(), s.value.clone())).collect()
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("Total Kills"), "KILLS");
        assert_eq!(abbreviate("Eliminations"), "ELIMS");
        assert_eq!(abbreviate("Average Damage Dealt"), "DAMAS");
        assert_eq!(abbreviate("Assists"), "ASSISTS");
        assert_eq!(abbreviate("Total"), "XXXX");
    }

    #[test]
    fn test_live_panel_today_sums() {
        let panel = live_panel(1, 1, &game_facts(), now(), Tz::UTC);
        assert_eq!(panel.time_period, TimePeriod::Today);
        assert_eq!(
            numbers(&panel),
            vec![
                ("WINS".to_string(), SlotValue::Number(1)),
                ("DEATHS".to_string(), SlotValue::Number(4)),
                ("KILLS".to_string(), SlotValue::Number(12)),
            ]
        );
    }

    #[test]
    fn test_live_panel_past_averages() {
        let panel = live_panel(2, 1, &game_facts(), now(), Tz::UTC);
        assert_eq!(panel.time_period, TimePeriod::Past);
        assert_eq!(
            numbers(&panel),
            vec![
                ("WINS".to_string(), SlotValue::Number(1)),
                ("DEATHS".to_string(), SlotValue::Number(6)),
                ("KILLS".to_string(), SlotValue::Number(15)),
            ]
        );
    }

    #[test]
    fn test_live_panel_without_history() {
        let panel = live_panel(3, 1, &game_facts(), now(), Tz::UTC);
        assert_eq!(panel.time_period, TimePeriod::NoHistory);
        assert_eq!(panel.slots.len(), 3);
        assert!(panel.slots.iter().all(|s| s.value == SlotValue::Placeholder("---")));
    }

    #[test]
    fn test_live_panel_new_game() {
        let panel = live_panel(1, 1, &[], now(), Tz::UTC);
        assert_eq!(panel.time_period, TimePeriod::NewGame);
        assert_eq!(panel.slots[0].label, "STAT 1");
        assert_eq!(panel.slots.len(), 3);
    }

    #[test]
    fn test_live_panel_without_win_tracking_shows_three_stats() {
        let facts = vec![
            fact(1, 10, 8, "Goals", 2, None),
            fact(1, 10, 8, "Saves", 9, None),
            fact(1, 10, 8, "Shots", 5, None),
            fact(1, 10, 8, "Points", 300, None),
            fact(1, 10, 8, "Fouls", 0, None),
        ];
        let panel = live_panel(1, 1, &facts, now(), Tz::UTC);
        let labels: Vec<&str> = panel.slots.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["GOALS", "SHOTS", "SAVES"]);
    }

    #[test]
    fn test_live_panel_uses_local_day() {
        // 16:00 and 19:00 on March 10 in Los Angeles, split across two UTC days
        let evening = vec![
            GameStat {
                played_at: Utc.with_ymd_and_hms(2026, 3, 10, 23, 0, 0).unwrap(),
                ..fact(1, 10, 0, "Kills", 5, None)
            },
            GameStat {
                played_at: Utc.with_ymd_and_hms(2026, 3, 11, 2, 0, 0).unwrap(),
                ..fact(1, 10, 0, "Kills", 7, None)
            },
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 11, 3, 0, 0).unwrap();

        let local = live_panel(1, 1, &evening, now, parse_zone(Some("America/Los_Angeles")));
        assert_eq!(local.time_period, TimePeriod::Today);
        assert_eq!(local.slots[0].value, SlotValue::Number(12));

        let utc = live_panel(1, 1, &evening, now, Tz::UTC);
        assert_eq!(utc.time_period, TimePeriod::Today);
        assert_eq!(utc.slots[0].value, SlotValue::Number(7));

        // An hour before the 02:00 UTC match, LA still sees it as today
        let past_midnight = vec![evening[1].clone()];
        let panel = live_panel(1, 1, &past_midnight, now, Tz::America__Los_Angeles);
        assert_eq!(panel.time_period, TimePeriod::Today);
        let panel = live_panel(1, 1, &past_midnight, now + Duration::hours(8), Tz::America__Los_Angeles);
        assert_eq!(panel.time_period, TimePeriod::Past);
    }

    #[test]
    fn test_parse_zone_falls_back_to_utc() {
        assert_eq!(parse_zone(None), Tz::UTC);
        assert_eq!(parse_zone(Some("  ")), Tz::UTC);
        assert_eq!(parse_zone(Some("Mars/Olympus_Mons")), Tz::UTC);
        assert_eq!(parse_zone(Some("America/New_York")), Tz::America__New_York);
    }

    #[test]
    fn test_time_period_serialization() {
        assert_eq!(serde_json::to_string(&TimePeriod::NoHistory).unwrap(), "\"N/A\"");
        assert_eq!(serde_json::to_string(&SlotValue::Placeholder("---")).unwrap(), "\"---\"");
        assert_eq!(serde_json::to_string(&SlotValue::Number(4)).unwrap(), "4");
    }

    #[test]
    fn test_describe() {
        let summary = describe(&[5, 2, 1, 2]).unwrap();
        assert_eq!(summary.mean, 2.5);
        assert_eq!(summary.median, 2.0);
        assert_eq!(summary.mode, Some(2));
        assert_eq!((summary.min, summary.max, summary.range), (1, 5, 4));

        assert_eq!(describe(&[1, 2, 3]).unwrap().mode, None);
        assert_eq!(describe(&[3, 3, 1, 1]).unwrap().mode, Some(1));
        assert!(describe(&[]).is_none());
    }

    #[test]
    fn test_spread_and_percentiles() {
        let spread = spread(&[2, 4, 4, 4, 5, 5, 7, 9]).unwrap();
        assert_eq!(spread.mean, 5.0);
        assert_eq!(spread.variance, 4.0);
        assert_eq!(spread.std_dev, 2.0);

        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.25), 1.75);
        assert_eq!(percentile(&sorted, 0.50), 2.5);
        assert_eq!(percentile(&sorted, 0.75), 3.25);
        assert_eq!(percentile(&[7.0], 0.5), 7.0);
        assert!(super::spread(&[1]).is_none());
    }

    fn matches(count: i64) -> Vec<GameStat> {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| GameStat {
                played_at: start + Duration::hours(i),
                stat_value: (i % 7) as i32,
                ..fact(1, 1, 0, "Kills", 0, None)
            })
            .collect()
    }

    #[test]
    fn test_ticker_tiers() {
        let empty = ticker("Ana", "Halo", &[], Tz::UTC);
        assert_eq!(empty.games_played, 0);
        assert_eq!(empty.facts.len(), 1);

        let one = ticker("Ana", "Halo", &matches(1), Tz::UTC);
        assert_eq!(one.games_played, 1);
        assert!(one.facts[0].starts_with("Ana's best Kills in Halo was 0 on January 01, 2026"));
        assert!(!one.facts.iter().any(|f| f.contains("median")));

        let three = ticker("Ana", "Halo", &matches(3), Tz::UTC);
        assert!(three.facts.iter().any(|f| f.contains("The median Kills for Ana in Halo is 1.")));
        assert!(!three.facts.iter().any(|f| f.contains("standard deviation")));

        let many = ticker("Ana", "Halo", &matches(31), Tz::UTC);
        assert_eq!(many.games_played, 31);
        assert!(many.facts.iter().any(|f| f.contains("standard deviation")));
        assert!(many.facts.iter().any(|f| f.contains("most frequently scores")));
    }

    #[test]
    fn test_ticker_best_and_highest() {
        let facts = vec![
            fact(1, 2, 8, "Kills", 9, None),
            fact(1, 3, 8, "Kills", 9, None),
            fact(1, 3, 8, "Assists", 11, None),
        ];
        let ticker = ticker("Ana", "Halo", &facts, Tz::UTC);
        assert_eq!(ticker.games_played, 2);
        assert!(ticker.facts.contains(&"Ana's best Kills in Halo was 9 on March 02, 2026.".to_string()));
        assert!(ticker.facts.contains(&"The highest Assists recorded for Halo is 11.".to_string()));
    }
}
