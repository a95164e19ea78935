//! Rewards - XP formula, levels and progression titles.
//!
//! Everything here is a pure function of finished-run statistics.

use crate::run_tracker::RunStats;
use crate::territory::TerritoryStats;
use serde::Serialize;

/// XP per kilometer before bonuses.
pub const XP_PER_KM: f64 = 100.0;

/// Flat XP per captured cell.
pub const XP_PER_CELL: u64 = 25;

/// Floor for the distance component.
pub const MIN_RUN_XP: u64 = 10;

/// XP per level step.
pub const XP_PER_LEVEL: u64 = 1000;

/// XP earned for distance and pace alone.
///
/// `round(km × 100)`, then ×1.5 under 5 min/km or ×1.25 under 6 min/km
/// (only when the pace is known), then ×1.2 for group runs. Rounded after
/// each multiplier, never below [`MIN_RUN_XP`].
pub fn calculate_xp(distance_km: f64, avg_pace: f64, group_run: bool) -> u64 {
    let mut xp = (distance_km.max(0.0) * XP_PER_KM).round();

    if avg_pace > 0.0 && avg_pace < 5.0 {
        xp = (xp * 1.5).round();
    } else if avg_pace > 0.0 && avg_pace < 6.0 {
        xp = (xp * 1.25).round();
    }

    if group_run {
        xp = (xp * 1.2).round();
    }

    (xp as u64).max(MIN_RUN_XP)
}

/// Total XP for a finished run, including the territory bonus.
pub fn run_xp(stats: &RunStats, territory: &TerritoryStats, group_run: bool) -> u64 {
    let cells = territory.cells_captured.len() as u64;
    calculate_xp(stats.distance_km, stats.average_pace, group_run) + cells * XP_PER_CELL
}

/// Level reached with the given lifetime XP (level 1 at 0 XP).
pub fn level_for_xp(xp: u64) -> u32 {
    (xp / XP_PER_LEVEL + 1) as u32
}

// ============================================================================
// PROGRESSION TITLES
// ============================================================================

/// A rank shown on the runner's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressionTitle {
    pub title: &'static str,
    /// Lowest level that holds this title
    pub min_level: u32,
    pub xp_required: u64,
    pub perk: &'static str,
}

pub const PROGRESSION_TITLES: [ProgressionTitle; 9] = [
    ProgressionTitle { title: "Rookie", min_level: 1, xp_required: 0, perk: "Basic territory capture" },
    ProgressionTitle { title: "Scout", min_level: 3, xp_required: 900, perk: "Profile badge" },
    ProgressionTitle { title: "Pathfinder", min_level: 5, xp_required: 2_500, perk: "Custom avatar border" },
    ProgressionTitle { title: "Street Runner", min_level: 10, xp_required: 10_000, perk: "Leaderboard highlight" },
    ProgressionTitle { title: "Street Commander", min_level: 15, xp_required: 22_500, perk: "Crew invite priority" },
    ProgressionTitle { title: "Territory King", min_level: 20, xp_required: 40_000, perk: "Map name tag" },
    ProgressionTitle { title: "Zone Ruler", min_level: 30, xp_required: 90_000, perk: "Season legacy banner" },
    ProgressionTitle { title: "City Dominator", min_level: 40, xp_required: 160_000, perk: "City-wide visibility" },
    ProgressionTitle { title: "Legend", min_level: 50, xp_required: 250_000, perk: "Permanent map marker" },
];

/// Title held at `level`.
pub fn title_for_level(level: u32) -> &'static ProgressionTitle {
    PROGRESSION_TITLES
        .iter()
        .rev()
        .find(|t| level >= t.min_level)
        .unwrap_or(&PROGRESSION_TITLES[0])
}

/// Next title above `level` and the XP still missing for it.
///
/// `None` once the top title is held. The XP gap saturates at zero.
pub fn next_title(level: u32, xp: u64) -> Option<(&'static ProgressionTitle, u64)> {
    PROGRESSION_TITLES
        .iter()
        .find(|t| level < t.min_level)
        .map(|t| (t, t.xp_required.saturating_sub(xp)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::territory::CellId;

    #[test]
    fn test_base_xp_and_floor() {
        assert_eq!(calculate_xp(3.0, 7.0, false), 300);
        assert_eq!(calculate_xp(0.0, 0.0, false), MIN_RUN_XP);
        assert_eq!(calculate_xp(0.04, 7.0, false), MIN_RUN_XP);
    }

    #[test]
    fn test_pace_bonus_tiers() {
        assert_eq!(calculate_xp(2.0, 4.5, false), 300);
        assert_eq!(calculate_xp(2.0, 5.5, false), 250);
        assert_eq!(calculate_xp(2.0, 6.0, false), 200);
        // Unknown pace earns no bonus
        assert_eq!(calculate_xp(2.0, 0.0, false), 200);
    }

    #[test]
    fn test_group_bonus_rounds_after_each_step() {
        // 1.01 km → 101 → ×1.25 = 126.25 → 126 → ×1.2 = 151.2 → 151
        assert_eq!(calculate_xp(1.01, 5.5, true), 151);
    }

    #[test]
    fn test_run_xp_adds_cell_bonus() {
        let stats = RunStats {
            distance_km: 1.0,
            average_pace: 5.0,
            ..RunStats::default()
        };
        let territory = TerritoryStats {
            cells_captured: vec![CellId::from_raw(1), CellId::from_raw(2)],
            ..TerritoryStats::default()
        };
        // 100 × 1.25 + 2 × 25
        assert_eq!(run_xp(&stats, &territory, false), 175);
    }

    #[test]
    fn test_level_for_xp() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(999), 1);
        assert_eq!(level_for_xp(1000), 2);
        assert_eq!(level_for_xp(25_400), 26);
    }

    #[test]
    fn test_title_for_level() {
        assert_eq!(title_for_level(0).title, "Rookie");
        assert_eq!(title_for_level(2).title, "Rookie");
        assert_eq!(title_for_level(3).title, "Scout");
        assert_eq!(title_for_level(19).title, "Street Commander");
        assert_eq!(title_for_level(20).title, "Territory King");
        assert_eq!(title_for_level(99).title, "Legend");
    }

    #[test]
    fn test_next_title() {
        let (title, needed) = next_title(1, 400).unwrap();
        assert_eq!(title.title, "Scout");
        assert_eq!(needed, 500);

        let (title, needed) = next_title(12, 30_000).unwrap();
        assert_eq!(title.title, "Street Commander");
        assert_eq!(needed, 0);

        assert!(next_title(50, 300_000).is_none());
    }
}
