//! Relative, class position and standings orderings.
//!
//! All orderings are lists of indices into the telemetry vehicle list. The ordering functions
//! are pure so they can be exercised without a running session.

use std::cmp::Ordering;
use std::collections::HashMap;

use itertools::Itertools;

use crate::PaddockError;
use crate::calc;
use crate::config::{ModuleTiming, RelativeConfig};
use crate::info::{ClassPosition, Published, RelativeInfo};
use crate::telemetry::{SessionInfo, TelemetryData};

use super::DataModule;

/// Rows always shown on each side of the player in the relative list
pub const RELATIVE_BASE_ROWS: usize = 3;

/// Ranking inputs of one vehicle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankInput {
    pub index: usize,
    pub class_name: String,
    /// Overall place, 1 is the leader
    pub place: u32,
    pub qualify_place: u32,
    /// Distance to the player along the track, positive ahead
    pub relative_distance: f64,
    pub best_laptime: f64,
    pub last_laptime: f64,
    pub is_last_lap_valid: bool,
    pub in_pits: bool,
    pub time_behind_leader: f64,
}

impl RankInput {
    pub fn collect(telemetry: &TelemetryData, track_length_m: f64) -> Vec<RankInput> {
        let player_distance = telemetry.lap_distance(None);
        telemetry.vehicles[..telemetry.total_vehicles()]
            .iter()
            .enumerate()
            .map(|(index, vehicle)| RankInput {
                index,
                class_name: vehicle.class_name.clone(),
                place: vehicle.place,
                qualify_place: vehicle.qualify_place,
                relative_distance: if index == telemetry.player_index {
                    0.
                } else {
                    calc::circular_relative_distance(
                        track_length_m,
                        player_distance,
                        vehicle.lap_distance_m,
                    )
                },
                best_laptime: vehicle.best_laptime_s,
                last_laptime: vehicle.last_laptime_s,
                is_last_lap_valid: vehicle.is_last_lap_valid,
                in_pits: vehicle.in_pits,
                time_behind_leader: vehicle.time_behind_leader_s,
            })
            .collect()
    }
}

fn time_order(a: f64, b: f64) -> Ordering {
    let a = if a > 0. { a } else { f64::MAX };
    let b = if b > 0. { b } else { f64::MAX };
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Vehicle indices sorted by relative distance, furthest ahead first
pub fn sort_by_relative_distance(vehicles: &[RankInput]) -> Vec<usize> {
    vehicles
        .iter()
        .sorted_by(|a, b| {
            b.relative_distance
                .partial_cmp(&a.relative_distance)
                .unwrap_or(Ordering::Equal)
                .then(a.index.cmp(&b.index))
        })
        .map(|v| v.index)
        .collect()
}

/// Player-centered window over the circular distance ordering.
///
/// The result always has `ahead + 1 + behind` rows with the player at row `ahead`. Vehicles are
/// picked alternately ahead and behind, wrapping around the ordering, and never twice; missing
/// rows are `None`.
pub fn relative_list(
    sorted: &[usize],
    player_index: usize,
    ahead: usize,
    behind: usize,
) -> Vec<Option<usize>> {
    let Some(player_pos) = sorted.iter().position(|i| *i == player_index) else {
        return Vec::new();
    };
    let total = sorted.len();
    let mut used = vec![false; total];
    used[player_pos] = true;
    let mut front = Vec::with_capacity(ahead);
    let mut rear = Vec::with_capacity(behind);

    for step in 1..=ahead.max(behind) {
        if step <= ahead {
            let pos = (player_pos + total - step % total) % total;
            if !used[pos] {
                used[pos] = true;
                front.push(sorted[pos]);
            }
        }
        if step <= behind {
            let pos = (player_pos + step) % total;
            if !used[pos] {
                used[pos] = true;
                rear.push(sorted[pos]);
            }
        }
    }

    let mut rows = Vec::with_capacity(ahead + behind + 1);
    rows.extend(std::iter::repeat_n(None, ahead - front.len()));
    rows.extend(front.iter().rev().map(|i| Some(*i)));
    rows.push(Some(player_index));
    rows.extend(rear.iter().map(|i| Some(*i)));
    rows.extend(std::iter::repeat_n(None, behind - rear.len()));
    rows
}

/// Position of every vehicle within its class, ordered by vehicle index
pub fn class_positions(vehicles: &[RankInput]) -> Vec<ClassPosition> {
    let mut positions: Vec<ClassPosition> = vehicles
        .iter()
        .map(|v| ClassPosition {
            vehicle_index: v.index,
            class_name: v.class_name.clone(),
            ..Default::default()
        })
        .collect();

    let classes = vehicles.iter().into_group_map_by(|v| v.class_name.clone());
    for (_, mut members) in classes {
        members.sort_by_key(|v| (v.place, v.index));
        let class_best = members
            .iter()
            .map(|v| v.best_laptime)
            .filter(|t| *t > 0.)
            .min_by(|a, b| time_order(*a, *b))
            .unwrap_or(0.);
        let fastest_last = members
            .iter()
            .filter(|v| v.is_last_lap_valid && !v.in_pits && v.last_laptime > 0.)
            .min_by(|a, b| time_order(a.last_laptime, b.last_laptime))
            .map(|v| v.index);

        let mut ahead: Option<&RankInput> = None;
        for (rank, member) in members.iter().enumerate() {
            if let Some(position) = positions.get_mut(member.index) {
                position.position_in_class = rank as u32 + 1;
                position.class_best_laptime = class_best;
                position.ahead_in_class = ahead.map(|v| v.index);
                position.gap_to_next_in_class = ahead
                    .map(|v| (member.time_behind_leader - v.time_behind_leader).max(0.))
                    .unwrap_or(0.);
                position.is_class_fastest_last_lap = fastest_last == Some(member.index);
            }
            ahead = Some(member);
        }
    }
    positions
}

/// Ranks (0 based) shown in a standings list of `total` vehicles.
///
/// Shows everything when it fits. Otherwise the top `min_top` ranks are always shown and the
/// remaining rows form a window around the player, clamped to the field. Without a player the
/// top `limit` ranks are shown.
pub fn standings_window(
    total: usize,
    player_rank: Option<usize>,
    limit: usize,
    min_top: usize,
) -> Vec<usize> {
    let limit = limit.max(1);
    if total <= limit {
        return (0..total).collect();
    }
    let min_top = min_top.min(limit.saturating_sub(1));
    let Some(player_rank) = player_rank else {
        return (0..limit).collect();
    };

    let count = limit - min_top;
    let rear = (count - 1) / 2;
    let front = count - rear;
    let start = (player_rank + 1)
        .saturating_sub(front)
        .max(min_top)
        .min(total - count);
    (0..min_top).chain(start..start + count).collect()
}

/// Standings list, `None` separates class groups in split mode
pub fn build_standings(
    vehicles: &[RankInput],
    player_index: usize,
    config: &RelativeConfig,
) -> Vec<Option<usize>> {
    let class_count = vehicles.iter().map(|v| &v.class_name).unique().count();
    if class_count > 1 && config.split_mode_enable {
        let player_class = vehicles
            .get(player_index)
            .map(|v| v.class_name.as_str())
            .unwrap_or_default();
        let groups = vehicles.iter().into_group_map_by(|v| v.class_name.clone());
        let mut groups: Vec<(String, Vec<&RankInput>)> = groups.into_iter().collect();
        for (_, members) in groups.iter_mut() {
            members.sort_by_key(|v| (v.place, v.index));
        }
        groups.sort_by(|a, b| {
            let best_a = a.1.iter().map(|v| v.best_laptime).min_by(|x, y| time_order(*x, *y));
            let best_b = b.1.iter().map(|v| v.best_laptime).min_by(|x, y| time_order(*x, *y));
            time_order(best_a.unwrap_or(0.), best_b.unwrap_or(0.)).then(a.0.cmp(&b.0))
        });

        let mut standings = Vec::new();
        for (class_name, members) in groups {
            if !standings.is_empty() {
                standings.push(None);
            }
            let is_player_class = class_name == player_class;
            let (limit, min_top) = if is_player_class {
                (config.max_vehicles_player_class, config.min_top_vehicles)
            } else {
                (config.max_vehicles_other_class, 0)
            };
            let player_rank = if is_player_class {
                members.iter().position(|v| v.index == player_index)
            } else {
                None
            };
            standings.extend(
                standings_window(members.len(), player_rank, limit, min_top)
                    .into_iter()
                    .map(|rank| Some(members[rank].index)),
            );
        }
        standings
    } else {
        let ordered: Vec<&RankInput> = vehicles
            .iter()
            .sorted_by_key(|v| (v.place, v.index))
            .collect();
        let player_rank = ordered.iter().position(|v| v.index == player_index);
        standings_window(
            ordered.len(),
            player_rank,
            config.max_vehicles_standings,
            config.min_top_vehicles,
        )
        .into_iter()
        .map(|rank| Some(ordered[rank].index))
        .collect()
    }
}

/// Qualifying order grouped by class, classes in name order
pub fn qualify_grid(vehicles: &[RankInput]) -> Vec<usize> {
    vehicles
        .iter()
        .sorted_by(|a, b| {
            a.class_name
                .cmp(&b.class_name)
                .then(time_order(a.qualify_place as f64, b.qualify_place as f64))
                .then(a.index.cmp(&b.index))
        })
        .map(|v| v.index)
        .collect()
}

/// Relative calculator, owns the relative section of the read-model
pub struct RelativeModule {
    config: RelativeConfig,
    output: Published<RelativeInfo>,
    vehicle_count: usize,
    qualify_grid: Vec<usize>,
}

impl RelativeModule {
    pub fn new(config: RelativeConfig, output: Published<RelativeInfo>) -> Self {
        Self {
            config,
            output,
            vehicle_count: 0,
            qualify_grid: Vec::new(),
        }
    }

    pub fn compute(&mut self, telemetry: &TelemetryData, track_length_m: f64) -> RelativeInfo {
        let vehicles = RankInput::collect(telemetry, track_length_m);
        if vehicles.len() != self.vehicle_count {
            self.vehicle_count = vehicles.len();
            self.qualify_grid = qualify_grid(&vehicles);
        }

        let sorted = sort_by_relative_distance(&vehicles);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for vehicle in &vehicles {
            *counts.entry(vehicle.class_name.as_str()).or_default() += 1;
        }

        RelativeInfo {
            relative: relative_list(
                &sorted,
                telemetry.player_index,
                RELATIVE_BASE_ROWS + self.config.additional_front,
                RELATIVE_BASE_ROWS + self.config.additional_behind,
            ),
            standings: build_standings(&vehicles, telemetry.player_index, &self.config),
            class_positions: class_positions(&vehicles),
            qualify_grid: self.qualify_grid.clone(),
            is_multi_class: counts.len() > 1,
        }
    }
}

impl DataModule for RelativeModule {
    fn name(&self) -> &'static str {
        "relative"
    }

    fn timing(&self) -> &ModuleTiming {
        &self.config.timing
    }

    fn update(
        &mut self,
        session_info: &SessionInfo,
        telemetry: &TelemetryData,
    ) -> Result<(), PaddockError> {
        let info = self.compute(telemetry, session_info.track_length_m);
        self.output.set(info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::VehicleTelemetry;
    use proptest::prelude::*;

    fn field(classes: &[&str]) -> Vec<RankInput> {
        classes
            .iter()
            .enumerate()
            .map(|(i, class)| RankInput {
                index: i,
                class_name: class.to_string(),
                place: i as u32 + 1,
                qualify_place: (classes.len() - i) as u32,
                relative_distance: -(i as f64) * 10.,
                best_laptime: 90. + i as f64,
                last_laptime: 91. + i as f64,
                is_last_lap_valid: true,
                time_behind_leader: i as f64 * 1.5,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_relative_wraps_around_grid() {
        // player at the head of the distance ordering
        let sorted: Vec<usize> = (0..10).collect();
        let rows = relative_list(&sorted, 0, 3, 3);
        assert_eq!(
            rows,
            vec![Some(7), Some(8), Some(9), Some(0), Some(1), Some(2), Some(3)]
        );
    }

    #[test]
    fn test_relative_pads_small_fields() {
        let rows = relative_list(&[2, 0, 1], 0, 3, 3);
        assert_eq!(rows, vec![None, None, Some(2), Some(0), Some(1), None, None]);
        assert_eq!(relative_list(&[0], 0, 3, 4).len(), 8);
        assert!(relative_list(&[1, 2], 0, 3, 3).is_empty());
    }

    #[test]
    fn test_relative_distance_ordering() {
        let mut vehicles = field(&["GT3"; 4]);
        vehicles[2].relative_distance = 300.;
        vehicles[0].relative_distance = 0.;
        assert_eq!(sort_by_relative_distance(&vehicles), vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_class_positions() {
        let mut vehicles = field(&["LMP2", "GT3", "LMP2", "GT3", "GT3"]);
        vehicles[4].last_laptime = 80.;
        vehicles[3].in_pits = true;
        vehicles[3].last_laptime = 70.;
        let positions = class_positions(&vehicles);

        assert_eq!(positions.len(), 5);
        assert_eq!(positions[1].position_in_class, 1);
        assert_eq!(positions[3].position_in_class, 2);
        assert_eq!(positions[3].ahead_in_class, Some(1));
        assert!((positions[3].gap_to_next_in_class - 3.).abs() < 1e-9);
        assert_eq!(positions[2].position_in_class, 2);
        assert_eq!(positions[2].class_best_laptime, 90.);
        assert_eq!(positions[4].class_best_laptime, 91.);
        assert!(positions[4].is_class_fastest_last_lap);
        assert!(!positions[3].is_class_fastest_last_lap);
    }

    #[test]
    fn test_standings_window() {
        assert_eq!(standings_window(5, Some(4), 10, 3), vec![0, 1, 2, 3, 4]);
        // 7 window rows: 4 up to the player, 3 after
        assert_eq!(
            standings_window(30, Some(15), 10, 3),
            vec![0, 1, 2, 12, 13, 14, 15, 16, 17, 18]
        );
        assert_eq!(
            standings_window(30, Some(29), 10, 3),
            vec![0, 1, 2, 23, 24, 25, 26, 27, 28, 29]
        );
        assert_eq!(
            standings_window(30, Some(1), 10, 3),
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]
        );
        assert_eq!(standings_window(30, None, 4, 3), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_split_standings_groups_by_class_pace() {
        let mut vehicles = field(&["GT3", "LMP2", "GT3", "LMP2", "GT3"]);
        vehicles[1].best_laptime = 80.;
        let config = RelativeConfig {
            max_vehicles_other_class: 1,
            ..Default::default()
        };
        let standings = build_standings(&vehicles, 2, &config);
        assert_eq!(standings, vec![Some(1), None, Some(0), Some(2), Some(4)]);

        let single = RelativeConfig {
            split_mode_enable: false,
            ..Default::default()
        };
        assert_eq!(
            build_standings(&vehicles, 2, &single),
            (0..5).map(Some).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_qualify_grid_rebuilt_on_count_change() {
        let mut module = RelativeModule::new(RelativeConfig::default(), Published::new());
        let mut telemetry = TelemetryData {
            vehicles: (0..3)
                .map(|i| VehicleTelemetry {
                    class_name: "GT3".to_string(),
                    place: i + 1,
                    qualify_place: 3 - i,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let info = module.compute(&telemetry, 1000.);
        assert_eq!(info.qualify_grid, vec![2, 1, 0]);
        assert!(!info.is_multi_class);
        assert_eq!(info.relative.len(), 7);

        // qualifying places changing alone do not rebuild the grid
        telemetry.vehicles[0].qualify_place = 0;
        assert_eq!(module.compute(&telemetry, 1000.).qualify_grid, vec![2, 1, 0]);

        telemetry.vehicles.push(VehicleTelemetry {
            class_name: "GT3".to_string(),
            qualify_place: 1,
            ..Default::default()
        });
        assert_eq!(module.compute(&telemetry, 1000.).qualify_grid, vec![2, 3, 1, 0]);
    }

    proptest! {
        #[test]
        fn prop_standings_complete_when_field_fits(
            total in 1usize..10,
            player in 0usize..10,
            min_top in 0usize..9,
        ) {
            let player = player % total;
            let ranks = standings_window(total, Some(player), 10, min_top);
            prop_assert_eq!(ranks, (0..total).collect::<Vec<_>>());
        }

        #[test]
        fn prop_standings_window_contains_top_and_player(
            total in 11usize..128,
            player in 0usize..128,
            limit in 2usize..11,
            min_top in 0usize..10,
        ) {
            let player = player % total;
            let min_top = min_top.min(limit - 1);
            let ranks = standings_window(total, Some(player), limit, min_top);
            prop_assert_eq!(ranks.len(), limit);
            prop_assert!(ranks.contains(&player));
            prop_assert!((0..min_top).all(|rank| ranks.contains(&rank)));
            prop_assert!(ranks.iter().all(|rank| *rank < total));
            prop_assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]));
        }

        #[test]
        fn prop_relative_indices_in_range_and_unique(
            total in 1usize..40,
            player in 0usize..40,
            ahead in 0usize..8,
            behind in 0usize..8,
        ) {
            let sorted: Vec<usize> = (0..total).collect();
            let player = player % total;
            let rows = relative_list(&sorted, player, ahead, behind);
            prop_assert_eq!(rows.len(), ahead + behind + 1);
            prop_assert_eq!(rows[ahead], Some(player));
            let present: Vec<usize> = rows.iter().flatten().copied().collect();
            prop_assert!(present.iter().all(|i| *i < total));
            prop_assert_eq!(present.iter().unique().count(), present.len());
        }
    }
}
