// Renderer-ready vehicle records built from the rankings and raw telemetry

use crate::PaddockError;
use crate::calc;
use crate::config::{ModuleTiming, VehiclesConfig};
use crate::info::{ClassPosition, ModuleInfo, VehicleSnapshot, VehiclesInfo};
use crate::telemetry::{SessionInfo, TelemetryData};

use super::DataModule;

fn min_option(current: Option<f64>, value: f64) -> Option<f64> {
    Some(current.map_or(value, |current| current.min(value)))
}

/// Indices in drawing order: everyone else first, then the leader, then the player
pub fn draw_order(total: usize, leader: Option<usize>, player: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..total)
        .filter(|i| Some(*i) != leader && *i != player)
        .collect();
    if let Some(leader) = leader {
        if leader != player && leader < total {
            order.push(leader);
        }
    }
    if player < total {
        order.push(player);
    }
    order
}

pub fn build_vehicles(
    telemetry: &TelemetryData,
    track_length_m: f64,
    class_positions: &[ClassPosition],
    config: &VehiclesConfig,
) -> VehiclesInfo {
    let total = telemetry.total_vehicles();
    let player_index = telemetry.player_index;
    let player = telemetry.player();
    let player_progress = telemetry.lap_progress(None, track_length_m);

    let mut info = VehiclesInfo::default();
    for (index, vehicle) in telemetry.vehicles[..total].iter().enumerate() {
        let is_player = index == player_index;
        let class_position = class_positions
            .get(index)
            .filter(|position| position.vehicle_index == index);
        let relative_distance = if is_player {
            0.
        } else {
            calc::circular_relative_distance(
                track_length_m,
                player.lap_distance_m,
                vehicle.lap_distance_m,
            )
        };
        let relative_position = calc::rotate_coordinate(
            player.yaw_rad,
            vehicle.position[0] - player.position[0],
            vehicle.position[2] - player.position[2],
        );
        let lap_difference = if is_player {
            0
        } else {
            calc::lap_difference(
                telemetry.lap_progress(Some(index), track_length_m),
                player_progress,
                config.lap_difference_ahead_threshold,
                config.lap_difference_behind_threshold,
            )
        };
        let is_yellow = !vehicle.in_pits
            && (vehicle.is_yellow_flag || vehicle.speed_mps < config.yellow_flag_speed_mps);

        if !is_player {
            if relative_distance < 0. && !vehicle.in_pits && vehicle.speed_mps > 0. {
                info.nearest_traffic_s = min_option(
                    info.nearest_traffic_s,
                    -relative_distance / vehicle.speed_mps,
                );
            }
            if relative_distance > 0. && is_yellow {
                info.nearest_yellow_m = min_option(info.nearest_yellow_m, relative_distance);
            }
            info.nearest_line_m = min_option(
                info.nearest_line_m,
                calc::distance(&vehicle.position, &player.position),
            );
        }
        if vehicle.place == 1 {
            info.leader_index = Some(index);
        }

        info.vehicles.push(VehicleSnapshot {
            index,
            slot_id: vehicle.slot_id,
            driver_name: vehicle.driver_name.clone(),
            class_name: vehicle.class_name.clone(),
            place: vehicle.place,
            position_in_class: class_position.map_or(0, |p| p.position_in_class),
            is_player,
            in_pits: vehicle.in_pits,
            is_yellow,
            lap_difference,
            relative_distance,
            relative_position,
            gap_to_leader: vehicle.time_behind_leader_s,
            gap_to_next: vehicle.time_behind_next_s,
            gap_to_next_in_class: class_position.map_or(0., |p| p.gap_to_next_in_class),
            best_laptime: vehicle.best_laptime_s,
            last_laptime: vehicle.last_laptime_s,
            is_last_lap_valid: vehicle.is_last_lap_valid,
            pit_stops: vehicle.pit_stops,
            speed: vehicle.speed_mps,
        });
    }
    info.draw_order = draw_order(total, info.leader_index, player_index);
    info
}

/// Vehicles pass, reads the relative section and owns the vehicles section
pub struct VehiclesModule {
    config: VehiclesConfig,
    info: ModuleInfo,
}

impl VehiclesModule {
    pub fn new(config: VehiclesConfig, info: ModuleInfo) -> Self {
        Self { config, info }
    }
}

impl DataModule for VehiclesModule {
    fn name(&self) -> &'static str {
        "vehicles"
    }

    fn timing(&self) -> &ModuleTiming {
        &self.config.timing
    }

    fn update(
        &mut self,
        session_info: &SessionInfo,
        telemetry: &TelemetryData,
    ) -> Result<(), PaddockError> {
        let vehicles = self.info.relative.read(|relative| {
            build_vehicles(
                telemetry,
                session_info.track_length_m,
                &relative.class_positions,
                &self.config,
            )
        });
        self.info.vehicles.set(vehicles);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::VehicleTelemetry;
    use std::f64::consts::FRAC_PI_2;

    fn vehicle(place: u32, laps: u32, distance: f64, speed: f64, position: [f64; 3]) -> VehicleTelemetry {
        VehicleTelemetry {
            place,
            laps_done: laps,
            lap_distance_m: distance,
            speed_mps: speed,
            position,
            ..Default::default()
        }
    }

    #[test]
    fn test_draw_order_puts_leader_and_player_last() {
        assert_eq!(draw_order(5, Some(2), 0), vec![1, 3, 4, 2, 0]);
        assert_eq!(draw_order(3, Some(1), 1), vec![0, 2, 1]);
        assert_eq!(draw_order(3, None, 0), vec![1, 2, 0]);
    }

    #[test]
    fn test_nearest_scalars_and_lapped_flag() {
        let mut player = vehicle(2, 5, 500., 50., [0., 0., 0.]);
        player.is_player = true;
        let telemetry = TelemetryData {
            player_index: 0,
            vehicles: vec![
                player,
                // leader a lap ahead, 100m up the road
                vehicle(1, 6, 600., 50., [0., 0., 100.]),
                // 200m behind at 40 m/s
                vehicle(3, 5, 300., 40., [0., 0., -200.]),
                // stopped 50m ahead, same lap
                vehicle(4, 5, 550., 0., [30., 0., 40.]),
                // lapped car behind
                vehicle(5, 4, 450., 50., [0., 0., -50.]),
            ],
            ..Default::default()
        };
        let info = build_vehicles(&telemetry, 4000., &[], &VehiclesConfig::default());

        assert_eq!(info.vehicles.len(), 5);
        assert_eq!(info.vehicles[1].lap_difference, 1);
        assert_eq!(info.vehicles[3].lap_difference, 0);
        assert_eq!(info.vehicles[4].lap_difference, -1);
        assert!(info.vehicles[3].is_yellow);
        assert_eq!(info.leader_index, Some(1));
        assert_eq!(info.draw_order, vec![2, 3, 4, 1, 0]);

        assert_eq!(info.nearest_yellow_m, Some(50.));
        // lapped car 50m behind at 50 m/s
        assert_eq!(info.nearest_traffic_s, Some(1.));
        assert_eq!(info.nearest_line_m, Some(50.));
    }

    #[test]
    fn test_relative_position_follows_heading() {
        let mut player = vehicle(1, 0, 0., 50., [0., 0., 0.]);
        player.yaw_rad = FRAC_PI_2;
        let telemetry = TelemetryData {
            vehicles: vec![player, vehicle(2, 0, 10., 50., [10., 0., 0.])],
            ..Default::default()
        };
        let info = build_vehicles(&telemetry, 1000., &[], &VehiclesConfig::default());
        let (x, z) = info.vehicles[1].relative_position;
        let expected = calc::rotate_coordinate(FRAC_PI_2, 10., 0.);
        assert!((x - expected.0).abs() < 1e-9);
        assert!((z - expected.1).abs() < 1e-9);
        assert_eq!(info.vehicles[1].relative_distance, 10.);
    }

    #[test]
    fn test_module_uses_class_positions() {
        let info = ModuleInfo::new();
        info.relative.update(|relative| {
            relative.class_positions = vec![
                ClassPosition {
                    vehicle_index: 0,
                    position_in_class: 2,
                    gap_to_next_in_class: 1.5,
                    ..Default::default()
                },
                ClassPosition {
                    vehicle_index: 1,
                    position_in_class: 1,
                    ..Default::default()
                },
            ]
        });
        let mut module = VehiclesModule::new(VehiclesConfig::default(), info.clone());
        let telemetry = TelemetryData {
            vehicles: vec![
                vehicle(2, 0, 0., 50., [0.; 3]),
                vehicle(1, 0, 100., 50., [0.; 3]),
            ],
            ..Default::default()
        };
        module.update(&SessionInfo::default(), &telemetry).unwrap();
        let vehicles = info.vehicles.snapshot();
        assert_eq!(vehicles.vehicles[0].position_in_class, 2);
        assert_eq!(vehicles.vehicles[0].gap_to_next_in_class, 1.5);
        assert_eq!(vehicles.draw_order, vec![1, 0]);
    }
}
