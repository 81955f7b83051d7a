// Forecasting math shared by the fuel and energy calculators

use crate::calc;
use crate::telemetry::SessionState;

/// Expected usage of the running lap.
///
/// `reference_used` is the reference lap's usage at the same distance, so the difference is how
/// much more (or less) the current lap uses than the reference.
pub fn estimate_consumption(last_valid_usage: f64, used_this_lap: f64, reference_used: f64) -> f64 {
    (last_valid_usage + used_this_lap - reference_used).max(0.)
}

/// Laps left in the session counting from the player's position, including the rest of the
/// current lap.
pub fn laps_remaining(session: &SessionState, laps_done: u32, lap_into: f64, pace: f64) -> f64 {
    if session.is_lap_type() {
        (session.total_laps as f64 - laps_done as f64 - lap_into).max(0.)
    } else {
        calc::end_timer_laps_remain(lap_into, pace, session.time_left_s)
    }
}

/// Amount left at the line after the last full lap the current amount can complete
pub fn end_of_stint_amount(amount_current: f64, used_this_lap: f64, consumption: f64) -> f64 {
    if consumption <= 0. {
        return amount_current;
    }
    let at_lap_start = amount_current + used_this_lap;
    let full_laps = (at_lap_start / consumption).floor();
    (at_lap_start - full_laps * consumption).max(0.)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ForecastInput {
    pub capacity: f64,
    pub amount_current: f64,
    pub used_this_lap: f64,
    pub estimated_consumption: f64,
    pub laps_remaining: f64,
    /// Pace lap time in seconds, used for the minutes forecast
    pub pace: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Forecast {
    pub amount_need_absolute: f64,
    pub amount_need_relative: f64,
    pub amount_end_stint: f64,
    pub amount_to_add: f64,
    pub pit_stops_late: f64,
    pub pit_stops_early: f64,
    pub one_less_pit_consumption: f64,
    pub estimated_laps_left: f64,
    pub estimated_minutes_left: f64,
}

impl Forecast {
    pub fn compute(input: &ForecastInput) -> Self {
        let consumption = input.estimated_consumption;
        let amount_need_absolute = input.laps_remaining * consumption;
        let amount_need_relative = amount_need_absolute - input.amount_current;
        let amount_end_stint =
            end_of_stint_amount(input.amount_current, input.used_this_lap, consumption);

        let pit_stops_late =
            calc::div_or_zero(amount_need_relative, input.capacity - amount_end_stint).max(0.);
        let pit_stops_early = calc::div_or_zero(
            amount_need_relative,
            input.capacity - amount_end_stint - consumption,
        )
        .max(0.);

        let one_less_pit_consumption = if amount_need_relative > 0. && input.laps_remaining > 0.
        {
            let stops_needed = pit_stops_late.ceil();
            ((stops_needed - 1.).max(0.) * input.capacity + input.amount_current)
                / input.laps_remaining
        } else {
            0.
        };

        let estimated_laps_left = calc::div_or_zero(input.amount_current, consumption);
        Self {
            amount_need_absolute,
            amount_need_relative,
            amount_end_stint,
            amount_to_add: amount_need_relative.clamp(0., input.capacity.max(0.)),
            pit_stops_late,
            pit_stops_early,
            one_less_pit_consumption,
            estimated_laps_left,
            estimated_minutes_left: estimated_laps_left * input.pace / 60.,
        }
    }
}
