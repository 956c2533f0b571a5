/** ------------------------------------------------------------
 * Device energy: radio plus peripherals
 * ------------------------------------------------------------- */
use crate::packet::{PeripheralSample, PeripheralState};
use crate::profile::ProfileCommon;
use serde::{Deserialize, Serialize};

/**
 * Peripheral state logs of one trace, each sorted by time
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeripheralLogs {
    pub gps: Vec<PeripheralSample>,
    pub camera: Vec<PeripheralSample>,
    pub wifi: Vec<PeripheralSample>,
    pub bluetooth: Vec<PeripheralSample>,
    pub screen: Vec<PeripheralSample>,
}

#[rustfmt::skip]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyModel {
    pub total_rrc_energy         : f64,
    pub gps_active_energy        : f64,
    pub gps_standby_energy       : f64,
    pub total_gps_energy         : f64,
    pub camera_energy            : f64,
    pub wifi_active_energy       : f64,
    pub wifi_standby_energy      : f64,
    pub total_wifi_energy        : f64,
    pub bluetooth_active_energy  : f64,
    pub bluetooth_standby_energy : f64,
    pub total_bluetooth_energy   : f64,
    pub screen_energy            : f64,
}

/**
 * Seconds spent in each state: every sample holds until the next one,
 * the last until `trace_end`.
 */
fn time_in_states(samples: &[PeripheralSample], trace_end: f64) -> (f64, f64) {
    let (mut active, mut standby) = (0.0, 0.0);
    for (i, sample) in samples.iter().enumerate() {
        let until = samples.get(i + 1).map_or(trace_end, |next| next.timestamp).min(trace_end);
        let span = (until - sample.timestamp).max(0.0);
        match sample.state {
            PeripheralState::Active => active += span,
            PeripheralState::Standby => standby += span,
            PeripheralState::Off => {}
        }
    }
    (active, standby)
}

impl EnergyModel {
    pub fn new(total_rrc_energy: f64, logs: &PeripheralLogs, power: &ProfileCommon, trace_end: f64) -> Self {
        let (gps_active, gps_standby) = time_in_states(&logs.gps, trace_end);
        let (camera_on, _) = time_in_states(&logs.camera, trace_end);
        let (wifi_active, wifi_standby) = time_in_states(&logs.wifi, trace_end);
        let (bt_active, bt_standby) = time_in_states(&logs.bluetooth, trace_end);
        let (screen_on, _) = time_in_states(&logs.screen, trace_end);

        let gps_active_energy = gps_active * power.power_gps_active;
        let gps_standby_energy = gps_standby * power.power_gps_standby;
        let wifi_active_energy = wifi_active * power.power_wifi_active;
        let wifi_standby_energy = wifi_standby * power.power_wifi_standby;
        let bluetooth_active_energy = bt_active * power.power_bluetooth_active;
        let bluetooth_standby_energy = bt_standby * power.power_bluetooth_standby;

        Self {
            total_rrc_energy,
            gps_active_energy,
            gps_standby_energy,
            total_gps_energy: gps_active_energy + gps_standby_energy,
            camera_energy: camera_on * power.power_camera_on,
            wifi_active_energy,
            wifi_standby_energy,
            total_wifi_energy: wifi_active_energy + wifi_standby_energy,
            bluetooth_active_energy,
            bluetooth_standby_energy,
            total_bluetooth_energy: bluetooth_active_energy + bluetooth_standby_energy,
            screen_energy: screen_on * power.power_screen_on,
        }
    }

    pub fn total_energy(&self) -> f64 {
        self.total_rrc_energy
            + self.total_gps_energy
            + self.camera_energy
            + self.total_wifi_energy
            + self.total_bluetooth_energy
            + self.screen_energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn peripheral_energy_from_intervals() {
        let logs = PeripheralLogs {
            gps: vec![
                PeripheralSample::new(0.0, PeripheralState::Active),
                PeripheralSample::new(10.0, PeripheralState::Standby),
                PeripheralSample::new(15.0, PeripheralState::Off),
            ],
            camera: vec![PeripheralSample::new(50.0, PeripheralState::Active)],
            wifi: vec![
                PeripheralSample::new(0.0, PeripheralState::Standby),
                PeripheralSample::new(30.0, PeripheralState::Active),
                PeripheralSample::new(40.0, PeripheralState::Off),
            ],
            bluetooth: vec![],
            screen: vec![
                PeripheralSample::new(0.0, PeripheralState::Active),
                PeripheralSample::new(20.0, PeripheralState::Off),
            ],
        };
        let power = ProfileCommon::default();
        let model = EnergyModel::new(3.0, &logs, &power, 60.0);

        assert_relative_eq!(model.gps_active_energy, 10.0 * 0.28);
        assert_relative_eq!(model.gps_standby_energy, 5.0 * 0.02);
        assert_relative_eq!(model.camera_energy, 10.0 * 0.95);
        assert_relative_eq!(model.wifi_standby_energy, 30.0 * 0.02);
        assert_relative_eq!(model.wifi_active_energy, 10.0 * 0.403);
        assert_relative_eq!(model.total_wifi_energy, 0.6 + 4.03, epsilon = 1e-9);
        assert_eq!(model.total_bluetooth_energy, 0.0);
        assert_relative_eq!(model.screen_energy, 20.0 * 0.58);
        assert_relative_eq!(model.total_energy(), 3.0 + 2.8 + 0.1 + 9.5 + 4.63 + 11.6, epsilon = 1e-9);
    }

    #[test]
    fn samples_past_trace_end_are_ignored() {
        let logs = PeripheralLogs {
            screen: vec![PeripheralSample::new(70.0, PeripheralState::Active)],
            ..Default::default()
        };
        let model = EnergyModel::new(0.0, &logs, &ProfileCommon::default(), 60.0);
        assert_eq!(model.screen_energy, 0.0);
    }
}
