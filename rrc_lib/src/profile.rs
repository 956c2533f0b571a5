/** ------------------------------------------------------------
 * Device/network energy profiles and their power models
 * ------------------------------------------------------------- */
use crate::errors::RrcError;
use crate::packet::Packet;
use crate::properties::Properties;
use crate::rrc_state::RrcState;
use crate::throughput::calculate_throughput;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileType {
    ThreeG,
    Lte,
    Wifi,
}

impl ProfileType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileType::ThreeG => "T3G",
            ProfileType::Lte => "LTE",
            ProfileType::Wifi => "WIFI",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, RrcError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "T3G" | "3G" => Ok(ProfileType::ThreeG),
            "LTE" => Ok(ProfileType::Lte),
            "WIFI" => Ok(ProfileType::Wifi),
            _ => Err(RrcError::UnknownProfileType(raw.to_string())),
        }
    }
}

/**
 * Settings shared by every network type: burst analysis thresholds and
 * the power draw of non-radio peripherals.
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileCommon {
    pub carrier                      : String,
    pub device                       : String,
    pub user_input_th                : f64, // s, burst directly caused by user input
    pub power_gps_active             : f64, // W
    pub power_gps_standby            : f64,
    pub power_camera_on              : f64,
    pub power_bluetooth_active       : f64,
    pub power_bluetooth_standby      : f64,
    pub power_screen_on              : f64,
    pub power_wifi_active            : f64, // also the WiFi radio model
    pub power_wifi_standby           : f64,
    pub burst_th                     : f64, // s, gap splitting bursts
    pub long_burst_th                : f64, // s, duration marking a burst long
    pub period_min_cycle             : f64, // s
    pub period_cycle_tol             : f64, // s
    pub period_min_samples           : u32,
    pub large_burst_duration         : f64, // s
    pub large_burst_size             : u64, // bytes
    pub close_spaced_burst_threshold : f64, // s
    pub throughput_window            : f64, // s
}

impl Default for ProfileCommon {
    fn default() -> Self {
        Self {
            carrier: "AT&T".to_string(),
            device: "Captivate - ad study".to_string(),
            user_input_th: 1.0,
            power_gps_active: 0.28,
            power_gps_standby: 0.02,
            power_camera_on: 0.95,
            power_bluetooth_active: 0.761,
            power_bluetooth_standby: 0.02,
            power_screen_on: 0.58,
            power_wifi_active: 0.403,
            power_wifi_standby: 0.02,
            burst_th: 1.5,
            long_burst_th: 5.0,
            period_min_cycle: 10.0,
            period_cycle_tol: 1.0,
            period_min_samples: 3,
            large_burst_duration: 5.0,
            large_burst_size: 100_000,
            close_spaced_burst_threshold: 10.0,
            throughput_window: 0.5,
        }
    }
}

impl ProfileCommon {
    fn read(props: &Properties) -> Self {
        let d = Self::default();
        Self {
            carrier: props.string_or("CARRIER", &d.carrier),
            device: props.string_or("DEVICE", &d.device),
            user_input_th: props.parse_or("USER_INPUT_TH", d.user_input_th),
            power_gps_active: props.parse_or("POWER_GPS_ACTIVE", d.power_gps_active),
            power_gps_standby: props.parse_or("POWER_GPS_STANDBY", d.power_gps_standby),
            power_camera_on: props.parse_or("POWER_CAMERA_ON", d.power_camera_on),
            power_bluetooth_active: props.parse_or("POWER_BLUETOOTH_ACTIVE", d.power_bluetooth_active),
            power_bluetooth_standby: props.parse_or("POWER_BLUETOOTH_STANDBY", d.power_bluetooth_standby),
            power_screen_on: props.parse_or("POWER_SCREEN_ON", d.power_screen_on),
            power_wifi_active: props.parse_or("POWER_WIFI_ACTIVE", d.power_wifi_active),
            power_wifi_standby: props.parse_or("POWER_WIFI_STANDBY", d.power_wifi_standby),
            burst_th: props.parse_or("BURST_TH", d.burst_th),
            long_burst_th: props.parse_or("LONG_BURST_TH", d.long_burst_th),
            period_min_cycle: props.parse_or("PERIOD_MIN_CYCLE", d.period_min_cycle),
            period_cycle_tol: props.parse_or("PERIOD_CYCLE_TOL", d.period_cycle_tol),
            period_min_samples: props.parse_or("PERIOD_MIN_SAMPLES", d.period_min_samples),
            large_burst_duration: props.parse_or("LARGE_BURST_DURATION", d.large_burst_duration),
            large_burst_size: props.parse_or("LARGE_BURST_SIZE", d.large_burst_size),
            close_spaced_burst_threshold: props.parse_or("CLOSE_SPACED_BURSTS", d.close_spaced_burst_threshold),
            throughput_window: props.parse_or("W_THROUGHPUT", d.throughput_window),
        }
    }

    fn write(&self, props: &mut Properties) {
        props.set("CARRIER", &self.carrier);
        props.set("DEVICE", &self.device);
        props.set("USER_INPUT_TH", self.user_input_th);
        props.set("POWER_GPS_ACTIVE", self.power_gps_active);
        props.set("POWER_GPS_STANDBY", self.power_gps_standby);
        props.set("POWER_CAMERA_ON", self.power_camera_on);
        props.set("POWER_BLUETOOTH_ACTIVE", self.power_bluetooth_active);
        props.set("POWER_BLUETOOTH_STANDBY", self.power_bluetooth_standby);
        props.set("POWER_SCREEN_ON", self.power_screen_on);
        props.set("POWER_WIFI_ACTIVE", self.power_wifi_active);
        props.set("POWER_WIFI_STANDBY", self.power_wifi_standby);
        props.set("BURST_TH", self.burst_th);
        props.set("LONG_BURST_TH", self.long_burst_th);
        props.set("PERIOD_MIN_CYCLE", self.period_min_cycle);
        props.set("PERIOD_CYCLE_TOL", self.period_cycle_tol);
        props.set("PERIOD_MIN_SAMPLES", self.period_min_samples);
        props.set("LARGE_BURST_DURATION", self.large_burst_duration);
        props.set("LARGE_BURST_SIZE", self.large_burst_size);
        props.set("CLOSE_SPACED_BURSTS", self.close_spaced_burst_threshold);
        props.set("W_THROUGHPUT", self.throughput_window);
    }
}

/**
 * UMTS timers, promotion delays, RLC queue model and state powers
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile3G {
    pub dch_fach_timer       : f64, // s, DCH inactivity before demotion
    pub fach_idle_timer      : f64, // s, FACH inactivity before demotion
    pub idle_dch_promo_min   : f64,
    pub idle_dch_promo_avg   : f64,
    pub idle_dch_promo_max   : f64,
    pub fach_dch_promo_min   : f64,
    pub fach_dch_promo_avg   : f64,
    pub fach_dch_promo_max   : f64,
    pub rlc_ul_th            : u32, // bytes, FACH->DCH uplink queue threshold
    pub rlc_dl_th            : u32, // bytes, FACH->DCH downlink queue threshold
    pub dch_timer_reset_size : u32, // bytes
    pub dch_timer_reset_win  : f64, // s
    pub rlc_ul_rate_p2       : f64, // queue drain time: p2*q^2 + p1*q + p0 (ms)
    pub rlc_ul_rate_p1       : f64,
    pub rlc_ul_rate_p0       : f64,
    pub rlc_dl_rate_p2       : f64,
    pub rlc_dl_rate_p1       : f64,
    pub rlc_dl_rate_p0       : f64,
    pub power_dch            : f64, // W
    pub power_fach           : f64,
    pub power_idle           : f64,
    pub power_idle_dch       : f64,
    pub power_fach_dch       : f64,
}

impl Default for Profile3G {
    fn default() -> Self {
        Self {
            dch_fach_timer: 5.0,
            fach_idle_timer: 12.0,
            idle_dch_promo_min: 1.5,
            idle_dch_promo_avg: 2.0,
            idle_dch_promo_max: 4.0,
            fach_dch_promo_min: 0.8,
            fach_dch_promo_avg: 1.5,
            fach_dch_promo_max: 3.0,
            rlc_ul_th: 543,
            rlc_dl_th: 475,
            dch_timer_reset_size: 320,
            dch_timer_reset_win: 0.3,
            rlc_ul_rate_p2: 0.0014,
            rlc_ul_rate_p1: 1.6,
            rlc_ul_rate_p0: 20.0,
            rlc_dl_rate_p2: 0.0,
            rlc_dl_rate_p1: 0.1,
            rlc_dl_rate_p0: 10.0,
            power_dch: 0.7,
            power_fach: 0.35,
            power_idle: 0.0,
            power_idle_dch: 0.53,
            power_fach_dch: 0.55,
        }
    }
}

impl Profile3G {
    fn read(props: &Properties) -> Self {
        let d = Self::default();
        Self {
            dch_fach_timer: props.parse_or("DCH_FACH_TIMER", d.dch_fach_timer),
            fach_idle_timer: props.parse_or("FACH_IDLE_TIMER", d.fach_idle_timer),
            idle_dch_promo_min: props.parse_or("IDLE_DCH_PROMO_MIN", d.idle_dch_promo_min),
            idle_dch_promo_avg: props.parse_or("IDLE_DCH_PROMO_AVG", d.idle_dch_promo_avg),
            idle_dch_promo_max: props.parse_or("IDLE_DCH_PROMO_MAX", d.idle_dch_promo_max),
            fach_dch_promo_min: props.parse_or("FACH_DCH_PROMO_MIN", d.fach_dch_promo_min),
            fach_dch_promo_avg: props.parse_or("FACH_DCH_PROMO_AVG", d.fach_dch_promo_avg),
            fach_dch_promo_max: props.parse_or("FACH_DCH_PROMO_MAX", d.fach_dch_promo_max),
            rlc_ul_th: props.parse_or("RLC_UL_TH", d.rlc_ul_th),
            rlc_dl_th: props.parse_or("RLC_DL_TH", d.rlc_dl_th),
            dch_timer_reset_size: props.parse_or("DCH_TIMER_RESET_SIZE", d.dch_timer_reset_size),
            dch_timer_reset_win: props.parse_or("DCH_TIMER_RESET_WIN", d.dch_timer_reset_win),
            rlc_ul_rate_p2: props.parse_or("RLC_UL_RATE_P2", d.rlc_ul_rate_p2),
            rlc_ul_rate_p1: props.parse_or("RLC_UL_RATE_P1", d.rlc_ul_rate_p1),
            rlc_ul_rate_p0: props.parse_or("RLC_UL_RATE_P0", d.rlc_ul_rate_p0),
            rlc_dl_rate_p2: props.parse_or("RLC_DL_RATE_P2", d.rlc_dl_rate_p2),
            rlc_dl_rate_p1: props.parse_or("RLC_DL_RATE_P1", d.rlc_dl_rate_p1),
            rlc_dl_rate_p0: props.parse_or("RLC_DL_RATE_P0", d.rlc_dl_rate_p0),
            power_dch: props.parse_or("POWER_DCH", d.power_dch),
            power_fach: props.parse_or("POWER_FACH", d.power_fach),
            power_idle: props.parse_or("POWER_IDLE", d.power_idle),
            power_idle_dch: props.parse_or("POWER_IDLE_DCH", d.power_idle_dch),
            power_fach_dch: props.parse_or("POWER_FACH_DCH", d.power_fach_dch),
        }
    }

    fn write(&self, props: &mut Properties) {
        props.set("DCH_FACH_TIMER", self.dch_fach_timer);
        props.set("FACH_IDLE_TIMER", self.fach_idle_timer);
        props.set("IDLE_DCH_PROMO_MIN", self.idle_dch_promo_min);
        props.set("IDLE_DCH_PROMO_AVG", self.idle_dch_promo_avg);
        props.set("IDLE_DCH_PROMO_MAX", self.idle_dch_promo_max);
        props.set("FACH_DCH_PROMO_MIN", self.fach_dch_promo_min);
        props.set("FACH_DCH_PROMO_AVG", self.fach_dch_promo_avg);
        props.set("FACH_DCH_PROMO_MAX", self.fach_dch_promo_max);
        props.set("RLC_UL_TH", self.rlc_ul_th);
        props.set("RLC_DL_TH", self.rlc_dl_th);
        props.set("DCH_TIMER_RESET_SIZE", self.dch_timer_reset_size);
        props.set("DCH_TIMER_RESET_WIN", self.dch_timer_reset_win);
        props.set("RLC_UL_RATE_P2", self.rlc_ul_rate_p2);
        props.set("RLC_UL_RATE_P1", self.rlc_ul_rate_p1);
        props.set("RLC_UL_RATE_P0", self.rlc_ul_rate_p0);
        props.set("RLC_DL_RATE_P2", self.rlc_dl_rate_p2);
        props.set("RLC_DL_RATE_P1", self.rlc_dl_rate_p1);
        props.set("RLC_DL_RATE_P0", self.rlc_dl_rate_p0);
        props.set("POWER_DCH", self.power_dch);
        props.set("POWER_FACH", self.power_fach);
        props.set("POWER_IDLE", self.power_idle);
        props.set("POWER_IDLE_DCH", self.power_idle_dch);
        props.set("POWER_FACH_DCH", self.power_fach_dch);
    }

    /**
     * Energy (J) spent in `state` over `[begin, end]`
     */
    pub fn energy(&self, begin: f64, end: f64, state: RrcState) -> f64 {
        let power = match state {
            RrcState::Dch | RrcState::TailDch => self.power_dch,
            RrcState::Fach | RrcState::TailFach => self.power_fach,
            RrcState::Idle => self.power_idle,
            RrcState::PromoIdleDch => self.power_idle_dch,
            RrcState::PromoFachDch => self.power_fach_dch,
            _ => 0.0,
        };
        (end - begin) * power
    }
}

/**
 * LTE DRX timers, ping cycles and the throughput-based power model
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileLte {
    pub promotion_time        : f64, // s
    pub inactivity_timer      : f64, // s, continuous reception tail
    pub drx_short_time        : f64, // s
    pub drx_ping_time         : f64, // s
    pub drx_long_time         : f64, // s
    pub idle_ping_time        : f64, // s
    pub drx_short_ping_period : f64, // s
    pub drx_long_ping_period  : f64, // s
    pub idle_ping_period      : f64, // s
    pub promotion_power       : f64, // W
    pub drx_short_ping_power  : f64,
    pub drx_long_ping_power   : f64,
    pub tail_power            : f64,
    pub idle_ping_power       : f64,
    pub idle_power            : f64,
    pub alpha_up              : f64, // mW/Mbps
    pub alpha_down            : f64, // mW/Mbps
    pub beta                  : f64, // W, base power while connected
}

impl Default for ProfileLte {
    fn default() -> Self {
        Self {
            promotion_time: 0.26,
            inactivity_timer: 0.1,
            drx_short_time: 0.02,
            drx_ping_time: 0.002,
            drx_long_time: 10.0,
            idle_ping_time: 0.043,
            drx_short_ping_period: 0.02,
            drx_long_ping_period: 0.04,
            idle_ping_period: 1.28,
            promotion_power: 1.21,
            drx_short_ping_power: 1.68,
            drx_long_ping_power: 1.68,
            tail_power: 1.06,
            idle_ping_power: 0.594,
            idle_power: 0.0,
            alpha_up: 438.39,
            alpha_down: 51.97,
            beta: 1.2,
        }
    }
}

impl ProfileLte {
    fn read(props: &Properties) -> Self {
        let d = Self::default();
        Self {
            promotion_time: props.parse_or("T_PROMOTION", d.promotion_time),
            inactivity_timer: props.parse_or("INACTIVITY_TIMER", d.inactivity_timer),
            drx_short_time: props.parse_or("T_SHORT_DRX", d.drx_short_time),
            drx_ping_time: props.parse_or("T_DRX_PING", d.drx_ping_time),
            drx_long_time: props.parse_or("T_LONG_DRX", d.drx_long_time),
            idle_ping_time: props.parse_or("T_IDLE_PING", d.idle_ping_time),
            drx_short_ping_period: props.parse_or("T_SHORT_DRX_PING_PERIOD", d.drx_short_ping_period),
            drx_long_ping_period: props.parse_or("T_LONG_DRX_PING_PERIOD", d.drx_long_ping_period),
            idle_ping_period: props.parse_or("T_IDLE_PING_PERIOD", d.idle_ping_period),
            promotion_power: props.parse_or("P_PROMOTION", d.promotion_power),
            drx_short_ping_power: props.parse_or("P_SHORT_DRX_PING", d.drx_short_ping_power),
            drx_long_ping_power: props.parse_or("P_LONG_DRX_PING", d.drx_long_ping_power),
            tail_power: props.parse_or("P_TAIL", d.tail_power),
            idle_ping_power: props.parse_or("P_IDLE_PING", d.idle_ping_power),
            idle_power: props.parse_or("P_IDLE", d.idle_power),
            alpha_up: props.parse_or("LTE_ALPHA_UP", d.alpha_up),
            alpha_down: props.parse_or("LTE_ALPHA_DOWN", d.alpha_down),
            beta: props.parse_or("LTE_BETA", d.beta),
        }
    }

    fn write(&self, props: &mut Properties) {
        props.set("T_PROMOTION", self.promotion_time);
        props.set("INACTIVITY_TIMER", self.inactivity_timer);
        props.set("T_SHORT_DRX", self.drx_short_time);
        props.set("T_DRX_PING", self.drx_ping_time);
        props.set("T_LONG_DRX", self.drx_long_time);
        props.set("T_IDLE_PING", self.idle_ping_time);
        props.set("T_SHORT_DRX_PING_PERIOD", self.drx_short_ping_period);
        props.set("T_LONG_DRX_PING_PERIOD", self.drx_long_ping_period);
        props.set("T_IDLE_PING_PERIOD", self.idle_ping_period);
        props.set("P_PROMOTION", self.promotion_power);
        props.set("P_SHORT_DRX_PING", self.drx_short_ping_power);
        props.set("P_LONG_DRX_PING", self.drx_long_ping_power);
        props.set("P_TAIL", self.tail_power);
        props.set("P_IDLE_PING", self.idle_ping_power);
        props.set("P_IDLE", self.idle_power);
        props.set("LTE_ALPHA_UP", self.alpha_up);
        props.set("LTE_ALPHA_DOWN", self.alpha_down);
        props.set("LTE_BETA", self.beta);
    }

    /**
     * Energy (J) spent in `state` over `[begin, end]`.
     *
     * Continuous reception is priced from the throughput of `packets`
     * sampled every `window` seconds. The DRX states are a duty cycle
     * of ping and tail power; idle adds whole paging cycles plus the
     * partial cycle left over at the end.
     */
    pub fn energy(&self, begin: f64, end: f64, state: RrcState, window: f64, packets: &[Packet]) -> f64 {
        let delta = end - begin;
        match state {
            RrcState::LtePromotion => delta * self.promotion_power,
            RrcState::LteCrTail => delta * self.beta,
            RrcState::LteContinuous => calculate_throughput(begin, end, window, packets)
                .iter()
                .map(|t| {
                    ((self.alpha_up / 1000.0) * t.upload_mbps()
                        + (self.alpha_down / 1000.0) * t.download_mbps()
                        + self.beta)
                        * t.sample_period()
                })
                .sum(),
            RrcState::LteDrxShort => self.drx_cycle_energy(delta, self.drx_short_ping_period, self.drx_short_ping_power),
            RrcState::LteDrxLong => self.drx_cycle_energy(delta, self.drx_long_ping_period, self.drx_long_ping_power),
            RrcState::LteIdle => {
                let cycles = (delta / self.idle_ping_period).trunc();
                let mut energy = cycles
                    * (self.idle_ping_time * self.idle_ping_power
                        + (self.idle_ping_period - self.idle_ping_time) * self.idle_power);
                let residual = delta % self.idle_ping_period;
                // the partial cycle is priced at ping power throughout
                energy += if residual <= self.idle_ping_time {
                    residual * self.idle_ping_power
                } else {
                    self.idle_ping_time * self.idle_ping_power
                        + (residual - self.idle_ping_time) * self.idle_ping_power
                };
                energy
            }
            _ => 0.0,
        }
    }

    fn drx_cycle_energy(&self, delta: f64, period: f64, ping_power: f64) -> f64 {
        (delta / period) * (self.drx_ping_time * ping_power + (period - self.drx_ping_time) * self.tail_power)
    }
}

#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileWifi {
    pub tail_time : f64, // s
}

impl Default for ProfileWifi {
    fn default() -> Self {
        Self { tail_time: 0.25 }
    }
}

impl ProfileWifi {
    fn read(props: &Properties) -> Self {
        let d = Self::default();
        Self {
            tail_time: props.parse_or("WIFI_TAIL_TIME", d.tail_time),
        }
    }

    fn write(&self, props: &mut Properties) {
        props.set("WIFI_TAIL_TIME", self.tail_time);
    }

    /**
     * The radio draws the shared WiFi active/standby powers
     */
    pub fn energy(&self, begin: f64, end: f64, state: RrcState, common: &ProfileCommon) -> f64 {
        let power = match state {
            RrcState::WifiActive | RrcState::WifiTail => common.power_wifi_active,
            RrcState::WifiIdle => common.power_wifi_standby,
            _ => 0.0,
        };
        (end - begin) * power
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProfileKind {
    ThreeG(Profile3G),
    Lte(ProfileLte),
    Wifi(ProfileWifi),
}

/**
 * Complete device profile: shared settings plus the radio model of one
 * network type. Treated as immutable for the duration of an analysis.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub common: ProfileCommon,
    pub kind: ProfileKind,
}

impl Profile {
    pub fn default_3g() -> Self {
        Self::default_for(ProfileType::ThreeG)
    }

    pub fn default_lte() -> Self {
        Self::default_for(ProfileType::Lte)
    }

    pub fn default_wifi() -> Self {
        Self::default_for(ProfileType::Wifi)
    }

    pub fn default_for(profile_type: ProfileType) -> Self {
        let (name, kind) = match profile_type {
            ProfileType::ThreeG => ("AT&T 3G", ProfileKind::ThreeG(Profile3G::default())),
            ProfileType::Lte => ("AT&T LTE", ProfileKind::Lte(ProfileLte::default())),
            ProfileType::Wifi => ("WiFi", ProfileKind::Wifi(ProfileWifi::default())),
        };
        Self {
            name: name.to_string(),
            common: ProfileCommon::default(),
            kind,
        }
    }

    pub fn profile_type(&self) -> ProfileType {
        match self.kind {
            ProfileKind::ThreeG(_) => ProfileType::ThreeG,
            ProfileKind::Lte(_) => ProfileType::Lte,
            ProfileKind::Wifi(_) => ProfileType::Wifi,
        }
    }

    /**
     * Build a profile from parsed properties.
     *
     * `PROFILE_TYPE` selects the network type (LTE when absent); every
     * other missing or unparsable key takes its default value.
     */
    pub fn from_properties(name: &str, props: &Properties) -> Result<Self, RrcError> {
        let profile_type = match props.get("PROFILE_TYPE") {
            Some(raw) => ProfileType::parse(raw)?,
            None => ProfileType::Lte,
        };
        let kind = match profile_type {
            ProfileType::ThreeG => ProfileKind::ThreeG(Profile3G::read(props)),
            ProfileType::Lte => ProfileKind::Lte(ProfileLte::read(props)),
            ProfileType::Wifi => ProfileKind::Wifi(ProfileWifi::read(props)),
        };
        Ok(Self {
            name: name.to_string(),
            common: ProfileCommon::read(props),
            kind,
        })
    }

    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.set("PROFILE_TYPE", self.profile_type().as_str());
        self.common.write(&mut props);
        match &self.kind {
            ProfileKind::ThreeG(p) => p.write(&mut props),
            ProfileKind::Lte(p) => p.write(&mut props),
            ProfileKind::Wifi(p) => p.write(&mut props),
        }
        props
    }

    /**
     * Load a profile file; the file stem becomes the profile name
     */
    pub fn load(path: &Path) -> Result<Self, RrcError> {
        let text = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_properties(&name, &Properties::parse(&text))
    }

    pub fn save(&self, path: &Path) -> Result<(), RrcError> {
        fs::write(path, self.to_properties().to_string())?;
        Ok(())
    }

    /**
     * Energy (J) of one RRC state interval under this profile.
     *
     * States belonging to a different network type cost nothing.
     */
    pub fn energy(&self, begin: f64, end: f64, state: RrcState, packets: &[Packet]) -> f64 {
        match &self.kind {
            ProfileKind::ThreeG(p) => p.energy(begin, end, state),
            ProfileKind::Lte(p) => p.energy(begin, end, state, self.common.throughput_window, packets),
            ProfileKind::Wifi(p) => p.energy(begin, end, state, &self.common),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Direction;
    use approx::assert_relative_eq;

    #[test]
    fn missing_type_defaults_to_lte() {
        let profile = Profile::from_properties("x", &Properties::new()).unwrap();
        assert_eq!(profile.profile_type(), ProfileType::Lte);
        assert_eq!(profile.common, ProfileCommon::default());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let props = Properties::parse("PROFILE_TYPE=5G\n");
        let result = Profile::from_properties("x", &props);
        assert!(matches!(result, Err(RrcError::UnknownProfileType(t)) if t == "5G"));
    }

    #[test]
    fn keys_override_defaults() {
        let props = Properties::parse(
            "PROFILE_TYPE=T3G\nDCH_FACH_TIMER=4\nFACH_DCH_PROMO_MAX=2.5\nBURST_TH=oops\n",
        );
        let profile = Profile::from_properties("custom", &props).unwrap();
        let ProfileKind::ThreeG(p) = &profile.kind else {
            panic!("expected a 3G profile");
        };
        assert_eq!(p.dch_fach_timer, 4.0);
        assert_eq!(p.fach_dch_promo_max, 2.5);
        assert_eq!(p.fach_dch_promo_avg, 1.5);
        assert_eq!(profile.common.burst_th, 1.5);
    }

    #[test]
    fn wifi_powers_are_shared_by_every_type() {
        let props = Properties::parse("PROFILE_TYPE=LTE\nPOWER_WIFI_ACTIVE=0.5\nPOWER_WIFI_STANDBY=0.01\n");
        let lte = Profile::from_properties("x", &props).unwrap();
        assert_eq!(lte.common.power_wifi_active, 0.5);
        assert_eq!(lte.common.power_wifi_standby, 0.01);

        let mut wifi = Profile::default_wifi();
        wifi.common = lte.common.clone();
        assert_relative_eq!(wifi.energy(0.0, 2.0, RrcState::WifiActive, &[]), 1.0);
        assert_relative_eq!(wifi.energy(0.0, 2.0, RrcState::WifiIdle, &[]), 0.02);
    }

    #[test]
    fn properties_round_trip_every_type() {
        for profile_type in [ProfileType::ThreeG, ProfileType::Lte, ProfileType::Wifi] {
            let mut profile = Profile::default_for(profile_type);
            profile.common.burst_th = 2.75;
            let text = profile.to_properties().to_string();
            let reloaded = Profile::from_properties(&profile.name, &Properties::parse(&text)).unwrap();
            assert_eq!(reloaded, profile);
        }
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galaxy.conf");
        Profile::default_wifi().save(&path).unwrap();
        let loaded = Profile::load(&path).unwrap();
        assert_eq!(loaded.name, "galaxy");
        assert_eq!(loaded.kind, Profile::default_wifi().kind);
    }

    #[test]
    fn energy_3g_by_state() {
        let p = Profile3G::default();
        assert_relative_eq!(p.energy(0.0, 2.0, RrcState::Dch), 1.4);
        assert_relative_eq!(p.energy(0.0, 2.0, RrcState::TailFach), 0.7);
        assert_relative_eq!(p.energy(0.0, 2.0, RrcState::PromoIdleDch), 1.06);
        assert_eq!(p.energy(0.0, 2.0, RrcState::WifiActive), 0.0);
    }

    #[test]
    fn energy_wifi_by_state() {
        let p = ProfileWifi::default();
        let common = ProfileCommon::default();
        assert_relative_eq!(p.energy(1.0, 3.0, RrcState::WifiTail, &common), 0.806);
        assert_relative_eq!(p.energy(1.0, 3.0, RrcState::WifiIdle, &common), 0.04);
        assert_eq!(p.energy(1.0, 3.0, RrcState::Dch, &common), 0.0);
    }

    #[test]
    fn energy_lte_drx_and_tail() {
        let p = ProfileLte::default();
        assert_relative_eq!(p.energy(0.0, 0.1, RrcState::LteCrTail, 0.5, &[]), 0.12);
        // one short cycle: 0.002 s pinging at 1.68 W, 0.018 s tail at 1.06 W
        assert_relative_eq!(
            p.energy(0.0, 0.02, RrcState::LteDrxShort, 0.5, &[]),
            0.002 * 1.68 + 0.018 * 1.06,
            epsilon = 1e-12
        );
    }

    #[test]
    fn energy_lte_idle_paging_cycles() {
        let p = ProfileLte::default();
        let full = 0.043 * 0.594 + (1.28 - 0.043) * 0.0;
        // two full cycles and a residual inside the ping window
        let e = p.energy(0.0, 2.58, RrcState::LteIdle, 0.5, &[]);
        assert_relative_eq!(e, 2.0 * full + 0.02 * 0.594, epsilon = 1e-9);
        // residual longer than the ping is still priced at ping power
        let e = p.energy(0.0, 1.38, RrcState::LteIdle, 0.5, &[]);
        assert_relative_eq!(e, full + 0.1 * 0.594, epsilon = 1e-9);
    }

    #[test]
    fn energy_lte_continuous_follows_throughput() {
        let p = ProfileLte::default();
        let packets = vec![
            Packet::new(0.1, Direction::Uplink, 62_500, 62_460),
            Packet::new(0.2, Direction::Downlink, 62_500, 62_460),
        ];
        // 0.5 s window: 1 Mbps each way
        let expected = (0.43839 + 0.05197 + 1.2) * 0.5;
        let e = p.energy(0.0, 0.5, RrcState::LteContinuous, 0.5, &packets);
        assert_relative_eq!(e, expected, epsilon = 1e-9);
    }
}
