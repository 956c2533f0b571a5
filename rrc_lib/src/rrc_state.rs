/** ------------------------------------------------------------
 * Radio resource control states and the intervals built from them.
 * ------------------------------------------------------------- */
use serde::{Deserialize, Serialize};

/**
 * RRC states of all three radio technologies
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RrcState {
    // 3G
    Idle,
    Dch,
    Fach,
    TailDch,
    TailFach,
    PromoIdleDch,
    PromoFachDch,
    // LTE
    LteIdle,
    LtePromotion,
    LteContinuous,
    LteCrTail,
    LteDrxShort,
    LteDrxLong,
    // WiFi
    WifiIdle,
    WifiActive,
    WifiTail,
}

impl RrcState {
    pub const ALL: [RrcState; 16] = [
        RrcState::Idle,
        RrcState::Dch,
        RrcState::Fach,
        RrcState::TailDch,
        RrcState::TailFach,
        RrcState::PromoIdleDch,
        RrcState::PromoFachDch,
        RrcState::LteIdle,
        RrcState::LtePromotion,
        RrcState::LteContinuous,
        RrcState::LteCrTail,
        RrcState::LteDrxShort,
        RrcState::LteDrxLong,
        RrcState::WifiIdle,
        RrcState::WifiActive,
        RrcState::WifiTail,
    ];

    /// States during which the radio is considered in use (high power, data capable).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RrcState::Dch
                | RrcState::TailDch
                | RrcState::LteContinuous
                | RrcState::LteCrTail
                | RrcState::WifiActive
                | RrcState::WifiTail
        )
    }

    /// Promotion delays removed when normalising burst timestamps.
    pub fn is_3g_promotion(self) -> bool {
        matches!(self, RrcState::PromoIdleDch | RrcState::PromoFachDch)
    }

    /// Stable numeric code used by the parquet and python exports.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            RrcState::Idle => "STATE_IDLE",
            RrcState::Dch => "STATE_DCH",
            RrcState::Fach => "STATE_FACH",
            RrcState::TailDch => "TAIL_DCH",
            RrcState::TailFach => "TAIL_FACH",
            RrcState::PromoIdleDch => "PROMO_IDLE_DCH",
            RrcState::PromoFachDch => "PROMO_FACH_DCH",
            RrcState::LteIdle => "LTE_IDLE",
            RrcState::LtePromotion => "LTE_PROMOTION",
            RrcState::LteContinuous => "LTE_CONTINUOUS",
            RrcState::LteCrTail => "LTE_CR_TAIL",
            RrcState::LteDrxShort => "LTE_DRX_SHORT",
            RrcState::LteDrxLong => "LTE_DRX_LONG",
            RrcState::WifiIdle => "WIFI_IDLE",
            RrcState::WifiActive => "WIFI_ACTIVE",
            RrcState::WifiTail => "WIFI_TAIL",
        }
    }
}

/**
 * A half-open interval `[begin_time, end_time)` spent in one state.
 *
 * Ranges are not validated on construction: a range with
 * `end_time < begin_time` is kept as given and yields a negative
 * duration.
 */
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrcStateRange {
    pub begin_time: f64,
    pub end_time: f64,
    pub state: RrcState,
}

impl RrcStateRange {
    pub fn new(begin_time: f64, end_time: f64, state: RrcState) -> Self {
        Self {
            begin_time,
            end_time,
            state,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.begin_time
    }
}
