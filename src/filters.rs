//! The demand-side conductance filter (spec §4.2): "the only link-level algorithm the core
//! mandates." Lifted out of the concrete `GunnsBasicExternalDemand` link it originated in
//! (`examples/original_source/core/GunnsBasicExternalDemand.cpp`) into a standalone,
//! link-agnostic helper so out-of-core link crates can compose it.
//!
//! A demand-side half of a split network estimates the other half's effective capacitance from
//! how its own demanded flux moves the supply potential, then filters its coupling conductance
//! toward that estimate. This stabilizes the coupling despite up to one frame of staleness
//! between the two halves.

use serde::{Deserialize, Serialize};

/// Tunable parameters for [`DemandConductanceFilter`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DemandFilterConfig {
    /// Exponential filter gain applied to the capacitance estimate update, `alpha` in spec §4.2.
    pub capacitance_gain: f64,
    /// Minimum `|delta_potential|` below which the capacitance estimate is not updated, to
    /// avoid dividing by a near-zero delta.
    pub min_delta_potential: f64,
    /// Floor on the effective conductance, `G_floor` in spec §4.2.
    pub min_conductance: f64,
}

impl Default for DemandFilterConfig {
    fn default() -> Self {
        Self {
            capacitance_gain: 0.5,
            min_delta_potential: 1.0e-10,
            min_conductance: 1.0e-6,
        }
    }
}

/// Running state for the demand/supply coupling estimate (spec §4.2):
/// `C_est <- (1-alpha) C_est + alpha * (-I*dt/delta_v)` when `|delta_v| > eps`, then
/// `G_eff <- max(C_est/dt, G_floor)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DemandConductanceFilter {
    config: DemandFilterConfig,
    avg_demand: f64,
    avg_supply_potential: f64,
    avg_supply_delta_potential: f64,
    estimated_capacitance: f64,
    effective_conductance: f64,
}

impl DemandConductanceFilter {
    pub fn new(config: DemandFilterConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Advances the filter by one major step. `demand_flux` is this step's flux pulled by the
    /// demand side (magnitude, signed by the caller's convention); `supply_potential` is the
    /// most recently observed potential on the supply side.
    pub fn update(&mut self, dt: f64, demand_flux: f64, supply_potential: f64) {
        self.avg_demand = 0.5 * (self.avg_demand + demand_flux);
        if self.avg_demand.abs() < f64::EPSILON {
            self.avg_demand = 0.0;
        }

        self.avg_supply_delta_potential = -self.avg_supply_potential;
        self.avg_supply_potential = 0.5 * (self.avg_supply_potential + supply_potential);
        self.avg_supply_delta_potential += self.avg_supply_potential;

        if self.avg_supply_delta_potential.abs() > self.config.min_delta_potential {
            let sample = -self.avg_demand * dt / self.avg_supply_delta_potential;
            self.estimated_capacitance = (1.0 - self.config.capacitance_gain)
                * self.estimated_capacitance
                + self.config.capacitance_gain * sample;
        }

        self.effective_conductance = if dt > f64::EPSILON {
            (self.estimated_capacitance / dt).max(self.config.min_conductance)
        } else {
            self.config.min_conductance
        };
    }

    /// The coupling conductance to stamp this step, `G_eff` in spec §4.2.
    pub fn effective_conductance(&self) -> f64 {
        self.effective_conductance
    }

    pub fn estimated_capacitance(&self) -> f64 {
        self.estimated_capacitance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conductance_floors_at_min_when_no_delta_observed() {
        let mut f = DemandConductanceFilter::new(DemandFilterConfig::default());
        f.update(0.1, 5.0, 0.0);
        assert_eq!(f.effective_conductance(), f.config.min_conductance);
    }

    #[test]
    fn conductance_tracks_capacitance_estimate_once_delta_is_observed() {
        let mut f = DemandConductanceFilter::new(DemandFilterConfig::default());
        f.update(0.1, 1.0, 10.0);
        f.update(0.1, 1.0, 10.0);
        f.update(0.1, 1.0, 10.0);
        assert!(f.effective_conductance() >= f.config.min_conductance);
        assert!(f.estimated_capacitance().is_finite());
    }

    #[test]
    fn zero_dt_falls_back_to_floor() {
        let mut f = DemandConductanceFilter::new(DemandFilterConfig::default());
        f.update(0.0, 1.0, 10.0);
        assert_eq!(f.effective_conductance(), f.config.min_conductance);
    }
}
