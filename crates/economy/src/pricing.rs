//! Load multipliers and demand-driven compute pricing.

use edgecoder_types::credit::PriceQuote;
use edgecoder_types::task::ResourceClass;

/// Anchor points of the accrual load curve: (pressure, multiplier).
const LOAD_CURVE: [(f64, f64); 3] = [(0.2, 0.8), (1.0, 1.0), (3.0, 1.6)];

/// Output bounds of the load multiplier.
const LOAD_MULTIPLIER_MIN: f64 = 0.35;
const LOAD_MULTIPLIER_MAX: f64 = 4.0;

/// Base price in sats per compute unit.
const BASE_PRICE_CPU_SATS: f64 = 30.0;
const BASE_PRICE_GPU_SATS: f64 = 120.0;

/// Piecewise-linear accrual multiplier as a function of queue pressure.
///
/// Interpolates through `(0.2, 0.8), (1.0, 1.0), (3.0, 1.6)`, extrapolating
/// with the nearest segment's slope, clamped to `[0.35, 4.0]`.
pub fn load_multiplier(pressure: f64) -> f64 {
    let raw = if pressure <= LOAD_CURVE[0].0 {
        interpolate(LOAD_CURVE[0], LOAD_CURVE[1], pressure)
    } else if pressure >= LOAD_CURVE[2].0 {
        interpolate(LOAD_CURVE[1], LOAD_CURVE[2], pressure)
    } else {
        let (lo, hi) = if pressure <= LOAD_CURVE[1].0 {
            (LOAD_CURVE[0], LOAD_CURVE[1])
        } else {
            (LOAD_CURVE[1], LOAD_CURVE[2])
        };
        interpolate(lo, hi, pressure)
    };
    raw.clamp(LOAD_MULTIPLIER_MIN, LOAD_MULTIPLIER_MAX)
}

fn interpolate(a: (f64, f64), b: (f64, f64), x: f64) -> f64 {
    let slope = (b.1 - a.1) / (b.0 - a.0);
    a.1 + (x - a.0) * slope
}

/// Demand-driven sat price per compute unit:
/// `clamp(base × (0.65 + scarcity × 0.35), 0.35·base, 4·base)`.
pub fn price_per_compute_unit_sats(
    resource_class: ResourceClass,
    demand: f64,
    capacity: f64,
) -> PriceQuote {
    let base = match resource_class {
        ResourceClass::Cpu => BASE_PRICE_CPU_SATS,
        ResourceClass::Gpu => BASE_PRICE_GPU_SATS,
    };
    let scarcity = if capacity > 0.0 { demand / capacity } else { 0.0 };
    let price = (base * (0.65 + scarcity * 0.35)).clamp(0.35 * base, 4.0 * base);
    PriceQuote {
        resource_class,
        price_per_compute_unit_sats: price,
        scarcity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn multiplier_hits_anchor_points() {
        assert!(close(load_multiplier(0.2), 0.8));
        assert!(close(load_multiplier(1.0), 1.0));
        assert!(close(load_multiplier(3.0), 1.6));
    }

    #[test]
    fn multiplier_interpolates_between_anchors() {
        // Midpoint of the first segment.
        assert!(close(load_multiplier(0.6), 0.9));
        // Midpoint of the second segment.
        assert!(close(load_multiplier(2.0), 1.3));
    }

    #[test]
    fn multiplier_clamps_extremes() {
        assert!(close(load_multiplier(-10.0), 0.35));
        assert!(close(load_multiplier(100.0), 4.0));
    }

    #[test]
    fn balanced_market_prices_at_parity() {
        // scarcity 1.0 -> base × 1.0.
        let q = price_per_compute_unit_sats(ResourceClass::Cpu, 10.0, 10.0);
        assert!(close(q.price_per_compute_unit_sats, 30.0));
        let q = price_per_compute_unit_sats(ResourceClass::Gpu, 10.0, 10.0);
        assert!(close(q.price_per_compute_unit_sats, 120.0));
    }

    #[test]
    fn price_clamps_both_ways() {
        let cheap = price_per_compute_unit_sats(ResourceClass::Cpu, 0.0, 10.0);
        assert!(close(cheap.price_per_compute_unit_sats, 30.0 * 0.65));
        let scarce = price_per_compute_unit_sats(ResourceClass::Cpu, 1_000.0, 1.0);
        assert!(close(scarce.price_per_compute_unit_sats, 120.0));
    }
}
