//! Common-cathode triode stage as a wave digital filter.
//!
//! The tube sits at the root of a K-method scattering tree with three ports:
//!
//! - grid: input coupling capacitor `Ci` in series with the source, in
//!   parallel with the grid leak `Ri`, in series with the grid stopper `Rg`
//! - cathode: cathode resistor `Rk` in parallel with the bypass capacitor `Ck`
//! - plate: output coupling capacitor `Co` in series with the load `Ro`, in
//!   parallel with the plate resistor `Rp` up to the supply `E`
//!
//! Each capacitor is a one-sample wave delay (bilinear transform). The
//! tube's plate current `i = (kp + kpg·vgk + kp2·vpk)·...` is folded into a
//! closed-form scattering relation, with the grid drawing no current. The
//! DC operating point is solved once so a fresh stage starts in equilibrium.

use log::debug;

use super::{ParamUpdate, StageConfig};
use crate::dsl::ParamValue;
use crate::error::{require_finite, require_positive, Result, StageError};

/// Port resistance of the ideal input voltage source.
const SOURCE_RESISTANCE: f64 = 1e-6;

/// Parameters for a triode stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TriodeConfig {
    /// Device coefficients
    pub kp: f64,
    pub kp2: f64,
    pub kpg: f64,
    /// Plate supply (V)
    pub supply_voltage: f64,
    /// Input coupling capacitor (F)
    pub ci: f64,
    /// Cathode bypass capacitor (F)
    pub ck: f64,
    /// Output coupling capacitor (F)
    pub co: f64,
    /// Grid leak resistor (Ω)
    pub ri: f64,
    /// Grid stopper resistor (Ω)
    pub rg: f64,
    /// Cathode resistor (Ω)
    pub rk: f64,
    /// Plate resistor (Ω)
    pub rp: f64,
    /// Output load (Ω)
    pub ro: f64,
    /// Applied to the output voltage
    pub output_gain: f64,
}

impl Default for TriodeConfig {
    fn default() -> Self {
        Self {
            kp: 1.014e-5,
            kp2: 5.498e-8,
            kpg: 1.076e-5,
            supply_voltage: 250.0,
            ci: 100e-9,
            ck: 10e-6,
            co: 10e-9,
            ri: 1e6,
            rg: 20e3,
            rk: 1e3,
            rp: 100e3,
            ro: 1e6,
            // brings the ~27 V plate swing back to line level, inverted
            output_gain: -2.0 / 27.0,
        }
    }
}

impl TriodeConfig {
    /// Check physical constraints.
    pub fn validate(&self) -> Result<()> {
        require_positive("triode", "kp", self.kp)?;
        require_positive("triode", "kp2", self.kp2)?;
        require_positive("triode", "kpg", self.kpg)?;
        require_positive("triode", "supply voltage", self.supply_voltage)?;
        for (name, value) in [
            ("ci", self.ci),
            ("ck", self.ck),
            ("co", self.co),
            ("ri", self.ri),
            ("rg", self.rg),
            ("rk", self.rk),
            ("rp", self.rp),
            ("ro", self.ro),
        ] {
            require_positive("triode", name, value)?;
        }
        require_finite("triode", "output gain", self.output_gain)
    }
}

impl StageConfig for TriodeConfig {
    fn set_param(&mut self, key: &str, value: &ParamValue) -> ParamUpdate {
        match key {
            "kp" => value.assign(&mut self.kp),
            "kp2" => value.assign(&mut self.kp2),
            "kpg" => value.assign(&mut self.kpg),
            "e" | "vb" => value.assign(&mut self.supply_voltage),
            "ci" => value.assign(&mut self.ci),
            "ck" => value.assign(&mut self.ck),
            "co" => value.assign(&mut self.co),
            "ri" => value.assign(&mut self.ri),
            "rg" => value.assign(&mut self.rg),
            "rk" => value.assign(&mut self.rk),
            "rp" => value.assign(&mut self.rp),
            "ro" => value.assign(&mut self.ro),
            "gain" => value.assign(&mut self.output_gain),
            _ => ParamUpdate::Unknown,
        }
    }
}

/// Adaptor and scattering constants.
#[derive(Debug, Clone, Copy)]
struct TriodeCoefficients {
    // port reflection coefficients
    wpk_kt: f64,
    wsp_kl: f64,
    // incident-wave gains
    k_t_xci: f64,
    k_t_ck: f64,
    k_t_co: f64,
    k_t0: f64,
    // output
    k_y_t: f64,
    k_y_co: f64,
    k_y0: f64,
    // state updates
    k_ci_t: f64,
    k_ci_xci: f64,
    k_co_co: f64,
    k_co0: f64,
    // device scattering
    kp: f64,
    kp2: f64,
    kpg: f64,
    bk_bp: f64,
    k_eta: f64,
    k_delta: f64,
    k_bp_s: f64,
    bp_ap_0: f64,
    bp_ak_0: f64,
    output_gain: f64,
}

/// Port resistances, kept for validation and the operating point.
#[derive(Debug, Clone, Copy)]
struct PortResistances {
    grid: f64,
    cathode: f64,
    plate: f64,
}

impl TriodeCoefficients {
    fn new(config: &TriodeConfig, sample_rate: f64) -> Result<(Self, PortResistances)> {
        let TriodeConfig {
            kp,
            kp2,
            kpg,
            supply_voltage: e,
            ci,
            ck,
            co,
            ri,
            rg,
            rk,
            rp,
            ro,
            output_gain,
        } = *config;

        let r_ci = 1.0 / (2.0 * sample_rate * ci);
        let r_ck = 1.0 / (2.0 * sample_rate * ck);
        let r_co = 1.0 / (2.0 * sample_rate * co);

        // grid: (source + Ci) || Ri, then + Rg
        let r_si = r_ci + SOURCE_RESISTANCE;
        let wsi_kl = r_ci / r_si;
        let wpg_kt = r_si / (r_si + ri);
        let r_pg = r_si * ri / (r_si + ri);
        let wsg_kl = rg / (rg + r_pg);

        // cathode: Rk || Ck
        let wpk_kt = r_ck / (rk + r_ck);
        let r_pk = rk * r_ck / (rk + r_ck);

        // plate: (Co + Ro) || Rp
        let r_sp = r_co + ro;
        let wsp_kl = r_co / r_sp;
        let wpp_kt = r_sp / (r_sp + rp);
        let r_pp = r_sp * rp / (r_sp + rp);

        let ports = PortResistances {
            grid: r_pg + rg,
            cathode: r_pk,
            plate: r_pp,
        };
        for (name, r) in [
            ("grid", ports.grid),
            ("cathode", ports.cathode),
            ("plate", ports.plate),
        ] {
            if !(r.is_finite() && r > 0.0) {
                return Err(StageError::config(
                    "triode",
                    format!("{} port resistance must be positive, got {}", name, r),
                ));
            }
        }

        let bk_bp = r_pk / r_pp;
        let k_eta = 1.0 / (bk_bp * (0.5 * kpg + kp2) + kp2);

        Ok((
            Self {
                wpk_kt,
                wsp_kl,
                k_t_xci: 1.0 - wpg_kt,
                k_t_ck: 1.0 - wpk_kt,
                k_t_co: 1.0 - wpp_kt,
                k_t0: wpp_kt * e,
                k_y_t: 0.5 * (1.0 - wsp_kl),
                k_y_co: -0.5 * (1.0 - wsp_kl) * (1.0 + wpp_kt),
                k_y0: 0.5 * (1.0 - wsp_kl) * wpp_kt * e,
                k_ci_t: wsi_kl * (1.0 - wsg_kl),
                k_ci_xci: wsi_kl * ((1.0 - wpg_kt) * (wsg_kl + 1.0) - 2.0),
                k_co_co: 1.0 - wsp_kl * (1.0 + wpp_kt),
                k_co0: wsp_kl * wpp_kt * e,
                kp,
                kp2,
                kpg,
                bk_bp,
                k_eta,
                k_delta: kp2 * k_eta * k_eta / (2.0 * r_pp),
                k_bp_s: k_eta * (2.0 * kp2 / r_pp).sqrt(),
                bp_ap_0: (r_pk - r_pp) / (r_pp + r_pk),
                bp_ak_0: 2.0 * r_pp / (r_pp + r_pk),
                output_gain,
            },
            ports,
        ))
    }

    /// Reflected waves `(bg, bk, bp)` for incident waves at the three ports.
    #[inline]
    fn scatter(&self, ag: f64, ak: f64, ap: f64) -> (f64, f64, f64) {
        let v1 = 0.5 * ap;
        let v2 = ak + v1 * self.bk_bp;
        let alpha = self.kpg * (ag - v2) + self.kp;
        let beta = self.kp2 * (v1 - v2);
        let eta = self.k_eta * (2.0 * beta + alpha);
        let v3 = eta + self.k_delta;
        let delta = ap + v3;

        let (mut bp, bk, vpk) = if delta >= 0.0 {
            let bp = self.k_bp_s * delta.sqrt() - v3 - self.k_delta;
            let d = self.bk_bp * (ap - bp);
            let bk = ak + d;
            let vpk2 = ap + bp - ak - bk;
            if self.kpg * (ag - ak - 0.5 * d) + self.kp2 * vpk2 + self.kp < 0.0 {
                // would need negative plate current: tube cut off
                (ap, ak, ap - ak)
            } else {
                (bp, bk, 0.5 * vpk2)
            }
        } else {
            (ap, ak, ap - ak)
        };

        if vpk < 0.0 {
            bp = self.bp_ap_0 * ap + self.bp_ak_0 * ak;
        }
        (ag, bk, bp)
    }
}

/// Retained capacitor waves.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TriodeState {
    ci: f64,
    ck: f64,
    co: f64,
}

/// Triode gain stage.
#[derive(Debug, Clone)]
pub struct TriodeStage {
    config: TriodeConfig,
    sample_rate: f64,
    coeffs: TriodeCoefficients,
    /// Operating point the state is reset to
    rest: TriodeState,
    state: TriodeState,
}

impl TriodeStage {
    /// Create a stage sitting at its DC operating point.
    pub fn new(config: TriodeConfig, sample_rate: f64) -> Result<Self> {
        config.validate()?;
        super::validate_sample_rate(sample_rate)?;
        let (coeffs, ports) = TriodeCoefficients::new(&config, sample_rate)?;
        let rest = Self::operating_point(&config)?;

        debug!(
            "triode stage: ports R_g={:.1} R_k={:.2} R_p={:.1}, Vk0={:.5} V Vp0={:.3} V",
            ports.grid, ports.cathode, ports.plate, rest.ck, rest.co
        );

        Ok(Self {
            config,
            sample_rate,
            coeffs,
            rest,
            state: rest,
        })
    }

    /// Cathode and plate voltages with no signal, from the quadratic the
    /// plate-current law gives when the capacitors are open.
    fn operating_point(config: &TriodeConfig) -> Result<TriodeState> {
        let TriodeConfig {
            kp,
            kp2,
            kpg,
            supply_voltage: e,
            rk,
            rp,
            ..
        } = *config;

        let k1 = kpg / (2.0 * kp2) + rp / rk + 1.0;
        let k2 = k1 * (kp / kp2 + 2.0 * e) * kp2;
        let k3 = rk * k2 + 1.0;
        let disc = 2.0 * k3 - 1.0;
        if !(disc >= 0.0) {
            return Err(StageError::config(
                "triode",
                "no real DC operating point for these device coefficients",
            ));
        }
        let sign_k1 = if k1 >= 0.0 { 1.0 } else { -1.0 };
        let vk0 = (k3 - sign_k1 * disc.sqrt()) / (2.0 * rk * k1 * k1 * kp2);
        let vp0 = e - rp / rk * vk0;

        Ok(TriodeState {
            ci: 0.0,
            ck: vk0,
            co: vp0,
        })
    }

    /// The configuration this stage was built from.
    pub fn config(&self) -> &TriodeConfig {
        &self.config
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// DC cathode voltage.
    pub fn cathode_voltage(&self) -> f64 {
        self.rest.ck
    }

    /// DC plate voltage.
    pub fn plate_voltage(&self) -> f64 {
        self.rest.co
    }

    /// Process one sample.
    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let s = &mut self.state;

        let x_ci = x + s.ci;
        let ag = c.k_t_xci * x_ci;
        let ak = c.k_t_ck * s.ck;
        let ap = c.k_t_co * s.co + c.k_t0;

        let (bg, bk, bp) = c.scatter(ag, ak, ap);
        let vout = c.k_y_t * bp + c.k_y_co * s.co + c.k_y0;

        s.ci += c.k_ci_t * bg + c.k_ci_xci * x_ci;
        s.ck = bk - c.wpk_kt * s.ck;
        s.co = c.wsp_kl * bp + c.k_co_co * s.co + c.k_co0;

        c.output_gain * vout
    }

    /// Process a block of samples.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x as f64) as f32;
        }
    }

    /// Return to the DC operating point.
    pub fn reset(&mut self) {
        self.state = self.rest;
    }

    /// Rebuild the adaptors for a new sample rate and return to rest.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<()> {
        super::validate_sample_rate(sample_rate)?;
        let (coeffs, _) = TriodeCoefficients::new(&self.config, sample_rate)?;
        self.coeffs = coeffs;
        self.sample_rate = sample_rate;
        self.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::PI;

    const FS: f64 = 48_000.0;

    fn sine(amplitude: f64, freq: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * freq * n as f64 / FS).sin())
            .collect()
    }

    #[test]
    fn test_operating_point() {
        let t = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
        assert_relative_eq!(t.cathode_voltage(), 1.03197, epsilon = 1e-4);
        assert_relative_eq!(t.plate_voltage(), 146.80, epsilon = 1e-2);
    }

    #[test]
    fn test_quiescent_holds() {
        let mut t = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
        let first = t.process_sample(0.0);
        assert_abs_diff_eq!(first, 0.0, epsilon = 1e-9);
        for _ in 0..3 * 48_000 {
            let y = t.process_sample(0.0);
            assert_abs_diff_eq!(y, first, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_returns_to_quiescent_after_signal() {
        let mut t = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
        let quiet = t.clone().process_sample(0.0);
        for x in sine(0.5, 220.0, 4800) {
            t.process_sample(x);
        }
        let mut y = 1.0;
        for _ in 0..10 * 48_000 {
            y = t.process_sample(0.0);
        }
        assert_abs_diff_eq!(y, quiet, epsilon = 1e-4);
    }

    #[test]
    fn test_amplifies() {
        let mut t = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
        let out: Vec<f64> = sine(0.1, 220.0, 4800)
            .into_iter()
            .map(|x| t.process_sample(x))
            .collect();
        let max = out.iter().cloned().fold(f64::MIN, f64::max);
        let min = out.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max > 0.35 && max < 0.5, "max {}", max);
        assert!(min < -0.38 && min > -0.55, "min {}", min);
    }

    #[test]
    fn test_deterministic() {
        let input = sine(2.0, 330.0, 9600);
        let run = || {
            let mut t = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
            input.iter().map(|&x| t.process_sample(x)).collect::<Vec<_>>()
        };
        let a = run();
        let b = run();
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_split_stream_matches_whole() {
        let input = sine(1.0, 110.0, 10_000);

        let mut whole = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
        let expected: Vec<f64> = input.iter().map(|&x| whole.process_sample(x)).collect();

        let mut split = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
        let (head, tail) = input.split_at(3_777);
        let mut got: Vec<f64> = head.iter().map(|&x| split.process_sample(x)).collect();
        got.extend(tail.iter().map(|&x| split.process_sample(x)));

        assert_eq!(expected, got);
    }

    #[test]
    fn test_reset_restores_operating_point() {
        let mut t = TriodeStage::new(TriodeConfig::default(), FS).unwrap();
        let mut fresh = t.clone();
        for x in sine(3.0, 440.0, 1000) {
            t.process_sample(x);
        }
        t.reset();
        assert_eq!(t.process_sample(0.25), fresh.process_sample(0.25));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = TriodeConfig {
            rk: 0.0,
            ..TriodeConfig::default()
        };
        assert!(TriodeStage::new(bad, FS).is_err());
        let bad = TriodeConfig {
            co: -1e-9,
            ..TriodeConfig::default()
        };
        assert!(TriodeStage::new(bad, FS).is_err());
        let bad = TriodeConfig {
            kp2: 0.0,
            ..TriodeConfig::default()
        };
        assert!(TriodeStage::new(bad, FS).is_err());
        assert!(TriodeStage::new(TriodeConfig::default(), 0.0).is_err());
    }
}
