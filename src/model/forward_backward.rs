//! # Lane Forward-Backward Kernel
//!
//! Linear-time forward-backward over the structured transition of the
//! decoding quantities, eight pairs at a time in `f32x8` lanes.
//!
//! Forward step to site `t` (per lane):
//!
//! ```text
//! C[k]  = sum_{j >= k} alpha[t-1][j]
//! AU[0] = 0,  AU[k] = U[k-1] * alpha[t-1][k-1] + R[k-1] * AU[k-1]
//! alpha[t][k] = (D[k] * alpha[t-1][k] + AU[k] + B[k] * C[k+1]) * emit[t][k]
//! ```
//!
//! Backward step from site `t+1` to `t`, with `v[k] = beta[t+1][k] * emit[t+1][k]`:
//!
//! ```text
//! L[0] = 0,      L[j+1] = L[j] + B[j] * v[j]
//! S[last] = 0,   S[j]   = v[j+1] + R[j+1] * S[j+1]
//! beta[t][j] = D[j] * v[j] + L[j] + U[j] * S[j]
//! ```
//!
//! Lanes never mix: every lane sees exactly the operations it would see if
//! decoded alone, so batch composition does not change results. A lane whose
//! normaliser is zero or non-finite is reported invalid and its values are
//! zeroed.

use wide::f32x8;

use crate::data::panel::HapBits;
use crate::model::emission::{SiteEmissions, SiteTransitions};
use crate::model::quantities::TransitionVectors;
use crate::utils::workspace::{LaneWorkspace, LANES};

/// Read-only per-site tables the kernel runs on
#[derive(Clone, Copy)]
pub struct KernelTables<'a> {
    pub initial: &'a [f32],
    pub emissions: &'a SiteEmissions,
    pub transitions: &'a SiteTransitions,
    /// Normalise every this many sites
    pub scaling_skip: usize,
}

/// The two haplotypes of one lane
pub type LanePair<'a> = (&'a HapBits, &'a HapBits);

/// Static per-site update functions
pub struct LaneUpdater;

impl LaneUpdater {
    /// Emission of every lane at one site
    #[inline]
    pub fn emission(
        e1: &[f32],
        e0_minus_1: &[f32],
        e2_minus_0: &[f32],
        hom: f32x8,
        hom_minor: f32x8,
        out: &mut [f32x8],
    ) {
        for (k, o) in out.iter_mut().enumerate() {
            *o = f32x8::splat(e1[k])
                + hom * f32x8::splat(e0_minus_1[k])
                + hom_minor * f32x8::splat(e2_minus_0[k]);
        }
    }

    /// Forward update from `prev` into `next`
    #[inline]
    pub fn fwd_update(
        prev: &[f32x8],
        next: &mut [f32x8],
        suffix: &mut [f32x8],
        t: &TransitionVectors,
        emit: &[f32x8],
    ) {
        let n = prev.len();
        let zero = f32x8::splat(0.0);

        suffix[n] = zero;
        for k in (0..n).rev() {
            suffix[k] = suffix[k + 1] + prev[k];
        }

        let mut au = zero;
        for k in 0..n {
            if k > 0 {
                au = f32x8::splat(t.u[k - 1]) * prev[k - 1] + f32x8::splat(t.r[k - 1]) * au;
            }
            next[k] = (f32x8::splat(t.d[k]) * prev[k] + au + f32x8::splat(t.b[k]) * suffix[k + 1])
                * emit[k];
        }
    }

    /// Backward update in place: `beta` holds the next site's values on entry
    /// only through `beta_emit`, and the current site's values on return
    #[inline]
    pub fn bwd_update(beta: &mut [f32x8], beta_emit: &[f32x8], t: &TransitionVectors) {
        let n = beta.len();
        let zero = f32x8::splat(0.0);

        // S[j] stored in beta first
        beta[n - 1] = zero;
        let mut s = zero;
        for j in (0..n - 1).rev() {
            s = beta_emit[j + 1] + f32x8::splat(t.r[j + 1]) * s;
            beta[j] = s;
        }

        let mut l = zero;
        for j in 0..n {
            let v = beta_emit[j];
            beta[j] = f32x8::splat(t.d[j]) * v + l + f32x8::splat(t.u[j]) * beta[j];
            l += f32x8::splat(t.b[j]) * v;
        }
    }

    /// Divide each lane by its sum; lanes with a zero or non-finite sum are
    /// marked invalid and zeroed
    #[inline]
    pub fn normalize(values: &mut [f32x8], valid: &mut [bool; LANES]) {
        let mut sum = f32x8::splat(0.0);
        for v in values.iter() {
            sum += *v;
        }
        let sums: [f32; LANES] = sum.into();
        let mut inv = [0.0f32; LANES];
        for lane in 0..LANES {
            let s = sums[lane];
            if s > 0.0 && s.is_finite() {
                inv[lane] = 1.0 / s;
            } else {
                valid[lane] = false;
            }
        }
        let inv = f32x8::from(inv);
        for v in values.iter_mut() {
            *v *= inv;
        }
    }
}

/// Decode up to eight pairs over sites `[from, to)`.
///
/// On return `ws.alpha` holds posteriors `[site - from][state]`; the result
/// tells which of the first `pairs.len()` lanes are valid.
pub fn forward_backward(
    tables: &KernelTables<'_>,
    pairs: &[LanePair<'_>],
    from: usize,
    to: usize,
    ws: &mut LaneWorkspace,
) -> [bool; LANES] {
    debug_assert!(!pairs.is_empty() && pairs.len() <= LANES);
    debug_assert!(from < to);

    let n_states = tables.initial.len();
    let len = to - from;
    let skip = tables.scaling_skip.max(1);
    ws.resize(n_states, len);

    let mut valid = [true; LANES];

    // Lane masks; unused lanes repeat the first pair
    for (offset, site) in (from..to).enumerate() {
        let mut hom = [0.0f32; LANES];
        let mut hom_minor = [0.0f32; LANES];
        for lane in 0..LANES {
            let (a, b) = pairs[if lane < pairs.len() { lane } else { 0 }];
            let (x, y) = (a[site], b[site]);
            hom[lane] = if x == y { 1.0 } else { 0.0 };
            hom_minor[lane] = if x && y { 1.0 } else { 0.0 };
        }
        ws.hom[offset] = f32x8::from(hom);
        ws.hom_minor[offset] = f32x8::from(hom_minor);
    }

    // Forward
    {
        let (e1, e01, e20) = tables.emissions.site(from);
        LaneUpdater::emission(e1, e01, e20, ws.hom[0], ws.hom_minor[0], &mut ws.emit);
        for k in 0..n_states {
            ws.alpha[k] = f32x8::splat(tables.initial[k]) * ws.emit[k];
        }
        LaneUpdater::normalize(&mut ws.alpha[..n_states], &mut valid);
    }
    for offset in 1..len {
        let site = from + offset;
        let (e1, e01, e20) = tables.emissions.site(site);
        LaneUpdater::emission(e1, e01, e20, ws.hom[offset], ws.hom_minor[offset], &mut ws.emit);

        let (done, rest) = ws.alpha.split_at_mut(offset * n_states);
        let prev = &done[(offset - 1) * n_states..];
        let next = &mut rest[..n_states];
        LaneUpdater::fwd_update(
            prev,
            next,
            &mut ws.suffix,
            tables.transitions.to_site(site),
            &ws.emit,
        );
        if offset % skip == 0 {
            LaneUpdater::normalize(next, &mut valid);
        }
    }

    // Backward, turning alpha into posteriors as we go
    ws.beta.fill(f32x8::splat(1.0));
    posterior_in_place(ws, len - 1, n_states, &mut valid);
    for offset in (0..len - 1).rev() {
        let next_site = from + offset + 1;
        let (e1, e01, e20) = tables.emissions.site(next_site);
        LaneUpdater::emission(
            e1,
            e01,
            e20,
            ws.hom[offset + 1],
            ws.hom_minor[offset + 1],
            &mut ws.emit,
        );
        for k in 0..n_states {
            ws.beta_emit[k] = ws.beta[k] * ws.emit[k];
        }
        LaneUpdater::bwd_update(&mut ws.beta, &ws.beta_emit, tables.transitions.to_site(next_site));
        if offset % skip == 0 {
            LaneUpdater::normalize(&mut ws.beta, &mut valid);
        }
        posterior_in_place(ws, offset, n_states, &mut valid);
    }

    let mut out = [false; LANES];
    out[..pairs.len()].copy_from_slice(&valid[..pairs.len()]);
    out
}

fn posterior_in_place(
    ws: &mut LaneWorkspace,
    offset: usize,
    n_states: usize,
    valid: &mut [bool; LANES],
) {
    let row = &mut ws.alpha[offset * n_states..(offset + 1) * n_states];
    for (a, b) in row.iter_mut().zip(&ws.beta) {
        *a *= *b;
    }
    LaneUpdater::normalize(row, valid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecodingMode;
    use crate::model::synthetic::{self, SyntheticModel};

    /// O(S^2) forward-backward in f64 over the dense transition matrix
    fn dense_posterior(
        tables: &KernelTables<'_>,
        a: &HapBits,
        b: &HapBits,
        from: usize,
        to: usize,
    ) -> Vec<Vec<f64>> {
        let n = tables.initial.len();
        let emit = |site: usize| -> Vec<f64> {
            let (e1, e01, e20) = tables.emissions.site(site);
            let hom = if a[site] == b[site] { 1.0 } else { 0.0 };
            let hm = if a[site] && b[site] { 1.0 } else { 0.0 };
            (0..n)
                .map(|k| f64::from(e1[k]) + hom * f64::from(e01[k]) + hm * f64::from(e20[k]))
                .collect()
        };
        let dense = |site: usize| -> Vec<Vec<f64>> {
            let t = tables.transitions.to_site(site);
            let mut m = vec![vec![0.0f64; n]; n];
            for (j, row) in m.iter_mut().enumerate() {
                for (k, cell) in row.iter_mut().enumerate() {
                    *cell = if j == k {
                        f64::from(t.d[k])
                    } else if j > k {
                        f64::from(t.b[k])
                    } else {
                        (j + 1..k).fold(f64::from(t.u[j]), |acc, l| acc * f64::from(t.r[l]))
                    };
                }
            }
            m
        };

        let len = to - from;
        let mut alpha = vec![vec![0.0f64; n]; len];
        let e = emit(from);
        for k in 0..n {
            alpha[0][k] = f64::from(tables.initial[k]) * e[k];
        }
        let s: f64 = alpha[0].iter().sum();
        alpha[0].iter_mut().for_each(|v| *v /= s);
        for off in 1..len {
            let m = dense(from + off);
            let e = emit(from + off);
            for k in 0..n {
                alpha[off][k] = (0..n).map(|j| alpha[off - 1][j] * m[j][k]).sum::<f64>() * e[k];
            }
            let s: f64 = alpha[off].iter().sum();
            alpha[off].iter_mut().for_each(|v| *v /= s);
        }

        let mut beta = vec![vec![1.0f64; n]; len];
        for off in (0..len - 1).rev() {
            let m = dense(from + off + 1);
            let e = emit(from + off + 1);
            for j in 0..n {
                beta[off][j] = (0..n).map(|k| m[j][k] * e[k] * beta[off + 1][k]).sum();
            }
            let s: f64 = beta[off].iter().sum();
            beta[off].iter_mut().for_each(|v| *v /= s);
        }

        (0..len)
            .map(|off| {
                let p: Vec<f64> = (0..n).map(|k| alpha[off][k] * beta[off][k]).collect();
                let s: f64 = p.iter().sum();
                p.into_iter().map(|v| v / s).collect()
            })
            .collect()
    }

    #[test]
    fn test_kernel_matches_dense_reference() {
        let model = SyntheticModel::default();
        let dq = model.quantities().unwrap();
        let data = synthetic::panel(6, 120, 7, None, dq.csfs_samples()).unwrap();
        let emissions =
            SiteEmissions::build(&data, &dq, DecodingMode::ArrayFolded, 0.0).unwrap();
        let transitions = SiteTransitions::build(&data, &dq).unwrap();
        let tables = KernelTables {
            initial: dq.initial_state_prob(),
            emissions: &emissions,
            transitions: &transitions,
            scaling_skip: 1,
        };

        let haps: Vec<&HapBits> = data
            .individuals()
            .iter()
            .flat_map(|i| i.haplotypes().iter())
            .collect();
        let pairs: Vec<LanePair> = vec![(haps[0], haps[1]), (haps[2], haps[5]), (haps[3], haps[10])];

        let (from, to) = (10, 110);
        let mut ws = LaneWorkspace::new(dq.states(), to - from);
        let valid = forward_backward(&tables, &pairs, from, to, &mut ws);
        assert_eq!(&valid[..3], &[true, true, true]);

        for (lane, &(a, b)) in pairs.iter().enumerate() {
            let reference = dense_posterior(&tables, a, b, from, to);
            for (off, col) in reference.iter().enumerate() {
                let mut total = 0.0f32;
                for (k, &p) in col.iter().enumerate() {
                    let got = ws.posterior(off, k, lane);
                    total += got;
                    assert!(
                        (f64::from(got) - p).abs() < 1e-4,
                        "lane {} site {} state {}: {} vs {}",
                        lane,
                        off,
                        k,
                        got,
                        p
                    );
                }
                assert!((total - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_lanes_are_independent() {
        let model = SyntheticModel::default();
        let dq = model.quantities().unwrap();
        let data = synthetic::panel(5, 60, 3, None, dq.csfs_samples()).unwrap();
        let emissions =
            SiteEmissions::build(&data, &dq, DecodingMode::ArrayFolded, 0.0).unwrap();
        let transitions = SiteTransitions::build(&data, &dq).unwrap();
        let tables = KernelTables {
            initial: dq.initial_state_prob(),
            emissions: &emissions,
            transitions: &transitions,
            scaling_skip: 3,
        };
        let haps: Vec<&HapBits> = data
            .individuals()
            .iter()
            .flat_map(|i| i.haplotypes().iter())
            .collect();

        let single = [(haps[4], haps[7])];
        let mut ws_single = LaneWorkspace::new(dq.states(), 60);
        forward_backward(&tables, &single, 0, 60, &mut ws_single);

        let batch: Vec<LanePair> = (0..8).map(|i| (haps[i], haps[(i + 3) % 10])).collect();
        let mut ws_batch = LaneWorkspace::new(dq.states(), 60);
        forward_backward(&tables, &batch, 0, 60, &mut ws_batch);

        // batch lane 4 is (4, 7)
        for off in 0..60 {
            for k in 0..dq.states() {
                assert_eq!(
                    ws_single.posterior(off, k, 0).to_bits(),
                    ws_batch.posterior(off, k, 4).to_bits()
                );
            }
        }
    }

    #[test]
    fn test_zero_emission_marks_lane_invalid() {
        let model = SyntheticModel::default();
        let dq = model.quantities().unwrap();
        let data = synthetic::panel(4, 20, 11, None, dq.csfs_samples()).unwrap();
        let emissions =
            SiteEmissions::build(&data, &dq, DecodingMode::ArrayFolded, 0.0).unwrap();
        let transitions = SiteTransitions::build(&data, &dq).unwrap();
        let zero_init = vec![0.0f32; dq.states()];
        let tables = KernelTables {
            initial: &zero_init,
            emissions: &emissions,
            transitions: &transitions,
            scaling_skip: 1,
        };
        let h = &data.individuals()[0].haplotypes()[0];
        let mut ws = LaneWorkspace::new(dq.states(), 20);
        let valid = forward_backward(&tables, &[(h, h)], 0, 20, &mut ws);
        assert!(!valid[0]);
    }
}
