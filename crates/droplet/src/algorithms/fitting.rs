use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::{
    error::{AngleError, Result},
    traits::AngleFitter,
    types::{Baseline, ContourBranch, FitModel, Side, SideMeasurement},
};

/// Ratio below which a least-squares system is treated as rank deficient
const RANK_TOLERANCE: f64 = 1e-10;

/// Which model the fitter uses to find the tangent
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FitStrategy {
    /// Circle when the branch is close enough to spherical, else polynomial
    #[default]
    Auto,
    Circle,
    Polynomial,
}

/// Tangent-angle fitter working in a frame aligned with the baseline.
///
/// The origin sits at the contact point, `w` runs along the baseline into
/// the droplet and `v` is the height above it.
#[derive(Debug, Clone)]
pub struct TangentFitter {
    pub strategy: FitStrategy,
    /// Largest RMS circle residual for which `Auto` keeps the circle
    pub sphericity_tolerance_px: f64,
    /// Lower part of the branch, as a fraction of its height, refitted on
    /// its own to check that the whole-branch circle holds near the contact
    pub sphericity_window_fraction: f64,
    /// Largest gap between the whole-branch and near-contact circle angles
    /// for which `Auto` treats the branch as spherical
    pub max_sphericity_gap_deg: f64,
    /// Largest RMS residual accepted from any model
    pub max_residual_px: f64,
    /// 2 or 3
    pub poly_degree: u8,
    /// Polynomial fit window above the baseline
    pub poly_height_px: f64,
    /// The window also never exceeds this fraction of the branch height
    pub poly_height_fraction: f64,
    /// Gauss-Newton iterations for the geometric circle fit
    pub max_iterations: usize,
}

impl Default for TangentFitter {
    fn default() -> Self {
        Self {
            strategy: FitStrategy::Auto,
            sphericity_tolerance_px: 1.0,
            sphericity_window_fraction: 0.5,
            max_sphericity_gap_deg: 2.5,
            max_residual_px: 1.5,
            poly_degree: 2,
            poly_height_px: 40.0,
            poly_height_fraction: 0.33,
            max_iterations: 20,
        }
    }
}

/// Result of fitting one model to a branch
#[derive(Debug, Clone, Copy)]
struct Tangent {
    angle_deg: f64,
    residual_px: f64,
    model: FitModel,
}

#[derive(Debug, Clone, Copy)]
struct Circle {
    center: [f64; 2],
    radius: f64,
}

impl TangentFitter {
    fn circle_tangent(&self, points: &[[f64; 2]]) -> Option<Tangent> {
        let circle = refine_circle(points, kasa_circle(points)?, self.max_iterations)?;
        let residual_px = rms(points.iter().map(|&[w, v]| {
            (w - circle.center[0]).hypot(v - circle.center[1]) - circle.radius
        }));

        // Samples are boundary pixel centres, half a pixel inside the interface
        let radius = circle.radius + 0.5;
        let [cw, cv] = circle.center;
        let normal = if radius > cv.abs() {
            let half_chord = (radius * radius - cv * cv).sqrt();
            let w0 = if (cw - half_chord).abs() <= (cw + half_chord).abs() {
                cw - half_chord
            } else {
                cw + half_chord
            };
            [(w0 - cw) / radius, -cv / radius]
        } else {
            let d = cw.hypot(cv);
            [-cw / d, -cv / d]
        };

        Some(Tangent {
            angle_deg: (-normal[0]).atan2(normal[1]).to_degrees(),
            residual_px,
            model: FitModel::Circle,
        })
    }

    fn polynomial_tangent(&self, points: &[[f64; 2]]) -> Option<Tangent> {
        let degree = usize::from(self.poly_degree.clamp(2, 3));
        let needed = degree + 2;
        let top = points.iter().map(|p| p[1]).fold(0.0, f64::max);
        let limit = self.poly_height_px.min(self.poly_height_fraction * top);

        let mut window: Vec<[f64; 2]> = points.iter().copied().filter(|p| p[1] <= limit).collect();
        if window.len() < needed {
            window = points.iter().copied().take(needed).collect();
        }
        if window.len() < needed {
            return None;
        }

        // Heights are scaled into [0, 1] to keep the Vandermonde system conditioned
        let scale = window.iter().map(|p| p[1].abs()).fold(1.0, f64::max);
        let n = window.len();
        let a = DMatrix::from_fn(n, degree + 1, |i, j| (window[i][1] / scale).powi(j as i32));
        let b = DVector::from_fn(n, |i, _| window[i][0]);
        let coeffs = solve_least_squares(a, &b)?;

        let g = |v: f64| {
            let t = v / scale;
            coeffs.iter().rev().fold(0.0, |acc, c| acc * t + c)
        };
        let dg = |v: f64| {
            let t = v / scale;
            let dt = coeffs
                .iter()
                .enumerate()
                .skip(1)
                .rev()
                .fold(0.0, |acc, (j, c)| acc * t + j as f64 * c);
            dt / scale
        };

        let residual_px = rms(window.iter().map(|&[w, v]| (w - g(v)) / dg(v).hypot(1.0)));
        Some(Tangent {
            angle_deg: 1f64.atan2(dg(0.0)).to_degrees(),
            residual_px,
            model: FitModel::Polynomial,
        })
    }

    fn tangent(&self, points: &[[f64; 2]]) -> Option<Tangent> {
        match self.strategy {
            FitStrategy::Circle => self.circle_tangent(points),
            FitStrategy::Polynomial => self.polynomial_tangent(points),
            FitStrategy::Auto => match self.circle_tangent(points) {
                Some(circle) if self.is_spherical(points, &circle) => Some(circle),
                circle => {
                    tracing::debug!(
                        residual = ?circle.map(|c| c.residual_px),
                        "branch is not spherical, using polynomial"
                    );
                    self.polynomial_tangent(points)
                }
            },
        }
    }

    /// Whether the whole-branch circle describes the branch near the contact.
    ///
    /// Flattened drops are fitted closely by a circle over their full height
    /// while its tangent at the baseline is far off, so the lower part of the
    /// branch is refitted alone and the two angles must agree.
    fn is_spherical(&self, points: &[[f64; 2]], whole: &Tangent) -> bool {
        if whole.residual_px > self.sphericity_tolerance_px {
            return false;
        }
        let top = points.iter().map(|p| p[1]).fold(0.0, f64::max);
        let limit = self.sphericity_window_fraction * top;
        let lower: Vec<[f64; 2]> = points.iter().copied().filter(|p| p[1] <= limit).collect();

        // A staircase too short to bend gives no evidence either way
        let Some(local) = self.circle_tangent(&lower) else {
            return true;
        };
        let gap = (local.angle_deg - whole.angle_deg).abs();
        tracing::trace!(whole = whole.angle_deg, local = local.angle_deg, gap, "sphericity check");
        gap <= self.max_sphericity_gap_deg
    }
}

impl AngleFitter for TangentFitter {
    fn fit(&self, branch: &ContourBranch, baseline: &Baseline) -> Result<SideMeasurement> {
        let points = to_baseline_frame(branch, baseline);
        let failure = |residual_px: f64| AngleError::FitDidNotConverge {
            side: branch.side,
            residual_px,
            limit_px: self.max_residual_px,
        };

        let tangent = self.tangent(&points).ok_or_else(|| failure(f64::INFINITY))?;
        if !tangent.residual_px.is_finite() || tangent.residual_px > self.max_residual_px {
            return Err(failure(tangent.residual_px));
        }
        if !(tangent.angle_deg > 0.0 && tangent.angle_deg < 180.0) {
            tracing::debug!(angle = tangent.angle_deg, "tangent outside (0, 180)");
            return Err(failure(tangent.residual_px));
        }

        Ok(SideMeasurement {
            side: branch.side,
            angle_deg: tangent.angle_deg,
            branch_len: branch.len(),
            model: tangent.model,
            residual_px: tangent.residual_px,
        })
    }
}

/// Express branch points as `[w, v]` relative to the side's contact point
fn to_baseline_frame(branch: &ContourBranch, baseline: &Baseline) -> Vec<[f64; 2]> {
    let [cx, cy] = baseline.contact(branch.side).position;
    let along = baseline.line.direction();
    let up = baseline.line.up();
    let inward = match branch.side {
        Side::Left => 1.0,
        Side::Right => -1.0,
    };
    branch
        .points
        .iter()
        .map(|&[x, y]| {
            let (dx, dy) = (x - cx, y - cy);
            [inward * (dx * along[0] + dy * along[1]), dx * up[0] + dy * up[1]]
        })
        .collect()
}

/// Algebraic circle fit of `w² + v² + D w + E v + F = 0` on centred data
fn kasa_circle(points: &[[f64; 2]]) -> Option<Circle> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let mean_w = points.iter().map(|p| p[0]).sum::<f64>() / n as f64;
    let mean_v = points.iter().map(|p| p[1]).sum::<f64>() / n as f64;

    let a = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => points[i][0] - mean_w,
        1 => points[i][1] - mean_v,
        _ => 1.0,
    });
    let b = DVector::from_fn(n, |i, _| {
        let w = points[i][0] - mean_w;
        let v = points[i][1] - mean_v;
        -(w * w + v * v)
    });
    let sol = solve_least_squares(a, &b)?;
    let (d, e, f) = (sol[0], sol[1], sol[2]);

    let r2 = (d * d + e * e) / 4.0 - f;
    if !(r2 > 0.0 && r2.is_finite()) {
        return None;
    }
    Some(Circle {
        center: [mean_w - d / 2.0, mean_v - e / 2.0],
        radius: r2.sqrt(),
    })
}

/// Gauss-Newton minimisation of the geometric distance to the circle
fn refine_circle(points: &[[f64; 2]], mut circle: Circle, max_iterations: usize) -> Option<Circle> {
    for _ in 0..max_iterations {
        let mut jtj = Matrix3::<f64>::zeros();
        let mut jtr = Vector3::<f64>::zeros();
        for &[w, v] in points {
            let dw = w - circle.center[0];
            let dv = v - circle.center[1];
            let d = dw.hypot(dv);
            if d < f64::EPSILON {
                continue;
            }
            let j = Vector3::new(-dw / d, -dv / d, -1.0);
            jtj += j * j.transpose();
            jtr += j * (d - circle.radius);
        }

        let delta = jtj.lu().solve(&(-jtr))?;
        circle.center[0] += delta[0];
        circle.center[1] += delta[1];
        circle.radius += delta[2];
        if delta.norm() < 1e-9 {
            break;
        }
    }

    (circle.radius > 0.0 && circle.radius.is_finite()).then_some(circle)
}

fn solve_least_squares(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = a.svd(true, true);
    let largest = svd.singular_values.max();
    let smallest = svd.singular_values.min();
    if !(largest > 0.0) || smallest <= largest * RANK_TOLERANCE {
        return None;
    }
    let solution = svd.solve(b, f64::EPSILON).ok()?;
    solution.iter().all(|c| c.is_finite()).then_some(solution)
}

fn rms(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), r| (sum + r * r, count + 1));
    if count == 0 {
        return f64::INFINITY;
    }
    (sum / count as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaselineSource, ContactPoint, Direction, LineModel};

    /// Horizontal baseline at `y` with contacts at `left_x` and `right_x`
    fn flat_baseline(y: f64, left_x: f64, right_x: f64) -> Baseline {
        let contact = |x: f64, toward_apex| ContactPoint {
            position: [x, y],
            contour_index: 0,
            toward_apex,
        };
        Baseline {
            line: LineModel::horizontal(y),
            left: contact(left_x, Direction::Forward),
            right: contact(right_x, Direction::Backward),
            source: BaselineSource::SurfaceEdge,
        }
    }

    /// Exact arc of a drop meeting the baseline at `angle_deg`, sampled
    /// half a pixel inside the interface like traced boundary pixels
    fn arc_branch(side: Side, angle_deg: f64, radius: f64, baseline: &Baseline) -> ContourBranch {
        let theta = angle_deg.to_radians();
        let [cx, cy] = baseline.contact(side).position;
        let inward = if side == Side::Left { 1.0 } else { -1.0 };
        let (cw, cv) = (radius * theta.sin(), -radius * theta.cos());
        let inner = radius - 0.5;

        // Start just above the baseline, finish at the apex
        let start = (cv / radius).clamp(-1.0, 1.0).acos();
        let steps = 200;
        let points = (0..=steps)
            .filter_map(|k| {
                let phi = start + (std::f64::consts::PI - start) * k as f64 / steps as f64;
                let w = cw - inner * phi.sin();
                let v = cv - inner * phi.cos();
                (v > 0.0).then_some([cx + inward * w, cy - v])
            })
            .collect();
        ContourBranch { side, points }
    }

    #[test]
    fn circle_recovers_known_angles_on_both_sides() {
        let baseline = flat_baseline(200.0, 100.0, 300.0);
        for angle in [20.0, 60.0, 90.0, 135.0, 160.0] {
            for side in [Side::Left, Side::Right] {
                let branch = arc_branch(side, angle, 120.0, &baseline);
                let m = TangentFitter::default().fit(&branch, &baseline).unwrap();
                assert_eq!(m.model, FitModel::Circle);
                assert!((m.angle_deg - angle).abs() < 0.2, "{side} {angle}: got {}", m.angle_deg);
                assert!(m.residual_px < 1e-6);
            }
        }
    }

    #[test]
    fn polynomial_recovers_tangent() {
        let fitter = TangentFitter {
            strategy: FitStrategy::Polynomial,
            ..Default::default()
        };
        let baseline = flat_baseline(200.0, 100.0, 300.0);
        for angle in [60.0, 90.0, 120.0] {
            let branch = arc_branch(Side::Left, angle, 140.0, &baseline);
            let m = fitter.fit(&branch, &baseline).unwrap();
            assert_eq!(m.model, FitModel::Polynomial);
            assert!((m.angle_deg - angle).abs() < 1.5, "{angle}: got {}", m.angle_deg);
        }
    }

    /// Left flank of an ellipse with semi-axes 200 and 100 whose centre is
    /// 40 px below the baseline; it meets the baseline at 48.88 degrees
    fn flattened_branch(baseline: &Baseline) -> ContourBranch {
        let (a, b, depth) = (200.0_f64, 100.0_f64, 40.0_f64);
        let [cx, cy] = baseline.left.position;
        let start = std::f64::consts::PI - (depth / b).asin();
        let x0 = a * (1.0 - (depth / b).powi(2)).sqrt();
        let steps = 200;
        let points = (0..=steps)
            .map(|k| {
                let t = start + (std::f64::consts::FRAC_PI_2 - start) * k as f64 / steps as f64;
                let (w, v) = (a * t.cos() + x0, b * t.sin() - depth);
                [cx + w, cy - v]
            })
            .collect();
        ContourBranch {
            side: Side::Left,
            points,
        }
    }

    #[test]
    fn flattened_branch_is_not_taken_for_a_sphere() {
        let baseline = flat_baseline(200.0, 100.0, 300.0);
        let branch = flattened_branch(&baseline);

        // a circle still fits the whole flank, with the wrong tangent
        let circle = TangentFitter {
            strategy: FitStrategy::Circle,
            ..Default::default()
        }
        .fit(&branch, &baseline)
        .unwrap();
        assert!(circle.angle_deg < 43.0, "got {}", circle.angle_deg);

        let m = TangentFitter::default().fit(&branch, &baseline).unwrap();
        assert_eq!(m.model, FitModel::Polynomial);
        assert!((m.angle_deg - 48.88).abs() < 1.0, "got {}", m.angle_deg);
    }

    #[test]
    fn tilted_baseline_measures_relative_to_line() {
        // the same 70 degree arc, rotated with the line
        let flat = flat_baseline(200.0, 100.0, 300.0);
        let branch = arc_branch(Side::Left, 70.0, 120.0, &flat);
        let tilt: f64 = 5f64.to_radians();
        let (sin, cos) = tilt.sin_cos();
        let [cx, cy] = flat.left.position;
        let rotated: Vec<[f64; 2]> = branch
            .points
            .iter()
            .map(|&[x, y]| {
                let (dx, dy) = (x - cx, y - cy);
                [cx + dx * cos - dy * sin, cy + dx * sin + dy * cos]
            })
            .collect();
        let mut baseline = flat.clone();
        baseline.line = LineModel {
            slope: tilt.tan(),
            intercept: cy - tilt.tan() * cx,
        };

        let m = TangentFitter::default()
            .fit(&ContourBranch { side: Side::Left, points: rotated }, &baseline)
            .unwrap();
        assert!((m.angle_deg - 70.0).abs() < 0.2, "got {}", m.angle_deg);
    }

    #[test]
    fn ragged_branch_does_not_converge() {
        let baseline = flat_baseline(200.0, 100.0, 300.0);
        let points = (0..40)
            .map(|i| {
                let w = if i % 2 == 0 { 0.0 } else { 6.0 };
                [100.0 + w, 199.0 - f64::from(i)]
            })
            .collect();
        let branch = ContourBranch {
            side: Side::Left,
            points,
        };
        let err = TangentFitter::default().fit(&branch, &baseline).unwrap_err();
        assert!(matches!(err, AngleError::FitDidNotConverge { side: Side::Left, .. }));
    }

    #[test]
    fn collinear_points_are_rejected_by_circle_fit() {
        let fitter = TangentFitter {
            strategy: FitStrategy::Circle,
            ..Default::default()
        };
        let baseline = flat_baseline(200.0, 100.0, 300.0);
        let branch = ContourBranch {
            side: Side::Left,
            points: (0..10).map(|i| [100.0 + f64::from(i), 199.0 - f64::from(i)]).collect(),
        };
        assert!(matches!(
            fitter.fit(&branch, &baseline),
            Err(AngleError::FitDidNotConverge { .. })
        ));
    }
}
