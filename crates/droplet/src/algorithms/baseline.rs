use std::collections::BTreeMap;

use crate::{
    error::{AngleError, Result},
    traits::BaselineDetector,
    types::{Baseline, BaselineSource, ContactPoint, Contour, Direction, LineModel, PixelGrid},
};

/// Below this the strongest column edge is treated as noise
const MIN_EDGE_STRENGTH: f64 = 10.0;

/// A contour point may dip this far below its predecessor while still
/// being followed along the baseline
const STEP_DOWN_SLACK_PX: f64 = 0.25;

/// Finds the substrate line beneath the droplet and the two contact points
/// where the silhouette meets it.
///
/// The preferred strategy looks for a long, nearly horizontal intensity edge
/// in the lower part of the image. If no such edge has
/// enough support, or it yields unusable contacts, the lower edge of the
/// silhouette's bounding box is used instead.
#[derive(Debug, Clone)]
pub struct SurfaceLineDetector {
    /// Lower fraction of the image searched for the substrate edge. When the
    /// silhouette ends above that band, the search also covers the same
    /// fraction of the silhouette height around its lowest row.
    pub search_fraction: f64,
    /// Columns weaker than this fraction of the strongest edge are ignored
    pub gradient_fraction: f64,
    /// Inlier columns needed, as a fraction of the image width
    pub min_support_fraction: f64,
    pub max_tilt_deg: f64,
    pub inlier_tolerance_px: f64,
    /// Contour points this close to the line count as touching it
    pub contact_band_px: f64,
    pub min_contact_width_px: f64,
    /// Upper bound on line refits before the inlier set settles
    pub max_refits: usize,
}

impl Default for SurfaceLineDetector {
    fn default() -> Self {
        Self {
            search_fraction: 0.25,
            gradient_fraction: 0.5,
            min_support_fraction: 0.15,
            max_tilt_deg: 10.0,
            inlier_tolerance_px: 0.75,
            contact_band_px: 1.0,
            min_contact_width_px: 3.0,
            max_refits: 10,
        }
    }
}

/// Strongest vertical intensity step found in one column
#[derive(Debug, Clone, Copy)]
struct ColumnEdge {
    x: f64,
    /// Sub-pixel edge position
    y: f64,
    sign: i8,
    strength: f64,
}

impl SurfaceLineDetector {
    /// Fit the substrate edge line, if the image shows one
    pub fn surface_line(&self, grid: &PixelGrid, contour: &Contour) -> Option<LineModel> {
        if contour.is_empty() || grid.height() < 3 {
            return None;
        }
        let (top, bottom) = self.search_rows(grid, contour);
        if bottom <= top {
            return None;
        }

        let edges: Vec<ColumnEdge> = (0..grid.width())
            .filter_map(|x| column_edge(grid, x, top, bottom))
            .collect();
        let strongest = edges.iter().map(|e| e.strength).fold(0.0, f64::max);
        if strongest < MIN_EDGE_STRENGTH {
            tracing::debug!(strongest, "no substrate edge in search band");
            return None;
        }
        let strong: Vec<ColumnEdge> = edges
            .into_iter()
            .filter(|e| e.strength >= self.gradient_fraction * strongest)
            .collect();

        // Vote on the edge row; ties go to the lowest row
        let mut votes: BTreeMap<(i64, i8), usize> = BTreeMap::new();
        for edge in &strong {
            *votes.entry((edge.y.floor() as i64, edge.sign)).or_default() += 1;
        }
        let ((row, sign), _) = votes
            .into_iter()
            .max_by_key(|&((row, _), count)| (count, row))?;
        let candidates: Vec<&ColumnEdge> = strong.iter().filter(|e| e.sign == sign).collect();

        // Seed wide enough to bridge the stair steps of a tilted edge
        let mut line = LineModel::horizontal(row as f64 + 0.5);
        let mut tolerance = self.inlier_tolerance_px + 1.0;
        let mut inliers = collect_inliers(&candidates, &line, tolerance);
        for _ in 0..self.max_refits {
            let Some(fitted) = fit_line(&inliers) else {
                break;
            };
            line = fitted;
            tolerance = self.inlier_tolerance_px;
            let next = collect_inliers(&candidates, &line, tolerance);
            let settled = next.len() == inliers.len();
            inliers = next;
            if settled {
                break;
            }
        }

        let support = inliers.len();
        let required = self.min_support_fraction * f64::from(grid.width());
        let max_slope = self.max_tilt_deg.to_radians().tan();
        tracing::debug!(support, required, slope = line.slope, "substrate edge candidate");
        if (support as f64) < required || line.slope.abs() > max_slope {
            return None;
        }
        Some(line)
    }

    /// Rows `top..=bottom` scanned for the substrate edge
    fn search_rows(&self, grid: &PixelGrid, contour: &Contour) -> (u32, u32) {
        let last = grid.height() - 1;
        let image_top = (1.0 - self.search_fraction) * f64::from(grid.height());

        let (min, max) = contour.bounding_box();
        let reach = self.search_fraction * (max[1] - min[1]).max(1.0);
        let top = image_top.min(max[1] - reach).floor().max(0.0) as u32;
        (top.min(last), last)
    }

    /// Walk down both flanks from the apex until the contour meets `line`.
    ///
    /// Returns `(left, right)` or a description of why the line gives no
    /// usable pair of contacts.
    pub fn locate_contacts(
        &self,
        contour: &Contour,
        line: &LineModel,
    ) -> std::result::Result<(ContactPoint, ContactPoint), String> {
        let n = contour.len();
        if n < 3 {
            return Err("contour too short".to_string());
        }
        let heights: Vec<f64> = contour.points().iter().map(|&p| line.height_of(p)).collect();
        let apex = heights
            .iter()
            .enumerate()
            .fold(0, |best, (i, &h)| if h > heights[best] { i } else { best });

        let dir = line.direction();
        let along = |i: usize| {
            let [x, y] = contour.at(i);
            x * dir[0] + y * dir[1]
        };
        let apex_u = along(apex);
        let band = self.contact_band_px;

        let walk = |direction: Direction| -> Option<usize> {
            let mut index = apex;
            let mut steps = 0;
            while heights[index] > band {
                index = contour.step(index, direction);
                steps += 1;
                if steps >= n {
                    return None;
                }
            }
            // Follow the contour outward along the line while it hugs it
            while steps < n {
                let next = contour.step(index, direction);
                if next == apex {
                    break;
                }
                let in_band = heights[next].abs() <= band;
                let outward = (along(next) - apex_u).abs() >= (along(index) - apex_u).abs();
                let level = heights[next] >= heights[index] - STEP_DOWN_SLACK_PX;
                if !(in_band && outward && level) {
                    break;
                }
                index = next;
                steps += 1;
            }
            Some(index)
        };

        let backward = walk(Direction::Backward).ok_or("left flank never reaches the line")?;
        let forward = walk(Direction::Forward).ok_or("right flank never reaches the line")?;
        if backward == forward {
            return Err("contact points coincide".to_string());
        }

        let mut left = ContactPoint {
            position: line.project(contour.at(backward)),
            contour_index: backward,
            toward_apex: Direction::Forward,
        };
        let mut right = ContactPoint {
            position: line.project(contour.at(forward)),
            contour_index: forward,
            toward_apex: Direction::Backward,
        };
        if left.position[0] > right.position[0] {
            std::mem::swap(&mut left, &mut right);
        }

        let width = (right.position[0] - left.position[0]).hypot(right.position[1] - left.position[1]);
        if width < self.min_contact_width_px {
            return Err(format!(
                "contact width {width:.2}px below {:.2}px",
                self.min_contact_width_px
            ));
        }
        let max_x = f64::from(contour.image_width) - 0.5;
        let max_y = f64::from(contour.image_height) - 0.5;
        for contact in [&left, &right] {
            let [x, y] = contact.position;
            if !(-0.5..=max_x).contains(&x) || !(-0.5..=max_y).contains(&y) {
                return Err(format!("contact ({x:.1}, {y:.1}) outside the frame"));
            }
        }
        Ok((left, right))
    }
}

impl BaselineDetector for SurfaceLineDetector {
    fn detect(&self, grid: &PixelGrid, contour: &Contour) -> Result<Baseline> {
        if contour.is_empty() {
            return Err(AngleError::BaselineNotFound("empty contour".to_string()));
        }
        let mut reasons = Vec::new();

        match self.surface_line(grid, contour) {
            Some(line) => match self.locate_contacts(contour, &line) {
                Ok((left, right)) => {
                    return Ok(Baseline {
                        line,
                        left,
                        right,
                        source: BaselineSource::SurfaceEdge,
                    });
                }
                Err(reason) => {
                    tracing::debug!(%reason, "substrate edge rejected");
                    reasons.push(format!("surface edge: {reason}"));
                }
            },
            None => reasons.push("surface edge: no supported horizontal edge".to_string()),
        }

        let (_, max) = contour.bounding_box();
        let line = LineModel::horizontal(max[1] + 0.5);
        match self.locate_contacts(contour, &line) {
            Ok((left, right)) => Ok(Baseline {
                line,
                left,
                right,
                source: BaselineSource::BoundingBox,
            }),
            Err(reason) => {
                reasons.push(format!("bounding box: {reason}"));
                Err(AngleError::BaselineNotFound(reasons.join("; ")))
            }
        }
    }
}

/// Scan a column bottom-up for its strongest step between rows `top` and `bottom`
fn column_edge(grid: &PixelGrid, x: u32, top: u32, bottom: u32) -> Option<ColumnEdge> {
    let last = grid.height() - 1;
    let diff = |y: u32| f64::from(grid.get(x, y + 1)) - f64::from(grid.get(x, y));

    let mut best: Option<(u32, f64)> = None;
    for y in (top..bottom).rev() {
        let d = diff(y);
        if best.is_none_or(|(_, b)| d.abs() > b.abs()) {
            best = Some((y, d));
        }
    }
    let (y, d) = best?;
    if d == 0.0 {
        return None;
    }

    // Parabolic peak of the sign-adjusted difference profile
    let sign = d.signum();
    let c = d.abs();
    let l = if y > 0 { (sign * diff(y - 1)).max(0.0) } else { 0.0 };
    let r = if y + 2 <= last { (sign * diff(y + 1)).max(0.0) } else { 0.0 };
    let denom = l - 2.0 * c + r;
    let offset = if denom < 0.0 {
        ((l - r) / (2.0 * denom)).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    Some(ColumnEdge {
        x: f64::from(x),
        y: f64::from(y) + 0.5 + offset,
        sign: sign as i8,
        strength: c,
    })
}

fn collect_inliers<'a>(edges: &[&'a ColumnEdge], line: &LineModel, tolerance: f64) -> Vec<&'a ColumnEdge> {
    edges
        .iter()
        .copied()
        .filter(|e| (e.y - line.y_at(e.x)).abs() <= tolerance)
        .collect()
}

/// Ordinary least squares fit of `y` against `x`
fn fit_line(edges: &[&ColumnEdge]) -> Option<LineModel> {
    if edges.len() < 2 {
        return None;
    }
    let n = edges.len() as f64;
    let mean_x = edges.iter().map(|e| e.x).sum::<f64>() / n;
    let mean_y = edges.iter().map(|e| e.y).sum::<f64>() / n;
    let (sxx, sxy) = edges.iter().fold((0.0, 0.0), |(sxx, sxy), e| {
        let dx = e.x - mean_x;
        (sxx + dx * dx, sxy + dx * (e.y - mean_y))
    });
    if sxx < f64::EPSILON {
        return None;
    }
    let slope = sxy / sxx;
    Some(LineModel {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithms::extraction::SilhouetteExtractor, synthetic::SessileDrop, traits::EdgeExtractor,
    };
    use image::{GrayImage, Luma};

    fn detect(grid: &PixelGrid) -> Result<Baseline> {
        let contour = SilhouetteExtractor::default().extract(grid)?;
        SurfaceLineDetector::default().detect(grid, &contour)
    }

    #[test]
    fn finds_substrate_edge_under_isolated_drop() {
        let drop = SessileDrop::new(60.0);
        let baseline = detect(&drop.grid()).unwrap();

        assert_eq!(baseline.source, BaselineSource::SurfaceEdge);
        assert!(baseline.line.slope.abs() < 1e-9);
        assert!((baseline.line.y_at(drop.center_x) - drop.baseline_y()).abs() < 1e-6);

        let half_chord = drop.contact_half_width();
        assert!((baseline.left.position[0] - (drop.center_x - half_chord)).abs() < 1.5);
        assert!((baseline.right.position[0] - (drop.center_x + half_chord)).abs() < 1.5);
        assert_eq!(baseline.left.toward_apex, Direction::Forward);
        assert_eq!(baseline.right.toward_apex, Direction::Backward);
    }

    #[test]
    fn finds_substrate_edge_when_silhouette_merges_with_substrate() {
        let drop = SessileDrop::new(60.0).with_substrate_level(40);
        let baseline = detect(&drop.grid()).unwrap();

        assert_eq!(baseline.source, BaselineSource::SurfaceEdge);
        assert!((baseline.line.y_at(drop.center_x) - drop.baseline_y()).abs() < 0.1);
        let half_chord = drop.contact_half_width();
        assert!((baseline.contact_width() - 2.0 * half_chord).abs() < 4.0);
    }

    #[test]
    fn finds_substrate_edge_under_low_merged_drop() {
        // the silhouette spans down to the frame, far below the substrate edge
        for angle in [20.0, 30.0, 45.0] {
            let drop = SessileDrop::new(angle).with_substrate_level(40);
            let grid = drop.grid();
            let contour = SilhouetteExtractor::default().extract(&grid).unwrap();
            assert_eq!(contour.bounding_box().1[1], f64::from(drop.height - 1));

            let baseline = SurfaceLineDetector::default().detect(&grid, &contour).unwrap();
            assert_eq!(baseline.source, BaselineSource::SurfaceEdge);
            assert!((baseline.line.y_at(drop.center_x) - drop.baseline_y()).abs() < 0.1);
            let half_chord = drop.contact_half_width();
            assert!((baseline.contact_width() - 2.0 * half_chord).abs() < 4.0, "{angle}");
        }
    }

    #[test]
    fn narrow_footprint_falls_back_to_bounding_box() {
        let drop = SessileDrop::new(170.0);
        let baseline = detect(&drop.grid()).unwrap();

        assert_eq!(baseline.source, BaselineSource::BoundingBox);
        assert!((baseline.line.y_at(0.0) - drop.baseline_y()).abs() < 1e-9);
        assert!(baseline.left.position[0] < baseline.right.position[0]);
    }

    #[test]
    fn recovers_tilted_edge() {
        let grid = PixelGrid::new(GrayImage::from_fn(200, 150, |x, y| {
            if f64::from(y) > 80.0 + 0.05 * f64::from(x) {
                Luma([40u8])
            } else {
                Luma([220u8])
            }
        }));
        let band = Contour::new(vec![[50.0, 60.0], [150.0, 60.0], [150.0, 84.0], [50.0, 84.0]], 200, 150);

        let line = SurfaceLineDetector::default().surface_line(&grid, &band).unwrap();
        assert!((line.slope - 0.05).abs() < 0.005, "slope {}", line.slope);
        assert!((line.y_at(100.0) - 85.0).abs() < 0.3);
    }

    #[test]
    fn pointed_silhouette_has_no_baseline() {
        let grid = PixelGrid::new(GrayImage::from_fn(300, 200, |x, y| {
            let d = (i64::from(x) - 150).abs() + (i64::from(y) - 100).abs();
            if d <= 60 { Luma([40u8]) } else { Luma([220u8]) }
        }));
        let err = detect(&grid).unwrap_err();
        assert!(matches!(err, AngleError::BaselineNotFound(_)));
    }
}
