use crate::{
    error::{AngleError, Result},
    traits::ContourSplitter,
    types::{Baseline, Contour, ContourBranch, Side},
};

/// Splits the contour at its apex into two branches, each running from a
/// contact point upwards.
///
/// Points that would make a branch step back down towards the baseline are
/// skipped, and a branch stops as soon as it reaches the frame border.
#[derive(Debug, Clone)]
pub struct ApexSplitter {
    pub max_branch_points: usize,
    pub min_branch_points: usize,
}

impl Default for ApexSplitter {
    fn default() -> Self {
        Self {
            max_branch_points: 400,
            min_branch_points: 5,
        }
    }
}

impl ApexSplitter {
    fn branch(&self, contour: &Contour, baseline: &Baseline, side: Side, apex_height: f64) -> Result<ContourBranch> {
        let contact = baseline.contact(side);
        let mut index = contact.contour_index;
        let mut points = Vec::new();
        let mut last_height = f64::NEG_INFINITY;

        for _ in 0..contour.len() {
            let p = contour.at(index);
            if contour.on_frame(p) {
                tracing::debug!(%side, x = p[0], y = p[1], "branch reached the frame border");
                break;
            }
            let height = baseline.line.height_of(p);
            if height >= last_height {
                points.push(p);
                last_height = height;
                if height >= apex_height || points.len() >= self.max_branch_points {
                    break;
                }
            }
            index = contour.step(index, contact.toward_apex);
        }

        if points.len() < self.min_branch_points {
            return Err(AngleError::DegenerateBranch {
                side,
                points: points.len(),
                min_points: self.min_branch_points,
            });
        }
        Ok(ContourBranch { side, points })
    }
}

impl ContourSplitter for ApexSplitter {
    fn split(&self, contour: &Contour, baseline: &Baseline) -> Result<(ContourBranch, ContourBranch)> {
        let apex_height = contour
            .points()
            .iter()
            .map(|&p| baseline.line.height_of(p))
            .fold(f64::NEG_INFINITY, f64::max);

        let left = self.branch(contour, baseline, Side::Left, apex_height)?;
        let right = self.branch(contour, baseline, Side::Right, apex_height)?;
        tracing::debug!(left = left.len(), right = right.len(), "contour split");
        Ok((left, right))
    }
}
