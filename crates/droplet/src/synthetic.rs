//! Rendering of ideal sessile drops with a known contact angle, used to
//! validate the measurement chain end to end.

use std::path::Path;

use image::{GrayImage, Luma};

use crate::{error::Result, types::PixelGrid};

/// Free margin around the drop, split between left and right
const SIDE_MARGIN_PX: f64 = 180.0;
/// Rows kept free above the apex
const TOP_MARGIN_PX: f64 = 60.0;
const SUBSTRATE_ROWS: u32 = 20;
const MIN_HEIGHT: u32 = 200;

/// A spherical cap resting on a flat substrate, seen from the side.
///
/// Rows at and below `baseline_row` are substrate. The drop is the part of
/// the circle above the substrate; a pixel belongs to it when its centre
/// lies inside the circle.
#[derive(Debug, Clone, PartialEq)]
pub struct SessileDrop {
    pub width: u32,
    pub height: u32,
    pub baseline_row: u32,
    pub contact_angle_deg: f64,
    pub radius_px: f64,
    pub center_x: f64,
    pub droplet_level: u8,
    pub background_level: u8,
    pub substrate_level: u8,
}

impl SessileDrop {
    /// Drop of the given angle sized to fit comfortably in the frame, on a
    /// substrate indistinguishable from the background.
    ///
    /// Up to 90 degrees the footprint is fixed at 240 px; beyond that the
    /// radius is fixed at 150 px.
    pub fn new(contact_angle_deg: f64) -> Self {
        let theta = contact_angle_deg.to_radians();
        let (radius, span) = if contact_angle_deg <= 90.0 {
            let radius = 120.0 / theta.sin();
            (radius, 240.0)
        } else {
            (150.0, 300.0)
        };
        let cap = radius * (1.0 - theta.cos());

        let width = (span + SIDE_MARGIN_PX).ceil() as u32;
        let height = ((cap + TOP_MARGIN_PX).ceil() as u32 + SUBSTRATE_ROWS).max(MIN_HEIGHT);
        Self {
            width,
            height,
            baseline_row: height - SUBSTRATE_ROWS,
            contact_angle_deg,
            radius_px: radius,
            center_x: f64::from(width - 1) / 2.0,
            droplet_level: 40,
            background_level: 220,
            substrate_level: 220,
        }
    }

    /// Same drop on a substrate of the given gray level
    pub fn with_substrate_level(mut self, level: u8) -> Self {
        self.substrate_level = level;
        self
    }

    /// Image y of the substrate surface
    pub fn baseline_y(&self) -> f64 {
        f64::from(self.baseline_row) - 0.5
    }

    /// Half of the true footprint width on the substrate
    pub fn contact_half_width(&self) -> f64 {
        self.radius_px * self.contact_angle_deg.to_radians().sin()
    }

    fn center_y(&self) -> f64 {
        self.baseline_y() + self.radius_px * self.contact_angle_deg.to_radians().cos()
    }

    pub fn render(&self) -> GrayImage {
        let cy = self.center_y();
        let r2 = self.radius_px * self.radius_px;
        GrayImage::from_fn(self.width, self.height, |x, y| {
            if y >= self.baseline_row {
                return Luma([self.substrate_level]);
            }
            let dx = f64::from(x) - self.center_x;
            let dy = f64::from(y) - cy;
            if dx * dx + dy * dy <= r2 {
                Luma([self.droplet_level])
            } else {
                Luma([self.background_level])
            }
        })
    }

    pub fn grid(&self) -> PixelGrid {
        PixelGrid::new(self.render())
    }

    /// Write the rendering; the format follows the file extension
    pub fn save(&self, path: &Path) -> Result<()> {
        self.render().save(path)?;
        Ok(())
    }
}

/// A drop flattened by gravity, modelled as the part of an axis-aligned
/// ellipse above the substrate. Its centre sits `center_depth_px` below the
/// substrate surface, so the contact angle stays under 90 degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedDrop {
    pub width: u32,
    pub height: u32,
    pub baseline_row: u32,
    /// Horizontal semi-axis
    pub semi_width_px: f64,
    /// Vertical semi-axis
    pub semi_height_px: f64,
    pub center_depth_px: f64,
    pub center_x: f64,
    pub droplet_level: u8,
    pub background_level: u8,
}

impl FlattenedDrop {
    pub fn new(semi_width_px: f64, semi_height_px: f64, center_depth_px: f64) -> Self {
        let cap = semi_height_px - center_depth_px;
        let width = (2.0 * semi_width_px + SIDE_MARGIN_PX).ceil() as u32;
        let height = ((cap + TOP_MARGIN_PX).ceil() as u32 + SUBSTRATE_ROWS).max(MIN_HEIGHT);
        Self {
            width,
            height,
            baseline_row: height - SUBSTRATE_ROWS,
            semi_width_px,
            semi_height_px,
            center_depth_px,
            center_x: f64::from(width - 1) / 2.0,
            droplet_level: 40,
            background_level: 220,
        }
    }

    pub fn baseline_y(&self) -> f64 {
        f64::from(self.baseline_row) - 0.5
    }

    /// Angle between the substrate and the ellipse tangent at the contact
    pub fn contact_angle_deg(&self) -> f64 {
        let (a, b, d) = (self.semi_width_px, self.semi_height_px, self.center_depth_px);
        let x0 = a * (1.0 - (d / b).powi(2)).sqrt();
        (b * b * x0 / (a * a * d)).atan().to_degrees()
    }

    pub fn render(&self) -> GrayImage {
        let cy = self.baseline_y() + self.center_depth_px;
        GrayImage::from_fn(self.width, self.height, |x, y| {
            if y >= self.baseline_row {
                return Luma([self.background_level]);
            }
            let u = (f64::from(x) - self.center_x) / self.semi_width_px;
            let v = (f64::from(y) - cy) / self.semi_height_px;
            if u * u + v * v <= 1.0 {
                Luma([self.droplet_level])
            } else {
                Luma([self.background_level])
            }
        })
    }

    pub fn grid(&self) -> PixelGrid {
        PixelGrid::new(self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hemisphere_geometry() {
        let drop = SessileDrop::new(90.0);
        assert_eq!((drop.width, drop.height), (420, 200));
        assert_eq!(drop.baseline_row, 180);
        assert!((drop.radius_px - 120.0).abs() < 1e-9);
        assert!((drop.contact_half_width() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn render_is_left_right_symmetric() {
        let drop = SessileDrop::new(130.0);
        let image = drop.render();
        assert_eq!(image, image::imageops::flip_horizontal(&image));
    }

    #[test]
    fn substrate_rows_take_substrate_level() {
        let drop = SessileDrop::new(45.0).with_substrate_level(40);
        let image = drop.render();
        let mid = drop.center_x.round() as u32;
        assert_eq!(image.get_pixel(0, drop.baseline_row)[0], 40);
        assert_eq!(image.get_pixel(0, drop.baseline_row - 1)[0], 220);
        assert_eq!(image.get_pixel(mid, drop.baseline_row - 1)[0], 40);
        assert_eq!(image.get_pixel(mid, 0)[0], 220);
    }

    #[test]
    fn tall_drops_grow_the_frame() {
        let drop = SessileDrop::new(170.0);
        let cap = drop.radius_px * (1.0 - drop.contact_angle_deg.to_radians().cos());
        assert!(f64::from(drop.baseline_row) > cap + TOP_MARGIN_PX - 1.0);
        assert_eq!(drop.width, 480);
    }

    #[test]
    fn flattened_drop_geometry() {
        let drop = FlattenedDrop::new(200.0, 100.0, 40.0);
        assert_eq!((drop.width, drop.height), (580, 200));
        assert!((drop.contact_angle_deg() - 48.88).abs() < 0.01);

        let image = drop.render();
        let mid = drop.center_x.round() as u32;
        // cap height is 60 px
        assert_eq!(image.get_pixel(mid, drop.baseline_row - 59)[0], 40);
        assert_eq!(image.get_pixel(mid, drop.baseline_row - 61)[0], 220);
        assert_eq!(image, image::imageops::flip_horizontal(&image));
    }
}
