use std::io::{self, Write};

use crate::{batch::ImageOutcome, error::FailureKind, io::image_name};

/// Written instead of result lines when a batch has no images
pub const EMPTY_BATCH_LINE: &str = "No images found in the working folder";

impl ImageOutcome {
    /// One log line for this image, with the angle shown to `precision` decimals
    pub fn log_line(&self, precision: usize) -> String {
        match &self.result {
            Ok(result) => format!(
                "File: {}, Contact Angle: {:.*} degrees",
                image_name(&self.path),
                precision,
                result.angle_deg
            ),
            Err(err) if err.kind() == FailureKind::UnreadableImage => format!(
                "Error: Image not found or invalid format. Path: {}",
                self.path.display()
            ),
            Err(err) => format!(
                "Error: {} during {} for {}: {}",
                err.kind(),
                err.stage,
                err.image,
                err.reason
            ),
        }
    }
}

/// Write one line per outcome, in the order given
pub fn write_log<W: Write>(mut writer: W, outcomes: &[ImageOutcome], precision: usize) -> io::Result<()> {
    if outcomes.is_empty() {
        writeln!(writer, "{EMPTY_BATCH_LINE}")?;
        return writer.flush();
    }
    for outcome in outcomes {
        writeln!(writer, "{}", outcome.log_line(precision))?;
    }
    writer.flush()
}
