use screencapturekit::error::SCError;
use screencapturekit::prelude::*;
use screencapturekit::screenshot_manager::SCScreenshotManager;

use super::{Frame, PixelLayout};
use crate::error::CaptureError;

impl From<SCError> for CaptureError {
    fn from(value: SCError) -> Self {
        CaptureError::Backend(value.to_string())
    }
}

pub(super) fn capture_primary_display() -> Result<Frame, CaptureError> {
    let content = SCShareableContent::get()?;
    let display = content
        .displays()
        .into_iter()
        .next()
        .ok_or(CaptureError::NoDisplay)?;

    let filter = SCContentFilter::builder()
        .display(&display)
        .exclude_windows(&[])
        .build();

    let config = SCStreamConfiguration::new()
        .with_width(display.width())
        .with_height(display.height())
        .with_shows_cursor(false);

    let image = SCScreenshotManager::capture_image(&filter, &config)?;
    let rgba = image.rgba_data()?;
    let width = image.width() as u32;
    let height = image.height() as u32;

    Frame::from_raw(&rgba, width, height, PixelLayout::Rgba)
}
