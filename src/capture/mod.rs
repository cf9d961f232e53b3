use crate::error::CaptureError;

#[cfg(target_os = "macos")]
mod macos;

/// One captured still image of the display, always tightly packed RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Channel order of a raw capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
    Bgra,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba | PixelLayout::Bgra => 4,
        }
    }
}

impl Frame {
    /// Normalize a raw 3- or 4-channel buffer into a 3-channel RGB frame.
    pub fn from_raw(
        pixels: &[u8],
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<Self, CaptureError> {
        let channels = layout.channels();
        let expected = width as usize * height as usize * channels;
        if pixels.len() != expected || expected == 0 {
            return Err(CaptureError::InvalidFrame {
                width,
                height,
                channels,
                actual: pixels.len(),
            });
        }

        let rgb = match layout {
            PixelLayout::Rgb => pixels.to_vec(),
            PixelLayout::Rgba => pixels
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            PixelLayout::Bgra => pixels
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };

        Ok(Self { rgb, width, height })
    }
}

/// Captures the primary display on demand.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<Frame, CaptureError>;
}

/// Frame source backed by the platform's screen capture API.
#[derive(Debug, Default)]
pub struct ScreenSource;

impl ScreenSource {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for ScreenSource {
    #[cfg(target_os = "macos")]
    fn capture(&self) -> Result<Frame, CaptureError> {
        macos::capture_primary_display()
    }

    #[cfg(not(target_os = "macos"))]
    fn capture(&self) -> Result<Frame, CaptureError> {
        Err(CaptureError::Unsupported)
    }
}
