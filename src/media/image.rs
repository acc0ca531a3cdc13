use crate::{Error, Result};
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;

pub const DEFAULT_MAX_DIMENSION: u32 = 2048;

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Memory order of a 3D pixel tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `H × W × C`
    ChannelsLast,
    /// `C × H × W`
    ChannelsFirst,
}

impl Layout {
    /// Guess the layout of a single-image shape.
    ///
    /// A leading axis of 1, 3 or 4 with a trailing axis that is not a channel
    /// count reads as channel-first; everything else as channel-last.
    pub fn infer(shape: &[usize]) -> Self {
        match shape {
            [first, _, last] if is_channel_count(*first) && !is_channel_count(*last) => {
                Layout::ChannelsFirst
            }
            _ => Layout::ChannelsLast,
        }
    }
}

fn is_channel_count(n: usize) -> bool {
    matches!(n, 1 | 3 | 4)
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    /// Normalised samples in `[0, 1]`; values outside are clamped.
    F32(Vec<f32>),
}

impl PixelData {
    fn len(&self) -> usize {
        match self {
            PixelData::U8(data) => data.len(),
            PixelData::F32(data) => data.len(),
        }
    }

    fn byte_at(&self, index: usize) -> u8 {
        match self {
            PixelData::U8(data) => data[index],
            PixelData::F32(data) => (data[index].clamp(0.0, 1.0) * 255.0) as u8,
        }
    }
}

/// A decoded image as the graph host hands it over: `H×W`, `H×W×C`,
/// `C×H×W`, or a batch `B×…` of which the first item is used.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: Vec<usize>,
    data: PixelData,
    layout: Option<Layout>,
}

impl ImageTensor {
    pub fn new(shape: Vec<usize>, data: PixelData) -> Result<Self> {
        if !(2..=4).contains(&shape.len()) {
            return Err(Error::InvalidInput(format!(
                "Image tensor must have 2 to 4 dimensions, got shape {:?}",
                shape
            )));
        }

        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                Error::InvalidInput(format!("Image tensor shape {:?} is too large", shape))
            })?;
        if expected == 0 {
            return Err(Error::InvalidInput(format!(
                "Image tensor has an empty dimension: {:?}",
                shape
            )));
        }
        if data.len() != expected {
            return Err(Error::InvalidInput(format!(
                "Image tensor shape {:?} needs {} samples, got {}",
                shape,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            shape,
            data,
            layout: None,
        })
    }

    /// Pin the layout instead of inferring it from the shape.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Build a `1×H×W×C` float tensor from an already decoded image.
    pub fn from_image(image: &DynamicImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let (channels, samples) = if image.color().has_alpha() {
            (4, image.to_rgba8().into_raw())
        } else {
            (3, image.to_rgb8().into_raw())
        };

        Self {
            shape: vec![1, height, width, channels],
            data: PixelData::F32(samples.into_iter().map(|v| v as f32 / 255.0).collect()),
            layout: Some(Layout::ChannelsLast),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Convert the first image of the tensor into an 8-bit image.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        // Batch items are stored back to back, so item 0 starts at offset 0.
        let dims = if self.shape.len() == 4 {
            &self.shape[1..]
        } else {
            &self.shape[..]
        };

        let (height, width, channels, layout) = match dims {
            [h, w] => (*h, *w, 1, Layout::ChannelsLast),
            [a, b, c] => match self.layout.unwrap_or_else(|| Layout::infer(dims)) {
                Layout::ChannelsLast => (*a, *b, *c, Layout::ChannelsLast),
                Layout::ChannelsFirst => (*b, *c, *a, Layout::ChannelsFirst),
            },
            _ => {
                return Err(Error::Invariant(format!(
                    "Unexpected image tensor shape {:?}",
                    self.shape
                )))
            }
        };

        if !is_channel_count(channels) {
            return Err(Error::InvalidInput(format!(
                "Unsupported channel count {} (expected 1, 3 or 4)",
                channels
            )));
        }

        let mut pixels = Vec::with_capacity(height * width * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    let index = match layout {
                        Layout::ChannelsLast => (y * width + x) * channels + c,
                        Layout::ChannelsFirst => c * height * width + y * width + x,
                    };
                    pixels.push(self.data.byte_at(index));
                }
            }
        }

        let too_large = |_| Error::InvalidInput(format!("Image too large: {}x{}", width, height));
        let w = u32::try_from(width).map_err(too_large)?;
        let h = u32::try_from(height).map_err(too_large)?;

        let image = match channels {
            1 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
            _ => RgbaImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgba8),
        };

        image.ok_or_else(|| Error::Invariant("Pixel buffer does not match image size".to_string()))
    }
}

/// Target size so that neither side exceeds `max_dimension`.
///
/// The longer side is clamped to `max_dimension` and the shorter side is
/// scaled by the same ratio, rounded to nearest (minimum 1).
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let max_dimension = max_dimension.max(1);
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scale = |side: u32, longest: u32| -> u32 {
        let scaled = (side as f64 * max_dimension as f64 / longest as f64).round();
        (scaled as u32).max(1)
    };

    if width >= height {
        (max_dimension, scale(height, width))
    } else {
        (scale(width, height), max_dimension)
    }
}

/// Encode the tensor as a PNG data URI, downscaling with Lanczos3 when the
/// longest side exceeds `max_dimension`.
pub fn encode_image_data_uri(tensor: &ImageTensor, max_dimension: u32) -> Result<String> {
    let mut image = tensor.to_dynamic_image()?;

    let (width, height) = (image.width(), image.height());
    let (target_width, target_height) = fit_within(width, height, max_dimension);
    if (target_width, target_height) != (width, height) {
        tracing::debug!(
            "Resizing image from {}x{} to {}x{}",
            width,
            height,
            target_width,
            target_height
        );
        image = image.resize_exact(target_width, target_height, FilterType::Lanczos3);
    }

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(format!(
        "{}{}",
        PNG_DATA_URI_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(&png)
    ))
}

/// [`encode_image_data_uri`] on the blocking thread pool.
pub async fn encode_image_blocking(tensor: ImageTensor, max_dimension: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || encode_image_data_uri(&tensor, max_dimension))
        .await
        .map_err(|e| Error::Invariant(format!("Image encoding task join error: {}", e)))?
}
