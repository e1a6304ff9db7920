use crate::config::{ChannelOrder, Resolution};

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::prelude::*;

/// Channel-first `(C, H, W)` frame with values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTensor {
    data: Array3<f32>,
}

impl FrameTensor {
    #[inline]
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    #[inline]
    pub fn zeros(channels: usize, res: Resolution) -> Self {
        Self::new(Array3::zeros((
            channels,
            res.height as usize,
            res.width as usize,
        )))
    }

    /// Resizes to `target` exactly, then reorders to channel-first floats.
    pub fn from_image(img: &DynamicImage, target: Resolution, order: ChannelOrder) -> Self {
        let rgb = if img.width() == target.width && img.height() == target.height {
            img.to_rgb8()
        } else {
            img.resize_exact(target.width, target.height, FilterType::Triangle)
                .to_rgb8()
        };

        let (w, h) = (target.width as usize, target.height as usize);
        let mut data = Array3::zeros((3, h, w));

        for (x, y, px) in rgb.enumerate_pixels() {
            let [r, g, b] = px.0;
            let values = match order {
                ChannelOrder::Bgr => [b, g, r],
                ChannelOrder::Rgb => [r, g, b],
            };

            for (c, v) in values.into_iter().enumerate() {
                data[[c, y as usize, x as usize]] = v as f32 / 255.0;
            }
        }

        Self::new(data)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// `(width, height)`
    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width() as u32, self.height() as u32)
    }

    #[inline]
    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    #[inline]
    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample_image() -> DynamicImage {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 51]));
        img.put_pixel(3, 1, Rgb([0, 255, 0]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn converts_to_channel_first_bgr() {
        let t = FrameTensor::from_image(&sample_image(), Resolution::new(4, 2), ChannelOrder::Bgr);
        assert_eq!(t.view().dim(), (3, 2, 4));
        assert_eq!(t.dims(), (4, 2));
        assert!((t.view()[[0, 0, 0]] - 0.2).abs() < 1e-6);
        assert_eq!(t.view()[[2, 0, 0]], 1.0);
        assert_eq!(t.view()[[1, 1, 3]], 1.0);
        assert_eq!(t.view()[[1, 0, 1]], 0.0);
    }

    #[test]
    fn rgb_order_keeps_channels() {
        let t = FrameTensor::from_image(&sample_image(), Resolution::new(4, 2), ChannelOrder::Rgb);
        assert_eq!(t.view()[[0, 0, 0]], 1.0);
        assert!((t.view()[[2, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn resizes_to_exact_target() {
        let t = FrameTensor::from_image(&sample_image(), Resolution::new(16, 5), ChannelOrder::Bgr);
        assert_eq!(t.channels(), 3);
        assert_eq!(t.height(), 5);
        assert_eq!(t.width(), 16);
        assert!(t.view().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
