//! Fixed-size region sampling (RoIAlign / crop-and-resize) over a `(C, H, W)`
//! feature tensor, with a backward pass for both the tensor and the boxes.

use crate::bbox::{BBox, Ltrb};
use crate::config::CropConfig;
use crate::error::Error;

use ndarray::prelude::*;
use ndarray::{ErrorKind, ShapeError};

// Samples this close past the last row/column snap onto it instead of extrapolating.
const EDGE_EPS: f32 = 1e-3;

#[derive(Debug, Clone, Copy)]
struct Sample {
    lo: usize,
    hi: usize,
    frac: f32,
    inside: bool,
    // d(position) / d(box start), d(position) / d(box end)
    d_start: f32,
    d_end: f32,
}

fn axis_samples(start: f32, end: f32, n: usize, size: usize, aligned: bool) -> Vec<Sample> {
    let last = size as f32 - 1.0;

    (0..n)
        .map(|i| {
            let t = if aligned {
                (i as f32 + 0.5) / n as f32
            } else if n > 1 {
                i as f32 / (n - 1) as f32
            } else {
                0.5
            };

            let mut pos = start + t * (end - start);
            if aligned {
                pos -= 0.5;
            }

            let inside = size > 0 && pos >= -EDGE_EPS && pos <= last + EDGE_EPS;
            let (lo, hi, frac) = if inside {
                let pos = pos.clamp(0.0, last);
                let lo = (pos.floor() as usize).min(size - 1);
                let hi = (lo + 1).min(size - 1);
                (lo, hi, pos - lo as f32)
            } else {
                (0, 0, 0.0)
            };

            Sample {
                lo,
                hi,
                frac,
                inside,
                d_start: 1.0 - t,
                d_end: t,
            }
        })
        .collect()
}

/// Gradients returned by [`RoiAlign::backward`].
#[derive(Debug, Clone)]
pub struct RoiAlignGrad {
    /// Same shape as the input tensor.
    pub features: Array3<f32>,
    /// `(x1, y1, x2, y2)` per box, in the unscaled box coordinate space.
    pub boxes: Vec<[f32; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoiAlign {
    pub crop_height: usize,
    pub crop_width: usize,
    pub spatial_scale: f32,
    pub extrapolation_value: f32,
    pub aligned: bool,
}

impl RoiAlign {
    pub fn new(crop_height: usize, crop_width: usize, spatial_scale: f32) -> Self {
        Self {
            crop_height,
            crop_width,
            spatial_scale,
            extrapolation_value: 0.0,
            aligned: true,
        }
    }

    pub fn from_config(config: &CropConfig) -> Self {
        Self {
            crop_height: config.height,
            crop_width: config.width,
            spatial_scale: config.spatial_scale,
            extrapolation_value: config.extrapolation_value,
            aligned: config.aligned,
        }
    }

    pub fn with_extrapolation_value(mut self, value: f32) -> Self {
        self.extrapolation_value = value;
        self
    }

    pub fn with_aligned(mut self, aligned: bool) -> Self {
        self.aligned = aligned;
        self
    }

    fn grid(&self, dims: (usize, usize), bbox: &BBox<Ltrb>) -> (Vec<Sample>, Vec<Sample>) {
        let (height, width) = dims;
        let b = bbox.scaled(self.spatial_scale);

        let ys = axis_samples(b.top(), b.bottom(), self.crop_height, height, self.aligned);
        let xs = axis_samples(b.left(), b.right(), self.crop_width, width, self.aligned);

        (ys, xs)
    }

    /// Samples every box into an `(N, C, crop_height, crop_width)` tensor.
    pub fn forward(&self, features: ArrayView3<'_, f32>, boxes: &[BBox<Ltrb>]) -> Array4<f32> {
        let (channels, height, width) = features.dim();
        let mut out = Array4::from_elem(
            (boxes.len(), channels, self.crop_height, self.crop_width),
            self.extrapolation_value,
        );

        for (n, bbox) in boxes.iter().enumerate() {
            let (ys, xs) = self.grid((height, width), bbox);

            for c in 0..channels {
                let plane = features.index_axis(Axis(0), c);

                for (i, sy) in ys.iter().enumerate().filter(|(_, s)| s.inside) {
                    for (j, sx) in xs.iter().enumerate().filter(|(_, s)| s.inside) {
                        let tl = plane[[sy.lo, sx.lo]];
                        let tr = plane[[sy.lo, sx.hi]];
                        let bl = plane[[sy.hi, sx.lo]];
                        let br = plane[[sy.hi, sx.hi]];

                        let top = tl + (tr - tl) * sx.frac;
                        let bottom = bl + (br - bl) * sx.frac;

                        out[[n, c, i, j]] = top + (bottom - top) * sy.frac;
                    }
                }
            }
        }

        out
    }

    /// Like [`forward`](Self::forward) but one `(C, crop_height, crop_width)` array per box.
    pub fn crops(&self, features: ArrayView3<'_, f32>, boxes: &[BBox<Ltrb>]) -> Vec<Array3<f32>> {
        self.forward(features, boxes)
            .outer_iter()
            .map(|crop| crop.to_owned())
            .collect()
    }

    /// Propagates `grad_output` (shaped like the forward output) back onto the
    /// input tensor and the box corners.
    pub fn backward(
        &self,
        features: ArrayView3<'_, f32>,
        boxes: &[BBox<Ltrb>],
        grad_output: ArrayView4<'_, f32>,
    ) -> Result<RoiAlignGrad, Error> {
        let (channels, height, width) = features.dim();
        if grad_output.dim() != (boxes.len(), channels, self.crop_height, self.crop_width) {
            return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
        }

        let mut grad_features = Array3::<f32>::zeros((channels, height, width));
        let mut grad_boxes = vec![[0.0f32; 4]; boxes.len()];

        for (n, bbox) in boxes.iter().enumerate() {
            let (ys, xs) = self.grid((height, width), bbox);
            let gb = &mut grad_boxes[n];

            for c in 0..channels {
                let plane = features.index_axis(Axis(0), c);

                for (i, sy) in ys.iter().enumerate().filter(|(_, s)| s.inside) {
                    for (j, sx) in xs.iter().enumerate().filter(|(_, s)| s.inside) {
                        let g = grad_output[[n, c, i, j]];
                        if g == 0.0 {
                            continue;
                        }

                        let (fx, fy) = (sx.frac, sy.frac);
                        grad_features[[c, sy.lo, sx.lo]] += g * (1.0 - fy) * (1.0 - fx);
                        grad_features[[c, sy.lo, sx.hi]] += g * (1.0 - fy) * fx;
                        grad_features[[c, sy.hi, sx.lo]] += g * fy * (1.0 - fx);
                        grad_features[[c, sy.hi, sx.hi]] += g * fy * fx;

                        let tl = plane[[sy.lo, sx.lo]];
                        let tr = plane[[sy.lo, sx.hi]];
                        let bl = plane[[sy.hi, sx.lo]];
                        let br = plane[[sy.hi, sx.hi]];

                        let d_x = (1.0 - fy) * (tr - tl) + fy * (br - bl);
                        let d_y = (bl + (br - bl) * fx) - (tl + (tr - tl) * fx);

                        gb[0] += g * d_x * sx.d_start;
                        gb[1] += g * d_y * sy.d_start;
                        gb[2] += g * d_x * sx.d_end;
                        gb[3] += g * d_y * sy.d_end;
                    }
                }
            }

            for v in gb.iter_mut() {
                *v *= self.spatial_scale;
            }
        }

        Ok(RoiAlignGrad {
            features: grad_features,
            boxes: grad_boxes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(h: usize, w: usize, a: f32, b: f32) -> Array3<f32> {
        Array3::from_shape_fn((1, h, w), |(_, y, x)| a * x as f32 + b * y as f32)
    }

    fn wavy(c: usize, h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((c, h, w), |(c, y, x)| {
            ((c * 31 + y * 7 + x * 3) as f32 * 0.37).sin()
        })
    }

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn crops_have_fixed_shape() {
        let f = wavy(3, 24, 32);
        let roi = RoiAlign::new(7, 5, 1.0);
        let boxes = [
            BBox::ltrb(3.0, 4.0, 4.0, 5.0),
            BBox::ltrb(0.0, 0.0, 32.0, 24.0),
            BBox::ltrb(10.0, 10.0, 10.0, 10.0),
            BBox::ltrb(-20.0, -20.0, 60.0, 5.0),
        ];

        let out = roi.forward(f.view(), &boxes);
        assert_eq!(out.dim(), (4, 3, 7, 5));

        let crops = roi.crops(f.view(), &boxes);
        assert_eq!(crops.len(), 4);
        for crop in &crops {
            assert_eq!(crop.dim(), (3, 7, 5));
        }
    }

    #[test]
    fn no_boxes_gives_empty_batch() {
        let f = wavy(3, 8, 8);
        let out = RoiAlign::new(4, 4, 1.0).forward(f.view(), &[]);
        assert_eq!(out.dim(), (0, 3, 4, 4));
    }

    #[test]
    fn aligned_full_frame_at_native_size_is_identity() {
        let f = wavy(2, 6, 9);
        let roi = RoiAlign::new(6, 9, 1.0);
        let out = roi.forward(f.view(), &[BBox::ltrb(0.0, 0.0, 9.0, 6.0)]);

        for ((c, y, x), v) in f.indexed_iter() {
            assert!(close(out[[0, c, y, x]], *v, 1e-5));
        }
    }

    #[test]
    fn unaligned_box_reaches_last_pixel() {
        let f = wavy(1, 3, 7);
        let roi = RoiAlign::new(3, 7, 1.0).with_aligned(false);
        let out = roi.forward(f.view(), &[BBox::ltrb(0.0, 0.0, 6.0, 2.0)]);

        for ((c, y, x), v) in f.indexed_iter() {
            assert!(close(out[[0, c, y, x]], *v, 1e-4));
        }
    }

    #[test]
    fn spatial_scale_maps_boxes_onto_feature_map() {
        let f = wavy(1, 4, 4);
        let roi = RoiAlign::new(4, 4, 0.25);
        let out = roi.forward(f.view(), &[BBox::ltrb(0.0, 0.0, 16.0, 16.0)]);

        for ((c, y, x), v) in f.indexed_iter() {
            assert!(close(out[[0, c, y, x]], *v, 1e-5));
        }
    }

    #[test]
    fn bilinear_sampling_is_exact_on_a_ramp() {
        let f = ramp(16, 16, 2.0, 3.0);
        let roi = RoiAlign::new(4, 5, 1.0);
        let b = BBox::ltrb(2.3, 3.1, 9.7, 11.2);
        let out = roi.forward(f.view(), &[b]);

        for i in 0..4 {
            for j in 0..5 {
                let x = 2.3 + (j as f32 + 0.5) * (9.7 - 2.3) / 5.0 - 0.5;
                let y = 3.1 + (i as f32 + 0.5) * (11.2 - 3.1) / 4.0 - 0.5;
                assert!(close(out[[0, 0, i, j]], 2.0 * x + 3.0 * y, 1e-4));
            }
        }
    }

    #[test]
    fn degenerate_boxes_do_not_fail() {
        let f = wavy(2, 10, 10);
        let roi = RoiAlign::new(3, 4, 1.0);
        let out = roi.forward(
            f.view(),
            &[BBox::ltrb(4.0, 2.0, 4.0, 8.0), BBox::ltrb(5.0, 5.0, 5.0, 5.0)],
        );

        // zero width: every row is constant
        for c in 0..2 {
            for i in 0..3 {
                let row: ArrayView1<f32> = out.slice(s![0, c, i, ..]);
                assert!(row.iter().all(|v| close(*v, row[0], 1e-6)));
            }
        }

        // zero area: the whole crop is constant, sampled half a pixel up-left of the corner
        for c in 0..2 {
            let crop: ArrayView2<f32> = out.slice(s![1, c, .., ..]);
            let first = crop[[0, 0]];
            assert!(crop.iter().all(|v| close(*v, first, 1e-6)));

            let expected = (f[[c, 4, 4]] + f[[c, 4, 5]] + f[[c, 5, 4]] + f[[c, 5, 5]]) / 4.0;
            assert!(close(first, expected, 1e-5));
        }
    }

    #[test]
    fn outside_samples_take_extrapolation_value() {
        let f = wavy(1, 8, 8);
        let roi = RoiAlign::new(2, 2, 1.0).with_extrapolation_value(0.25);
        let out = roi.forward(f.view(), &[BBox::ltrb(20.0, 20.0, 30.0, 30.0)]);
        assert!(out.iter().all(|v| *v == 0.25));

        let out = roi.forward(f.view(), &[BBox::ltrb(-8.0, 0.0, 8.0, 8.0)]);
        assert_eq!(out[[0, 0, 0, 0]], 0.25);
        assert_eq!(out[[0, 0, 1, 0]], 0.25);
        assert_ne!(out[[0, 0, 0, 1]], 0.25);
    }

    #[test]
    fn boxes_on_the_far_edge_stay_finite() {
        let f = wavy(1, 8, 8);
        let roi = RoiAlign::new(3, 3, 1.0);
        let out = roi.forward(f.view(), &[BBox::ltrb(7.0, 7.0, 8.0, 8.0)]);
        assert!(out.iter().all(|v| v.is_finite()));

        let roi = roi.with_aligned(false);
        let out = roi.forward(f.view(), &[BBox::ltrb(7.0, 7.0, 7.0, 7.0)]);
        assert!(out.iter().all(|v| close(*v, f[[0, 7, 7]], 1e-6)));
    }

    #[test]
    fn feature_gradient_is_the_adjoint_of_forward() {
        let f = wavy(2, 12, 14);
        let roi = RoiAlign::new(5, 6, 1.0);
        let boxes = [
            BBox::ltrb(1.2, 0.7, 9.9, 8.4),
            BBox::ltrb(6.0, 3.0, 13.5, 11.0),
            BBox::ltrb(-3.0, 2.0, 4.0, 15.0),
        ];

        let grad = Array4::from_shape_fn((3, 2, 5, 6), |(n, c, i, j)| {
            ((n * 13 + c * 5 + i * 3 + j) as f32 * 0.21).cos()
        });

        let out = roi.forward(f.view(), &boxes);
        let lhs: f32 = (&out * &grad).sum();

        let back = roi.backward(f.view(), &boxes, grad.view()).unwrap();
        assert_eq!(back.features.dim(), f.dim());
        let rhs: f32 = (&back.features * &f).sum();

        assert!(close(lhs, rhs, 1e-4), "{} vs {}", lhs, rhs);
    }

    #[test]
    fn box_gradient_on_a_ramp() {
        let (a, b) = (2.0, 3.0);
        let f = ramp(16, 16, a, b);
        let (h, w) = (4usize, 5usize);
        let ones = Array4::<f32>::ones((1, 1, h, w));
        let half = (h * w) as f32 / 2.0;

        let roi = RoiAlign::new(h, w, 1.0);
        let g = roi
            .backward(f.view(), &[BBox::ltrb(2.3, 3.1, 9.7, 11.2)], ones.view())
            .unwrap();
        let [gx1, gy1, gx2, gy2] = g.boxes[0];
        assert!(close(gx1, a * half, 1e-4));
        assert!(close(gx2, a * half, 1e-4));
        assert!(close(gy1, b * half, 1e-4));
        assert!(close(gy2, b * half, 1e-4));

        let roi = RoiAlign::new(h, w, 0.5);
        let g = roi
            .backward(f.view(), &[BBox::ltrb(4.6, 6.2, 19.4, 22.4)], ones.view())
            .unwrap();
        assert!(close(g.boxes[0][0], a * half * 0.5, 1e-4));
        assert!(close(g.boxes[0][3], b * half * 0.5, 1e-4));
    }

    #[test]
    fn backward_checks_gradient_shape() {
        let f = wavy(1, 8, 8);
        let roi = RoiAlign::new(2, 2, 1.0);
        let bad = Array4::<f32>::zeros((1, 1, 3, 2));
        let res = roi.backward(f.view(), &[BBox::ltrb(0.0, 0.0, 4.0, 4.0)], bad.view());
        assert!(matches!(res, Err(Error::Shape(_))));
    }
}
