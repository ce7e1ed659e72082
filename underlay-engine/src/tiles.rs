//! 打印输出的分带渲染：估算字节数超限时把裁剪框纵向切成若干水平带。

use tracing::{debug, trace, warn};
use underlay_core::color::Rgb;
use underlay_core::context::DrawContext;
use underlay_core::geometry::{Bounds2D, Point2, Vector2};

use crate::host::GeometrySink;
use crate::rasterizer::{PageRasterizer, RasterRequest};

/// PDF 点与英寸的换算。
pub const POINTS_PER_INCH: f64 = 72.0;

/// PDF 点坐标的裁剪框在给定 DPI 下的像素尺寸，每边至少 1 像素。
pub fn pixel_size(clip: &Bounds2D, dpi: f64) -> (u32, u32) {
    let to_pixels = |span: f64| (span / POINTS_PER_INCH * dpi).ceil().max(1.0) as u32;
    (to_pixels(clip.width()), to_pixels(clip.height()))
}

/// 分带方案：自下而上的水平带与每带使用的 DPI。
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub bands: Vec<Bounds2D>,
    pub dpi: f64,
    pub parts: usize,
}

impl TilePlan {
    pub fn new(clip: &Bounds2D, dpi: f64, byte_limit: u64) -> Self {
        let (width, height) = pixel_size(clip, dpi);
        let estimated = u64::from(width) * u64::from(height) * 3;
        let limit = byte_limit.max(1);
        let parts = if estimated > limit {
            (estimated / limit + 1) as usize
        } else {
            1
        };
        if parts <= 1 {
            return Self {
                bands: vec![*clip],
                dpi,
                parts: 1,
            };
        }

        let band_height = clip.height() / parts as f64;
        let bottom = clip.min().y();
        let bands = (0..parts)
            .map(|index| {
                let low = bottom + band_height * index as f64;
                let high = if index + 1 == parts {
                    clip.max().y()
                } else {
                    bottom + band_height * (index + 1) as f64
                };
                Bounds2D::new(Point2::new(clip.min().x(), low), Point2::new(clip.max().x(), high))
            })
            .collect();
        debug!(parts, estimated, "打印光栅超限，分带渲染");
        Self {
            bands,
            dpi: dpi / (parts as f64).sqrt(),
            parts,
        }
    }
}

pub struct TileSplitter<'a> {
    rasterizer: PageRasterizer<'a>,
    byte_limit: u64,
}

impl<'a> TileSplitter<'a> {
    pub fn new(rasterizer: PageRasterizer<'a>, byte_limit: u64) -> Self {
        Self {
            rasterizer,
            byte_limit,
        }
    }

    /// 逐带渲染并立即输出，返回成功输出的带数。某一带失败时放弃剩余部分。
    #[allow(clippy::too_many_arguments)]
    pub fn split_and_rasterize<S: GeometrySink + ?Sized>(
        &self,
        page: usize,
        clip: &Bounds2D,
        dpi: f64,
        context: &DrawContext,
        background: Rgb,
        measure_scale: f64,
        sink: &mut S,
    ) -> usize {
        let plan = TilePlan::new(clip, dpi, self.byte_limit);
        let to_world = |points: f64| points / POINTS_PER_INCH / measure_scale;
        let mut origin = Point2::new(to_world(clip.min().x()), to_world(clip.min().y()));
        let mut emitted = 0;

        for band in &plan.bands {
            let (pixel_width, pixel_height) = pixel_size(band, plan.dpi);
            let request = RasterRequest {
                page,
                clip: *band,
                dpi: plan.dpi,
                pixel_width,
                pixel_height,
                context,
                background,
            };
            let Some(image) = self.rasterizer.rasterize(&request) else {
                warn!(page, band = emitted, parts = plan.parts, "分带渲染失败，放弃剩余部分");
                return emitted;
            };
            let u = Vector2::new(to_world(band.width()), 0.0);
            let v = Vector2::new(0.0, to_world(band.height()));
            trace!(band = emitted, pixel_width, pixel_height, "输出打印光栅带");
            sink.raster(&image, origin, u, v);
            origin = origin.translate(v);
            emitted += 1;
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(width: f64, height: f64) -> Bounds2D {
        Bounds2D::new(Point2::new(0.0, 10.0), Point2::new(width, 10.0 + height))
    }

    #[test]
    fn pixel_size_rounds_up() {
        assert_eq!(pixel_size(&clip(72.0, 36.0), 100.0), (100, 50));
        assert_eq!(pixel_size(&clip(72.5, 0.0), 72.0), (73, 1));
    }

    #[test]
    fn small_output_is_a_single_band() {
        let plan = TilePlan::new(&clip(612.0, 792.0), 300.0, 90_000_000);
        assert_eq!(plan.parts, 1);
        assert_eq!(plan.bands, vec![clip(612.0, 792.0)]);
        assert_eq!(plan.dpi, 300.0);
    }

    #[test]
    fn oversized_output_is_split_without_gaps() {
        // 72×720 点 @ 1000 DPI = 1000×10000 像素 = 30,000,000 字节。
        let original = clip(72.0, 720.0);
        let plan = TilePlan::new(&original, 1000.0, 7_000_000);
        assert_eq!(plan.parts, 30_000_000 / 7_000_000 + 1);
        assert_eq!(plan.bands.len(), plan.parts);
        assert!((plan.dpi - 1000.0 / (plan.parts as f64).sqrt()).abs() < 1e-9);

        assert_eq!(plan.bands[0].min().y(), original.min().y());
        assert_eq!(plan.bands.last().unwrap().max().y(), original.max().y());
        for pair in plan.bands.windows(2) {
            assert_eq!(pair[0].max().y(), pair[1].min().y());
        }
        let total: f64 = plan.bands.iter().map(Bounds2D::height).sum();
        assert!((total - original.height()).abs() < 1e-9);
    }
}
