//! 单页到位图的转换：配置渲染库、取回 DIB、转换像素格式。

use image::RgbaImage;
use tracing::{debug, warn};
use underlay_core::color::Rgb;
use underlay_core::context::DrawContext;
use underlay_core::geometry::Bounds2D;

use crate::backend::{BITMAP_INFO_HEADER_SIZE, BitmapInfoHeader, Dib, DibGuard, DocumentHandle, RenderSession};
use crate::pixel::{DARK_MARKER, LIGHT_MARKER, PixelConverter};

/// 可供宿主显示的 32 位 BGRA 图像，扫描行自上而下。
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    header: BitmapInfoHeader,
    pixels: Vec<u8>,
}

/// 32 位图像的字节数；超出信息头可表示的范围时为 `None`。
pub fn bgra_image_size(width: u32, height: u32) -> Option<u32> {
    width.checked_mul(height)?.checked_mul(4)
}

impl RasterImage {
    /// 尺寸超出信息头范围或像素长度不符时返回 `None`。
    pub fn from_bgra(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let image_size = bgra_image_size(width, height)?;
        if pixels.len() != image_size as usize {
            return None;
        }
        let header = BitmapInfoHeader {
            size: BITMAP_INFO_HEADER_SIZE,
            width: i32::try_from(width).ok()?,
            height: -i32::try_from(height).ok()?,
            planes: 1,
            bit_count: 32,
            image_size,
        };
        Some(Self { header, pixels })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.header.width.unsigned_abs()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.header.height.unsigned_abs()
    }

    #[inline]
    pub fn header(&self) -> &BitmapInfoHeader {
        &self.header
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// 转换为 `image` 库的 RGBA 图像。
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let mut rgba = self.pixels.clone();
        for pixel in rgba.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
        RgbaImage::from_raw(self.width(), self.height(), rgba)
    }
}

/// 一次转换请求。`clip` 为 PDF 点坐标，`page` 从 0 开始。
#[derive(Debug, Clone, Copy)]
pub struct RasterRequest<'a> {
    pub page: usize,
    pub clip: Bounds2D,
    pub dpi: f64,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub context: &'a DrawContext,
    pub background: Rgb,
}

/// 渲染库的背景填充灰度；开启背景调整时让出 0/255 给透明标记。
pub fn background_gray(context: &DrawContext) -> u8 {
    match (context.is_light_background(), context.adjust_color_for_background) {
        (true, true) => LIGHT_MARKER,
        (true, false) => 255,
        (false, true) => DARK_MARKER,
        (false, false) => 0,
    }
}

pub struct PageRasterizer<'a> {
    session: &'a RenderSession,
    document: DocumentHandle,
}

impl<'a> PageRasterizer<'a> {
    pub fn new(session: &'a RenderSession, document: DocumentHandle) -> Self {
        Self { session, document }
    }

    /// 渲染失败（空位图或信息头不符）时返回 `None`，调用方不绘制任何内容。
    pub fn rasterize(&self, request: &RasterRequest<'_>) -> Option<RasterImage> {
        let context = request.context.for_background(request.background);
        let gray = background_gray(&context);
        let layers = context.enabled_content_layers();
        let filter_layers = context.filters_content_layers();
        let document = self.document;

        self.session.with_backend(|backend| {
            backend.set_separate_image_decoding(false);
            backend.set_ignore_images(false);
            backend.set_ignore_text(false);
            backend.set_clip_rect(Some(request.clip));
            backend.set_image_size(request.pixel_width, request.pixel_height);
            backend.set_background_gray(gray);
            backend.set_dpi(request.dpi);
            backend.set_render_annotations(context.annotations_enabled());

            let dib = if filter_layers {
                backend.set_layers(Some(layers.as_slice()));
                backend.convert_page_to_dib_with_layers(document, request.page + 1)
            } else {
                backend.set_layers(None);
                backend.convert_page_to_dib(document, request.page + 1)
            };
            let Some(dib) = dib else {
                warn!(page = request.page, "渲染库未返回位图");
                return None;
            };
            let guard = DibGuard::new(backend, dib);
            convert_dib(guard.dib(), &context, request.background)
        })
    }
}

/// 校验信息头并把 24 位 DIB 转换为 [`RasterImage`]。
pub fn convert_dib(dib: &Dib, context: &DrawContext, background: Rgb) -> Option<RasterImage> {
    if dib.header.size != BITMAP_INFO_HEADER_SIZE {
        warn!(size = dib.header.size, "位图信息头长度异常");
        return None;
    }
    let width = dib.header.width.unsigned_abs() as usize;
    let rows = dib.header.height.unsigned_abs() as usize;
    if dib.bits.is_empty() || width == 0 || rows == 0 {
        warn!(width, rows, "位图数据为空");
        return None;
    }

    let (pixel_width, pixel_height) = (dib.header.width.unsigned_abs(), dib.header.height.unsigned_abs());
    let Some(image_size) = bgra_image_size(pixel_width, pixel_height) else {
        warn!(width, rows, "位图尺寸超出可表示范围");
        return None;
    };

    let converter = PixelConverter::new(context, background);
    let mut pixels = vec![255u8; image_size as usize];
    converter.convert_into(&dib.bits, width, dib.header.height, &mut pixels);
    debug!(width, rows, "位图转换完成");
    RasterImage::from_bgra(pixel_width, pixel_height, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converted_header_is_top_down_32_bit() {
        let dib = Dib {
            header: BitmapInfoHeader::bgr24(2, 1),
            bits: vec![0, 0, 255, 10, 20, 30, 0, 0],
        };
        let image = convert_dib(&dib, &DrawContext::default(), Rgb::WHITE).expect("image");
        assert_eq!(image.header().bit_count, 32);
        assert_eq!(image.header().height, -1);
        assert_eq!(image.header().image_size, 8);
        assert_eq!(image.pixels(), &[0, 0, 255, 255, 10, 20, 30, 255]);

        let rgba = image.to_rgba_image().expect("rgba");
        assert_eq!(rgba.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn wrong_header_size_is_rejected() {
        let mut header = BitmapInfoHeader::bgr24(1, 1);
        header.size = 12;
        let dib = Dib {
            header,
            bits: vec![0; 4],
        };
        assert!(convert_dib(&dib, &DrawContext::default(), Rgb::WHITE).is_none());
    }

    #[test]
    fn oversized_images_are_rejected_instead_of_overflowing() {
        assert_eq!(bgra_image_size(40_000, 30_000), None);
        assert!(RasterImage::from_bgra(40_000, 30_000, Vec::new()).is_none());
        assert!(RasterImage::from_bgra(2, 2, vec![0; 15]).is_none());

        let dib = Dib {
            header: BitmapInfoHeader::bgr24(40_000, 30_000),
            bits: vec![0; 16],
        };
        assert!(convert_dib(&dib, &DrawContext::default(), Rgb::WHITE).is_none());
    }

    #[test]
    fn background_fill_reserves_marker_values() {
        let adjust = DrawContext::new(50, 0, false, true);
        assert_eq!(background_gray(&adjust.for_background(Rgb::WHITE)), 254);
        assert_eq!(background_gray(&adjust.for_background(Rgb::BLACK)), 1);
        let plain = DrawContext::default();
        assert_eq!(background_gray(&plain.for_background(Rgb::WHITE)), 255);
        assert_eq!(background_gray(&plain.for_background(Rgb::BLACK)), 0);
    }
}
