//! BGR → BGRA 像素转换，处理背景透明与颜色调整。

use underlay_core::color::Rgb;
use underlay_core::context::DrawContext;
use underlay_core::shading::{ColorAdjuster, UnderlayShading};

use crate::backend::bgr_stride;

const OPAQUE: u8 = 255;
const TRANSPARENT: u8 = 0;

/// 亮背景下渲染器用作"透明标记"的颜色分量。
pub const LIGHT_MARKER: u8 = 254;
/// 暗背景下的透明标记分量。
pub const DARK_MARKER: u8 = 1;

pub struct PixelConverter<A: ColorAdjuster = UnderlayShading> {
    adjuster: A,
    light_background: bool,
    adjust_for_background: bool,
}

impl PixelConverter<UnderlayShading> {
    /// `context` 应已通过 [`DrawContext::for_background`] 编码背景明暗。
    pub fn new(context: &DrawContext, background: Rgb) -> Self {
        Self::with_adjuster(context, UnderlayShading::new(context, background))
    }
}

impl<A: ColorAdjuster> PixelConverter<A> {
    pub fn with_adjuster(context: &DrawContext, adjuster: A) -> Self {
        Self {
            adjuster,
            light_background: context.is_light_background(),
            adjust_for_background: context.adjust_color_for_background,
        }
    }

    #[inline]
    fn shaded(&self, b: u8, g: u8, r: u8) -> [u8; 4] {
        if self.adjuster.needs_adjustment() {
            let color = self.adjuster.shade(Rgb::new(r, g, b));
            [color.b, color.g, color.r, OPAQUE]
        } else {
            [b, g, r, OPAQUE]
        }
    }

    /// 单个像素的映射规则，输入输出均为 B、G、R 顺序。
    #[inline]
    pub fn map_pixel(&self, b: u8, g: u8, r: u8) -> [u8; 4] {
        let is_gray = |value: u8| b == value && g == value && r == value;
        if !self.adjust_for_background {
            if is_gray(255) {
                return [b, g, r, TRANSPARENT];
            }
            return self.shaded(b, g, r);
        }
        if self.light_background {
            if is_gray(LIGHT_MARKER) || is_gray(255) {
                return [b, g, r, TRANSPARENT];
            }
            self.shaded(b, g, r)
        } else {
            if is_gray(DARK_MARKER) {
                return [b, g, r, TRANSPARENT];
            }
            if is_gray(0) {
                return self.shaded(255, 255, 255);
            }
            self.shaded(b, g, r)
        }
    }

    /// 把 `height` 行 24 位扫描行写入紧凑的 32 位目标缓冲区（自上而下）。
    ///
    /// `height > 0` 时源数据自下而上排列。`dst` 至少需要 `width * |height| * 4` 字节。
    pub fn convert_into(&self, src: &[u8], width: usize, height: i32, dst: &mut [u8]) {
        let rows = height.unsigned_abs() as usize;
        if width == 0 || rows == 0 {
            return;
        }
        let stride = bgr_stride(width);
        let bottom_up = height > 0;
        for (dst_index, dst_row) in dst.chunks_exact_mut(width * 4).take(rows).enumerate() {
            let src_index = if bottom_up {
                rows - 1 - dst_index
            } else {
                dst_index
            };
            let offset = src_index * stride;
            let Some(src_row) = src.get(offset..offset + width * 3) else {
                continue;
            };
            for (source, target) in src_row.chunks_exact(3).zip(dst_row.chunks_exact_mut(4)) {
                target.copy_from_slice(&self.map_pixel(source[0], source[1], source[2]));
            }
        }
    }

    pub fn convert(&self, src: &[u8], width: usize, height: i32) -> Vec<u8> {
        let mut dst = vec![OPAQUE; width * height.unsigned_abs() as usize * 4];
        self.convert_into(src, width, height, &mut dst);
        dst
    }
}
