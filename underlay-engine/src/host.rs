//! 宿主（CAD 对象模型与图形输出）一侧的协作接口。

use glam::DMat4;
use underlay_core::color::Rgb;
use underlay_core::curves::{EllipticalArc2, NurbsCurve2};
use underlay_core::geometry::{Bounds2D, Point2, Vector2};

use crate::rasterizer::RasterImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportId(u64);

impl ViewportId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 引用底图的可绘制对象标识，用作光栅缓存键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawableId(u64);

impl DrawableId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// 宿主对象模型：删除通知订阅与应用级设置。
///
/// 宿主在对象被删除时应调用 [`crate::UnderlayFile::notify_erased`]。
/// 订阅回调在光栅缓存锁释放后发出，回调内可以再次进入缓存。
pub trait UnderlayHost: Send + Sync {
    fn subscribe_erase(&self, object: DrawableId);
    fn unsubscribe_erase(&self, object: DrawableId);

    /// 拾取框半宽（世界单位）。
    fn aperture(&self) -> Option<f64> {
        None
    }
}

/// 不跟踪对象生命周期的宿主，适用于一次性导出。
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl UnderlayHost for DetachedHost {
    fn subscribe_erase(&self, _object: DrawableId) {}

    fn unsubscribe_erase(&self, _object: DrawableId) {}
}

/// 图形输出：接收世界坐标下的矢量图元或定位光栅。
pub trait GeometrySink {
    fn polyline(&mut self, points: &[Point2]);
    fn nurbs(&mut self, curve: &NurbsCurve2);
    fn elliptical_arc(&mut self, arc: &EllipticalArc2);
    /// `origin` 为左下角，`u`、`v` 为图像底边与左边的世界向量。
    fn raster(&mut self, image: &RasterImage, origin: Point2, u: Vector2, v: Vector2);
}

/// 视口绘制上下文。
pub trait ViewportSink: GeometrySink {
    fn viewport_id(&self) -> ViewportId;
    /// 底图世界坐标（z = 0 平面）到眼坐标的变换。
    fn underlay_to_eye(&self) -> DMat4;
    /// 视口在眼坐标下的矩形。
    fn viewport_corners(&self) -> Bounds2D;
    /// 每个眼坐标单位对应的设备像素数。
    fn pixel_density(&self) -> f64;
    fn curve_deviation(&self) -> Option<f64>;
    fn background(&self) -> Rgb;
    fn is_plot(&self) -> bool;
    /// 选择时的拾取框（世界坐标），`None` 表示全部输出。
    fn selection_box(&self) -> Option<Bounds2D>;
}
