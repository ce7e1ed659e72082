//! 页面矢量几何缓存：用于选择高亮、捕捉与分解。

use std::f64::consts::FRAC_PI_2;

use glam::DVec2;
use tracing::{debug, trace};
use underlay_core::context::DrawContext;
use underlay_core::curves::{EllipticalArc2, NurbsCurve2, Polyline2};
use underlay_core::geometry::{Bounds2D, Point2, Vector2};

use crate::backend::{DocumentHandle, PathContour, PathSegment, RenderSession, VectorPrimitive};
use crate::errors::BackendError;
use crate::host::GeometrySink;

/// 相邻点在两个方向上的差都不超过该值时合并。
pub const DUPLICATE_TOLERANCE: f64 = 1e-6;
/// 闭合路径首尾间距超过该值时补一段闭合曲线。
pub const CLOSE_GAP: f64 = 0.1;
/// 矢量回调坐标到世界单位的换算除数（毫米每英寸）。
pub const VECTOR_UNIT_DIVISOR: f64 = 25.4;

const DEVIATION_FACTOR: f64 = 0.007;
const DIAGONAL_FACTOR: f64 = 1e-5;

/// 矢量回调坐标的缩放系数。
///
/// 回调坐标以渲染库的毫米单位给出，因此乘 `measure_scale / 25.4`；
/// 光栅放置使用 `点 / 72 / measure_scale`，两者单位不同，不能互相替代。
#[inline]
pub fn vector_scale(measure_scale: f64, call_scale: f64) -> f64 {
    measure_scale / VECTOR_UNIT_DIVISOR * call_scale
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedSpline {
    pub curve: NurbsCurve2,
    pub extents: Bounds2D,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedArc {
    pub arc: EllipticalArc2,
    pub extents: Bounds2D,
}

/// 单页矢量缓存。请求其他页面时整体重建。
#[derive(Debug, Default)]
pub struct VectorGeometryCache {
    page: Option<usize>,
    polylines: Vec<Polyline2>,
    splines: Vec<CachedSpline>,
    arcs: Vec<CachedArc>,
    tessellated: Vec<Polyline2>,
    tessellation_deviation: Option<f64>,
}

impl VectorGeometryCache {
    #[inline]
    pub fn page(&self) -> Option<usize> {
        self.page
    }

    #[inline]
    pub fn polylines(&self) -> &[Polyline2] {
        &self.polylines
    }

    #[inline]
    pub fn splines(&self) -> &[CachedSpline] {
        &self.splines
    }

    #[inline]
    pub fn arcs(&self) -> &[CachedArc] {
        &self.arcs
    }

    #[inline]
    pub fn tessellation_deviation(&self) -> Option<f64> {
        self.tessellation_deviation
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// 缓存页与 `page` 不同时经渲染库重建，返回是否发生了重建。
    pub fn ensure(
        &mut self,
        session: &RenderSession,
        document: DocumentHandle,
        page: usize,
        context: &DrawContext,
        scale: f64,
    ) -> Result<bool, BackendError> {
        if self.page == Some(page) {
            return Ok(false);
        }
        self.clear();

        let layers = context.enabled_content_layers();
        let filter_layers = context.filters_content_layers();
        let annotations = context.annotations_enabled();
        let mut primitives: Vec<VectorPrimitive> = Vec::new();
        session.with_backend(|backend| {
            backend.set_insert_mode(false);
            backend.set_automatic_page_size(true);
            backend.set_ignore_images(true);
            backend.set_ignore_text(true);
            backend.set_clip_rect(None);
            backend.set_layers(filter_layers.then_some(layers.as_slice()));
            backend.set_render_annotations(annotations);
            backend.convert_page_to_vectors(document, page + 1, &mut |primitive: VectorPrimitive| {
                primitives.push(primitive)
            })
        })?;

        for primitive in primitives {
            self.ingest(primitive, scale);
        }
        self.page = Some(page);
        debug!(
            page,
            polylines = self.polylines.len(),
            splines = self.splines.len(),
            arcs = self.arcs.len(),
            "矢量几何缓存已重建"
        );
        Ok(true)
    }

    /// 按类型归类一个回调图元并缩放到世界单位。
    pub fn ingest(&mut self, primitive: VectorPrimitive, scale: f64) {
        let scaled = |point: Point2| Point2::from_vec(point.as_vec2() * scale);
        match primitive {
            // 多边形与折线一样按原顶点保存，不补闭合点。
            VectorPrimitive::Polyline(points) | VectorPrimitive::Polygon(points) => {
                self.push_polyline(points.into_iter().map(scaled).collect());
            }
            VectorPrimitive::Path(contours) => {
                for contour in contours {
                    self.ingest_contour(&contour, scale);
                }
            }
            VectorPrimitive::Ellipse {
                center,
                radius_x,
                radius_y,
                rotation,
                start_angle,
                end_angle,
            } => {
                if let Some(arc) = ellipse_to_arc(
                    scaled(center),
                    radius_x.abs() * scale,
                    radius_y.abs() * scale,
                    rotation,
                    start_angle,
                    end_angle,
                ) {
                    let extents = arc.extents();
                    self.arcs.push(CachedArc { arc, extents });
                }
            }
            VectorPrimitive::Text { .. } => {}
        }
    }

    fn push_polyline(&mut self, points: Vec<Point2>) {
        let mut points = dedup_points(points);
        match points.len() {
            0 => return,
            1 => points.push(points[0]),
            _ => {}
        }
        self.polylines.push(Polyline2::new(points));
    }

    fn ingest_contour(&mut self, contour: &PathContour, scale: f64) {
        let scaled = |point: Point2| Point2::from_vec(point.as_vec2() * scale);
        let start = scaled(contour.start);
        let curved = {
            let mut previous = contour.start;
            contour.segments.iter().any(|segment| {
                let from = previous;
                match segment {
                    PathSegment::Line(end) => {
                        previous = *end;
                        false
                    }
                    PathSegment::Cubic { c1, c2, end } => {
                        previous = *end;
                        is_curved(from, *c1, *c2, *end)
                    }
                }
            })
        };

        if !curved {
            let mut points = vec![start];
            points.extend(contour.segments.iter().map(|segment| match segment {
                PathSegment::Line(end) | PathSegment::Cubic { end, .. } => scaled(*end),
            }));
            let open_end = points.last().is_some_and(|last| !start.is_near(*last, DUPLICATE_TOLERANCE));
            if contour.closed && open_end {
                points.push(start);
            }
            self.push_polyline(points);
            return;
        }

        let mut control_points = vec![start];
        let mut previous = start;
        for segment in &contour.segments {
            match segment {
                PathSegment::Line(end) => {
                    let end = scaled(*end);
                    control_points.extend(linear_controls(previous, end));
                    previous = end;
                }
                PathSegment::Cubic { c1, c2, end } => {
                    let end = scaled(*end);
                    control_points.extend([scaled(*c1), scaled(*c2), end]);
                    previous = end;
                }
            }
        }
        if contour.closed && !start.is_near(previous, CLOSE_GAP) {
            control_points.extend([previous, start, start]);
        }

        match NurbsCurve2::piecewise_cubic(control_points) {
            Ok(curve) => {
                let extents = curve.extents();
                self.splines.push(CachedSpline { curve, extents });
            }
            Err(err) => trace!(error = %err, "跳过无法构造的路径曲线"),
        }
    }

    /// 以视图偏差重建样条的折线镜像；只有偏差严格变小时才重建。
    pub fn optimize_splines(&mut self, deviation: f64) -> bool {
        if let Some(last) = self.tessellation_deviation {
            if deviation >= last {
                return false;
            }
        }
        self.tessellated = self
            .splines
            .iter()
            .map(|spline| {
                let diagonal = Vector2::from_points(spline.extents.min(), spline.extents.max()).length();
                let tolerance = deviation * DEVIATION_FACTOR + diagonal * DIAGONAL_FACTOR;
                Polyline2::new(spline.curve.tessellate(tolerance))
            })
            .collect();
        self.tessellation_deviation = Some(deviation);
        debug!(deviation, splines = self.tessellated.len(), "样条离散镜像已更新");
        true
    }

    /// 输出与 `region` 范围相交的图元（`None` 时全部输出），返回输出个数。
    ///
    /// 给定区域且镜像可用时，样条以离散折线输出。
    pub fn query_in_region<S: GeometrySink + ?Sized>(
        &self,
        region: Option<&Bounds2D>,
        sink: &mut S,
    ) -> usize {
        let overlaps = |extents: &Bounds2D| region.is_none_or(|region| !region.is_disjoint(extents));
        let use_mirror = region.is_some()
            && self.tessellation_deviation.is_some()
            && self.tessellated.len() == self.splines.len();
        let mut emitted = 0;

        for polyline in self.polylines.iter().filter(|p| overlaps(&p.extents)) {
            sink.polyline(&polyline.points);
            emitted += 1;
        }
        for (index, spline) in self.splines.iter().enumerate() {
            if !overlaps(&spline.extents) {
                continue;
            }
            if use_mirror {
                sink.polyline(&self.tessellated[index].points);
            } else {
                sink.nurbs(&spline.curve);
            }
            emitted += 1;
        }
        for arc in self.arcs.iter().filter(|a| overlaps(&a.extents)) {
            sink.elliptical_arc(&arc.arc);
            emitted += 1;
        }
        emitted
    }
}

/// 合并相邻的近似重复点。
pub fn dedup_points(points: Vec<Point2>) -> Vec<Point2> {
    let mut result: Vec<Point2> = Vec::with_capacity(points.len());
    for point in points {
        match result.last() {
            Some(last) if last.is_near(point, DUPLICATE_TOLERANCE) => {}
            _ => result.push(point),
        }
    }
    result
}

fn linear_controls(from: Point2, to: Point2) -> [Point2; 3] {
    let delta = to.as_vec2() - from.as_vec2();
    [
        Point2::from_vec(from.as_vec2() + delta / 3.0),
        Point2::from_vec(from.as_vec2() + delta * 2.0 / 3.0),
        to,
    ]
}

fn is_curved(from: Point2, c1: Point2, c2: Point2, to: Point2) -> bool {
    let chord = to.as_vec2() - from.as_vec2();
    let length = chord.length();
    let offset = |control: Point2| -> f64 {
        let relative = control.as_vec2() - from.as_vec2();
        if length <= DUPLICATE_TOLERANCE {
            relative.length()
        } else {
            chord.perp_dot(relative).abs() / length
        }
    };
    offset(c1) > DUPLICATE_TOLERANCE || offset(c2) > DUPLICATE_TOLERANCE
}

/// 长轴取两半径中较大者，保证短长轴比不超过 1。
fn ellipse_to_arc(
    center: Point2,
    radius_x: f64,
    radius_y: f64,
    rotation: f64,
    start_angle: f64,
    end_angle: f64,
) -> Option<EllipticalArc2> {
    let major = radius_x.max(radius_y);
    if major <= 0.0 {
        return None;
    }
    let x_dir = DVec2::from_angle(rotation);
    let y_dir = x_dir.perp();
    let arc = if radius_x >= radius_y {
        EllipticalArc2 {
            center,
            major_axis: Vector2::from(x_dir * radius_x),
            minor_ratio: radius_y / radius_x,
            start_angle,
            end_angle,
        }
    } else {
        EllipticalArc2 {
            center,
            major_axis: Vector2::from(y_dir * radius_y),
            minor_ratio: radius_x / radius_y,
            start_angle: start_angle - FRAC_PI_2,
            end_angle: end_angle - FRAC_PI_2,
        }
    };
    Some(arc)
}
