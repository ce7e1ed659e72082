pub mod geometry {
    use glam::{DAffine2, DMat2, DMat4, DVec2, DVec3};
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    /// 几何层错误。视线平行于底图平面时无法建立映射。
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum GeometryError {
        #[error("view direction lies in the underlay plane; plane mapping is degenerate")]
        DegenerateTransform,
        #[error("invalid nurbs definition: {0}")]
        InvalidCurve(String),
    }

    /// 二维点，内部以 `glam::DVec2` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        /// 两点在 X、Y 方向上的差值均不超过 `tolerance` 时视为重合。
        #[inline]
        pub fn is_near(self, other: Point2, tolerance: f64) -> bool {
            (self.0.x - other.0.x).abs() <= tolerance && (self.0.y - other.0.y).abs() <= tolerance
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    const CONTAINMENT_EPSILON: f64 = 1e-10;

    /// 轴对齐边界框。底图单位正方形、PDF 点坐标与世界坐标共用此类型。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        /// `[0,1]×[0,1]`，底图页面的归一化坐标范围。
        #[inline]
        pub fn unit_square() -> Self {
            Self::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0))
        }

        pub fn from_points(points: impl IntoIterator<Item = Point2>) -> Self {
            let mut bounds = Self::empty();
            for point in points {
                bounds.include_point(point);
            }
            bounds
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        /// 非空且宽高均为正。
        #[inline]
        pub fn is_valid(&self) -> bool {
            !self.is_empty() && self.width() > 0.0 && self.height() > 0.0
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            let min_vec = self.min.as_vec2();
            let max_vec = self.max.as_vec2();
            let center = (min_vec + max_vec) * 0.5;
            Point2::from_vec(center)
        }

        /// `other` 是否完全落在本范围之内（含边界）。
        pub fn contains(&self, other: &Bounds2D) -> bool {
            if self.is_empty() || other.is_empty() {
                return false;
            }
            other.min.x() >= self.min.x() - CONTAINMENT_EPSILON
                && other.min.y() >= self.min.y() - CONTAINMENT_EPSILON
                && other.max.x() <= self.max.x() + CONTAINMENT_EPSILON
                && other.max.y() <= self.max.y() + CONTAINMENT_EPSILON
        }

        /// 求交，无重叠时返回空范围。
        pub fn intersection(&self, other: &Bounds2D) -> Bounds2D {
            if self.is_empty() || other.is_empty() {
                return Bounds2D::empty();
            }
            let min = self.min.as_vec2().max(other.min.as_vec2());
            let max = self.max.as_vec2().min(other.max.as_vec2());
            let result = Bounds2D::new(Point2::from_vec(min), Point2::from_vec(max));
            if result.is_empty() {
                Bounds2D::empty()
            } else {
                result
            }
        }

        pub fn is_disjoint(&self, other: &Bounds2D) -> bool {
            self.is_empty()
                || other.is_empty()
                || other.min.x() > self.max.x()
                || other.max.x() < self.min.x()
                || other.min.y() > self.max.y()
                || other.max.y() < self.min.y()
        }

        /// 按轴缩放（不平移），用于单位正方形与 PDF 点 / 世界坐标之间的换算。
        pub fn scaled(&self, sx: f64, sy: f64) -> Bounds2D {
            if self.is_empty() {
                return *self;
            }
            Bounds2D::new(
                Point2::new(self.min.x() * sx, self.min.y() * sy),
                Point2::new(self.max.x() * sx, self.max.y() * sy),
            )
        }

        /// 以点为中心、半宽为 `half` 的正方形。
        pub fn around(center: Point2, half: f64) -> Bounds2D {
            let half = half.abs();
            Bounds2D::new(
                Point2::new(center.x() - half, center.y() - half),
                Point2::new(center.x() + half, center.y() + half),
            )
        }

        /// 逆时针排列的四个角点。
        pub fn corners(&self) -> [Point2; 4] {
            [
                self.min,
                Point2::new(self.max.x(), self.min.y()),
                self.max,
                Point2::new(self.min.x(), self.max.y()),
            ]
        }
    }

    const DEGENERATE_EPSILON: f64 = 1e-10;

    /// 底图平面（z = 0）到视口眼坐标 XY 平面的仿射映射及其逆。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlaneMapping {
        forward: DAffine2,
        inverse: DAffine2,
    }

    impl PlaneMapping {
        /// 由 4×4 的底图→眼坐标变换提取平面映射；视线落在底图平面内时返回
        /// [`GeometryError::DegenerateTransform`]。
        pub fn from_transform(transform: &DMat4) -> Result<Self, GeometryError> {
            let origin = transform.project_point3(DVec3::ZERO);
            let x_end = transform.project_point3(DVec3::X);
            let y_end = transform.project_point3(DVec3::Y);
            let x_axis = (x_end - origin).truncate();
            let y_axis = (y_end - origin).truncate();
            Self::from_axes(origin.truncate(), x_axis, y_axis)
        }

        pub fn from_axes(origin: DVec2, x_axis: DVec2, y_axis: DVec2) -> Result<Self, GeometryError> {
            let matrix = DMat2::from_cols(x_axis, y_axis);
            let scale = x_axis.length() * y_axis.length();
            let det = matrix.determinant();
            if !det.is_finite() || scale <= f64::EPSILON || det.abs() <= DEGENERATE_EPSILON * scale {
                return Err(GeometryError::DegenerateTransform);
            }
            let forward = DAffine2::from_mat2_translation(matrix, origin);
            Ok(Self {
                forward,
                inverse: forward.inverse(),
            })
        }

        #[inline]
        pub fn to_eye(&self, point: Point2) -> Point2 {
            Point2::from_vec(self.forward.transform_point2(point.as_vec2()))
        }

        #[inline]
        pub fn to_plane(&self, point: Point2) -> Point2 {
            Point2::from_vec(self.inverse.transform_point2(point.as_vec2()))
        }

        /// 平面单位向量在眼坐标中的长度 `(|X|, |Y|)`。
        pub fn axis_lengths(&self) -> (f64, f64) {
            (
                self.forward.matrix2.x_axis.length(),
                self.forward.matrix2.y_axis.length(),
            )
        }
    }

    fn signed_area(points: &[DVec2]) -> f64 {
        let mut area = 0.0;
        for (i, current) in points.iter().enumerate() {
            let next = points[(i + 1) % points.len()];
            area += current.perp_dot(next);
        }
        area * 0.5
    }

    fn edge_intersection(p: DVec2, q: DVec2, a: DVec2, b: DVec2) -> DVec2 {
        let edge = b - a;
        let dp = edge.perp_dot(p - a);
        let dq = edge.perp_dot(q - a);
        let t = dp / (dp - dq);
        p + (q - p) * t
    }

    /// 以凸多边形 `clip` 裁剪任意简单多边形 `subject`（Sutherland–Hodgman）。
    ///
    /// 返回轮廓列表；无交集或交集面积为零时返回空列表。
    pub fn intersect_convex(subject: &[Point2], clip: &[Point2]) -> Vec<Vec<Point2>> {
        if subject.len() < 3 || clip.len() < 3 {
            return Vec::new();
        }
        let clip: Vec<DVec2> = clip.iter().map(|p| p.as_vec2()).collect();
        let subject: Vec<DVec2> = subject.iter().map(|p| p.as_vec2()).collect();
        let clip_area = signed_area(&clip);
        if clip_area == 0.0 {
            return Vec::new();
        }
        let orientation = clip_area.signum();

        let mut output = subject.clone();
        for i in 0..clip.len() {
            if output.is_empty() {
                break;
            }
            let a = clip[i];
            let b = clip[(i + 1) % clip.len()];
            let inside = |p: DVec2| (b - a).perp_dot(p - a) * orientation >= 0.0;
            let input = std::mem::take(&mut output);
            for (j, &current) in input.iter().enumerate() {
                let previous = input[(j + input.len() - 1) % input.len()];
                match (inside(previous), inside(current)) {
                    (true, true) => output.push(current),
                    (false, true) => {
                        output.push(edge_intersection(previous, current, a, b));
                        output.push(current);
                    }
                    (true, false) => output.push(edge_intersection(previous, current, a, b)),
                    (false, false) => {}
                }
            }
        }

        let reference = clip_area.abs().max(signed_area(&subject).abs());
        if output.len() < 3 || signed_area(&output).abs() <= 1e-12 * reference {
            return Vec::new();
        }
        vec![output.into_iter().map(Point2::from_vec).collect()]
    }

}

pub mod color {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Rgb {
        pub r: u8,
        pub g: u8,
        pub b: u8,
    }

    impl Rgb {
        pub const BLACK: Rgb = Rgb::gray(0);
        pub const WHITE: Rgb = Rgb::gray(255);

        #[inline]
        pub const fn new(r: u8, g: u8, b: u8) -> Self {
            Self { r, g, b }
        }

        #[inline]
        pub const fn gray(value: u8) -> Self {
            Self {
                r: value,
                g: value,
                b: value,
            }
        }

        /// Rec.601 亮度，范围 0–255。
        #[inline]
        pub fn luma(self) -> f64 {
            0.299 * f64::from(self.r) + 0.587 * f64::from(self.g) + 0.114 * f64::from(self.b)
        }

        /// 视口背景是否按亮色处理。
        #[inline]
        pub fn is_light(self) -> bool {
            self.luma() >= 128.0
        }
    }

    impl Default for Rgb {
        fn default() -> Self {
            Self::WHITE
        }
    }
}

pub mod context {
    use std::collections::BTreeSet;

    use serde::{Deserialize, Serialize};

    use crate::color::Rgb;

    /// 对比度 ≥ 该值时表示"亮背景"，实际对比度为差值。
    pub const LIGHT_BACKGROUND_OFFSET: u8 = 111;

    /// PDF 注释在图层列表中的伪图层名，渲染时转换为注释开关。
    pub const ANNOTATION_LAYER_NAME: &str = "Comments and Markups";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LayerState {
        pub name: String,
        pub enabled: bool,
    }

    impl LayerState {
        #[inline]
        pub fn new(name: impl Into<String>, enabled: bool) -> Self {
            Self {
                name: name.into(),
                enabled,
            }
        }
    }

    /// 一次绘制调用的显示参数。图层比较时忽略顺序。
    #[derive(Debug, Clone, Eq, Serialize, Deserialize)]
    pub struct DrawContext {
        pub contrast: u8,
        pub fade: u8,
        pub monochrome: bool,
        pub adjust_color_for_background: bool,
        #[serde(default)]
        pub layers: Vec<LayerState>,
    }

    impl DrawContext {
        pub fn new(contrast: u8, fade: u8, monochrome: bool, adjust_color_for_background: bool) -> Self {
            Self {
                contrast,
                fade,
                monochrome,
                adjust_color_for_background,
                layers: Vec::new(),
            }
        }

        pub fn with_layers(mut self, layers: impl IntoIterator<Item = LayerState>) -> Self {
            self.layers = layers.into_iter().collect();
            self
        }

        /// 派生一份把背景明暗编码进对比度的副本，原值不变。
        pub fn for_background(&self, background: Rgb) -> DrawContext {
            let mut derived = self.clone();
            if background.is_light() && !self.is_light_background() {
                derived.contrast = self.contrast.saturating_add(LIGHT_BACKGROUND_OFFSET);
            }
            derived
        }

        #[inline]
        pub fn is_light_background(&self) -> bool {
            self.contrast >= LIGHT_BACKGROUND_OFFSET
        }

        #[inline]
        pub fn effective_contrast(&self) -> u8 {
            if self.is_light_background() {
                self.contrast - LIGHT_BACKGROUND_OFFSET
            } else {
                self.contrast
            }
        }

        /// 需要传给渲染库的内容图层（启用且非注释伪图层）。
        pub fn enabled_content_layers(&self) -> Vec<String> {
            self.layers
                .iter()
                .filter(|layer| layer.enabled && layer.name != ANNOTATION_LAYER_NAME)
                .map(|layer| layer.name.clone())
                .collect()
        }

        /// 是否按内容图层过滤；只有注释伪图层时按未过滤处理。
        pub fn filters_content_layers(&self) -> bool {
            self.layers
                .iter()
                .any(|layer| layer.name != ANNOTATION_LAYER_NAME)
        }

        /// 注释伪图层未出现时默认显示注释。
        pub fn annotations_enabled(&self) -> bool {
            self.layers
                .iter()
                .find(|layer| layer.name == ANNOTATION_LAYER_NAME)
                .map(|layer| layer.enabled)
                .unwrap_or(true)
        }

        fn layer_set(&self) -> BTreeSet<(&str, bool)> {
            self.layers
                .iter()
                .map(|layer| (layer.name.as_str(), layer.enabled))
                .collect()
        }
    }

    impl Default for DrawContext {
        /// 中性显示：对比度 50、无淡入、彩色、不随背景调整。
        fn default() -> Self {
            Self::new(50, 0, false, false)
        }
    }

    impl PartialEq for DrawContext {
        fn eq(&self, other: &Self) -> bool {
            self.contrast == other.contrast
                && self.fade == other.fade
                && self.monochrome == other.monochrome
                && self.adjust_color_for_background == other.adjust_color_for_background
                && self.layer_set() == other.layer_set()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn layer_order_does_not_affect_equality() {
            let a = DrawContext::new(20, 25, false, true).with_layers([
                LayerState::new("A", true),
                LayerState::new("B", false),
            ]);
            let b = DrawContext::new(20, 25, false, true).with_layers([
                LayerState::new("B", false),
                LayerState::new("A", true),
            ]);
            assert_eq!(a, b);

            let c = DrawContext::new(20, 25, false, true).with_layers([
                LayerState::new("A", true),
                LayerState::new("B", true),
            ]);
            assert_ne!(a, c);
        }

        #[test]
        fn background_lightness_is_encoded_in_contrast() {
            let ctx = DrawContext::new(20, 0, false, false);
            let light = ctx.for_background(Rgb::WHITE);
            assert!(light.is_light_background());
            assert_eq!(light.contrast, 131);
            assert_eq!(light.effective_contrast(), 20);

            let dark = ctx.for_background(Rgb::BLACK);
            assert!(!dark.is_light_background());
            assert_eq!(dark.effective_contrast(), 20);
            assert_eq!(ctx.contrast, 20);
        }

        #[test]
        fn annotation_layer_is_not_a_content_layer() {
            let ctx = DrawContext::default().with_layers([
                LayerState::new("Walls", true),
                LayerState::new("Doors", false),
                LayerState::new(ANNOTATION_LAYER_NAME, false),
            ]);
            assert_eq!(ctx.enabled_content_layers(), vec!["Walls".to_string()]);
            assert!(!ctx.annotations_enabled());
            assert!(DrawContext::default().annotations_enabled());
            assert!(ctx.filters_content_layers());
        }

        #[test]
        fn annotation_only_context_does_not_filter_layers() {
            let ctx = DrawContext::default().with_layers([LayerState::new(ANNOTATION_LAYER_NAME, false)]);
            assert!(!ctx.filters_content_layers());
            assert!(!ctx.annotations_enabled());
            assert!(!DrawContext::default().filters_content_layers());
        }
    }
}

pub mod shading {
    use crate::color::Rgb;
    use crate::context::DrawContext;

    const NEUTRAL_CONTRAST: u8 = 50;

    /// 逐像素颜色调整。`needs_adjustment` 为假时调用方可跳过 `shade`。
    pub trait ColorAdjuster {
        fn needs_adjustment(&self) -> bool;
        fn shade(&self, color: Rgb) -> Rgb;
    }

    /// 根据对比度、淡入与单色设置重新计算显示颜色。
    #[derive(Debug, Clone, Copy)]
    pub struct UnderlayShading {
        contrast_factor: f64,
        fade: f64,
        monochrome: bool,
        background: Rgb,
        active: bool,
    }

    impl UnderlayShading {
        pub fn new(context: &DrawContext, background: Rgb) -> Self {
            let contrast = context.effective_contrast();
            let fade = context.fade.min(100);
            Self {
                contrast_factor: f64::from(contrast) / f64::from(NEUTRAL_CONTRAST),
                fade: f64::from(fade) / 100.0,
                monochrome: context.monochrome,
                background,
                active: context.monochrome || fade > 0 || contrast != NEUTRAL_CONTRAST,
            }
        }
    }

    impl ColorAdjuster for UnderlayShading {
        #[inline]
        fn needs_adjustment(&self) -> bool {
            self.active
        }

        fn shade(&self, color: Rgb) -> Rgb {
            let mut channels = if self.monochrome {
                let luma = color.luma();
                [luma; 3]
            } else {
                [f64::from(color.r), f64::from(color.g), f64::from(color.b)]
            };
            let background = [
                f64::from(self.background.r),
                f64::from(self.background.g),
                f64::from(self.background.b),
            ];
            for (channel, bg) in channels.iter_mut().zip(background) {
                let stretched = 128.0 + (*channel - 128.0) * self.contrast_factor;
                *channel = stretched * (1.0 - self.fade) + bg * self.fade;
            }
            let to_u8 = |value: f64| value.round().clamp(0.0, 255.0) as u8;
            Rgb::new(to_u8(channels[0]), to_u8(channels[1]), to_u8(channels[2]))
        }
    }

}

pub mod curves {
    use std::f64::consts::TAU;

    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    use crate::geometry::{Bounds2D, GeometryError, Point2, Vector2};

    const MAX_SEGMENTS_PER_SPAN: usize = 1024;
    const MIN_TOLERANCE: f64 = 1e-9;

    /// 多段线及其范围。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Polyline2 {
        pub points: Vec<Point2>,
        pub extents: Bounds2D,
    }

    impl Polyline2 {
        pub fn new(points: Vec<Point2>) -> Self {
            let extents = Bounds2D::from_points(points.iter().copied());
            Self { points, extents }
        }
    }

    /// 非有理 NURBS 曲线（权重恒为 1）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct NurbsCurve2 {
        degree: usize,
        control_points: Vec<Point2>,
        knots: Vec<f64>,
    }

    impl NurbsCurve2 {
        pub fn new(
            degree: usize,
            control_points: Vec<Point2>,
            knots: Vec<f64>,
        ) -> Result<Self, GeometryError> {
            if degree == 0 || control_points.len() <= degree {
                return Err(GeometryError::InvalidCurve(format!(
                    "degree {degree} needs more than {degree} control points, got {}",
                    control_points.len()
                )));
            }
            if knots.len() != control_points.len() + degree + 1 {
                return Err(GeometryError::InvalidCurve(format!(
                    "expected {} knots, got {}",
                    control_points.len() + degree + 1,
                    knots.len()
                )));
            }
            if knots.windows(2).any(|pair| pair[1] < pair[0]) {
                return Err(GeometryError::InvalidCurve(
                    "knot vector is not non-decreasing".to_string(),
                ));
            }
            Ok(Self {
                degree,
                control_points,
                knots,
            })
        }

        /// 三次分段 Bézier：控制点数量为 `3k + 1`，内部节点重复三次。
        pub fn piecewise_cubic(control_points: Vec<Point2>) -> Result<Self, GeometryError> {
            if control_points.len() < 4 || (control_points.len() - 1) % 3 != 0 {
                return Err(GeometryError::InvalidCurve(format!(
                    "piecewise cubic needs 3k+1 control points, got {}",
                    control_points.len()
                )));
            }
            let segments = (control_points.len() - 1) / 3;
            let mut knots = vec![0.0; 4];
            for i in 1..segments {
                knots.extend([i as f64; 3]);
            }
            knots.extend([segments as f64; 4]);
            Self::new(3, control_points, knots)
        }

        #[inline]
        pub fn degree(&self) -> usize {
            self.degree
        }

        #[inline]
        pub fn control_points(&self) -> &[Point2] {
            &self.control_points
        }

        #[inline]
        pub fn knots(&self) -> &[f64] {
            &self.knots
        }

        pub fn domain(&self) -> (f64, f64) {
            (
                self.knots[self.degree],
                self.knots[self.control_points.len()],
            )
        }

        /// 控制多边形范围（凸包性质保证包含曲线）。
        pub fn extents(&self) -> Bounds2D {
            Bounds2D::from_points(self.control_points.iter().copied())
        }

        fn find_span(&self, t: f64) -> usize {
            let last = self.control_points.len() - 1;
            if t >= self.knots[last + 1] {
                let mut span = last;
                while span > self.degree && self.knots[span] >= self.knots[span + 1] {
                    span -= 1;
                }
                return span;
            }
            let mut span = self.degree;
            while span < last && self.knots[span + 1] <= t {
                span += 1;
            }
            span
        }

        /// de Boor 求值。
        pub fn point_at(&self, t: f64) -> Point2 {
            let (start, end) = self.domain();
            let t = t.clamp(start, end);
            let p = self.degree;
            let span = self.find_span(t);
            let mut d: Vec<DVec2> = (0..=p)
                .map(|j| self.control_points[j + span - p].as_vec2())
                .collect();
            for r in 1..=p {
                for j in (r..=p).rev() {
                    let i = j + span - p;
                    let denom = self.knots[i + p + 1 - r] - self.knots[i];
                    let alpha = if denom.abs() <= f64::EPSILON {
                        0.0
                    } else {
                        (t - self.knots[i]) / denom
                    };
                    d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
                }
            }
            Point2::from_vec(d[p])
        }

        /// 按最大弦高 `tolerance` 离散为折线。每个非零节点区间独立取等分段数。
        pub fn tessellate(&self, tolerance: f64) -> Vec<Point2> {
            let tolerance = tolerance.max(MIN_TOLERANCE);
            let p = self.degree;
            let mut points = Vec::new();
            for span in p..self.control_points.len() {
                let (t0, t1) = (self.knots[span], self.knots[span + 1]);
                if t1 <= t0 {
                    continue;
                }
                let local = &self.control_points[span - p..=span];
                let mut second_difference: f64 = 0.0;
                for window in local.windows(3) {
                    let diff = window[2].as_vec2() - 2.0 * window[1].as_vec2() + window[0].as_vec2();
                    second_difference = second_difference.max(diff.length());
                }
                let bound = (p * p.saturating_sub(1)) as f64 / 8.0 * second_difference;
                let segments = ((bound / tolerance).sqrt().ceil() as usize).clamp(1, MAX_SEGMENTS_PER_SPAN);
                if points.is_empty() {
                    points.push(self.point_at(t0));
                }
                for step in 1..=segments {
                    let t = t0 + (t1 - t0) * step as f64 / segments as f64;
                    points.push(self.point_at(t));
                }
            }
            points
        }
    }

    /// 椭圆弧：主轴向量、短长轴比（≤ 1）与参数区间（弧度）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct EllipticalArc2 {
        pub center: Point2,
        pub major_axis: Vector2,
        pub minor_ratio: f64,
        pub start_angle: f64,
        pub end_angle: f64,
    }

    impl EllipticalArc2 {
        pub fn minor_axis(&self) -> Vector2 {
            let major = self.major_axis.as_vec2();
            Vector2::from(DVec2::new(-major.y, major.x) * self.minor_ratio)
        }

        pub fn point_at(&self, angle: f64) -> Point2 {
            let offset =
                self.major_axis.as_vec2() * angle.cos() + self.minor_axis().as_vec2() * angle.sin();
            self.center.translate(Vector2::from(offset))
        }

        fn sweep(&self) -> (f64, f64) {
            let start = self.start_angle;
            let mut end = self.end_angle;
            if (end - start).abs() < 1e-9 {
                end = start + TAU;
            } else {
                while end < start {
                    end += TAU;
                }
            }
            (start, end)
        }

        /// 采样求范围。
        pub fn extents(&self) -> Bounds2D {
            let mut bounds = Bounds2D::empty();
            if self.major_axis.length() <= f64::EPSILON {
                bounds.include_point(self.center);
                return bounds;
            }
            let (start, end) = self.sweep();
            let span = end - start;
            let step_count = ((span / (TAU / 64.0)).ceil() as usize).max(16);
            for i in 0..=step_count {
                let t = start + span * (i as f64 / step_count as f64);
                bounds.include_point(self.point_at(t));
            }
            bounds
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn quarter_circle_like() -> NurbsCurve2 {
            NurbsCurve2::piecewise_cubic(vec![
                Point2::new(0.0, 0.0),
                Point2::new(0.0, 5.0),
                Point2::new(5.0, 10.0),
                Point2::new(10.0, 10.0),
            ])
            .expect("valid curve")
        }

        #[test]
        fn piecewise_cubic_interpolates_segment_ends() {
            let curve = NurbsCurve2::piecewise_cubic(vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(2.0, 1.0),
                Point2::new(3.0, 0.0),
                Point2::new(4.0, -1.0),
                Point2::new(5.0, -1.0),
                Point2::new(6.0, 0.0),
            ])
            .unwrap();
            assert_eq!(curve.knots().len(), 11);
            assert_eq!(curve.domain(), (0.0, 2.0));
            assert!(curve.point_at(0.0).is_near(Point2::new(0.0, 0.0), 1e-12));
            assert!(curve.point_at(1.0).is_near(Point2::new(3.0, 0.0), 1e-12));
            assert!(curve.point_at(2.0).is_near(Point2::new(6.0, 0.0), 1e-12));
        }

        #[test]
        fn invalid_control_point_count_is_rejected() {
            let err = NurbsCurve2::piecewise_cubic(vec![Point2::new(0.0, 0.0); 5]).unwrap_err();
            assert!(matches!(err, GeometryError::InvalidCurve(_)));
        }

        #[test]
        fn tighter_tolerance_yields_more_points() {
            let curve = quarter_circle_like();
            let coarse = curve.tessellate(1.0);
            let fine = curve.tessellate(0.001);
            assert!(fine.len() > coarse.len());
            assert!(coarse.first().unwrap().is_near(Point2::new(0.0, 0.0), 1e-12));
            assert!(fine.last().unwrap().is_near(Point2::new(10.0, 10.0), 1e-12));
        }

        #[test]
        fn full_ellipse_extents() {
            let arc = EllipticalArc2 {
                center: Point2::new(0.0, 0.0),
                major_axis: Vector2::new(4.0, 0.0),
                minor_ratio: 0.5,
                start_angle: 0.0,
                end_angle: TAU,
            };
            let bounds = arc.extents();
            assert!((bounds.max().x() - 4.0).abs() < 1e-9);
            assert!((bounds.max().y() - 2.0).abs() < 1e-9);
            assert!((bounds.min().y() + 2.0).abs() < 1e-9);
        }
    }
}
