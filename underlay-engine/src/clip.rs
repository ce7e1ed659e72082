//! 视口可见区域计算：底图单位正方形中实际落在视口内的部分。

use glam::DMat4;
use underlay_core::geometry::{Bounds2D, GeometryError, PlaneMapping, Point2, intersect_convex};

/// 可见区域（单位正方形坐标）以及底图轴在眼坐标中的长度。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleRegion {
    pub extents: Bounds2D,
    pub is_visible: bool,
    /// 底图世界坐标单位向量映射到眼坐标后的长度 `(|X|, |Y|)`。
    pub eye_scale: (f64, f64),
}

impl VisibleRegion {
    fn hidden(eye_scale: (f64, f64)) -> Self {
        Self {
            extents: Bounds2D::empty(),
            is_visible: false,
            eye_scale,
        }
    }
}

/// 求底图（世界尺寸 `width_scale × height_scale`）在视口矩形中的可见部分。
///
/// 视线位于底图平面内时返回 [`GeometryError::DegenerateTransform`]，
/// 调用方按"不可见"处理。
pub fn visible_fraction(
    viewport_corners: &Bounds2D,
    underlay_to_eye: &DMat4,
    width_scale: f64,
    height_scale: f64,
) -> Result<VisibleRegion, GeometryError> {
    let mapping = PlaneMapping::from_transform(underlay_to_eye)?;
    let eye_scale = mapping.axis_lengths();
    if viewport_corners.is_empty() || width_scale <= 0.0 || height_scale <= 0.0 {
        return Ok(VisibleRegion::hidden(eye_scale));
    }

    let underlay = Bounds2D::unit_square().scaled(width_scale, height_scale);
    let quad: Vec<Point2> = underlay
        .corners()
        .iter()
        .map(|corner| mapping.to_eye(*corner))
        .collect();
    let contours = intersect_convex(&quad, &viewport_corners.corners());
    if contours.is_empty() {
        return Ok(VisibleRegion::hidden(eye_scale));
    }

    let back = Bounds2D::from_points(contours.iter().flatten().map(|point| {
        let plane = mapping.to_plane(*point);
        Point2::new(plane.x() / width_scale, plane.y() / height_scale)
    }));
    let extents = back.intersection(&Bounds2D::unit_square());
    Ok(VisibleRegion {
        extents,
        is_visible: !extents.is_empty(),
        eye_scale,
    })
}

/// 把可见区域四向各扩展半个尺寸，作为缓存预取范围。
///
/// 取整在 PDF 点坐标下进行：下界向下取整再减 1，上界向下取整加 1 后再加 1.5。
pub fn extend_visible_part(extents: &Bounds2D, page_width: f64, page_height: f64) -> Bounds2D {
    if extents.is_empty() || page_width <= 0.0 || page_height <= 0.0 {
        return *extents;
    }
    let points = extents.scaled(page_width, page_height);
    let grow = |min: f64, max: f64| {
        let half = (max - min) / 2.0;
        let lower = ((min - half).floor() - 1.0).max(0.0);
        let upper = (max + half + 1.0).floor() + 1.5;
        (lower, upper)
    };
    let (x0, x1) = grow(points.min().x(), points.max().x());
    let (y0, y1) = grow(points.min().y(), points.max().y());
    Bounds2D::new(
        Point2::new(x0 / page_width, y0 / page_height),
        Point2::new(x1 / page_width, y1 / page_height),
    )
    .intersection(&Bounds2D::unit_square())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DQuat, DVec3};

    fn unit_box(min: (f64, f64), max: (f64, f64)) -> Bounds2D {
        Bounds2D::new(Point2::new(min.0, min.1), Point2::new(max.0, max.1))
    }

    #[test]
    fn fully_visible_underlay_yields_unit_square() {
        let viewport = unit_box((-10.0, -10.0), (300.0, 300.0));
        let region = visible_fraction(&viewport, &DMat4::IDENTITY, 144.0, 72.0).unwrap();
        assert!(region.is_visible);
        assert!(region.extents.min().is_near(Point2::new(0.0, 0.0), 1e-12));
        assert!(region.extents.max().is_near(Point2::new(1.0, 1.0), 1e-12));
        assert_eq!(region.eye_scale, (1.0, 1.0));
    }

    #[test]
    fn partial_view_maps_back_to_unit_square() {
        let viewport = unit_box((0.0, 0.0), (72.0, 36.0));
        let region = visible_fraction(&viewport, &DMat4::IDENTITY, 144.0, 72.0).unwrap();
        assert!(region.is_visible);
        assert!(region.extents.max().is_near(Point2::new(0.5, 0.5), 1e-12));
    }

    #[test]
    fn rotated_view_is_clipped_as_polygon() {
        let transform = DMat4::from_scale_rotation_translation(
            DVec3::ONE,
            DQuat::from_rotation_z(std::f64::consts::FRAC_PI_4),
            DVec3::ZERO,
        );
        // 视口只覆盖旋转后正方形的右半部分。
        let viewport = unit_box((0.0, 0.0), (10.0, 10.0));
        let region = visible_fraction(&viewport, &transform, 1.0, 1.0).unwrap();
        assert!(region.is_visible);
        assert!(region.extents.max().x() <= 1.0);
        assert!(region.extents.min().y() < 1e-9);
    }

    #[test]
    fn view_outside_underlay_is_not_visible() {
        let viewport = unit_box((500.0, 500.0), (600.0, 600.0));
        let region = visible_fraction(&viewport, &DMat4::IDENTITY, 144.0, 72.0).unwrap();
        assert!(!region.is_visible);
        assert!(region.extents.is_empty());
    }

    #[test]
    fn edge_on_camera_is_reported() {
        let transform = DMat4::from_rotation_y(std::f64::consts::FRAC_PI_2);
        let viewport = unit_box((0.0, 0.0), (1.0, 1.0));
        let err = visible_fraction(&viewport, &transform, 1.0, 1.0).unwrap_err();
        assert_eq!(err, GeometryError::DegenerateTransform);
    }

    #[test]
    fn extension_uses_literal_rounding_offsets() {
        // 页面 200×100 点，可见 [40,80]×[20,40] 点。
        let visible = unit_box((0.2, 0.2), (0.4, 0.4));
        let extended = extend_visible_part(&visible, 200.0, 100.0);
        // x: floor(40 - 20) - 1 = 19；floor(80 + 20 + 1) + 1.5 = 102.5
        assert!((extended.min().x() - 19.0 / 200.0).abs() < 1e-12);
        assert!((extended.max().x() - 102.5 / 200.0).abs() < 1e-12);
        // y: floor(20 - 10) - 1 = 9；floor(40 + 10 + 1) + 1.5 = 52.5
        assert!((extended.min().y() - 9.0 / 100.0).abs() < 1e-12);
        assert!((extended.max().y() - 52.5 / 100.0).abs() < 1e-12);
        assert!(extended.contains(&visible));
    }

    #[test]
    fn extension_is_clamped_to_page() {
        let extended = extend_visible_part(&Bounds2D::unit_square(), 200.0, 100.0);
        assert_eq!(extended, Bounds2D::unit_square());
    }
}
