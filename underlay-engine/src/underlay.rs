//! 底图条目的对外入口：把可见区域、光栅缓存、分带渲染与矢量缓存组合成
//! 宿主调用的绘制与查询操作。
//!
//! 锁顺序固定为 条目状态 → 光栅缓存 → 渲染会话。

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{ImageFormat, RgbaImage};
use tracing::{debug, info, warn};
use underlay_core::color::Rgb;
use underlay_core::context::DrawContext;
use underlay_core::geometry::{Bounds2D, GeometryError, Point2, Vector2};

use crate::backend::{DocumentHandle, RenderSession};
use crate::clip::{extend_visible_part, visible_fraction};
use crate::errors::{BackendError, UnderlayError};
use crate::host::{DrawableId, GeometrySink, UnderlayHost, ViewportSink};
use crate::metadata::PageMetadata;
use crate::raster_cache::{CacheQuery, CacheStats, RasterCache};
use crate::rasterizer::{PageRasterizer, RasterImage, RasterRequest};
use crate::settings::UnderlaySettings;
use crate::tiles::{POINTS_PER_INCH, TileSplitter, pixel_size};
use crate::vectors::{VectorGeometryCache, vector_scale};

/// 一个已加载底图文件对宿主暴露的能力。页码从 0 开始。
pub trait UnderlayFile: Send + Sync {
    fn path(&self) -> &Path;
    /// 页面数量。
    fn items_count(&self) -> usize;
    /// 页面尺寸（PDF 点，未缩放）。
    fn page_size(&self, page: usize) -> Option<(f64, f64)>;
    fn media_box(&self, page: usize) -> Option<Bounds2D>;
    /// 页面在世界坐标中的范围。
    fn item_extents(&self, page: usize) -> Option<Bounds2D>;
    fn thumbnail(&self, page: usize) -> Result<Option<RgbaImage>, UnderlayError>;

    fn viewport_draw(
        &self,
        page: usize,
        object: DrawableId,
        sink: &mut dyn ViewportSink,
        context: &DrawContext,
    ) -> Result<(), UnderlayError>;
    fn draw_geometry_for_selection(
        &self,
        page: usize,
        sink: &mut dyn ViewportSink,
        context: &DrawContext,
    ) -> Result<(), UnderlayError>;
    fn explode_geometry(
        &self,
        page: usize,
        sink: &mut dyn GeometrySink,
        context: &DrawContext,
        ignore_images: bool,
    ) -> Result<usize, UnderlayError>;
    fn snap_geometry(
        &self,
        page: usize,
        sink: &mut dyn GeometrySink,
        context: &DrawContext,
        pick_point: Point2,
    ) -> Result<usize, UnderlayError>;

    fn levels_count(&self, page: usize) -> usize;
    fn level_name(&self, page: usize, index: usize) -> String;
    fn is_level_enabled(&self, page: usize, index: usize) -> bool;
    fn is_level_enabled_by_name(&self, page: usize, name: &str) -> Result<bool, UnderlayError>;
    fn enable_level(&self, page: usize, name: &str, enabled: bool) -> Result<(), UnderlayError>;

    /// 宿主删除可绘制对象后调用。
    fn notify_erased(&self, object: DrawableId);
    /// 清空该文档的全部光栅缓存并取消订阅。
    fn close(&self);
}

/// 页面尺寸与测量比例，用于 PDF 点与世界单位的换算。
#[derive(Debug, Clone, Copy, PartialEq)]
struct PageLayout {
    width: f64,
    height: f64,
    measure_scale: f64,
}

impl PageLayout {
    /// PDF 点到世界单位。矢量几何另用 [`vector_scale`]。
    #[inline]
    fn to_world(&self, points: f64) -> f64 {
        points / POINTS_PER_INCH / self.measure_scale
    }

    fn world_size(&self) -> (f64, f64) {
        (self.to_world(self.width), self.to_world(self.height))
    }

    fn page_points(&self) -> Bounds2D {
        Bounds2D::unit_square().scaled(self.width, self.height)
    }

    /// 单位正方形范围对应的世界坐标放置（原点、U、V）。
    fn placement(&self, extents: &Bounds2D) -> (Point2, Vector2, Vector2) {
        let (world_width, world_height) = self.world_size();
        let origin = Point2::new(extents.min().x() * world_width, extents.min().y() * world_height);
        let u = Vector2::new(extents.width() * world_width, 0.0);
        let v = Vector2::new(0.0, extents.height() * world_height);
        (origin, u, v)
    }
}

struct ItemState {
    metadata: PageMetadata,
    vectors: VectorGeometryCache,
}

/// PDF 底图条目。
pub struct PdfUnderlay {
    session: Arc<RenderSession>,
    document: DocumentHandle,
    path: PathBuf,
    settings: UnderlaySettings,
    host: Arc<dyn UnderlayHost>,
    raster_cache: RasterCache,
    state: Mutex<ItemState>,
}

impl PdfUnderlay {
    /// 打开文件并读取页数。文档在条目析构时关闭。
    pub fn load_file(
        session: Arc<RenderSession>,
        host: Arc<dyn UnderlayHost>,
        path: impl AsRef<Path>,
        password: Option<&str>,
        settings: UnderlaySettings,
    ) -> Result<Self, UnderlayError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(UnderlayError::InvalidInput("document path is empty".to_string()));
        }
        let document = session.with_backend(|backend| backend.open_document(path, password))?;
        let metadata = PageMetadata::load(&session, document);
        info!(path = %path.display(), pages = metadata.page_count(), "已打开 PDF 底图");
        Ok(Self {
            raster_cache: RasterCache::new(host.clone()),
            session,
            document,
            path: path.to_path_buf(),
            settings,
            host,
            state: Mutex::new(ItemState {
                metadata,
                vectors: VectorGeometryCache::default(),
            }),
        })
    }

    #[inline]
    pub fn settings(&self) -> &UnderlaySettings {
        &self.settings
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.raster_cache.stats()
    }

    /// 测量比例；越界页返回默认值。
    pub fn measure_scale(&self, page: usize) -> f64 {
        let mut state = self.state();
        state.metadata.measure_scale(&self.session, page)
    }

    pub fn layers_on_page(&self, page: usize) -> Vec<String> {
        let mut state = self.state();
        state.metadata.layers_on_page(&self.session, page)
    }

    pub fn has_annotations(&self, page: usize) -> bool {
        let mut state = self.state();
        state.metadata.has_annotations(&self.session, page)
    }

    /// 把缩略图编码为 PNG。
    pub fn thumbnail_png(&self, page: usize) -> Result<Option<Vec<u8>>, UnderlayError> {
        let Some(image) = self.thumbnail(page)? else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(Some(bytes))
    }

    fn state(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn layout(&self, page: usize) -> Option<PageLayout> {
        let mut state = self.state();
        let (width, height) = state.metadata.page_size(&self.session, page)?;
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        let measure_scale = state.metadata.measure_scale(&self.session, page);
        Some(PageLayout {
            width,
            height,
            measure_scale,
        })
    }

    fn require_layout(&self, page: usize) -> Result<PageLayout, UnderlayError> {
        self.layout(page)
            .ok_or_else(|| UnderlayError::InvalidInput(format!("page {page} is out of range")))
    }

    fn rasterizer(&self) -> PageRasterizer<'_> {
        PageRasterizer::new(&self.session, self.document)
    }

    /// 确保矢量缓存对应 `page` 后在持锁状态下执行 `f`。
    fn with_vectors<R>(
        &self,
        page: usize,
        layout: &PageLayout,
        context: &DrawContext,
        f: impl FnOnce(&mut VectorGeometryCache) -> R,
    ) -> Result<R, BackendError> {
        let mut state = self.state();
        let scale = vector_scale(layout.measure_scale, 1.0);
        state
            .vectors
            .ensure(&self.session, self.document, page, context, scale)?;
        Ok(f(&mut state.vectors))
    }
}

impl UnderlayFile for PdfUnderlay {
    fn path(&self) -> &Path {
        &self.path
    }

    fn items_count(&self) -> usize {
        self.state().metadata.page_count()
    }

    fn page_size(&self, page: usize) -> Option<(f64, f64)> {
        let mut state = self.state();
        state.metadata.page_size(&self.session, page)
    }

    fn media_box(&self, page: usize) -> Option<Bounds2D> {
        let mut state = self.state();
        state.metadata.media_box(&self.session, page)
    }

    fn item_extents(&self, page: usize) -> Option<Bounds2D> {
        let layout = self.layout(page)?;
        let (width, height) = layout.world_size();
        Some(Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(width, height)))
    }

    fn thumbnail(&self, page: usize) -> Result<Option<RgbaImage>, UnderlayError> {
        let layout = self.require_layout(page)?;
        let box_width = f64::from(self.settings.thumbnail_width);
        let box_height = f64::from(self.settings.thumbnail_height);
        let fit = (box_width / layout.width).min(box_height / layout.height);
        let pixel_width = (layout.width * fit).round().max(1.0) as u32;
        let pixel_height = (layout.height * fit).round().max(1.0) as u32;

        let context = DrawContext::default();
        let request = RasterRequest {
            page,
            clip: layout.page_points(),
            dpi: POINTS_PER_INCH * fit,
            pixel_width,
            pixel_height,
            context: &context,
            background: Rgb::WHITE,
        };
        let Some(mut image) = self.rasterizer().rasterize(&request) else {
            return Ok(None);
        };
        for pixel in image.pixels_mut().chunks_exact_mut(4) {
            pixel[3] = 255;
        }
        Ok(image.to_rgba_image())
    }

    fn viewport_draw(
        &self,
        page: usize,
        object: DrawableId,
        sink: &mut dyn ViewportSink,
        context: &DrawContext,
    ) -> Result<(), UnderlayError> {
        let Some(layout) = self.layout(page) else {
            debug!(page, "页码越界，跳过绘制");
            return Ok(());
        };
        let (world_width, world_height) = layout.world_size();
        let region = match visible_fraction(
            &sink.viewport_corners(),
            &sink.underlay_to_eye(),
            world_width,
            world_height,
        ) {
            Ok(region) => region,
            Err(GeometryError::DegenerateTransform) => {
                debug!(page, "视线位于底图平面内，跳过绘制");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if !region.is_visible {
            return Ok(());
        }

        let (scale_x, scale_y) = region.eye_scale;
        let requested_dpi = sink.pixel_density() * scale_x.max(scale_y) / layout.measure_scale;
        if !requested_dpi.is_finite() || requested_dpi <= 0.0 {
            warn!(page, requested_dpi, "无效的请求 DPI");
            return Ok(());
        }
        let background = sink.background();

        if sink.is_plot() {
            let clip = region.extents.scaled(layout.width, layout.height);
            let splitter = TileSplitter::new(self.rasterizer(), self.settings.tile_byte_limit);
            splitter.split_and_rasterize(
                page,
                &clip,
                requested_dpi,
                context,
                background,
                layout.measure_scale,
                sink,
            );
            return Ok(());
        }

        let query = CacheQuery {
            clip: region.extents,
            dpi: requested_dpi,
            page,
            context,
            background,
        };
        let policy = self.settings.dpi_policy();
        let drawn: Option<(Arc<RasterImage>, Bounds2D)> = {
            let mut cache = self.raster_cache.lock();
            let entry = cache.entry(sink.viewport_id(), object);
            if policy.is_reusable(entry, &query, false) {
                let cached = entry.image().cloned().map(|image| (image, entry.extents()));
                cache.record_hit();
                debug!(page, requested_dpi, "光栅缓存命中");
                cached
            } else {
                let decision = policy.decide(entry.dpi(), requested_dpi, false);
                let extended = extend_visible_part(&region.extents, layout.width, layout.height);
                let clip = extended.scaled(layout.width, layout.height);
                let (pixel_width, pixel_height) = pixel_size(&clip, decision.render_dpi);
                let request = RasterRequest {
                    page,
                    clip,
                    dpi: decision.render_dpi,
                    pixel_width,
                    pixel_height,
                    context,
                    background,
                };
                let rendered = match self.rasterizer().rasterize(&request) {
                    Some(image) => {
                        entry.store(image, &query, extended, decision.stored_dpi);
                        entry.image().cloned().map(|image| (image, extended))
                    }
                    None => {
                        entry.reset();
                        None
                    }
                };
                cache.record_miss();
                debug!(
                    page,
                    requested_dpi,
                    render_dpi = decision.render_dpi,
                    pixel_width,
                    pixel_height,
                    "光栅缓存未命中，重新渲染"
                );
                rendered
            }
        };

        if let Some((image, extents)) = drawn {
            let (origin, u, v) = layout.placement(&extents);
            sink.raster(&image, origin, u, v);
        }
        Ok(())
    }

    fn draw_geometry_for_selection(
        &self,
        page: usize,
        sink: &mut dyn ViewportSink,
        context: &DrawContext,
    ) -> Result<(), UnderlayError> {
        let Some(layout) = self.layout(page) else {
            return Ok(());
        };
        let deviation = sink.curve_deviation();
        let region = sink.selection_box();
        let result = self.with_vectors(page, &layout, context, |vectors| {
            if let Some(deviation) = deviation {
                vectors.optimize_splines(deviation);
            }
            vectors.query_in_region(region.as_ref(), sink)
        });
        if let Err(err) = result {
            warn!(page, error = %err, "矢量几何提取失败");
        }
        Ok(())
    }

    fn explode_geometry(
        &self,
        page: usize,
        sink: &mut dyn GeometrySink,
        context: &DrawContext,
        ignore_images: bool,
    ) -> Result<usize, UnderlayError> {
        let layout = self.require_layout(page)?;
        let mut emitted = 0;
        if !ignore_images {
            let clip = layout.page_points();
            let dpi = self.settings.explode_raster_dpi;
            let (pixel_width, pixel_height) = pixel_size(&clip, dpi);
            let request = RasterRequest {
                page,
                clip,
                dpi,
                pixel_width,
                pixel_height,
                context,
                background: Rgb::WHITE,
            };
            match self.rasterizer().rasterize(&request) {
                Some(image) => {
                    let (origin, u, v) = layout.placement(&Bounds2D::unit_square());
                    sink.raster(&image, origin, u, v);
                    emitted += 1;
                }
                None => warn!(page, "分解时页面光栅渲染失败"),
            }
        }
        emitted += self.with_vectors(page, &layout, context, |vectors| {
            vectors.query_in_region(None, sink)
        })?;
        Ok(emitted)
    }

    fn snap_geometry(
        &self,
        page: usize,
        sink: &mut dyn GeometrySink,
        context: &DrawContext,
        pick_point: Point2,
    ) -> Result<usize, UnderlayError> {
        let layout = self.require_layout(page)?;
        let aperture = self
            .host
            .aperture()
            .unwrap_or(self.settings.default_aperture);
        let region = Bounds2D::around(pick_point, aperture);
        let emitted = self.with_vectors(page, &layout, context, |vectors| {
            vectors.query_in_region(Some(&region), sink)
        })?;
        Ok(emitted)
    }

    fn levels_count(&self, page: usize) -> usize {
        let mut state = self.state();
        state.metadata.levels_count(&self.session, page)
    }

    fn level_name(&self, page: usize, index: usize) -> String {
        let mut state = self.state();
        state.metadata.level_name(&self.session, page, index)
    }

    fn is_level_enabled(&self, page: usize, index: usize) -> bool {
        let mut state = self.state();
        state.metadata.is_level_enabled(&self.session, page, index)
    }

    // 图层可见性由每次绘制的 DrawContext 决定，按名称查询与修改尚无写入路径。
    fn is_level_enabled_by_name(&self, _page: usize, _name: &str) -> Result<bool, UnderlayError> {
        Err(UnderlayError::NotImplemented("is_level_enabled_by_name"))
    }

    fn enable_level(&self, _page: usize, _name: &str, _enabled: bool) -> Result<(), UnderlayError> {
        Err(UnderlayError::NotImplemented("enable_level"))
    }

    fn notify_erased(&self, object: DrawableId) {
        self.raster_cache.invalidate(object);
    }

    fn close(&self) {
        self.raster_cache.clear();
        self.state().vectors.clear();
        debug!(path = %self.path.display(), "底图缓存已清空");
    }
}

impl Drop for PdfUnderlay {
    fn drop(&mut self) {
        self.close();
        let document = self.document;
        self.session
            .with_backend(|backend| backend.close_document(document));
    }
}

impl std::fmt::Debug for PdfUnderlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfUnderlay")
            .field("path", &self.path)
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}
