#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use glam::DMat4;
use underlay_core::color::Rgb;
use underlay_core::curves::{EllipticalArc2, NurbsCurve2};
use underlay_core::geometry::{Bounds2D, Point2, Vector2};
use underlay_engine::backend::{
    BitmapInfoHeader, Dib, DocumentHandle, MeasureInfo, RenderBackend, RenderSession, VectorPrimitive,
    bgr_stride,
};
use underlay_engine::errors::BackendError;
use underlay_engine::host::{DrawableId, GeometrySink, UnderlayHost, ViewportId, ViewportSink};
use underlay_engine::rasterizer::RasterImage;
use underlay_engine::settings::UnderlaySettings;
use underlay_engine::PdfUnderlay;

/// 测试页面内容（尺寸单位为 PDF 点）。
#[derive(Debug, Clone)]
pub struct FakePage {
    pub width: f64,
    pub height: f64,
    pub measure: Option<MeasureInfo>,
    pub layers: Vec<String>,
    pub annotations: bool,
    pub primitives: Vec<VectorPrimitive>,
}

impl FakePage {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            measure: None,
            layers: Vec::new(),
            annotations: false,
            primitives: Vec::new(),
        }
    }

    pub fn with_measure(mut self, element_count_x: u32, x_scale: f64) -> Self {
        self.measure = Some(MeasureInfo {
            element_count_x,
            x_scale,
        });
        self
    }

    pub fn with_layers(mut self, layers: &[&str], annotations: bool) -> Self {
        self.layers = layers.iter().map(|name| name.to_string()).collect();
        self.annotations = annotations;
        self
    }

    pub fn with_primitives(mut self, primitives: Vec<VectorPrimitive>) -> Self {
        self.primitives = primitives;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DibMode {
    #[default]
    Normal,
    Null,
    BadHeader,
    /// 前 n 次转换正常，之后返回空位图。
    FailAfter(usize),
}

/// 渲染库调用记录，测试与假后端共享。
#[derive(Debug, Default)]
pub struct Recorder {
    pub dib_mode: DibMode,
    pub fail_init: bool,
    pub dib_conversions: usize,
    pub layered_conversions: usize,
    pub released: usize,
    pub vector_conversions: usize,
    pub closed: Vec<DocumentHandle>,
    pub clip: Option<Bounds2D>,
    pub dpi: Option<f64>,
    pub image_size: Option<(u32, u32)>,
    pub background_gray: Option<u8>,
    pub layers: Option<Vec<String>>,
    pub render_annotations: Option<bool>,
    pub ignore_text: bool,
    pub ignore_images: bool,
    pub separate_image_decoding: Option<bool>,
    pub insert_mode: Option<bool>,
    pub automatic_page_size: Option<bool>,
    pub annotation_queries: Vec<usize>,
    pub dpi_history: Vec<f64>,
    /// 设置与转换之间被其他转换打断的次数。
    pub interleaved: usize,
    configured: bool,
}

pub type SharedRecorder = Arc<Mutex<Recorder>>;

pub struct FakeBackend {
    pages: Vec<FakePage>,
    recorder: SharedRecorder,
}

impl FakeBackend {
    pub fn new(pages: Vec<FakePage>) -> (Self, SharedRecorder) {
        let recorder = SharedRecorder::default();
        (
            Self {
                pages,
                recorder: recorder.clone(),
            },
            recorder,
        )
    }

    fn page(&self, page: usize) -> Option<&FakePage> {
        page.checked_sub(1).and_then(|index| self.pages.get(index))
    }

    fn record(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap()
    }

    fn produce_dib(&mut self, document: DocumentHandle, page: usize) -> Option<Dib> {
        let _ = document;
        self.page(page)?;
        let mut rec = self.record();
        rec.dib_conversions += 1;
        if !rec.configured {
            rec.interleaved += 1;
        }
        rec.configured = false;
        if let Some(dpi) = rec.dpi {
            rec.dpi_history.push(dpi);
        }
        let (width, height) = rec.image_size.unwrap_or((1, 1));
        match rec.dib_mode {
            DibMode::Null => return None,
            DibMode::FailAfter(limit) if rec.dib_conversions > limit => return None,
            _ => {}
        }
        let mut header = BitmapInfoHeader::bgr24(width as i32, height as i32);
        if rec.dib_mode == DibMode::BadHeader {
            header.size = 12;
        }
        let stride = bgr_stride(width as usize);
        let mut bits = vec![0u8; stride * height as usize];
        for row in bits.chunks_exact_mut(stride) {
            for pixel in row[..width as usize * 3].chunks_exact_mut(3) {
                pixel.copy_from_slice(&[10, 20, 30]);
            }
        }
        Some(Dib { header, bits })
    }
}

impl RenderBackend for FakeBackend {
    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.record().fail_init {
            return Err(BackendError::Initialization("license check failed".into()));
        }
        Ok(())
    }

    fn open_document(
        &mut self,
        path: &Path,
        _password: Option<&str>,
    ) -> Result<DocumentHandle, BackendError> {
        if path.to_string_lossy().contains("missing") {
            return Err(BackendError::OpenFailed {
                path: path.to_path_buf(),
                reason: "file not found".into(),
            });
        }
        Ok(DocumentHandle::new(42))
    }

    fn close_document(&mut self, document: DocumentHandle) {
        self.record().closed.push(document);
    }

    fn page_count(&self, _document: DocumentHandle) -> usize {
        self.pages.len()
    }

    fn page_size(&self, _document: DocumentHandle, page: usize) -> Option<(f64, f64)> {
        self.page(page).map(|page| (page.width, page.height))
    }

    fn media_box(&self, _document: DocumentHandle, _page: usize) -> Option<Bounds2D> {
        None
    }

    fn measure_info(&self, _document: DocumentHandle, page: usize) -> Option<MeasureInfo> {
        self.page(page).and_then(|page| page.measure)
    }

    fn layers_on_page(&self, _document: DocumentHandle, page: usize) -> Vec<String> {
        self.page(page).map(|page| page.layers.clone()).unwrap_or_default()
    }

    fn has_annotations(&self, _document: DocumentHandle, page: usize) -> bool {
        self.record().annotation_queries.push(page);
        self.page(page).is_some_and(|page| page.annotations)
    }

    fn set_separate_image_decoding(&mut self, enabled: bool) {
        self.record().separate_image_decoding = Some(enabled);
    }

    fn set_ignore_images(&mut self, ignore: bool) {
        self.record().ignore_images = ignore;
    }

    fn set_ignore_text(&mut self, ignore: bool) {
        self.record().ignore_text = ignore;
    }

    fn set_clip_rect(&mut self, clip: Option<Bounds2D>) {
        self.record().clip = clip;
    }

    fn set_image_size(&mut self, width: u32, height: u32) {
        self.record().image_size = Some((width, height));
    }

    fn set_background_gray(&mut self, gray: u8) {
        self.record().background_gray = Some(gray);
    }

    fn set_dpi(&mut self, dpi: f64) {
        let mut rec = self.record();
        rec.dpi = Some(dpi);
        rec.configured = true;
    }

    fn set_layers(&mut self, layers: Option<&[String]>) {
        self.record().layers = layers.map(|layers| layers.to_vec());
    }

    fn set_render_annotations(&mut self, enabled: bool) {
        self.record().render_annotations = Some(enabled);
    }

    fn set_insert_mode(&mut self, enabled: bool) {
        self.record().insert_mode = Some(enabled);
    }

    fn set_automatic_page_size(&mut self, enabled: bool) {
        self.record().automatic_page_size = Some(enabled);
    }

    fn convert_page_to_dib(&mut self, document: DocumentHandle, page: usize) -> Option<Dib> {
        self.produce_dib(document, page)
    }

    fn convert_page_to_dib_with_layers(
        &mut self,
        document: DocumentHandle,
        page: usize,
    ) -> Option<Dib> {
        self.record().layered_conversions += 1;
        self.produce_dib(document, page)
    }

    fn release_dib(&mut self, _dib: Dib) {
        self.record().released += 1;
    }

    fn convert_page_to_vectors(
        &mut self,
        _document: DocumentHandle,
        page: usize,
        sink: &mut dyn FnMut(VectorPrimitive),
    ) -> Result<(), BackendError> {
        self.record().vector_conversions += 1;
        let Some(page_data) = self.page(page) else {
            return Err(BackendError::PageOutOfRange(page));
        };
        for primitive in page_data.primitives.clone() {
            sink(primitive);
        }
        Ok(())
    }
}

/// 记录删除通知订阅的宿主。
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub aperture: Option<f64>,
    pub subscribed: Mutex<Vec<u64>>,
    pub unsubscribed: Mutex<Vec<u64>>,
}

impl UnderlayHost for RecordingHost {
    fn subscribe_erase(&self, object: DrawableId) {
        self.subscribed.lock().unwrap().push(object.get());
    }

    fn unsubscribe_erase(&self, object: DrawableId) {
        self.unsubscribed.lock().unwrap().push(object.get());
    }

    fn aperture(&self) -> Option<f64> {
        self.aperture
    }
}

#[derive(Debug, Clone)]
pub struct EmittedRaster {
    pub width: u32,
    pub height: u32,
    pub origin: Point2,
    pub u: Vector2,
    pub v: Vector2,
    pub pixel: [u8; 4],
}

/// 单位变换的视口：眼坐标即底图世界坐标。
#[derive(Debug, Clone)]
pub struct FakeViewport {
    pub id: ViewportId,
    pub transform: DMat4,
    pub corners: Bounds2D,
    pub density: f64,
    pub deviation: Option<f64>,
    pub background: Rgb,
    pub plot: bool,
    pub selection: Option<Bounds2D>,
    pub rasters: Vec<EmittedRaster>,
    pub polylines: Vec<Vec<Point2>>,
    pub curves: usize,
    pub arcs: usize,
}

impl FakeViewport {
    pub fn new(id: u64) -> Self {
        Self {
            id: ViewportId::new(id),
            transform: DMat4::IDENTITY,
            corners: Bounds2D::new(Point2::new(-10.0, -10.0), Point2::new(10_000.0, 10_000.0)),
            density: 1.0,
            deviation: None,
            background: Rgb::WHITE,
            plot: false,
            selection: None,
            rasters: Vec::new(),
            polylines: Vec::new(),
            curves: 0,
            arcs: 0,
        }
    }

    /// 设定像素密度，使默认测量比例（1/72）下请求的 DPI 为 `dpi`。
    pub fn at_dpi(mut self, dpi: f64) -> Self {
        self.density = dpi / 72.0;
        self
    }
}

impl GeometrySink for FakeViewport {
    fn polyline(&mut self, points: &[Point2]) {
        self.polylines.push(points.to_vec());
    }

    fn nurbs(&mut self, _curve: &NurbsCurve2) {
        self.curves += 1;
    }

    fn elliptical_arc(&mut self, _arc: &EllipticalArc2) {
        self.arcs += 1;
    }

    fn raster(&mut self, image: &RasterImage, origin: Point2, u: Vector2, v: Vector2) {
        let mut pixel = [0; 4];
        pixel.copy_from_slice(&image.pixels()[..4]);
        self.rasters.push(EmittedRaster {
            width: image.width(),
            height: image.height(),
            origin,
            u,
            v,
            pixel,
        });
    }
}

impl ViewportSink for FakeViewport {
    fn viewport_id(&self) -> ViewportId {
        self.id
    }

    fn underlay_to_eye(&self) -> DMat4 {
        self.transform
    }

    fn viewport_corners(&self) -> Bounds2D {
        self.corners
    }

    fn pixel_density(&self) -> f64 {
        self.density
    }

    fn curve_deviation(&self) -> Option<f64> {
        self.deviation
    }

    fn background(&self) -> Rgb {
        self.background
    }

    fn is_plot(&self) -> bool {
        self.plot
    }

    fn selection_box(&self) -> Option<Bounds2D> {
        self.selection
    }
}

pub struct Fixture {
    pub underlay: PdfUnderlay,
    pub recorder: SharedRecorder,
    pub host: Arc<RecordingHost>,
}

pub fn session_for(pages: Vec<FakePage>) -> (Arc<RenderSession>, SharedRecorder) {
    let (backend, recorder) = FakeBackend::new(pages);
    let session = RenderSession::new(Box::new(backend)).expect("fake backend initializes");
    (Arc::new(session), recorder)
}

pub fn fixture_with(pages: Vec<FakePage>, settings: UnderlaySettings, host: RecordingHost) -> Fixture {
    let (session, recorder) = session_for(pages);
    let host = Arc::new(host);
    let underlay = PdfUnderlay::load_file(session, host.clone(), "plan.pdf", None, settings)
        .expect("load fake document");
    Fixture {
        underlay,
        recorder,
        host,
    }
}

/// 144×72 点的单页文档。
pub fn fixture() -> Fixture {
    fixture_with(
        vec![FakePage::new(144.0, 72.0)],
        UnderlaySettings::default(),
        RecordingHost::default(),
    )
}

pub fn conversions(recorder: &SharedRecorder) -> usize {
    recorder.lock().unwrap().dib_conversions
}
