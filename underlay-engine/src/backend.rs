//! 外部 PDF 渲染库的接口与串行化会话。
//!
//! 渲染库通过一组进程级的全局设置（裁剪框、DPI、背景色、图层过滤……）
//! 配置下一次转换，本身不可重入。[`RenderSession`] 把整个接口放在一把锁之后，
//! 设置与转换必须在同一次 [`RenderSession::with_backend`] 调用中完成。

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};
use underlay_core::geometry::{Bounds2D, Point2};

use crate::errors::BackendError;

/// 渲染库唯一接受的位图信息头长度。
pub const BITMAP_INFO_HEADER_SIZE: u32 = 40;

/// 渲染库返回的已打开文档句柄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    /// 正值表示自下而上的扫描行。
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub image_size: u32,
}

impl BitmapInfoHeader {
    pub fn bgr24(width: i32, height: i32) -> Self {
        Self {
            size: BITMAP_INFO_HEADER_SIZE,
            width,
            height,
            planes: 1,
            bit_count: 24,
            image_size: (bgr_stride(width.unsigned_abs() as usize) * height.unsigned_abs() as usize)
                as u32,
        }
    }
}

/// 24 位扫描行按 4 字节对齐后的长度。
#[inline]
pub fn bgr_stride(width: usize) -> usize {
    (width * 3 + 3) & !3
}

/// 渲染库分配的位图，必须通过 [`RenderBackend::release_dib`] 归还。
#[derive(Debug)]
pub struct Dib {
    pub header: BitmapInfoHeader,
    pub bits: Vec<u8>,
}

/// 页面测量字典中与水平比例相关的部分。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureInfo {
    pub element_count_x: u32,
    pub x_scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Line(Point2),
    Cubic { c1: Point2, c2: Point2, end: Point2 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathContour {
    pub start: Point2,
    pub segments: Vec<PathSegment>,
    pub closed: bool,
}

/// 自定义回调模式下渲染库逐个报告的矢量对象。
#[derive(Debug, Clone, PartialEq)]
pub enum VectorPrimitive {
    Polyline(Vec<Point2>),
    Polygon(Vec<Point2>),
    Path(Vec<PathContour>),
    Ellipse {
        center: Point2,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
    },
    Text {
        content: String,
        position: Point2,
    },
}

/// 外部渲染库的调用面。页码从 1 开始。
///
/// 设置类方法修改的是库的全局状态，只对紧随其后的转换调用生效。
pub trait RenderBackend: Send {
    fn initialize(&mut self) -> Result<(), BackendError>;

    fn open_document(
        &mut self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<DocumentHandle, BackendError>;
    fn close_document(&mut self, document: DocumentHandle);

    fn page_count(&self, document: DocumentHandle) -> usize;
    /// 页面尺寸（PDF 点）。
    fn page_size(&self, document: DocumentHandle, page: usize) -> Option<(f64, f64)>;
    fn media_box(&self, document: DocumentHandle, page: usize) -> Option<Bounds2D>;
    fn measure_info(&self, document: DocumentHandle, page: usize) -> Option<MeasureInfo>;
    fn layers_on_page(&self, document: DocumentHandle, page: usize) -> Vec<String>;
    fn has_annotations(&self, document: DocumentHandle, page: usize) -> bool;

    fn set_separate_image_decoding(&mut self, enabled: bool);
    fn set_ignore_images(&mut self, ignore: bool);
    fn set_ignore_text(&mut self, ignore: bool);
    /// PDF 点坐标下的裁剪框，`None` 为整页。
    fn set_clip_rect(&mut self, clip: Option<Bounds2D>);
    fn set_image_size(&mut self, width: u32, height: u32);
    fn set_background_gray(&mut self, gray: u8);
    fn set_dpi(&mut self, dpi: f64);
    fn set_layers(&mut self, layers: Option<&[String]>);
    fn set_render_annotations(&mut self, enabled: bool);
    fn set_insert_mode(&mut self, enabled: bool);
    fn set_automatic_page_size(&mut self, enabled: bool);

    fn convert_page_to_dib(&mut self, document: DocumentHandle, page: usize) -> Option<Dib>;
    fn convert_page_to_dib_with_layers(
        &mut self,
        document: DocumentHandle,
        page: usize,
    ) -> Option<Dib>;
    fn release_dib(&mut self, dib: Dib);

    fn convert_page_to_vectors(
        &mut self,
        document: DocumentHandle,
        page: usize,
        sink: &mut dyn FnMut(VectorPrimitive),
    ) -> Result<(), BackendError>;
}

/// 独占渲染库的会话；所有调用经由同一把锁串行执行。
pub struct RenderSession {
    backend: Mutex<Box<dyn RenderBackend>>,
}

impl RenderSession {
    /// 初始化渲染库；失败时会话不可用。
    pub fn new(mut backend: Box<dyn RenderBackend>) -> Result<Self, BackendError> {
        backend.initialize()?;
        info!("渲染库初始化完成");
        Ok(Self {
            backend: Mutex::new(backend),
        })
    }

    /// 在持锁状态下访问渲染库。闭包内不得再获取缓存或条目锁。
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut dyn RenderBackend) -> R) -> R {
        let mut guard = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_mut())
    }
}

impl std::fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSession").finish_non_exhaustive()
    }
}

/// 持有 DIB 的作用域守卫，离开作用域时归还给渲染库。
pub struct DibGuard<'a> {
    backend: &'a mut dyn RenderBackend,
    dib: Dib,
}

impl<'a> DibGuard<'a> {
    pub fn new(backend: &'a mut dyn RenderBackend, dib: Dib) -> Self {
        Self { backend, dib }
    }

    #[inline]
    pub fn dib(&self) -> &Dib {
        &self.dib
    }
}

impl Drop for DibGuard<'_> {
    fn drop(&mut self) {
        let dib = Dib {
            header: self.dib.header,
            bits: std::mem::take(&mut self.dib.bits),
        };
        debug!(bytes = dib.bits.len(), "归还 DIB 缓冲区");
        self.backend.release_dib(dib);
    }
}
