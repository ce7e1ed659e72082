//! 按 (视口, 可绘制对象) 缓存的最近一次光栅结果及其失效策略。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use underlay_core::color::Rgb;
use underlay_core::context::DrawContext;
use underlay_core::geometry::Bounds2D;

use crate::host::{DrawableId, UnderlayHost, ViewportId};
use crate::rasterizer::RasterImage;

/// 放大时目标 DPI 的额外倍数；存入缓存的比较值再乘一次。
pub const ZOOM_IN_BOOST: f64 = 1.25;
/// 缓存 DPI 超过请求值的该倍数时视为缩小过多。
pub const ZOOM_OUT_TOLERANCE: f64 = 2.0;

/// 单个 (视口, 对象) 的缓存内容。
#[derive(Debug, Clone)]
pub struct CacheEntry {
    image: Option<Arc<RasterImage>>,
    /// 单位正方形坐标。
    extents: Bounds2D,
    dpi: f64,
    page: usize,
    background: Rgb,
    context: DrawContext,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            image: None,
            extents: Bounds2D::empty(),
            dpi: 0.0,
            page: 0,
            background: Rgb::default(),
            context: DrawContext::default(),
        }
    }
}

impl CacheEntry {
    #[inline]
    pub fn image(&self) -> Option<&Arc<RasterImage>> {
        self.image.as_ref()
    }

    #[inline]
    pub fn extents(&self) -> Bounds2D {
        self.extents
    }

    #[inline]
    pub fn dpi(&self) -> f64 {
        self.dpi
    }

    #[inline]
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn store(&mut self, image: RasterImage, query: &CacheQuery<'_>, extents: Bounds2D, dpi: f64) {
        self.image = Some(Arc::new(image));
        self.extents = extents;
        self.dpi = dpi;
        self.page = query.page;
        self.background = query.background;
        self.context = query.context.clone();
    }

    /// 渲染失败后清空图像与范围，保留 DPI 供下次比较。
    pub fn reset(&mut self) {
        self.image = None;
        self.extents = Bounds2D::empty();
    }
}

/// 一次绘制请求中参与缓存比较的字段。
#[derive(Debug, Clone, Copy)]
pub struct CacheQuery<'a> {
    /// 单位正方形坐标下的可见区域。
    pub clip: Bounds2D,
    pub dpi: f64,
    pub page: usize,
    pub context: &'a DrawContext,
    pub background: Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpiDecision {
    /// 本次渲染使用的 DPI。
    pub render_dpi: f64,
    /// 写入缓存、供下次比较的 DPI。
    pub stored_dpi: f64,
}

/// 缓存复用与 DPI 滞后策略。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpiPolicy {
    pub cache_enabled: bool,
    pub max_screen_dpi: f64,
}

impl Default for DpiPolicy {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            max_screen_dpi: 3000.0,
        }
    }
}

impl DpiPolicy {
    pub fn is_reusable(&self, entry: &CacheEntry, query: &CacheQuery<'_>, is_plot: bool) -> bool {
        if !self.cache_enabled || is_plot || entry.image.is_none() {
            return false;
        }
        if entry.page != query.page
            || entry.background != query.background
            || entry.context != *query.context
        {
            return false;
        }
        if !entry.extents.is_valid() || !entry.extents.contains(&query.clip) {
            return false;
        }
        let zoomed_in = entry.dpi < query.dpi && query.dpi <= self.max_screen_dpi;
        let zoomed_out = entry.dpi > ZOOM_OUT_TOLERANCE * query.dpi;
        !zoomed_in && !zoomed_out
    }

    /// 缓存未命中后的渲染 DPI。连续放大时多渲染一些以减少再次失效。
    pub fn decide(&self, cached_dpi: f64, requested_dpi: f64, is_plot: bool) -> DpiDecision {
        let zoom_in = !is_plot
            && cached_dpi > 0.0
            && cached_dpi < requested_dpi
            && requested_dpi <= self.max_screen_dpi;
        if zoom_in {
            let render_dpi = (requested_dpi * ZOOM_IN_BOOST).min(self.max_screen_dpi);
            return DpiDecision {
                render_dpi,
                stored_dpi: render_dpi * ZOOM_IN_BOOST,
            };
        }
        let render_dpi = if is_plot {
            requested_dpi
        } else {
            requested_dpi.min(self.max_screen_dpi)
        };
        DpiDecision {
            render_dpi,
            stored_dpi: render_dpi,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<(ViewportId, DrawableId), CacheEntry>,
    hits: u64,
    misses: u64,
}

/// 光栅缓存。整个结构由一把锁保护，检查、渲染、写回在同一次加锁中完成。
pub struct RasterCache {
    state: Mutex<CacheState>,
    host: Arc<dyn UnderlayHost>,
}

impl RasterCache {
    pub fn new(host: Arc<dyn UnderlayHost>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            host,
        }
    }

    pub fn lock(&self) -> CacheGuard<'_> {
        CacheGuard {
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
            pending: PendingSubscriptions {
                host: self.host.as_ref(),
                objects: Vec::new(),
            },
        }
    }

    /// 删除某个对象在所有视口中的条目，释放锁后取消删除通知订阅。
    pub fn invalidate(&self, object: DrawableId) -> usize {
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let before = state.entries.len();
            state.entries.retain(|(_, owner), _| *owner != object);
            before - state.entries.len()
        };
        if removed > 0 {
            self.host.unsubscribe_erase(object);
            debug!(object = object.get(), removed, "光栅缓存条目已失效");
        }
        removed
    }

    /// 文档关闭时整体清空。
    pub fn clear(&self) {
        let mut objects: Vec<DrawableId> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.entries.drain().map(|((_, object), _)| object).collect()
        };
        objects.sort_by_key(|object| object.get());
        objects.dedup();
        for object in objects {
            self.host.unsubscribe_erase(object);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
        }
    }
}

impl std::fmt::Debug for RasterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterCache").field("stats", &self.stats()).finish()
    }
}

/// 持有缓存锁期间的访问句柄。新对象的删除通知订阅在锁释放后发出。
pub struct CacheGuard<'a> {
    // 字段按声明顺序析构：先释放锁，再通知宿主。
    state: MutexGuard<'a, CacheState>,
    pending: PendingSubscriptions<'a>,
}

struct PendingSubscriptions<'a> {
    host: &'a dyn UnderlayHost,
    objects: Vec<DrawableId>,
}

impl Drop for PendingSubscriptions<'_> {
    fn drop(&mut self) {
        for object in self.objects.drain(..) {
            self.host.subscribe_erase(object);
        }
    }
}

impl CacheGuard<'_> {
    /// 取得条目，不存在时创建；对象首次出现时登记删除通知订阅。
    pub fn entry(&mut self, viewport: ViewportId, object: DrawableId) -> &mut CacheEntry {
        let key = (viewport, object);
        if !self.state.entries.contains_key(&key) {
            let known = self.state.entries.keys().any(|(_, owner)| *owner == object);
            if !known {
                self.pending.objects.push(object);
            }
            self.state.entries.insert(key, CacheEntry::default());
        }
        self.state.entries.entry(key).or_default()
    }

    pub fn record_hit(&mut self) {
        self.state.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.state.misses += 1;
    }
}
