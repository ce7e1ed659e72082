//! 逐页元数据查询及其记忆化缓存。

use std::collections::HashMap;

use tracing::debug;
use underlay_core::context::ANNOTATION_LAYER_NAME;
use underlay_core::geometry::{Bounds2D, Point2};

use crate::backend::{DocumentHandle, MeasureInfo, RenderSession};

/// 测量字典缺失或不可信时的比例（每点 1/72 英寸）。
pub const DEFAULT_MEASURE_SCALE: f64 = 1.0 / 72.0;

/// 水平比例元素多于一个时视为含义不明，回退到默认值。
pub fn resolve_measure_scale(info: Option<MeasureInfo>) -> f64 {
    match info {
        Some(info) if info.element_count_x <= 1 && info.x_scale != 0.0 => info.x_scale,
        _ => DEFAULT_MEASURE_SCALE,
    }
}

/// 某页的图层列表与开关状态，发现时全部开启。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelsInfo {
    names: Vec<String>,
    enabled: HashMap<String, bool>,
}

impl LevelsInfo {
    pub fn new(names: Vec<String>) -> Self {
        let enabled = names.iter().map(|name| (name.clone(), true)).collect();
        Self { names, enabled }
    }

    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.names
            .get(index)
            .and_then(|name| self.enabled.get(name))
            .copied()
            .unwrap_or(false)
    }
}

/// 一个已打开文档的元数据缓存。所有查询经由渲染会话。
#[derive(Debug)]
pub struct PageMetadata {
    document: DocumentHandle,
    page_count: usize,
    page_sizes: Vec<Option<(f64, f64)>>,
    media_boxes: HashMap<usize, Bounds2D>,
    measure_scales: HashMap<usize, f64>,
    levels: HashMap<usize, LevelsInfo>,
    annotations: Vec<bool>,
}

impl PageMetadata {
    pub fn load(session: &RenderSession, document: DocumentHandle) -> Self {
        let page_count = session.with_backend(|backend| backend.page_count(document));
        debug!(page_count, "读取页面数量");
        Self {
            document,
            page_count,
            page_sizes: vec![None; page_count],
            media_boxes: HashMap::new(),
            measure_scales: HashMap::new(),
            levels: HashMap::new(),
            annotations: Vec::new(),
        }
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    #[inline]
    pub fn contains_page(&self, page: usize) -> bool {
        page < self.page_count
    }

    /// 页面尺寸（PDF 点），越界时为 `None`。
    pub fn page_size(&mut self, session: &RenderSession, page: usize) -> Option<(f64, f64)> {
        let slot = self.page_sizes.get_mut(page)?;
        if slot.is_none() {
            let document = self.document;
            *slot = session.with_backend(|backend| backend.page_size(document, page + 1));
        }
        *slot
    }

    /// 媒体框；渲染库未提供时以页面尺寸代替。
    pub fn media_box(&mut self, session: &RenderSession, page: usize) -> Option<Bounds2D> {
        if !self.contains_page(page) {
            return None;
        }
        if let Some(bounds) = self.media_boxes.get(&page) {
            return Some(*bounds);
        }
        let document = self.document;
        let bounds = match session.with_backend(|backend| backend.media_box(document, page + 1)) {
            Some(bounds) => bounds,
            None => {
                let (width, height) = self.page_size(session, page)?;
                Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(width, height))
            }
        };
        self.media_boxes.insert(page, bounds);
        Some(bounds)
    }

    pub fn measure_scale(&mut self, session: &RenderSession, page: usize) -> f64 {
        if let Some(scale) = self.measure_scales.get(&page) {
            return *scale;
        }
        let document = self.document;
        let info = if self.contains_page(page) {
            session.with_backend(|backend| backend.measure_info(document, page + 1))
        } else {
            None
        };
        let scale = resolve_measure_scale(info);
        self.measure_scales.insert(page, scale);
        scale
    }

    /// 注释标记按页号记忆；首次访问更大的页号时补齐之前所有页。
    pub fn has_annotations(&mut self, session: &RenderSession, page: usize) -> bool {
        if !self.contains_page(page) {
            return false;
        }
        if page >= self.annotations.len() {
            let document = self.document;
            let from = self.annotations.len();
            let filled: Vec<bool> = session.with_backend(|backend| {
                (from..=page)
                    .map(|index| backend.has_annotations(document, index + 1))
                    .collect()
            });
            self.annotations.extend(filled);
        }
        self.annotations[page]
    }

    fn levels(&mut self, session: &RenderSession, page: usize) -> Option<&LevelsInfo> {
        if !self.contains_page(page) {
            return None;
        }
        if !self.levels.contains_key(&page) {
            let document = self.document;
            let mut names = session.with_backend(|backend| backend.layers_on_page(document, page + 1));
            if self.has_annotations(session, page) {
                names.push(ANNOTATION_LAYER_NAME.to_string());
            }
            self.levels.insert(page, LevelsInfo::new(names));
        }
        self.levels.get(&page)
    }

    /// 页面图层名称；有注释时末尾追加注释伪图层。
    pub fn layers_on_page(&mut self, session: &RenderSession, page: usize) -> Vec<String> {
        self.levels(session, page)
            .map(|levels| levels.names().to_vec())
            .unwrap_or_default()
    }

    pub fn levels_count(&mut self, session: &RenderSession, page: usize) -> usize {
        self.levels(session, page).map_or(0, |levels| levels.names().len())
    }

    /// 越界时返回空字符串。
    pub fn level_name(&mut self, session: &RenderSession, page: usize, index: usize) -> String {
        self.levels(session, page)
            .and_then(|levels| levels.names().get(index).cloned())
            .unwrap_or_default()
    }

    pub fn is_level_enabled(&mut self, session: &RenderSession, page: usize, index: usize) -> bool {
        self.levels(session, page)
            .is_some_and(|levels| levels.is_enabled(index))
    }
}
