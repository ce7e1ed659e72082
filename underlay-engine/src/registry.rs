//! 按文件格式分派的底图处理器注册表。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::backend::RenderSession;
use crate::errors::UnderlayError;
use crate::host::UnderlayHost;
use crate::settings::UnderlaySettings;
use crate::underlay::{PdfUnderlay, UnderlayFile};

pub trait UnderlayFormatHandler: Send + Sync {
    /// 小写扩展名，例如 `"pdf"`。
    fn format(&self) -> &'static str;
    fn open(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn UnderlayFile>, UnderlayError>;
}

pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Box<dyn UnderlayFormatHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// 注册内置的 PDF 处理器。
    pub fn with_pdf(
        session: Arc<RenderSession>,
        host: Arc<dyn UnderlayHost>,
        settings: UnderlaySettings,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(PdfFormatHandler::new(session, host, settings));
        registry
    }

    pub fn register<H: UnderlayFormatHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.format(), Box::new(handler));
    }

    pub fn handler(&self, format: &str) -> Option<&dyn UnderlayFormatHandler> {
        self.handlers
            .get(format.to_ascii_lowercase().as_str())
            .map(|handler| handler.as_ref())
    }

    /// 按扩展名选择处理器并打开文件。
    pub fn open(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn UnderlayFile>, UnderlayError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let Some(handler) = self.handlers.get(extension.as_str()) else {
            return Err(UnderlayError::UnsupportedFormat(extension));
        };
        debug!(format = handler.format(), path = %path.display(), "分派底图处理器");
        handler.open(path, password)
    }

    pub fn formats(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 为每个文档创建独立的 [`PdfUnderlay`]（各自拥有光栅缓存），共享渲染会话。
pub struct PdfFormatHandler {
    session: Arc<RenderSession>,
    host: Arc<dyn UnderlayHost>,
    settings: UnderlaySettings,
}

impl PdfFormatHandler {
    pub fn new(session: Arc<RenderSession>, host: Arc<dyn UnderlayHost>, settings: UnderlaySettings) -> Self {
        Self {
            session,
            host,
            settings,
        }
    }
}

impl UnderlayFormatHandler for PdfFormatHandler {
    fn format(&self) -> &'static str {
        "pdf"
    }

    fn open(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn UnderlayFile>, UnderlayError> {
        let underlay = PdfUnderlay::load_file(
            self.session.clone(),
            self.host.clone(),
            path,
            password,
            self.settings.clone(),
        )?;
        Ok(Box::new(underlay))
    }
}
