pub mod backend;
pub mod clip;
pub mod host;
pub mod logging;
pub mod metadata;
pub mod pixel;
pub mod raster_cache;
pub mod rasterizer;
pub mod registry;
pub mod settings;
pub mod tiles;
pub mod underlay;
pub mod vectors;

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;
    use underlay_core::geometry::GeometryError;

    /// 外部渲染库报告的失败。
    #[derive(Debug, Error)]
    pub enum BackendError {
        #[error("render library failed to initialize: {0}")]
        Initialization(String),
        #[error("failed to open {path:?}: {reason}")]
        OpenFailed { path: PathBuf, reason: String },
        #[error("page {0} is out of range")]
        PageOutOfRange(usize),
        #[error("vector conversion failed: {0}")]
        Conversion(String),
    }

    #[derive(Debug, Error)]
    pub enum UnderlayError {
        #[error("invalid input: {0}")]
        InvalidInput(String),
        /// 调用方需要区分"未启用"与"不支持"，因此不能退化为默认值。
        #[error("operation is not implemented: {0}")]
        NotImplemented(&'static str),
        #[error("no underlay handler registered for format `{0}`")]
        UnsupportedFormat(String),
        #[error(transparent)]
        Backend(#[from] BackendError),
        #[error(transparent)]
        Geometry(#[from] GeometryError),
        #[error("image encoding failed: {0}")]
        Image(#[from] image::ImageError),
    }
}

pub use errors::{BackendError, UnderlayError};
pub use underlay::{PdfUnderlay, UnderlayFile};
