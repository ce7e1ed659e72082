use underlay_config::AppConfig;

use crate::raster_cache::DpiPolicy;

/// 引擎运行时设置，由 [`AppConfig`] 转换而来。
#[derive(Debug, Clone, PartialEq)]
pub struct UnderlaySettings {
    pub cache_enabled: bool,
    pub max_screen_dpi: f64,
    pub tile_byte_limit: u64,
    /// 宿主未提供拾取框时的默认半宽。
    pub default_aperture: f64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub explode_raster_dpi: f64,
}

impl UnderlaySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cache_enabled: config.raster.cache_enabled,
            max_screen_dpi: config.raster.max_screen_dpi,
            tile_byte_limit: config.plot.tile_byte_limit,
            default_aperture: config.selection.aperture,
            thumbnail_width: config.thumbnail.width.max(1),
            thumbnail_height: config.thumbnail.height.max(1),
            explode_raster_dpi: config.explode.raster_dpi,
        }
    }

    #[inline]
    pub fn dpi_policy(&self) -> DpiPolicy {
        DpiPolicy {
            cache_enabled: self.cache_enabled,
            max_screen_dpi: self.max_screen_dpi,
        }
    }
}

impl Default for UnderlaySettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_config_defaults() {
        let settings = UnderlaySettings::default();
        assert!(settings.cache_enabled);
        assert_eq!(settings.max_screen_dpi, 3000.0);
        assert_eq!(settings.tile_byte_limit, 90_000_000);
        assert_eq!(settings.dpi_policy(), DpiPolicy::default());
    }

    #[test]
    fn config_values_are_carried_over() {
        let config = AppConfig::from_toml_str(
            r#"
            [raster]
            cache_enabled = false
            max_screen_dpi = 600.0

            [thumbnail]
            width = 0
            "#,
        )
        .expect("parse");
        let settings = UnderlaySettings::from_config(&config);
        assert!(!settings.dpi_policy().cache_enabled);
        assert_eq!(settings.max_screen_dpi, 600.0);
        assert_eq!(settings.thumbnail_width, 1);
        assert_eq!(settings.thumbnail_height, 256);
    }
}
