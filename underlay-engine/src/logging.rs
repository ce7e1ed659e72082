use tracing_subscriber::{EnvFilter, fmt};
use underlay_config::LoggingConfig;

/// 安装全局 `fmt` 订阅者；等级无法解析时退回 `info`，重复初始化时静默忽略。
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init(&LoggingConfig::default());
        init(&LoggingConfig {
            level: "not a level ===".to_string(),
        });
    }
}
