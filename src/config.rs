use crate::Result;
use crate::error::NetmonError;
use serde::Deserialize;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::warn;

/// 默认历史容量
pub const DEFAULT_CAPACITY: usize = 100;
/// 默认响应体捕获上限 (64 KiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// 监控配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 历史记录容量，超出后淘汰最旧的记录
    pub capacity: usize,

    /// 视为成功的最小状态码（含）
    pub success_min: u16,

    /// 视为成功的最大状态码（含）
    pub success_max: u16,

    /// 是否捕获请求/响应体
    pub capture_bodies: bool,

    /// 响应体捕获上限，None 表示不截断
    pub max_body_bytes: Option<usize>,

    /// 创建后是否立即启用拦截
    pub enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            success_min: 200,
            success_max: 299,
            capture_bodies: true,
            max_body_bytes: Some(DEFAULT_MAX_BODY_BYTES),
            enabled: false,
        }
    }
}

impl MonitorConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_success_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.success_min = *range.start();
        self.success_max = *range.end();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn success_range(&self) -> RangeInclusive<u16> {
        self.success_min..=self.success_max
    }

    pub fn is_success_status(&self, status: u16) -> bool {
        self.success_range().contains(&status)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(NetmonError::Config("capacity must be at least 1".into()));
        }
        if self.success_min > self.success_max {
            return Err(NetmonError::Config(format!(
                "success range is empty: {}..={}",
                self.success_min, self.success_max
            )));
        }
        Ok(())
    }
}

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    const CONFIG_FILE: &'static str = "netmon.toml";
    const ENV_ENABLED: &'static str = "NETMON_ENABLED";
    const ENV_CAPACITY: &'static str = "NETMON_CAPACITY";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<MonitorConfig> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<MonitorConfig> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 查找并加载配置文件，找不到或解析失败时使用默认配置
    /// 查找顺序：
    /// 1. 当前目录及父目录
    /// 2. 用户配置目录 ~/.config/netmon/
    ///
    /// 最后应用环境变量覆盖。
    pub fn find_and_load() -> MonitorConfig {
        let config = Self::try_load_from_current_dir()
            .or_else(Self::try_load_from_user_dir)
            .unwrap_or_default();

        Self::apply_env_overrides(config, |key| std::env::var(key).ok())
    }

    fn try_load_from_current_dir() -> Option<MonitorConfig> {
        let mut current = std::env::current_dir().ok()?;

        loop {
            let config_path = current.join(Self::CONFIG_FILE);
            if config_path.exists() {
                return Self::load_logged(&config_path);
            }

            if !current.pop() {
                break;
            }
        }

        None
    }

    fn try_load_from_user_dir() -> Option<MonitorConfig> {
        let home = dirs::home_dir()?;
        let config_path = home.join(".config").join("netmon").join(Self::CONFIG_FILE);

        if config_path.exists() {
            Self::load_logged(&config_path)
        } else {
            None
        }
    }

    fn load_logged(path: &Path) -> Option<MonitorConfig> {
        match Self::load_from_path(path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 应用环境变量覆盖（NETMON_ENABLED / NETMON_CAPACITY）
    pub fn apply_env_overrides<F>(mut config: MonitorConfig, lookup: F) -> MonitorConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(Self::ENV_ENABLED) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.enabled = true,
                "0" | "false" | "no" | "off" => config.enabled = false,
                other => warn!("Invalid {} value: {}", Self::ENV_ENABLED, other),
            }
        }

        if let Some(value) = lookup(Self::ENV_CAPACITY) {
            match value.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.capacity = capacity,
                _ => warn!("Invalid {} value: {}", Self::ENV_CAPACITY, value),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_path() {
        let config_content = r#"
capacity = 250
success_max = 399
enabled = true
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = ConfigLoader::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.capacity, 250);
        assert_eq!(config.success_range(), 200..=399);
        assert!(config.enabled);
        // 未指定的字段取默认值
        assert!(config.capture_bodies);
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(ConfigLoader::parse("capacity = 0").is_err());
        assert!(ConfigLoader::parse("success_min = 300\nsuccess_max = 200").is_err());
        assert!(ConfigLoader::parse("capacity = \"many\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ConfigLoader::apply_env_overrides(MonitorConfig::default(), |key| {
            match key {
                "NETMON_ENABLED" => Some("true".to_string()),
                "NETMON_CAPACITY" => Some("10".to_string()),
                _ => None,
            }
        });
        assert!(config.enabled);
        assert_eq!(config.capacity, 10);

        // 非法值被忽略
        let config = ConfigLoader::apply_env_overrides(MonitorConfig::default(), |key| {
            (key == "NETMON_CAPACITY").then(|| "zero".to_string())
        });
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_success_status() {
        let config = MonitorConfig::default();
        assert!(config.is_success_status(204));
        assert!(!config.is_success_status(304));
        assert!(!config.is_success_status(500));
    }
}
