//! 配置模块，负责加载编译器的进程级配置（JSON 文件）

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// 配置文件加载错误
#[derive(Debug, Clone, PartialEq, Error)]
#[error("配置错误: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

/// 编译器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// 未指定 `limit` 时的默认页大小
    pub default_size: usize,
    /// 页大小上限，超出时截断
    pub max_size: usize,
    /// 每个分面返回的桶数量上限
    pub max_facet_buckets: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_size: 10,
            max_size: 100,
            max_facet_buckets: 1024,
        }
    }
}

impl CompilerConfig {
    /// 从JSON文件加载配置，缺失的字段使用默认值
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = read_config_file(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = serde_json::from_str(content)
            .map_err(|e| ConfigError::new(format!("无法解析编译器配置: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 || self.max_facet_buckets == 0 {
            return Err(ConfigError::new(
                "max_size 与 max_facet_buckets 必须大于 0".to_string(),
            ));
        }
        if self.default_size > self.max_size {
            return Err(ConfigError::new(format!(
                "default_size ({}) 不能大于 max_size ({})",
                self.default_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// 读取配置文件内容，注册表加载同样使用
pub(crate) fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    // 检查文件是否存在
    if !path.exists() {
        return Err(ConfigError::new(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    fs::read_to_string(path).map_err(|e| {
        ConfigError::new(format!("无法读取配置文件 {}: {}", path.display(), e))
    })
}
