//! S3驱动配置

use std::fmt;

use serde::{Deserialize, Serialize};

/// S3 connection profile / S3连接配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Conf {
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    pub endpoint: String,
    /// 存储桶名称
    pub bucket: String,
    /// Key prefix inside the bucket / 存储桶内的前缀
    #[serde(default)]
    pub prefix: String,
    /// 区域
    #[serde(default = "default_region")]
    pub region: String,
    /// Access Key ID
    #[serde(default)]
    pub access_key: String,
    /// Secret Access Key
    #[serde(default)]
    pub secret_key: String,
    /// Session Token（用于临时凭证）
    #[serde(default)]
    pub session_token: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Conf {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            prefix: String::new(),
            region: default_region(),
            access_key: String::new(),
            secret_key: String::new(),
            session_token: String::new(),
            force_path_style: false,
        }
    }
}

/// Secret key and session token are never printed / 不输出密钥
impl fmt::Display for S3Conf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(ak={}, sk=*, endpoint={}, region={}, bucket={}, prefix={}, path_style={})",
            self.access_key, self.endpoint, self.region, self.bucket, self.prefix, self.force_path_style
        )
    }
}
