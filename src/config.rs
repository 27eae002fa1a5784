//! 配置系统
//! 默认值 → JSON 配置文件 → 环境变量（前缀 LAB_），使用 Secret 包装敏感信息

use crate::models::{validate_password, ValidationContext};
use crate::scheduler::SchedulerConfig;
use config::{Config, ConfigError, Environment, File, FileFormat};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::ValidateEmail;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// 持久化根目录
    #[serde(alias = "rootDir")]
    pub root_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(alias = "certFile")]
    pub cert_file: PathBuf,
    #[serde(alias = "keyFile")]
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "tcp://0.0.0.0:8443"（scheme 可省略）
    pub address: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// 单个请求超时时间（秒）
    #[serde(alias = "requestTimeoutSecs")]
    pub request_timeout_secs: u64,
    /// 优雅关闭超时时间（秒）
    #[serde(alias = "gracefulShutdownTimeoutSecs")]
    pub graceful_shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// `host:port` with any `tcp://` scheme stripped.
    pub fn listen_addr(&self) -> &str {
        self.address
            .strip_prefix("tcp://")
            .unwrap_or(&self.address)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Argon2Config {
    #[serde(alias = "memoryKib")]
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// 签名令牌有效期（秒）
    #[serde(alias = "tokenExpSecs")]
    pub token_exp_secs: u64,
    pub argon2: Argon2Config,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    /// 租约最大时长（秒）
    #[serde(alias = "maxDurationSecs")]
    pub max_duration_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(alias = "tickIntervalMs")]
    pub tick_interval_ms: u64,
    #[serde(alias = "reconcileIntervalSecs")]
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

/// 启动时写入的管理员账号
#[derive(Debug, Clone, Deserialize)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: Secret<String>,
    /// PEM 编码的 RSA 公钥（可选）
    #[serde(default, alias = "publicKey")]
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub server: ServerConfig,
    /// 签名密钥（HS256）
    #[serde(alias = "authKey")]
    pub auth_key: Secret<String>,
    pub security: SecurityConfig,
    pub lease: LeaseConfig,
    pub scheduler: SchedulerSettings,
    pub logging: LoggingConfig,
    pub admin: AdminSeed,
}

impl AppConfig {
    /// 加载配置：默认值，然后可选的 JSON 文件，最后是 `LAB_` 前缀的环境变量
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Config::builder()
            .set_default("store.root_dir", "./data")?
            .set_default("server.address", "tcp://0.0.0.0:8443")?
            .set_default("server.request_timeout_secs", 60)?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("security.token_exp_secs", 600)?
            .set_default("security.argon2.memory_kib", 65536)?
            .set_default("security.argon2.iterations", 3)?
            .set_default("security.argon2.parallelism", 4)?
            .set_default("lease.max_duration_secs", 4 * 60 * 60)?
            .set_default("scheduler.tick_interval_ms", 2000)?
            .set_default("scheduler.reconcile_interval_secs", 60)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?;

        if let Some(path) = path {
            settings = settings.add_source(File::from(path).format(FileFormat::Json));
        }

        settings = settings.add_source(
            Environment::with_prefix("LAB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_key.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "auth_key must be at least 32 characters long".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.server.listen_addr().is_empty() {
            return Err(ConfigError::Message("server.address must not be empty".to_string()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "server.request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.security.token_exp_secs < 60 || self.security.token_exp_secs > 86400 {
            return Err(ConfigError::Message(
                "token_exp_secs must be between 60 and 86400 (1 minute to 24 hours)".to_string(),
            ));
        }
        if self.lease.max_duration_secs == 0 {
            return Err(ConfigError::Message(
                "lease.max_duration_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.tick_interval_ms == 0 || self.scheduler.reconcile_interval_secs == 0 {
            return Err(ConfigError::Message(
                "scheduler intervals must be positive".to_string(),
            ));
        }

        if self.admin.name.trim().is_empty() {
            return Err(ConfigError::Message("admin.name must not be empty".to_string()));
        }
        if !self.admin.email.validate_email() {
            return Err(ConfigError::Message(format!(
                "admin.email is not a valid address: {}",
                self.admin.email
            )));
        }
        validate_password(self.admin.password.expose_secret())
            .map_err(|e| ConfigError::Message(format!("admin.password: {}", e)))?;

        Ok(())
    }

    pub fn validation_context(&self) -> ValidationContext {
        ValidationContext {
            max_lease_duration: Duration::from_secs(self.lease.max_duration_secs),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(self.scheduler.tick_interval_ms),
            reconcile_interval: Duration::from_secs(self.scheduler.reconcile_interval_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

/// 单元测试用配置：小 argon2 参数，存储在给定目录
#[cfg(test)]
pub(crate) fn test_config(root_dir: &Path) -> AppConfig {
    AppConfig {
        store: StoreConfig {
            root_dir: root_dir.to_path_buf(),
        },
        server: ServerConfig {
            address: "tcp://127.0.0.1:0".to_string(),
            tls: None,
            request_timeout_secs: 60,
            graceful_shutdown_timeout_secs: 1,
        },
        auth_key: Secret::new("test_auth_key_that_is_32_characters!".to_string()),
        security: SecurityConfig {
            token_exp_secs: 600,
            argon2: Argon2Config {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        },
        lease: LeaseConfig {
            max_duration_secs: 4 * 60 * 60,
        },
        scheduler: SchedulerSettings {
            tick_interval_ms: 2000,
            reconcile_interval_secs: 60,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        admin: AdminSeed {
            name: "admin".to_string(),
            email: "admin@example.com".to_string(),
            password: Secret::new("Adm1nPassw0rd!".to_string()),
            public_key: String::new(),
        },
    }
}
