//! 测试公共模块
//! 提供测试配置、应用实例和请求辅助函数

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use lab_system::{
    config::{
        AdminSeed, AppConfig, Argon2Config, LeaseConfig, LoggingConfig, SchedulerSettings,
        SecurityConfig, ServerConfig, StoreConfig,
    },
    middleware::AppState,
    routes::create_router,
};
use secrecy::Secret;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "Adm1nPassw0rd!";

/// 创建测试配置
pub fn create_test_config(root_dir: &Path) -> AppConfig {
    AppConfig {
        store: StoreConfig {
            root_dir: root_dir.to_path_buf(),
        },
        server: ServerConfig {
            address: "tcp://127.0.0.1:0".to_string(), // 使用随机端口
            tls: None,
            request_timeout_secs: 60,
            graceful_shutdown_timeout_secs: 1,
        },
        auth_key: Secret::new("test-auth-key-for-testing-only-min-32-chars".to_string()),
        security: SecurityConfig {
            token_exp_secs: 300,
            // 测试用的小参数
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
            email: ADMIN_EMAIL.to_string(),
            password: Secret::new(ADMIN_PASSWORD.to_string()),
            public_key: String::new(),
        },
    }
}

/// 测试应用：临时存储目录 + 完整路由。调度器不自动运行，由测试调用 tick()
pub struct TestApp {
    pub dir: TempDir,
    pub state: Arc<AppState>,
    pub router: Router,
    pub admin_token: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = create_test_config(dir.path());
        let state = AppState::build(config, CancellationToken::new())
            .expect("Failed to build app state");
        let router = create_router(state.clone());

        let mut app = Self {
            dir,
            state,
            router,
            admin_token: String::new(),
        };
        app.admin_token = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
        app
    }

    /// 登录并返回令牌
    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/login",
                None,
                Some(json!({"email": email, "password": password})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().expect("token in login response").to_string()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    /// 以管理员身份发送请求
    pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let token = self.admin_token.clone();
        self.request(method, uri, Some(&token), body).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// 直接运行一轮调度
    pub fn tick(&self) -> (usize, usize) {
        self.state.scheduler.tick()
    }
}

pub fn server_json(name: &str, group: &str) -> Value {
    json!({
        "name": name,
        "type": {"name": "compute.server", "description": "bare-metal server"},
        "labels": {"system.group": group},
        "serial": format!("SN-{}", name),
        "boardIP": "10.0.0.5",
        "model": "R640",
        "credentials": {"loginID": "root", "keys": {"password": "Sup3rSecret!x"}}
    })
}

pub fn vm_json(name: &str, group: &str) -> Value {
    json!({
        "name": name,
        "type": {"name": "compute.vm", "description": "virtual machine"},
        "labels": {"system.group": group},
        "esxID": "esx-1",
        "managementIP": "10.0.1.5",
        "credentials": {"loginID": "root", "keys": {"password": "Sup3rSecret!x"}}
    })
}

pub fn vlan_pool_json(name: &str, group: &str, start: u16, end: u16) -> Value {
    json!({
        "name": name,
        "type": {"name": "network.vlanPool", "description": "pool of VLAN ids"},
        "labels": {"system.group": group},
        "rangeStart": start,
        "rangeEnd": end
    })
}

/// 以管理员身份创建单个资源，返回存储后的记录
pub async fn create_one(app: &TestApp, resource: Value) -> Value {
    let type_name = resource["type"]["name"].as_str().unwrap().to_string();
    let (status, body) = app
        .admin(Method::POST, "/api/v1/resources", Some(resource_map(vec![resource])))
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    body[type_name.as_str()][0].clone()
}

/// 把若干资源按类型名组装成资源映射
pub fn resource_map(resources: Vec<Value>) -> Value {
    let mut map = serde_json::Map::new();
    for resource in resources {
        let type_name = resource["type"]["name"].as_str().unwrap().to_string();
        map.entry(type_name)
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .unwrap()
            .push(resource);
    }
    Value::Object(map)
}
