//! 认证服务：登录、注册、令牌刷新、请求认证与管理员初始化
//! 用户是存储中的 `system.user` 资源，与其他资源共用同一个存储

use crate::{
    auth::{
        jwt::{Claims, IssuedToken, JwtService},
        middleware::{AuthContext, Presented},
        password::PasswordHasher,
        signature::{parse_public_key, verify_email_signature},
    },
    config::AdminSeed,
    error::AppError,
    models::{
        factory::{factory, USER},
        lease::SYSTEM_GROUP,
        validate_password, LoginRequest, Meta, RegisterRequest, Resource, Role, Status, User,
    },
    repository::Store,
};
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex, PoisonError};
use validator::Validate;

pub struct AuthService {
    store: Arc<dyn Store>,
    jwt_service: Arc<JwtService>,
    hasher: PasswordHasher,
    /// 串行化“检查邮箱是否存在 + 写入”
    register_lock: Mutex<()>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, jwt_service: Arc<JwtService>, hasher: PasswordHasher) -> Self {
        Self {
            store,
            jwt_service,
            hasher,
            register_lock: Mutex::new(()),
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt_service
    }

    /// Looks a user up by email (case-insensitive).
    pub fn find_user(&self, email: &str) -> Option<User> {
        self.store
            .query_type(&[USER.to_string()])
            .get(USER)
            .iter()
            .filter_map(Resource::as_user)
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    /// 用户登录：校验密码并签发令牌
    pub fn login(&self, req: &LoginRequest) -> Result<(User, IssuedToken), AppError> {
        req.validate().map_err(|_| AppError::Unauthorized)?;

        let user = self.find_user(&req.email).ok_or_else(|| {
            tracing::debug!(email = %req.email, "login for unknown email");
            AppError::Unauthorized
        })?;

        if user.password_hash.is_empty() {
            return Err(AppError::Unauthorized);
        }
        self.hasher.verify(&req.password, &user.password_hash)?;

        let token = self
            .jwt_service
            .issue(&user.meta.id, &user.role.name, &user.email)?;

        tracing::info!(email = %user.email, role = %user.role.name, "user logged in");
        Ok((user.redacted(), token))
    }

    /// 自助注册，默认只读角色
    pub fn register(&self, req: &RegisterRequest) -> Result<User, AppError> {
        req.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        validate_password(&req.password)?;
        if !req.public_key.trim().is_empty() {
            parse_public_key(&req.public_key)?;
        }

        let _guard = self
            .register_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.find_user(&req.email).is_some() {
            return Err(AppError::Conflict(format!(
                "email {} is already registered",
                req.email
            )));
        }

        let user = self.new_user(
            &req.name,
            &req.email,
            &req.password,
            &req.public_key,
            Role::read_only(),
        )?;
        self.store.create(Resource::User(user.clone()))?;

        tracing::info!(email = %user.email, id = %user.meta.id, "user registered");
        Ok(user.redacted())
    }

    /// Fresh token for the already-authenticated subject.
    pub fn refresh(&self, claims: &Claims) -> Result<IssuedToken, AppError> {
        self.jwt_service.refresh(claims)
    }

    /// Resolves presented credentials to an auth context. The role always
    /// comes from the current user record.
    pub fn authenticate(&self, presented: &Presented) -> Result<AuthContext, AppError> {
        match presented {
            Presented::Signature { email, signature } => {
                let user = self.find_user(email).ok_or(AppError::Unauthorized)?;
                verify_email_signature(&user.public_key, &user.email, signature)?;

                Ok(AuthContext {
                    claims: self.jwt_service.claims_for(
                        &user.meta.id,
                        &user.role.name,
                        &user.email,
                    ),
                    role: user.role,
                })
            }
            Presented::Token(token) => {
                let claims = self.jwt_service.validate_token(token)?;
                let user = self
                    .find_user(&claims.email)
                    .filter(|user| user.meta.id == claims.sub)
                    .ok_or_else(|| {
                        tracing::debug!(email = %claims.email, "token subject no longer exists");
                        AppError::Unauthorized
                    })?;

                Ok(AuthContext {
                    claims,
                    role: user.role,
                })
            }
        }
    }

    /// Writes the admin user if no user with its email exists yet.
    /// Returns whether a record was created.
    pub fn seed_admin(&self, seed: &AdminSeed) -> Result<bool, AppError> {
        if self.find_user(&seed.email).is_some() {
            tracing::debug!(email = %seed.email, "admin user already present");
            return Ok(false);
        }

        if !seed.public_key.trim().is_empty() {
            parse_public_key(&seed.public_key)
                .map_err(|e| AppError::Config(format!("admin.public_key: {}", e)))?;
        }

        let user = self.new_user(
            &seed.name,
            &seed.email,
            seed.password.expose_secret(),
            &seed.public_key,
            Role::admin(),
        )?;
        self.store.create(Resource::User(user))?;

        tracing::info!(email = %seed.email, "admin user seeded");
        Ok(true)
    }

    fn new_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        public_key: &str,
        role: Role,
    ) -> Result<User, AppError> {
        let descriptor = factory()
            .descriptor(USER)
            .ok_or_else(|| AppError::internal("system.user is not registered"))?;

        let mut meta = Meta::new(descriptor, name, SYSTEM_GROUP);
        meta.owner = email.to_string();

        Ok(User {
            meta,
            status: Status::default(),
            public_key: public_key.trim().to_string(),
            password_hash: self.hasher.hash(password)?,
            role,
            email: email.to_string(),
        })
    }
}
