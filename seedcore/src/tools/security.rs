//! Security Layer (C8): authentication, authorization, input validation, and
//! rate limiting for tool invocation.
//!
//! Sequence per request: authenticate -> rate-limit -> authorize -> validate
//! -> invoke. HMAC-SHA256 for bearer tokens is built directly on `sha2`
//! (ipad/opad double hash) since no RustCrypto `hmac` crate is used anywhere
//! else in this codebase's dependency tree.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::{AuthMethod, SecurityConfig};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl Permission {
    pub fn all() -> HashSet<Permission> {
        [Permission::Read, Permission::Write, Permission::Execute, Permission::Admin]
            .into_iter()
            .collect()
    }
}

/// Credentials a caller presents to `SecurityLayer::check_request`.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub token: Option<String>,
}

/// The outcome of a successful authentication.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub authenticated: bool,
    pub client_id: Option<String>,
    pub permissions: HashSet<Permission>,
    pub roles: HashSet<String>,
}

/// Per-tool permission requirements.
#[derive(Debug, Clone)]
pub struct ToolPermission {
    pub tool_name: String,
    pub required_permissions: HashSet<Permission>,
    pub allowed_roles: HashSet<String>,
}

impl ToolPermission {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            required_permissions: [Permission::Execute].into_iter().collect(),
            allowed_roles: HashSet::new(),
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

/// HMAC-SHA256 built directly on `sha2::Sha256`, following RFC 2104: the key
/// is padded/hashed to the block size, then the message is hashed twice with
/// the ipad/opad-masked keys.
pub struct TokenSigner {
    secret: Vec<u8>,
}

const BLOCK_SIZE: usize = 64;

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn block_key(&self) -> [u8; BLOCK_SIZE] {
        let mut key = [0u8; BLOCK_SIZE];
        if self.secret.len() > BLOCK_SIZE {
            let hashed = Sha256::digest(&self.secret);
            key[..hashed.len()].copy_from_slice(&hashed);
        } else {
            key[..self.secret.len()].copy_from_slice(&self.secret);
        }
        key
    }

    pub fn sign(&self, message: &[u8]) -> String {
        let key = self.block_key();
        let ipad: Vec<u8> = key.iter().map(|b| b ^ 0x36).collect();
        let opad: Vec<u8> = key.iter().map(|b| b ^ 0x5c).collect();

        let mut inner = Sha256::new();
        inner.update(&ipad);
        inner.update(message);
        let inner_digest = inner.finalize();

        let mut outer = Sha256::new();
        outer.update(&opad);
        outer.update(&inner_digest);
        outer.finalize().iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Constant-time comparison to avoid leaking timing information about
    /// how many leading bytes of a signature matched.
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        let expected = self.sign(message);
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }

    /// Build a `client_id:timestamp:signature` bearer token for `client_id`
    /// at the current time.
    pub fn issue_token(&self, client_id: &str) -> String {
        let timestamp = Utc::now().timestamp();
        let message = format!("{}:{}", client_id, timestamp);
        let signature = self.sign(message.as_bytes());
        format!("{}:{}:{}", client_id, timestamp, signature)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Authenticates incoming requests per the configured `AuthMethod`.
pub struct Authenticator {
    config: SecurityConfig,
    hashed_keys: HashSet<String>,
    signer: Option<TokenSigner>,
}

impl Authenticator {
    pub fn new(config: SecurityConfig, api_keys: &[String], token_secret: Option<&str>) -> Self {
        let hashed_keys = api_keys.iter().map(|k| sha256_hex(k.as_bytes())).collect();
        let signer = token_secret.map(TokenSigner::new);
        Self {
            config,
            hashed_keys,
            signer,
        }
    }

    pub fn authenticate(&self, credentials: Option<&Credentials>) -> Result<AuthContext> {
        match self.config.auth_method {
            AuthMethod::None => Ok(AuthContext {
                authenticated: true,
                permissions: Permission::all(),
                ..Default::default()
            }),
            AuthMethod::ApiKey => {
                let creds = credentials
                    .and_then(|c| c.api_key.as_deref())
                    .ok_or_else(|| Error::auth("API key required"))?;
                let hashed = sha256_hex(creds.as_bytes());
                if self.hashed_keys.contains(&hashed) {
                    Ok(AuthContext {
                        authenticated: true,
                        client_id: Some(hashed[..16.min(hashed.len())].to_string()),
                        permissions: Permission::all(),
                        roles: HashSet::new(),
                    })
                } else {
                    Err(Error::auth("invalid API key"))
                }
            }
            AuthMethod::BearerToken => {
                let token = credentials
                    .and_then(|c| c.token.as_deref())
                    .ok_or_else(|| Error::auth("bearer token required"))?;
                self.authenticate_token(token)
            }
        }
    }

    fn authenticate_token(&self, token: &str) -> Result<AuthContext> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::auth("token validation not configured"))?;

        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() != 3 {
            return Err(Error::auth("invalid token format"));
        }
        let (client_id, timestamp_str, signature) = (parts[0], parts[1], parts[2]);

        let message = format!("{}:{}", client_id, timestamp_str);
        if !signer.verify(message.as_bytes(), signature) {
            return Err(Error::auth("invalid token signature"));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| Error::auth("invalid token timestamp"))?;
        let now = Utc::now().timestamp();
        if timestamp > now + self.config.token_clock_skew_future_secs {
            return Err(Error::auth("token timestamp is in the future"));
        }
        if now - timestamp > self.config.token_max_age_secs {
            return Err(Error::auth("token expired"));
        }

        Ok(AuthContext {
            authenticated: true,
            client_id: Some(client_id.to_string()),
            permissions: Permission::all(),
            roles: HashSet::new(),
        })
    }
}

/// Tool-level authorization against registered `ToolPermission`s.
#[derive(Default)]
pub struct Authorizer {
    tool_permissions: HashMap<String, ToolPermission>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool_permission(&mut self, permission: ToolPermission) {
        self.tool_permissions.insert(permission.tool_name.clone(), permission);
    }

    pub fn authorize(&self, tool_name: &str, auth: &AuthContext) -> Result<()> {
        let Some(permission) = self.tool_permissions.get(tool_name) else {
            return if auth.authenticated {
                Ok(())
            } else {
                Err(Error::auth(format!("authentication required for tool: {}", tool_name)))
            };
        };

        if !permission.required_permissions.is_subset(&auth.permissions) {
            return Err(Error::auth(format!("missing permissions for tool {}", tool_name)));
        }
        if !permission.allowed_roles.is_empty() && permission.allowed_roles.is_disjoint(&auth.roles) {
            return Err(Error::auth(format!("role not authorized for tool: {}", tool_name)));
        }
        Ok(())
    }
}

/// Deny-list based input validation plus optional per-tool custom checks.
pub struct InputValidator {
    deny_patterns: Vec<String>,
    validators: HashMap<String, Box<dyn Fn(&serde_json::Value) -> Result<()> + Send + Sync>>,
}

impl InputValidator {
    pub fn new(deny_patterns: Vec<String>) -> Self {
        Self {
            deny_patterns,
            validators: HashMap::new(),
        }
    }

    pub fn register_validator<F>(&mut self, tool_name: impl Into<String>, validator: F)
    where
        F: Fn(&serde_json::Value) -> Result<()> + Send + Sync + 'static,
    {
        self.validators.insert(tool_name.into(), Box::new(validator));
    }

    pub fn validate(&self, tool_name: &str, arguments: &serde_json::Value) -> Result<()> {
        if let Some(obj) = arguments.as_object() {
            for (key, value) in obj {
                if let Some(s) = value.as_str() {
                    for pattern in &self.deny_patterns {
                        if s.contains(pattern.as_str()) {
                            return Err(Error::validation(format!(
                                "disallowed pattern '{}' found in argument '{}'",
                                pattern, key
                            )));
                        }
                    }
                }
            }
        }
        if let Some(validator) = self.validators.get(tool_name) {
            validator(arguments)?;
        }
        Ok(())
    }
}

/// Token-bucket rate limiter, one bucket per client.
pub struct RateLimiter {
    rate_per_sec: f64,
    burst_size: f64,
    buckets: Mutex<HashMap<String, (f64, Instant)>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            rate_per_sec: requests_per_minute as f64 / 60.0,
            burst_size: burst_size as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, client_id: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let (tokens, last_update) = buckets
            .get(client_id)
            .copied()
            .unwrap_or((self.burst_size, now));

        let elapsed = now.duration_since(last_update).as_secs_f64();
        let tokens = (tokens + elapsed * self.rate_per_sec).min(self.burst_size);

        if tokens >= 1.0 {
            buckets.insert(client_id.to_string(), (tokens - 1.0, now));
            true
        } else {
            buckets.insert(client_id.to_string(), (tokens, now));
            false
        }
    }

    pub fn reset(&self, client_id: &str) {
        self.buckets.lock().expect("rate limiter lock poisoned").remove(client_id);
    }
}

/// Combines authentication, rate limiting, authorization, and input
/// validation behind one entry point, enforcing the fixed ordering:
/// authenticate -> rate-limit -> authorize -> validate.
pub struct SecurityLayer {
    authenticator: Authenticator,
    authorizer: Authorizer,
    validator: InputValidator,
    rate_limiter: Option<RateLimiter>,
}

impl SecurityLayer {
    pub fn new(config: SecurityConfig, api_keys: &[String], token_secret: Option<&str>) -> Self {
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(config.rate_limit.requests_per_minute, config.rate_limit.burst_size));
        let validator = InputValidator::new(config.deny_patterns.clone());
        Self {
            authenticator: Authenticator::new(config, api_keys, token_secret),
            authorizer: Authorizer::new(),
            validator,
            rate_limiter,
        }
    }

    pub fn register_tool_permission(&mut self, permission: ToolPermission) {
        self.authorizer.register_tool_permission(permission);
    }

    pub fn check_request(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        credentials: Option<&Credentials>,
    ) -> Result<AuthContext> {
        let auth = self.authenticator.authenticate(credentials)?;

        if let Some(limiter) = &self.rate_limiter {
            if let Some(client_id) = &auth.client_id {
                if !limiter.check(client_id) {
                    return Err(Error::tool(tool_name, "rate limit exceeded", true));
                }
            }
        }

        self.authorizer.authorize(tool_name, &auth)?;
        self.validator.validate(tool_name, arguments)?;
        Ok(auth)
    }
}
