//! Tool Registry and Security Layer (C7, C8).

mod registry;
mod security;

pub use registry::{ToolConflict, ToolDefinition, ToolExample, ToolHandler, ToolOrigin, ToolRegistry};
pub use security::{
    AuthContext, InputValidator, Permission, RateLimiter, SecurityLayer, TokenSigner,
};
