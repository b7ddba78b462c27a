//! Client-side authentication session engine.
//!
//! This crate implements the client half of OAuth 2.0 for desktop and CLI
//! applications:
//!
//! - **Authorization Code flow with PKCE** (RFC 7636), driven through a
//!   pluggable [`AuthorizationAgent`]
//! - **Token lifecycle**: persistence, transparent refresh with
//!   thundering-herd collapse, fail-closed invalidation
//! - **Introspection** (RFC 7662) as the authority on token validity
//! - **Role checks** over a normalized, case-insensitive role set
//! - **Session state machine** published on a `watch` channel
//!
//! Credentials are kept in a [`SecureStorage`] backend, normally the
//! encrypted [`keygate_vault`] store via [`VaultStorage`].
//!
//! # Architecture
//!
//! ```text
//! Session                 (state machine, watch channel)
//! └── AuthService         (exclusive lock, refresh collapse)
//!     ├── OAuthClient     (authorize / token / introspect / userinfo / revoke)
//!     ├── AuthorizationAgent (browser step, LoopbackAgent by default)
//!     ├── CredentialStore (fixed key set)
//!     │   └── SecureStorage (VaultStorage | MemoryStorage)
//!     └── PkcePair, RoleSet
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use keygate_auth::{AuthConfig, AuthService, LoopbackAgent, RequestContext, Session, VaultStorage};
//! use keygate_vault::Vault;
//!
//! # async fn example() -> keygate_auth::Result<()> {
//! let config = AuthConfig::load("keygate.toml")?;
//! let vault = Vault::open("data/vault.db", &[0u8; 32])?;
//! let storage = Arc::new(VaultStorage::new(vault, config.namespace.clone()));
//! let agent = Arc::new(LoopbackAgent::new().on_url(|url| println!("Open {url}")));
//!
//! let session = Session::new(Arc::new(AuthService::new(config, storage, agent)?));
//! let ctx = RequestContext::new();
//! if session.initialize(&ctx).await?.is_none() {
//!     session.login(&ctx).await?;
//! }
//! println!("admin: {}", session.has_role("admin"));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod callback;
pub mod client;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod introspection;
pub mod pkce;
pub mod roles;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;
pub mod user;

pub use agent::{AuthorizationAgent, AuthorizationOutcome, AuthorizationRequest, LoopbackAgent};
pub use client::OAuthClient;
pub use config::{AuthConfig, Endpoints, ResponseType, RevocationStyle};
pub use context::RequestContext;
pub use credentials::{CredentialSnapshot, CredentialStore};
pub use error::{AuthError, Result};
pub use introspection::{IntrospectionResult, TokenTypeHint};
pub use pkce::PkcePair;
pub use roles::{RoleEntry, RoleSet};
pub use service::AuthService;
pub use session::{Session, SessionState};
pub use storage::{MemoryStorage, SecureStorage, VaultStorage};
pub use token::TokenSet;
pub use user::User;

pub use tokio_util::sync::CancellationToken;
