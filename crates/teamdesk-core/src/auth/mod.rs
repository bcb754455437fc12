//! Client-side session and role-based access control.
//!
//! This module provides:
//! - `Role`/`RoleSet`: the closed role model and the `has_role` check
//! - `Session`/`SessionData`/`Profile`: the session record
//! - `SessionStorage` backends: file, OS keychain, memory
//! - `SessionStore`: owner of the persisted record (hydrate/save/clear)
//! - `AuthContext`: login, logout and refresh, published to subscribers
//!
//! Role checks here decide what the client renders. The backend still
//! authorizes every request on its own.

pub mod backend;
pub mod context;
pub mod role;
pub mod session;
pub mod storage;
pub mod store;

pub use backend::{AuthBackend, LoginResponse};
pub use context::{AuthContext, AuthError, AuthSnapshot, Credentials, ResolutionPhase};
pub use role::{has_role, Role, RoleSet, UnknownRole};
pub use session::{Profile, Session, SessionData, SESSION_KEY};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, SessionStorage, StorageError};
pub use store::SessionStore;
