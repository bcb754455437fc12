//! TeamDesk core: session handling and route gating for the dashboard client.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use teamdesk_core::api::ApiClient;
//! use teamdesk_core::auth::{AuthContext, MemoryStorage, SessionStore};
//! use teamdesk_core::gate::{ProtectedRoute, RecordingNavigator};
//! use teamdesk_core::routes::RoutePolicy;
//!
//! # fn main() -> anyhow::Result<()> {
//! let api = ApiClient::new("http://127.0.0.1:8000/api")?;
//! let store = SessionStore::new(Box::new(MemoryStorage::new()));
//! let context = AuthContext::new(store, Arc::new(api));
//!
//! let policy = RoutePolicy::default();
//! let mut page = ProtectedRoute::new(policy.gate_for("/admin/dashboard"), &context);
//! let mut navigator = RecordingNavigator::default();
//!
//! // First render: still pending, nothing shown, no redirect
//! assert!(page.render(&mut navigator, |_| ()).is_none());
//!
//! context.resolve();
//! page.render(&mut navigator, |_| ());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod gate;
pub mod routes;
