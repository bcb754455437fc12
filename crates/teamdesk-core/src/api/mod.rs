//! REST client for the dashboard backend.
//!
//! Only the two endpoints the session layer needs live here:
//! `POST /login/` and `GET /users/me/`. Requests carry the session token as a
//! bearer credential.

pub mod client;
pub mod error;

pub use client::{ApiClient, DEFAULT_API_URL};
pub use error::ApiError;
