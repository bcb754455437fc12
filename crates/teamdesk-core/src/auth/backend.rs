use async_trait::async_trait;
use serde::Deserialize;

use super::session::Profile;
use crate::api::ApiError;

/// Body of a successful `POST /login/`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access", alias = "access_token")]
    pub token: String,
    #[serde(alias = "profile")]
    pub user: Profile,
}

/// The part of the backend the auth context talks to.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;

    async fn fetch_current_user(&self, token: &str) -> Result<Profile, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn test_login_response_accepts_profile_alias() {
        let json = r#"{"token":"t1","profile":{"userId":"1","fullName":"A","email":"a@x.com","role":"USER"}}"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.token, "t1");
        assert_eq!(resp.user.role, Role::User);

        let json = r#"{"access":"t2","user":{"user_id":3,"full_name":"B","email":"b@x.com","role":"Admin"}}"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.token, "t2");
        assert_eq!(resp.user.user_id, "3");
        assert_eq!(resp.user.role, Role::Admin);
    }
}
