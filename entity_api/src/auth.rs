use crate::client::ApiClient;
use crate::error::Error;
use entity::auth::{ApiResponse, AuthResponse, AuthUser, LoginRequest, RegisterRequest};
use log::*;

/// Session endpoints under `/auth`.
///
/// Successful login, registration and refresh store the issued token in the
/// client's `TokenStore`. Logout always forgets the local token, even when the
/// server call fails.
#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn login(&self, credentials: &LoginRequest) -> Result<AuthResponse, Error> {
        let response: ApiResponse<AuthResponse> =
            self.client.post("/auth/login", Some(credentials)).await?;
        info!("Signed in as {}", response.data.user.email);
        self.client.tokens().set(response.data.token.clone());
        Ok(response.data)
    }

    pub async fn register(&self, user_data: &RegisterRequest) -> Result<AuthResponse, Error> {
        let response: ApiResponse<AuthResponse> =
            self.client.post("/auth/register", Some(user_data)).await?;
        info!("Registered account {}", response.data.user.email);
        self.client.tokens().set(response.data.token.clone());
        Ok(response.data)
    }

    pub async fn logout(&self) -> Result<(), Error> {
        let result = self.client.post_empty::<()>("/auth/logout", None).await;
        self.client.tokens().clear();
        if let Err(e) = &result {
            warn!("Logout call failed, local token cleared anyway: {e}");
        }
        result
    }

    pub async fn refresh_token(&self) -> Result<AuthResponse, Error> {
        let response: ApiResponse<AuthResponse> =
            self.client.post::<_, ()>("/auth/refresh", None).await?;
        self.client.tokens().set(response.data.token.clone());
        Ok(response.data)
    }

    pub async fn get_profile(&self) -> Result<AuthUser, Error> {
        let response: ApiResponse<AuthUser> =
            self.client.get::<_, ()>("/auth/profile", None).await?;
        Ok(response.data)
    }
}
