use crate::client::ApiClient;
use crate::error::Error;
use async_trait::async_trait;
use entity::pagination::PaginatedResponse;
use entity::users::{CreateUserRequest, UpdateUserRequest, User, UserFilters};
use log::*;

/// Remote source of truth for user records.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_users(&self, filters: &UserFilters) -> Result<PaginatedResponse<User>, Error>;
    async fn get_user_by_id(&self, id: &str) -> Result<User, Error>;
    async fn create_user(&self, data: &CreateUserRequest) -> Result<User, Error>;
    async fn update_user(&self, id: &str, data: &UpdateUserRequest) -> Result<User, Error>;
    async fn delete_user(&self, id: &str) -> Result<(), Error>;
}

/// `UserRepository` backed by the `/users` REST resource.
#[derive(Clone)]
pub struct HttpUserRepository {
    client: ApiClient,
}

impl HttpUserRepository {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn user_path(id: &str) -> String {
        format!("/users/{}", urlencoding::encode(id))
    }
}

#[async_trait]
impl UserRepository for HttpUserRepository {
    async fn get_users(&self, filters: &UserFilters) -> Result<PaginatedResponse<User>, Error> {
        debug!("Fetching users with filters: {filters:?}");
        self.client.get("/users", Some(filters)).await
    }

    async fn get_user_by_id(&self, id: &str) -> Result<User, Error> {
        self.client.get::<_, ()>(&Self::user_path(id), None).await
    }

    async fn create_user(&self, data: &CreateUserRequest) -> Result<User, Error> {
        debug!("Creating user {}", data.email);
        self.client.post("/users", Some(data)).await
    }

    async fn update_user(&self, id: &str, data: &UpdateUserRequest) -> Result<User, Error> {
        debug!("Updating user {id}");
        self.client.put(&Self::user_path(id), data).await
    }

    async fn delete_user(&self, id: &str) -> Result<(), Error> {
        debug!("Deleting user {id}");
        self.client.delete(&Self::user_path(id)).await
    }
}
