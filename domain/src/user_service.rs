//! Validation and normalization in front of the user repository.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use email_address::EmailAddress;
use entity::pagination::PaginatedResponse;
use entity::users::{CreateUserRequest, UpdateUserRequest, User, UserFilters};
use entity_api::UserRepository;
use log::*;
use serde::Serialize;

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Outcome of checking a registration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<(), Error> {
        if self.is_valid {
            Ok(())
        } else {
            Err(Error::validation(self.errors))
        }
    }
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_users(&self, filters: &UserFilters) -> Result<PaginatedResponse<User>, Error>;
    async fn get_user_by_id(&self, id: &str) -> Result<User, Error>;
    async fn create_user(&self, data: CreateUserRequest) -> Result<User, Error>;
    async fn update_user(&self, id: &str, data: UpdateUserRequest) -> Result<User, Error>;
    async fn delete_user(&self, id: &str) -> Result<(), Error>;
    fn validate_user_data(&self, data: &CreateUserRequest) -> ValidationResult;
}

pub struct UserServiceImpl<R> {
    repository: R,
}

impl<R: UserRepository> UserServiceImpl<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: UserRepository> UserService for UserServiceImpl<R> {
    async fn get_users(&self, filters: &UserFilters) -> Result<PaginatedResponse<User>, Error> {
        Ok(self.repository.get_users(filters).await?)
    }

    async fn get_user_by_id(&self, id: &str) -> Result<User, Error> {
        let id = require_id(id)?;
        Ok(self.repository.get_user_by_id(id).await?)
    }

    async fn create_user(&self, data: CreateUserRequest) -> Result<User, Error> {
        self.validate_user_data(&data).into_result()?;

        let data = normalize_create(data);
        let user = self.repository.create_user(&data).await?;
        info!("Created user {}", user.id);
        Ok(user)
    }

    async fn update_user(&self, id: &str, data: UpdateUserRequest) -> Result<User, Error> {
        let id = require_id(id)?;
        validate_update(&data).into_result()?;

        let data = normalize_update(data);
        Ok(self.repository.update_user(id, &data).await?)
    }

    async fn delete_user(&self, id: &str) -> Result<(), Error> {
        let id = require_id(id)?;
        self.repository.delete_user(id).await?;
        info!("Deleted user {id}");
        Ok(())
    }

    fn validate_user_data(&self, data: &CreateUserRequest) -> ValidationResult {
        validate_create(data)
    }
}

fn require_id(id: &str) -> Result<&str, Error> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::validation(vec!["User ID is required".to_string()]));
    }
    Ok(id)
}

pub fn validate_create(data: &CreateUserRequest) -> ValidationResult {
    let mut errors = Vec::new();

    if data.name.trim().is_empty() {
        errors.push("Name is required".to_string());
    }

    if data.email.trim().is_empty() {
        errors.push("Email is required".to_string());
    } else if !is_valid_email(&data.email) {
        errors.push("Invalid email format".to_string());
    }

    if data.password.trim().is_empty() {
        errors.push("Password is required".to_string());
    } else if data.password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        ));
    }

    check_optional_fields(data.phone.as_deref(), data.date_of_birth, &mut errors);

    ValidationResult::from_errors(errors)
}

/// Fields absent from an update are not checked; present ones follow the
/// registration rules.
pub fn validate_update(data: &UpdateUserRequest) -> ValidationResult {
    let mut errors = Vec::new();

    if data.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        errors.push("Name is required".to_string());
    }
    if let Some(email) = data.email.as_deref() {
        if !is_valid_email(email) {
            errors.push("Invalid email format".to_string());
        }
    }

    check_optional_fields(data.phone.as_deref(), data.date_of_birth, &mut errors);

    ValidationResult::from_errors(errors)
}

fn check_optional_fields(phone: Option<&str>, date_of_birth: Option<NaiveDate>, errors: &mut Vec<String>) {
    if phone.is_some_and(|phone| !is_valid_phone(phone)) {
        errors.push("Invalid phone format".to_string());
    }
    if date_of_birth.is_some_and(|date| date >= Utc::now().date_naive()) {
        errors.push("Date of birth must be in the past".to_string());
    }
}

/// A syntactically valid address whose domain has at least one dot.
fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    EmailAddress::is_valid(email)
        && email
            .rsplit_once('@')
            .is_some_and(|(_, domain)| has_dotted_labels(domain))
}

fn has_dotted_labels(domain: &str) -> bool {
    domain
        .split_once('.')
        .is_some_and(|(head, tail)| !head.is_empty() && !tail.is_empty())
}

/// Optional leading `+`, then at least one of digits, whitespace, `-`, `(` or `)`.
fn is_valid_phone(phone: &str) -> bool {
    let rest = phone.strip_prefix('+').unwrap_or(phone);
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '-' | '(' | ')'))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn normalize_create(mut data: CreateUserRequest) -> CreateUserRequest {
    data.email = normalize_email(&data.email);
    data.name = data.name.trim().to_string();
    data
}

fn normalize_update(mut data: UpdateUserRequest) -> UpdateUserRequest {
    data.email = data.email.as_deref().map(normalize_email);
    data.name = data.name.as_deref().map(|name| name.trim().to_string());
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, TimeZone};
    use entity_api::{EntityApiErrorKind, Error as EntityApiError};
    use std::sync::Mutex;

    /// Records what reached the repository and answers with canned users.
    #[derive(Default)]
    struct RecordingRepository {
        created: Mutex<Vec<CreateUserRequest>>,
        updated: Mutex<Vec<(String, UpdateUserRequest)>>,
        deleted: Mutex<Vec<String>>,
    }

    fn user(id: &str, name: &str, email: &str) -> User {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        User {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            phone: None,
            date_of_birth: None,
            address: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[async_trait]
    impl UserRepository for RecordingRepository {
        async fn get_users(
            &self,
            _filters: &UserFilters,
        ) -> Result<PaginatedResponse<User>, EntityApiError> {
            Ok(PaginatedResponse {
                data: vec![user("u-1", "Ana", "ana@example.com")],
                total: 1,
                page: 1,
                limit: 10,
                total_pages: 1,
            })
        }

        async fn get_user_by_id(&self, id: &str) -> Result<User, EntityApiError> {
            if id == "missing" {
                return Err(EntityApiError::new(EntityApiErrorKind::RecordNotFound));
            }
            Ok(user(id, "Ana", "ana@example.com"))
        }

        async fn create_user(&self, data: &CreateUserRequest) -> Result<User, EntityApiError> {
            self.created.lock().unwrap().push(data.clone());
            Ok(user("u-new", &data.name, &data.email))
        }

        async fn update_user(
            &self,
            id: &str,
            data: &UpdateUserRequest,
        ) -> Result<User, EntityApiError> {
            self.updated
                .lock()
                .unwrap()
                .push((id.to_string(), data.clone()));
            Ok(user(id, data.name.as_deref().unwrap_or("Ana"), "ana@example.com"))
        }

        async fn delete_user(&self, id: &str) -> Result<(), EntityApiError> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn valid_request() -> CreateUserRequest {
        CreateUserRequest {
            name: "Ana Souza".to_string(),
            email: "ana@example.com".to_string(),
            password: "secret1".to_string(),
            phone: Some("+55 (81) 99999-0000".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12),
            address: None,
        }
    }

    #[test]
    fn valid_registration_passes() {
        let result = validate_create(&valid_request());
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn empty_form_reports_every_required_field() {
        let result = validate_create(&CreateUserRequest::default());
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec!["Name is required", "Email is required", "Password is required"]
        );
    }

    #[test]
    fn short_password_and_bad_email_are_rejected() {
        let request = CreateUserRequest {
            email: "not-an-email".to_string(),
            password: "12345".to_string(),
            ..valid_request()
        };
        let result = validate_create(&request);
        assert_eq!(
            result.errors,
            vec![
                "Invalid email format",
                "Password must be at least 6 characters"
            ]
        );
    }

    #[test]
    fn blank_password_counts_as_missing() {
        let request = CreateUserRequest {
            password: "      ".to_string(),
            ..valid_request()
        };
        assert_eq!(validate_create(&request).errors, vec!["Password is required"]);
    }

    #[test]
    fn email_domain_needs_a_dot() {
        for email in ["ana@localhost", "ana@example."] {
            let request = CreateUserRequest {
                email: email.to_string(),
                ..valid_request()
            };
            assert_eq!(
                validate_create(&request).errors,
                vec!["Invalid email format"],
                "{email}"
            );
        }

        let update = UpdateUserRequest {
            email: Some("ana@localhost".to_string()),
            ..Default::default()
        };
        assert!(!validate_update(&update).is_valid);
    }

    #[test]
    fn phone_accepts_only_dialing_characters() {
        assert!(is_valid_phone("+1 (555) 123-4567"));
        assert!(is_valid_phone("5551234"));
        assert!(!is_valid_phone("+"));
        assert!(!is_valid_phone("555-CALL"));
        assert!(!is_valid_phone("++5551234"));
    }

    #[test]
    fn date_of_birth_must_be_in_the_past() {
        let today = Utc::now().date_naive();
        let request = CreateUserRequest {
            date_of_birth: Some(today),
            ..valid_request()
        };
        assert_eq!(
            validate_create(&request).errors,
            vec!["Date of birth must be in the past"]
        );

        let request = CreateUserRequest {
            date_of_birth: today.checked_sub_days(Days::new(1)),
            ..valid_request()
        };
        assert!(validate_create(&request).is_valid);
    }

    #[tokio::test]
    async fn create_normalizes_before_sending() {
        let service = UserServiceImpl::new(RecordingRepository::default());
        let request = CreateUserRequest {
            name: "  Ana Souza ".to_string(),
            email: " Ana@Example.COM ".to_string(),
            ..valid_request()
        };

        let created = service.create_user(request).await.unwrap();

        assert_eq!(created.email, "ana@example.com");
        let sent = service.repository.created.lock().unwrap();
        assert_eq!(sent[0].name, "Ana Souza");
        assert_eq!(sent[0].email, "ana@example.com");
    }

    #[tokio::test]
    async fn invalid_create_never_reaches_the_repository() {
        let service = UserServiceImpl::new(RecordingRepository::default());
        let request = CreateUserRequest {
            password: "123".to_string(),
            ..valid_request()
        };

        let err = service.create_user(request).await.unwrap_err();

        assert_eq!(
            err.validation_errors(),
            Some(&["Password must be at least 6 characters".to_string()][..])
        );
        assert!(service.repository.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_normalizes_only_carried_fields() {
        let service = UserServiceImpl::new(RecordingRepository::default());
        let update = UpdateUserRequest {
            email: Some(" NEW@Example.com".to_string()),
            ..Default::default()
        };

        service.update_user("u-1", update).await.unwrap();

        let sent = service.repository.updated.lock().unwrap();
        assert_eq!(sent[0].0, "u-1");
        assert_eq!(sent[0].1.email.as_deref(), Some("new@example.com"));
        assert_eq!(sent[0].1.name, None);
    }

    #[tokio::test]
    async fn blank_id_is_rejected() {
        let service = UserServiceImpl::new(RecordingRepository::default());

        assert!(service.get_user_by_id("  ").await.is_err());
        assert!(service.delete_user("").await.is_err());
        assert!(service.repository.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repository_errors_are_translated() {
        let service = UserServiceImpl::new(RecordingRepository::default());
        let err = service.get_user_by_id("missing").await.unwrap_err();
        assert_eq!(err.to_string(), "User not found");
    }
}
