use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, StoreResult, UserStore};
use super::repo_types::{NewUser, ProfileUpdate, Role, User};

/// In-process user store selected with `DATABASE_URL=memory`.
///
/// Mirrors the unique indexes of the `users` table: username is unique and
/// email is unique ignoring case.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn an account into one that signs in elsewhere.
    #[cfg(test)]
    pub async fn clear_password(&self, id: Uuid) {
        if let Some(user) = self.users.write().await.iter_mut().find(|u| u.id == id) {
            user.password_hash = None;
        }
    }
}

fn same_email(stored: Option<&str>, other: &str) -> bool {
    stored.is_some_and(|e| e.to_lowercase() == other.to_lowercase())
}

fn conflicts(users: &[User], skip: Option<Uuid>, username: &str, email: Option<&str>) -> bool {
    users
        .iter()
        .filter(|u| Some(u.id) != skip)
        .any(|u| u.username == username || email.is_some_and(|e| same_email(u.email.as_deref(), e)))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn count(&self) -> StoreResult<i64> {
        Ok(self.users.read().await.len() as i64)
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        Ok(self.users.read().await.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| same_email(u.email.as_deref(), email))
            .cloned())
    }

    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.username == username_or_email || same_email(u.email.as_deref(), username_or_email))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if conflicts(&users, None, &new.username, new.email.as_deref()) {
            return Err(StoreError::Conflict);
        }
        // Decided under the write lock so concurrent first sign-ups cannot
        // both see an empty table.
        let role = new
            .role
            .unwrap_or_else(|| Role::for_new_account(users.is_empty()));
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            role,
            theme: None,
            first_name: new.first_name,
            last_name: new.last_name,
            second_last_name: new.second_last_name,
            phone: new.phone,
            national_id: None,
            address: None,
            company: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            blood_type: None,
            insurance_policy: None,
            insurer: None,
            allergies: None,
            chronic_conditions: None,
            birthday: None,
            avatar_url: new.avatar_url,
            registered_at: OffsetDateTime::now_utc(),
            last_login_at: None,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, u: ProfileUpdate) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if conflicts(&users, Some(id), &u.username, u.email.as_deref()) {
            return Err(StoreError::Conflict);
        }
        let user = users
            .iter_mut()
            .find(|user| user.id == id)
            .ok_or(StoreError::NotFound(id))?;
        user.username = u.username;
        user.email = u.email;
        user.first_name = u.first_name;
        user.last_name = u.last_name;
        user.second_last_name = u.second_last_name;
        user.phone = u.phone;
        user.national_id = u.national_id;
        user.address = u.address;
        user.company = u.company;
        user.emergency_contact_name = u.emergency_contact_name;
        user.emergency_contact_phone = u.emergency_contact_phone;
        user.blood_type = u.blood_type;
        user.insurance_policy = u.insurance_policy;
        user.insurer = u.insurer;
        user.allergies = u.allergies;
        user.chronic_conditions = u.chronic_conditions;
        user.birthday = u.birthday;
        user.avatar_url = u.avatar_url;
        Ok(user.clone())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound(id))?;
        user.password_hash = Some(password_hash.to_string());
        Ok(())
    }

    async fn update_theme(&self, id: Uuid, theme: &str) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound(id))?;
        user.theme = Some(theme.to_string());
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound(id))?;
        user.last_login_at = Some(at);
        Ok(())
    }
}
