use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, ProfileUpdate, Role, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index on username or email rejected the write.
    #[error("username or email already taken")]
    Conflict,
    #[error("user {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn count(&self) -> StoreResult<i64>;
    async fn list(&self) -> StoreResult<Vec<User>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    /// Case-insensitive.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Exact username match or case-insensitive email match.
    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<User>>;
    /// Inserts the account. With `user.role == None` the role is picked
    /// atomically with the insert: Superuser for the first account only.
    async fn create(&self, user: NewUser) -> StoreResult<User>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<User>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;
    async fn update_theme(&self, id: Uuid, theme: &str) -> StoreResult<()>;
    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<()>;
}

const USER_COLUMNS: &str = r#"
    id, username, email, password_hash, role, theme,
    first_name, last_name, second_last_name, phone,
    national_id, address, company,
    emergency_contact_name, emergency_contact_phone,
    blood_type, insurance_policy, insurer, allergies, chronic_conditions,
    birthday, avatar_url, registered_at, last_login_at
"#;

/// Advisory lock key held while a sign-up picks its role from table emptiness.
const BOOTSTRAP_ROLE_LOCK: i64 = 0x7573_6572_735f_7231;

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, filter: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} LIMIT 1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn count(&self) -> StoreResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await?;
        Ok(n)
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY registered_at ASC");
        let rows = sqlx::query_as::<_, User>(&sql).fetch_all(&self.db).await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.find_one("username = $1", username).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_one("lower(email) = lower($1)", email).await
    }

    async fn find_by_login(&self, username_or_email: &str) -> StoreResult<Option<User>> {
        self.find_one("username = $1 OR lower(email) = lower($1)", username_or_email)
            .await
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, role,
                               first_name, last_name, second_last_name, phone, avatar_url)
            SELECT $1, $2, $3, $4,
                   COALESCE($5, CASE WHEN EXISTS (SELECT 1 FROM users)
                                     THEN 'regular' ELSE 'superuser' END),
                   $6, $7, $8, $9, $10
            RETURNING {USER_COLUMNS}
            "#
        );
        let mut tx = self.db.begin().await?;
        if user.role.is_none() {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(BOOTSTRAP_ROLE_LOCK)
                .execute(&mut *tx)
                .await?;
        }
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.map(Role::as_str))
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.second_last_name)
            .bind(&user.phone)
            .bind(&user.avatar_url)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn update_profile(&self, id: Uuid, u: ProfileUpdate) -> StoreResult<User> {
        let sql = format!(
            r#"
            UPDATE users SET
                username = $2, email = $3, first_name = $4, last_name = $5,
                second_last_name = $6, phone = $7, national_id = $8, address = $9,
                company = $10, emergency_contact_name = $11, emergency_contact_phone = $12,
                blood_type = $13, insurance_policy = $14, insurer = $15, allergies = $16,
                chronic_conditions = $17, birthday = $18, avatar_url = $19
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(&u.username)
            .bind(&u.email)
            .bind(&u.first_name)
            .bind(&u.last_name)
            .bind(&u.second_last_name)
            .bind(&u.phone)
            .bind(&u.national_id)
            .bind(&u.address)
            .bind(&u.company)
            .bind(&u.emergency_contact_name)
            .bind(&u.emergency_contact_phone)
            .bind(&u.blood_type)
            .bind(&u.insurance_policy)
            .bind(&u.insurer)
            .bind(&u.allergies)
            .bind(&u.chronic_conditions)
            .bind(u.birthday)
            .bind(&u.avatar_url)
            .fetch_optional(&self.db)
            .await?;
        updated.ok_or(StoreError::NotFound(id))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        expect_affected(id, res.rows_affected())
    }

    async fn update_theme(&self, id: Uuid, theme: &str) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET theme = $2 WHERE id = $1")
            .bind(id)
            .bind(theme)
            .execute(&self.db)
            .await?;
        expect_affected(id, res.rows_affected())
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        expect_affected(id, res.rows_affected())
    }
}

fn expect_affected(id: Uuid, affected: u64) -> StoreResult<()> {
    if affected == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}
