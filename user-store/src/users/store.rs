//! SQLite-backed user store
//!
//! All access to `t_user` goes through one [`tokio::sync::RwLock`] per store
//! (the accounting guard). Lookups and listings take it shared; every write
//! takes it exclusively, so a read-modify-write of `used_space` can never
//! interleave with another write, whichever user it targets.
//!
//! # Usage
//! ```no_run
//! use user_store::{OpContext, Quota, UsageDirection, User, UserStore, USER_ROLE};
//!
//! # async fn example() -> user_store::Result<()> {
//! let store = UserStore::in_memory().await?;
//! let ctx = OpContext::background();
//!
//! let mut user = User::new(2, "alice", "5e88489...", USER_ROLE);
//! user.quota = Quota::with_space_limit(100);
//! store.add_user(&ctx, &user).await?;
//!
//! store.adjust_used(&ctx, 2, UsageDirection::Increase, 90).await?;
//! // Would exceed the limit: fails and leaves used_space at 90
//! assert!(store.adjust_used(&ctx, 2, UsageDirection::Increase, 20).await.is_err());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::context::OpContext;
use crate::error::{Result, StoreError};
use crate::users::accounting::{next_used_space, UsageDirection};
use crate::users::codec;
use crate::users::types::{sql_id, validate_role, Preferences, Quota, User};

const SELECT_USER_BY_ID: &str = r#"
    SELECT id, name, pwd, role, used_space, quota, preference
    FROM t_user
    WHERE id = ?
"#;

const SELECT_USER_BY_NAME: &str = r#"
    SELECT id, name, pwd, role, used_space, quota, preference
    FROM t_user
    WHERE name = ?
"#;

/// Listings never carry credentials
const SELECT_USER_LISTING: &str = r#"
    SELECT id, name, '' AS pwd, role, used_space, quota, preference
    FROM t_user
"#;

/// User store with quota-enforced usage accounting
#[derive(Clone)]
pub struct UserStore {
    db: SqlitePool,
    guard: Arc<RwLock<()>>,
}

impl UserStore {
    /// Wrap an existing pool. Call [`UserStore::init`] before first use.
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            guard: Arc::new(RwLock::new(())),
        }
    }

    /// Connect using `config` and create the schema if needed
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);

        let pool = if is_memory_url(&config.database_url) {
            // A private in-memory database lives as long as its connection
            memory_pool_options().connect_with(options).await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout())
                .connect_with(options)
                .await?
        };

        let store = Self::new(pool);
        store.init(&OpContext::background()).await?;

        info!("User store ready at {}", config.database_url);
        Ok(store)
    }

    /// Fresh in-memory store, mainly for tests
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            ..StoreConfig::default()
        })
        .await
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Create `t_user` if it does not exist
    pub async fn init(&self, ctx: &OpContext) -> Result<()> {
        self.write_one(
            ctx,
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS t_user (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    pwd TEXT NOT NULL,
                    role TEXT NOT NULL,
                    used_space INTEGER NOT NULL DEFAULT 0,
                    quota TEXT NOT NULL,
                    preference TEXT NOT NULL
                )
                "#,
            ),
        )
        .await?;

        Ok(())
    }

    /// Insert a new user
    pub async fn add_user(&self, ctx: &OpContext, user: &User) -> Result<()> {
        user.validate_new()?;
        let id = sql_id(user.id)?;
        let quota = codec::encode(&user.quota)?;
        let preference = codec::encode(&user.preferences)?;

        let query = sqlx::query(
            r#"
            INSERT INTO t_user (id, name, pwd, role, used_space, quota, preference)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&user.name)
        .bind(&user.pwd)
        .bind(&user.role)
        .bind(user.used_space)
        .bind(&quota)
        .bind(&preference);

        self.write_one(ctx, query).await.map_err(|e| {
            duplicate_or(e, || {
                format!("user id {} or name '{}' already exists", user.id, user.name)
            })
        })?;

        info!("User added: {} (id {})", user.name, user.id);
        Ok(())
    }

    /// Delete a user. Deleting a missing user succeeds.
    pub async fn del_user(&self, ctx: &OpContext, id: u64) -> Result<()> {
        ctx.check()?;
        let Ok(key) = i64::try_from(id) else {
            return Ok(());
        };

        let deleted = self
            .write_one(ctx, sqlx::query("DELETE FROM t_user WHERE id = ?").bind(key))
            .await?;

        if deleted == 0 {
            debug!("Delete of user {} matched no row", id);
        } else {
            info!("User deleted: id {}", id);
        }
        Ok(())
    }

    pub async fn get_user(&self, ctx: &OpContext, id: u64) -> Result<User> {
        let key = lookup_key(id)?;

        ctx.run(async {
            let _guard = self.guard.read().await;
            debug!("Looking up user {}", id);

            fetch_user(&self.db, key)
                .await?
                .ok_or_else(|| not_found(id))
        })
        .await
    }

    pub async fn get_user_by_name(&self, ctx: &OpContext, name: &str) -> Result<User> {
        ctx.run(async {
            let _guard = self.guard.read().await;
            debug!("Looking up user '{}'", name);

            let row = sqlx::query(SELECT_USER_BY_NAME)
                .bind(name)
                .fetch_optional(&self.db)
                .await?;

            match row {
                Some(row) => row_to_user(&row),
                None => Err(StoreError::NotFound(format!("name '{}'", name))),
            }
        })
        .await
    }

    /// Replace the stored credential
    pub async fn set_pwd(&self, ctx: &OpContext, id: u64, pwd: &str) -> Result<()> {
        if pwd.is_empty() {
            return Err(StoreError::Validation("pwd must not be empty".to_string()));
        }
        let key = lookup_key(id)?;

        let query = sqlx::query("UPDATE t_user SET pwd = ? WHERE id = ?")
            .bind(pwd)
            .bind(key);

        ensure_matched(self.write_one(ctx, query).await?, id)
    }

    /// Update role and quota together
    pub async fn set_info(&self, ctx: &OpContext, id: u64, role: &str, quota: &Quota) -> Result<()> {
        validate_role(role)?;
        quota.validate()?;
        let key = lookup_key(id)?;
        let quota_text = codec::encode(quota)?;

        let query = sqlx::query("UPDATE t_user SET role = ?, quota = ? WHERE id = ?")
            .bind(role)
            .bind(&quota_text)
            .bind(key);

        ensure_matched(self.write_one(ctx, query).await?, id)?;
        info!(
            "User {} set to role {} with space limit {}",
            id, role, quota.space_limit
        );
        Ok(())
    }

    /// Read-modify-write of role and quota in one exclusive guard section.
    ///
    /// `modify` sees the stored values; the result is validated and written
    /// in the same transaction, so concurrent changes are never lost.
    pub async fn modify_info<F>(&self, ctx: &OpContext, id: u64, modify: F) -> Result<(String, Quota)>
    where
        F: FnOnce(&mut String, &mut Quota) + Send,
    {
        let key = lookup_key(id)?;
        let (_guard, mut tx) = self.begin_write(ctx).await?;

        let (role, quota) = ctx
            .run(async {
                let user = fetch_user(&mut *tx, key)
                    .await?
                    .ok_or_else(|| not_found(id))?;

                let mut role = user.role;
                let mut quota = user.quota;
                modify(&mut role, &mut quota);
                validate_role(&role)?;
                quota.validate()?;

                let quota_text = codec::encode(&quota)?;
                sqlx::query("UPDATE t_user SET role = ?, quota = ? WHERE id = ?")
                    .bind(&role)
                    .bind(&quota_text)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;

                Ok((role, quota))
            })
            .await?;

        tx.commit().await?;

        info!(
            "User {} set to role {} with space limit {}",
            id, role, quota.space_limit
        );
        Ok((role, quota))
    }

    pub async fn set_preferences(
        &self,
        ctx: &OpContext,
        id: u64,
        preferences: &Preferences,
    ) -> Result<()> {
        let key = lookup_key(id)?;
        let preference = codec::encode(preferences)?;

        let query = sqlx::query("UPDATE t_user SET preference = ? WHERE id = ?")
            .bind(&preference)
            .bind(key);

        ensure_matched(self.write_one(ctx, query).await?, id)
    }

    /// Overwrite every column of an existing user.
    ///
    /// `used_space` may exceed the space limit, so a row read back after
    /// [`UserStore::reset_used`] or a lowered quota can be written again.
    pub async fn update_user(&self, ctx: &OpContext, user: &User) -> Result<()> {
        user.validate()?;
        let key = sql_id(user.id)?;
        let quota = codec::encode(&user.quota)?;
        let preference = codec::encode(&user.preferences)?;

        let query = sqlx::query(
            r#"
            UPDATE t_user
            SET name = ?, pwd = ?, role = ?, used_space = ?, quota = ?, preference = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.name)
        .bind(&user.pwd)
        .bind(&user.role)
        .bind(user.used_space)
        .bind(&quota)
        .bind(&preference)
        .bind(key);

        let updated = self
            .write_one(ctx, query)
            .await
            .map_err(|e| duplicate_or(e, || format!("name '{}' already exists", user.name)))?;

        ensure_matched(updated, user.id)
    }

    /// Move `amount` bytes of used space in `direction`, enforcing
    /// `0 <= used_space <= space_limit`. Returns the new used space.
    ///
    /// Read, check and write happen in one transaction under the exclusive
    /// guard. A rejected, failed or canceled adjustment writes nothing.
    pub async fn adjust_used(
        &self,
        ctx: &OpContext,
        id: u64,
        direction: UsageDirection,
        amount: i64,
    ) -> Result<i64> {
        let key = lookup_key(id)?;
        let (_guard, mut tx) = self.begin_write(ctx).await?;

        let (previous, next) = ctx
            .run(async {
                let user = fetch_user(&mut *tx, key)
                    .await?
                    .ok_or_else(|| not_found(id))?;

                let next = next_used_space(&user, direction, amount).map_err(|e| {
                    warn!("Rejected {} of {} bytes for user {}: {}", direction, amount, id, e);
                    e
                })?;

                sqlx::query("UPDATE t_user SET used_space = ? WHERE id = ?")
                    .bind(next)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;

                Ok((user.used_space, next))
            })
            .await?;

        tx.commit().await?;

        debug!(
            "User {} used space {} -> {} ({} {})",
            id, previous, next, direction, amount
        );
        Ok(next)
    }

    /// Overwrite used space without any bounds check (administrative correction)
    pub async fn reset_used(&self, ctx: &OpContext, id: u64, used: i64) -> Result<()> {
        let key = lookup_key(id)?;

        let query = sqlx::query("UPDATE t_user SET used_space = ? WHERE id = ?")
            .bind(used)
            .bind(key);

        ensure_matched(self.write_one(ctx, query).await?, id)?;
        info!("User {} used space reset to {}", id, used);
        Ok(())
    }

    /// All users, unordered, with `pwd` left empty.
    ///
    /// Fails on the first row whose blobs do not decode.
    pub async fn list_users(&self, ctx: &OpContext) -> Result<Vec<User>> {
        ctx.run(async {
            let _guard = self.guard.read().await;
            self.fetch_all_users().await
        })
        .await
    }

    /// Map of user name to user id (as a string)
    pub async fn list_user_ids(&self, ctx: &OpContext) -> Result<HashMap<String, String>> {
        ctx.run(async {
            let _guard = self.guard.read().await;

            let users = self.fetch_all_users().await?;
            Ok(users
                .into_iter()
                .map(|user| (user.name, user.id.to_string()))
                .collect())
        })
        .await
    }

    // TODO: implement role management once grant/revoke semantics exist
    pub async fn add_role(&self, _role: &str) -> Result<()> {
        Err(StoreError::Unimplemented("add_role"))
    }

    pub async fn del_role(&self, _role: &str) -> Result<()> {
        Err(StoreError::Unimplemented("del_role"))
    }

    pub async fn list_roles(&self) -> Result<HashMap<String, bool>> {
        Err(StoreError::Unimplemented("list_roles"))
    }

    /// Caller must hold the guard
    async fn fetch_all_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(SELECT_USER_LISTING)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(row_to_user).collect()
    }

    /// Take the exclusive guard and open a transaction, racing the context.
    ///
    /// Statements staged on the transaction should also run through
    /// `ctx.run`; the commit itself is never interrupted, so an operation
    /// reported as canceled has written nothing.
    async fn begin_write(
        &self,
        ctx: &OpContext,
    ) -> Result<(RwLockWriteGuard<'_, ()>, Transaction<'static, Sqlite>)> {
        ctx.run(async {
            let guard = self.guard.write().await;
            let tx = self.db.begin().await?;
            Ok((guard, tx))
        })
        .await
    }

    /// Run a single write statement and commit it. Returns rows affected.
    async fn write_one<'q>(
        &self,
        ctx: &OpContext,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Result<u64> {
        let (_guard, mut tx) = self.begin_write(ctx).await?;

        let result = ctx
            .run(async { Ok(query.execute(&mut *tx).await?) })
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }
}

async fn fetch_user<'e, E>(executor: E, key: i64) -> Result<Option<User>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(SELECT_USER_BY_ID)
        .bind(key)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_user).transpose()
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let id: i64 = row.try_get("id")?;
    let quota: String = row.try_get("quota")?;
    let preference: String = row.try_get("preference")?;

    Ok(User {
        id: u64::try_from(id)
            .map_err(|_| StoreError::Decode(format!("negative user id {}", id)))?,
        name: row.try_get("name")?,
        pwd: row.try_get("pwd")?,
        role: row.try_get("role")?,
        used_space: row.try_get("used_space")?,
        quota: codec::decode("quota", &quota)?,
        preferences: codec::decode("preference", &preference)?,
    })
}

/// Ids that cannot be stored cannot be found either
fn lookup_key(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| not_found(id))
}

fn not_found(id: u64) -> StoreError {
    StoreError::NotFound(format!("id {}", id))
}

fn ensure_matched(rows_affected: u64, id: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(not_found(id))
    } else {
        Ok(())
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn memory_pool_options() -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
}

/// Turn a unique-constraint failure into `DuplicateKey`
fn duplicate_or(error: StoreError, message: impl FnOnce() -> String) -> StoreError {
    match error {
        StoreError::Storage(e) if is_unique_violation(&e) => StoreError::DuplicateKey(message()),
        other => other,
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::types::USER_ROLE;
    use std::time::Duration;

    fn test_user(id: u64, name: &str, limit: i64) -> User {
        let mut user = User::new(id, name, "hashed-pwd", USER_ROLE);
        user.quota = Quota::with_space_limit(limit);
        user
    }

    #[tokio::test]
    async fn test_add_and_get_user() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();

        let user = test_user(2, "alice", 1000);
        store.add_user(&ctx, &user).await.unwrap();

        assert_eq!(store.get_user(&ctx, 2).await.unwrap(), user);
        assert_eq!(store.get_user_by_name(&ctx, "alice").await.unwrap(), user);
    }

    #[tokio::test]
    async fn test_adjust_used_round_trip() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();
        store.add_user(&ctx, &test_user(2, "alice", 100)).await.unwrap();

        let used = store
            .adjust_used(&ctx, 2, UsageDirection::Increase, 60)
            .await
            .unwrap();
        assert_eq!(used, 60);

        let used = store
            .adjust_used(&ctx, 2, UsageDirection::Decrease, 25)
            .await
            .unwrap();
        assert_eq!(used, 35);
        assert_eq!(store.get_user(&ctx, 2).await.unwrap().used_space, 35);
    }

    #[tokio::test]
    async fn test_adjust_used_missing_user() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();

        let err = store
            .adjust_used(&ctx, 9, UsageDirection::Increase, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lookup_out_of_range_id() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();

        let err = store.get_user(&ctx, u64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.del_user(&ctx, u64::MAX).await.is_ok());
    }

    #[tokio::test]
    async fn test_del_out_of_range_id_honours_canceled_context() {
        let store = UserStore::in_memory().await.unwrap();

        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let ctx = OpContext::background().with_cancellation(token);

        let err = store.del_user(&ctx, u64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::Canceled));
    }

    #[tokio::test]
    async fn test_unique_violation_detected() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();
        store.add_user(&ctx, &test_user(2, "alice", 10)).await.unwrap();

        let err = sqlx::query(
            "INSERT INTO t_user (id, name, pwd, role, quota, preference) VALUES (3, 'alice', 'x', 'user', '{}', '{}')",
        )
        .execute(store.pool())
        .await
        .unwrap_err();
        assert!(is_unique_violation(&err));

        let err = sqlx::query("SELECT * FROM missing_table")
            .execute(store.pool())
            .await
            .unwrap_err();
        assert!(!is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_write_in_progress_blocks_readers() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();
        store.add_user(&ctx, &test_user(2, "alice", 100)).await.unwrap();

        // A write holding the guard with an uncommitted change
        let (guard, mut tx) = store.begin_write(&ctx).await.unwrap();
        sqlx::query("UPDATE t_user SET used_space = 99 WHERE id = 2")
            .execute(&mut *tx)
            .await
            .unwrap();

        let short = OpContext::background().with_timeout(Duration::from_millis(50));
        let err = store.get_user(&short, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));

        let short = OpContext::background().with_timeout(Duration::from_millis(50));
        let err = store.list_users(&short).await.unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));

        // Abandon the write: nothing was committed
        drop(tx);
        drop(guard);
        assert_eq!(store.get_user(&ctx, 2).await.unwrap().used_space, 0);
    }

    #[tokio::test]
    async fn test_readers_share_the_guard() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();
        store.add_user(&ctx, &test_user(2, "alice", 100)).await.unwrap();

        let held = store.guard.read().await;

        // Another reader gets in alongside the held read
        let short = OpContext::background().with_timeout(Duration::from_secs(5));
        assert_eq!(store.get_user(&short, 2).await.unwrap().name, "alice");
        assert_eq!(store.list_user_ids(&short).await.unwrap().len(), 1);

        drop(held);
    }

    #[tokio::test]
    async fn test_write_deadline_expires_waiting_for_guard() {
        let store = UserStore::in_memory().await.unwrap();
        let ctx = OpContext::background();
        store.add_user(&ctx, &test_user(2, "alice", 100)).await.unwrap();

        let held = store.guard.read().await;

        let short = OpContext::background().with_timeout(Duration::from_millis(50));
        let err = store
            .adjust_used(&short, 2, UsageDirection::Increase, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));

        let short = OpContext::background().with_timeout(Duration::from_millis(50));
        let err = store.reset_used(&short, 2, 7).await.unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));

        let short = OpContext::background().with_timeout(Duration::from_millis(50));
        let err = store.set_pwd(&short, 2, "other").await.unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));

        drop(held);

        let user = store.get_user(&ctx, 2).await.unwrap();
        assert_eq!(user.used_space, 0);
        assert_eq!(user.pwd, "hashed-pwd");

        // The timed-out writers left the guard usable
        assert_eq!(
            store
                .adjust_used(&ctx, 2, UsageDirection::Increase, 10)
                .await
                .unwrap(),
            10
        );
    }

    #[test]
    fn test_is_memory_url() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:users?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://users.db"));
    }
}
