//! SQLite membership store.

use super::{CandidateSource, MembershipChange, MembershipDirectory};
use crate::config::DatabaseConfig;
use crate::error::{LookupError, MutationError, StoreError};
use async_trait::async_trait;
use memberlink_types::{
    Channel, ChannelId, GroupChannelLink, GroupId, GroupTeamLink, Principal, Scope, Team, TeamId,
    UserChannel, UserId, UserTeam, Watermark,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        is_bot INTEGER NOT NULL DEFAULT 0,
        delete_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        group_constrained INTEGER NOT NULL DEFAULT 0,
        delete_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS channels (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        name TEXT NOT NULL,
        group_constrained INTEGER NOT NULL DEFAULT 0,
        delete_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_groups (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        delete_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_members (
        group_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        create_at INTEGER NOT NULL,
        delete_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (group_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_teams (
        group_id TEXT NOT NULL,
        team_id TEXT NOT NULL,
        auto_add INTEGER NOT NULL DEFAULT 0,
        create_at INTEGER NOT NULL,
        update_at INTEGER NOT NULL,
        delete_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (group_id, team_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_channels (
        group_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        auto_add INTEGER NOT NULL DEFAULT 0,
        create_at INTEGER NOT NULL,
        update_at INTEGER NOT NULL,
        delete_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (group_id, channel_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_members (
        team_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        delete_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (team_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS channel_members (
        channel_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        PRIMARY KEY (channel_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS membership_removals (
        user_id TEXT NOT NULL,
        scope_kind TEXT NOT NULL,
        scope_id TEXT NOT NULL,
        removed_by TEXT NOT NULL,
        removed_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_channels_team ON channels(team_id)",
    "CREATE INDEX IF NOT EXISTS idx_channel_members_user ON channel_members(user_id)",
];

/// SQLite-backed membership store.
///
/// Implements both the candidate queries and the mutation primitives, plus
/// the seeding operations a group-provisioning connector would use. Uses WAL
/// mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `path` with default pool settings.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        Self::open(&DatabaseConfig {
            path: path.to_path_buf(),
            ..DatabaseConfig::default()
        })
        .await
    }

    /// Open (or create) a store as described by `config`.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let path = config.path.to_str().ok_or_else(|| StoreError::InvalidPath {
            path: config.path.clone(),
        })?;

        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection: every new :memory: connection is a new database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        }
        Ok(())
    }

    fn now() -> i64 {
        Watermark::now().as_millis()
    }

    // ----------------------------------------------------------------------
    // Seeding: the group-provisioning side of the store.
    // ----------------------------------------------------------------------

    /// Create or update a user.
    pub async fn upsert_user(
        &self,
        user_id: &UserId,
        username: &str,
        is_bot: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, is_bot, delete_at)
            VALUES (?1, ?2, ?3, 0)
            ON CONFLICT(id) DO UPDATE SET username = ?2, is_bot = ?3, delete_at = 0
            "#,
        )
        .bind(user_id.to_string())
        .bind(username)
        .bind(is_bot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a user deleted.
    pub async fn deactivate_user(&self, user_id: &UserId) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET delete_at = ?2 WHERE id = ?1")
            .bind(user_id.to_string())
            .bind(Self::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create or update a team.
    pub async fn upsert_team(&self, team: &Team) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO teams (id, name, group_constrained, delete_at)
            VALUES (?1, ?2, ?3, 0)
            ON CONFLICT(id) DO UPDATE SET name = ?2, group_constrained = ?3
            "#,
        )
        .bind(team.id.to_string())
        .bind(&team.name)
        .bind(team.group_constrained)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Archive a team.
    pub async fn archive_team(&self, team_id: &TeamId) -> Result<(), StoreError> {
        sqlx::query("UPDATE teams SET delete_at = ?2 WHERE id = ?1")
            .bind(team_id.to_string())
            .bind(Self::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create or update a channel.
    pub async fn upsert_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channels (id, team_id, name, group_constrained, delete_at)
            VALUES (?1, ?2, ?3, ?4, 0)
            ON CONFLICT(id) DO UPDATE SET team_id = ?2, name = ?3, group_constrained = ?4
            "#,
        )
        .bind(channel.id.to_string())
        .bind(channel.team_id.to_string())
        .bind(&channel.name)
        .bind(channel.group_constrained)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Archive a channel.
    pub async fn archive_channel(&self, channel_id: &ChannelId) -> Result<(), StoreError> {
        sqlx::query("UPDATE channels SET delete_at = ?2 WHERE id = ?1")
            .bind(channel_id.to_string())
            .bind(Self::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create or update a group.
    pub async fn upsert_group(&self, group_id: &GroupId, name: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_groups (id, name, delete_at)
            VALUES (?1, ?2, 0)
            ON CONFLICT(id) DO UPDATE SET name = ?2, delete_at = 0
            "#,
        )
        .bind(group_id.to_string())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a group deleted. Its memberships and links stop counting.
    pub async fn delete_group(&self, group_id: &GroupId) -> Result<(), StoreError> {
        sqlx::query("UPDATE user_groups SET delete_at = ?2 WHERE id = ?1")
            .bind(group_id.to_string())
            .bind(Self::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record that `user_id` joined `group_id` at `at`.
    ///
    /// Re-joining after a removal resets the join time.
    pub async fn add_group_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
        at: Watermark,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, create_at, delete_at)
            VALUES (?1, ?2, ?3, 0)
            ON CONFLICT(group_id, user_id) DO UPDATE SET create_at = ?3, delete_at = 0
            WHERE group_members.delete_at != 0
            "#,
        )
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .bind(at.as_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that `user_id` left `group_id`.
    pub async fn remove_group_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE group_members SET delete_at = ?3 WHERE group_id = ?1 AND user_id = ?2",
        )
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link a group to a team, or update an existing link.
    pub async fn link_team(&self, link: &GroupTeamLink, at: Watermark) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO group_teams (group_id, team_id, auto_add, create_at, update_at, delete_at)
            VALUES (?1, ?2, ?3, ?4, ?4, 0)
            ON CONFLICT(group_id, team_id) DO UPDATE SET auto_add = ?3, update_at = ?4, delete_at = 0
            "#,
        )
        .bind(link.group_id.to_string())
        .bind(link.team_id.to_string())
        .bind(link.auto_add)
        .bind(at.as_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a group-team link.
    pub async fn unlink_team(&self, group_id: &GroupId, team_id: &TeamId) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE group_teams SET delete_at = ?3, update_at = ?3 WHERE group_id = ?1 AND team_id = ?2",
        )
        .bind(group_id.to_string())
        .bind(team_id.to_string())
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link a group to a channel, or update an existing link.
    pub async fn link_channel(
        &self,
        link: &GroupChannelLink,
        at: Watermark,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO group_channels (group_id, channel_id, auto_add, create_at, update_at, delete_at)
            VALUES (?1, ?2, ?3, ?4, ?4, 0)
            ON CONFLICT(group_id, channel_id) DO UPDATE SET auto_add = ?3, update_at = ?4, delete_at = 0
            "#,
        )
        .bind(link.group_id.to_string())
        .bind(link.channel_id.to_string())
        .bind(link.auto_add)
        .bind(at.as_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a group-channel link.
    pub async fn unlink_channel(
        &self,
        group_id: &GroupId,
        channel_id: &ChannelId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE group_channels SET delete_at = ?3, update_at = ?3 WHERE group_id = ?1 AND channel_id = ?2",
        )
        .bind(group_id.to_string())
        .bind(channel_id.to_string())
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Inspection
    // ----------------------------------------------------------------------

    /// True if the user has a live membership in the team.
    pub async fn is_team_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM team_members WHERE team_id = ?1 AND user_id = ?2 AND delete_at = 0",
        )
        .bind(team_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// True if the user is a member of the channel.
    pub async fn is_channel_member(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
        )
        .bind(channel_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Who most recently removed `user_id` from `scope`, if anyone.
    pub async fn removed_by(
        &self,
        user_id: &UserId,
        scope: &Scope,
    ) -> Result<Option<String>, StoreError> {
        let (kind, id) = scope_key(scope);
        let actor: Option<String> = sqlx::query_scalar(
            r#"
            SELECT removed_by FROM membership_removals
            WHERE user_id = ?1 AND scope_kind = ?2 AND scope_id = ?3
            ORDER BY rowid DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.to_string())
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(actor)
    }

    /// Fail with `NotFound`/`Archived` unless the row exists and is live.
    async fn require_live(
        &self,
        table: &'static str,
        entity: &'static str,
        id: String,
    ) -> Result<(), MutationError> {
        let sql = format!("SELECT delete_at FROM {} WHERE id = ?1", table);
        let delete_at: Option<i64> = sqlx::query_scalar(&sql)
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;

        match delete_at {
            None => Err(MutationError::NotFound { entity, id }),
            Some(0) => Ok(()),
            Some(_) => Err(MutationError::Archived { entity, id }),
        }
    }

    async fn fetch_pairs(&self, sql: &str, since: Option<Watermark>) -> Result<Vec<PairRow>, StoreError> {
        let mut query = sqlx::query_as::<_, PairRow>(sql);
        if let Some(since) = since {
            query = query.bind(since.as_millis());
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl CandidateSource for SqliteStore {
    async fn pending_auto_add_team_members(
        &self,
        since: Watermark,
    ) -> Result<Vec<UserTeam>, StoreError> {
        let rows = self
            .fetch_pairs(
                r#"
                SELECT DISTINCT gm.user_id AS user_id, gt.team_id AS target_id
                FROM group_members gm
                JOIN group_teams gt ON gt.group_id = gm.group_id
                JOIN user_groups g ON g.id = gm.group_id
                JOIN teams t ON t.id = gt.team_id
                JOIN users u ON u.id = gm.user_id
                LEFT JOIN team_members tm
                    ON tm.team_id = gt.team_id AND tm.user_id = gm.user_id AND tm.delete_at = 0
                WHERE tm.user_id IS NULL
                  AND gt.auto_add = 1
                  AND gm.delete_at = 0 AND gt.delete_at = 0 AND g.delete_at = 0
                  AND t.delete_at = 0
                  AND u.delete_at = 0 AND u.is_bot = 0
                  AND (gm.create_at >= ?1 OR gt.update_at >= ?1)
                ORDER BY gt.team_id, gm.user_id
                "#,
                Some(since),
            )
            .await?;

        rows.into_iter().map(PairRow::into_user_team).collect()
    }

    async fn pending_auto_add_channel_members(
        &self,
        since: Watermark,
    ) -> Result<Vec<UserChannel>, StoreError> {
        let rows = self
            .fetch_pairs(
                r#"
                SELECT DISTINCT gm.user_id AS user_id, gc.channel_id AS target_id
                FROM group_members gm
                JOIN group_channels gc ON gc.group_id = gm.group_id
                JOIN user_groups g ON g.id = gm.group_id
                JOIN channels c ON c.id = gc.channel_id
                JOIN teams t ON t.id = c.team_id
                JOIN users u ON u.id = gm.user_id
                LEFT JOIN channel_members cm
                    ON cm.channel_id = gc.channel_id AND cm.user_id = gm.user_id
                WHERE cm.user_id IS NULL
                  AND gc.auto_add = 1
                  AND gm.delete_at = 0 AND gc.delete_at = 0 AND g.delete_at = 0
                  AND c.delete_at = 0 AND t.delete_at = 0
                  AND u.delete_at = 0 AND u.is_bot = 0
                  AND (gm.create_at >= ?1 OR gc.update_at >= ?1)
                ORDER BY gc.channel_id, gm.user_id
                "#,
                Some(since),
            )
            .await?;

        rows.into_iter().map(PairRow::into_user_channel).collect()
    }

    async fn pending_team_member_removals(&self) -> Result<Vec<UserTeam>, StoreError> {
        let rows = self
            .fetch_pairs(
                r#"
                SELECT tm.user_id AS user_id, tm.team_id AS target_id
                FROM team_members tm
                JOIN teams t ON t.id = tm.team_id
                JOIN users u ON u.id = tm.user_id
                WHERE tm.delete_at = 0
                  AND t.delete_at = 0 AND t.group_constrained = 1
                  AND u.is_bot = 0
                  AND NOT EXISTS (
                      SELECT 1
                      FROM group_members gm
                      JOIN group_teams gt ON gt.group_id = gm.group_id
                      JOIN user_groups g ON g.id = gm.group_id
                      WHERE gt.team_id = tm.team_id
                        AND gm.user_id = tm.user_id
                        AND gm.delete_at = 0 AND gt.delete_at = 0 AND g.delete_at = 0
                  )
                ORDER BY tm.team_id, tm.user_id
                "#,
                None,
            )
            .await?;

        rows.into_iter().map(PairRow::into_user_team).collect()
    }

    async fn pending_channel_member_removals(&self) -> Result<Vec<UserChannel>, StoreError> {
        let rows = self
            .fetch_pairs(
                r#"
                SELECT cm.user_id AS user_id, cm.channel_id AS target_id
                FROM channel_members cm
                JOIN channels c ON c.id = cm.channel_id
                JOIN teams t ON t.id = c.team_id
                JOIN users u ON u.id = cm.user_id
                WHERE c.delete_at = 0 AND c.group_constrained = 1
                  AND t.delete_at = 0
                  AND u.is_bot = 0
                  AND NOT EXISTS (
                      SELECT 1
                      FROM group_members gm
                      JOIN group_channels gc ON gc.group_id = gm.group_id
                      JOIN user_groups g ON g.id = gm.group_id
                      WHERE gc.channel_id = cm.channel_id
                        AND gm.user_id = cm.user_id
                        AND gm.delete_at = 0 AND gc.delete_at = 0 AND g.delete_at = 0
                  )
                ORDER BY cm.channel_id, cm.user_id
                "#,
                None,
            )
            .await?;

        rows.into_iter().map(PairRow::into_user_channel).collect()
    }
}

#[async_trait]
impl MembershipDirectory for SqliteStore {
    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel, LookupError> {
        let row = sqlx::query_as::<_, ChannelRow>(
            "SELECT id, team_id, name, group_constrained FROM channels WHERE id = ?1",
        )
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_into()?),
            None => Err(LookupError::ChannelNotFound(*channel_id)),
        }
    }

    async fn add_team_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
    ) -> Result<MembershipChange, MutationError> {
        self.require_live("teams", "team", team_id.to_string())
            .await?;
        self.require_live("users", "user", user_id.to_string())
            .await?;

        // Revives a soft-deleted row; leaves a live row untouched.
        let result = sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, delete_at)
            VALUES (?1, ?2, 0)
            ON CONFLICT(team_id, user_id) DO UPDATE SET delete_at = 0
            WHERE team_members.delete_at != 0
            "#,
        )
        .bind(team_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(change_from_rows(result.rows_affected()))
    }

    async fn add_channel_member(
        &self,
        user_id: &UserId,
        channel: &Channel,
    ) -> Result<MembershipChange, MutationError> {
        self.require_live("channels", "channel", channel.id.to_string())
            .await?;
        self.require_live("users", "user", user_id.to_string())
            .await?;

        // The team check and the insert are one statement, so a concurrent
        // team removal cannot leave a channel row behind.
        let result = sqlx::query(
            r#"
            INSERT INTO channel_members (channel_id, user_id)
            SELECT ?1, ?2
            WHERE EXISTS (
                SELECT 1 FROM team_members
                WHERE team_id = ?3 AND user_id = ?2 AND delete_at = 0
            )
            ON CONFLICT(channel_id, user_id) DO NOTHING
            "#,
        )
        .bind(channel.id.to_string())
        .bind(user_id.to_string())
        .bind(channel.team_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(MembershipChange::Applied);
        }

        let on_team = self
            .is_team_member(&channel.team_id, user_id)
            .await
            .map_err(|e| match e {
                StoreError::Database(db) => MutationError::Database(db),
                other => MutationError::Unavailable(other.to_string()),
            })?;
        if !on_team {
            return Err(MutationError::NotTeamMember {
                user_id: *user_id,
                team_id: channel.team_id,
            });
        }

        Ok(MembershipChange::Unchanged)
    }

    async fn remove_channel_member(
        &self,
        acting: &Principal,
        user_id: &UserId,
        channel: &Channel,
    ) -> Result<MembershipChange, MutationError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2")
            .bind(channel.id.to_string())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let change = change_from_rows(result.rows_affected());
        if change == MembershipChange::Applied {
            record_removal(&mut tx, user_id, &Scope::Channel(channel.id), acting).await?;
        }

        tx.commit().await?;
        Ok(change)
    }

    async fn remove_team_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
        requestor: &Principal,
    ) -> Result<MembershipChange, MutationError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE team_members SET delete_at = ?3 WHERE team_id = ?1 AND user_id = ?2 AND delete_at = 0",
        )
        .bind(team_id.to_string())
        .bind(user_id.to_string())
        .bind(Self::now())
        .execute(&mut *tx)
        .await?;

        let change = change_from_rows(result.rows_affected());
        if change == MembershipChange::Applied {
            // Leaving a team leaves every channel in it.
            let channel_ids: Vec<String> = sqlx::query_scalar(
                r#"
                DELETE FROM channel_members
                WHERE user_id = ?1
                  AND channel_id IN (SELECT id FROM channels WHERE team_id = ?2)
                RETURNING channel_id
                "#,
            )
            .bind(user_id.to_string())
            .bind(team_id.to_string())
            .fetch_all(&mut *tx)
            .await?;

            for channel_id in channel_ids {
                let channel_id: ChannelId = parse_id("channel_id", channel_id)
                    .map_err(|e| MutationError::Unavailable(e.to_string()))?;
                record_removal(&mut tx, user_id, &Scope::Channel(channel_id), requestor).await?;
            }

            record_removal(&mut tx, user_id, &Scope::Team(*team_id), requestor).await?;
        }

        tx.commit().await?;
        Ok(change)
    }
}

fn change_from_rows(rows: u64) -> MembershipChange {
    if rows > 0 {
        MembershipChange::Applied
    } else {
        MembershipChange::Unchanged
    }
}

fn scope_key(scope: &Scope) -> (&'static str, String) {
    match scope {
        Scope::Team(id) => ("team", id.to_string()),
        Scope::Channel(id) => ("channel", id.to_string()),
    }
}

async fn record_removal(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &UserId,
    scope: &Scope,
    actor: &Principal,
) -> Result<(), sqlx::Error> {
    let (kind, id) = scope_key(scope);
    sqlx::query(
        r#"
        INSERT INTO membership_removals (user_id, scope_kind, scope_id, removed_by, removed_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(user_id.to_string())
    .bind(kind)
    .bind(id)
    .bind(actor.as_str())
    .bind(SqliteStore::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_id<T: FromStr>(column: &'static str, value: String) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::CorruptRow { column, value })
}

/// Internal row type for `(user, team|channel)` candidate queries.
#[derive(sqlx::FromRow)]
struct PairRow {
    user_id: String,
    target_id: String,
}

impl PairRow {
    fn into_user_team(self) -> Result<UserTeam, StoreError> {
        Ok(UserTeam {
            user_id: parse_id("user_id", self.user_id)?,
            team_id: parse_id("team_id", self.target_id)?,
        })
    }

    fn into_user_channel(self) -> Result<UserChannel, StoreError> {
        Ok(UserChannel {
            user_id: parse_id("user_id", self.user_id)?,
            channel_id: parse_id("channel_id", self.target_id)?,
        })
    }
}

/// Internal row type for channel lookups.
#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: String,
    team_id: String,
    name: String,
    group_constrained: bool,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = StoreError;

    fn try_from(row: ChannelRow) -> Result<Self, Self::Error> {
        Ok(Channel {
            id: parse_id("channel_id", row.id)?,
            team_id: parse_id("team_id", row.team_id)?,
            name: row.name,
            group_constrained: row.group_constrained,
        })
    }
}
