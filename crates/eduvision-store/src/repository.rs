//! SQLite-backed user and attendance storage.
//!
//! Attendance times are stored as unix milliseconds. Deleting a user removes
//! their attendance rows with them.

use chrono::{DateTime, Utc};
use eduvision_core::UserId;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored timestamp {0} is out of range")]
    BadTimestamp(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub surname: String,
    pub patronymic: String,
    pub group: String,
    pub photo_path: String,
}

impl User {
    /// "Name Surname Group", as shown in the recognition feed.
    pub fn display_name(&self) -> String {
        format!("{} {} {}", self.name, self.surname, self.group)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub surname: String,
    pub patronymic: String,
    pub group: String,
    pub photo_path: String,
}

const USER_COLUMNS: &str = "id, name, surname, patronymic, group_name, photo_path";

pub struct UserRepository {
    conn: Mutex<Connection>,
}

impl UserRepository {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.lock().execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS users (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              surname TEXT NOT NULL,
              patronymic TEXT NOT NULL DEFAULT '',
              group_name TEXT NOT NULL,
              photo_path TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS attendance (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
              at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_group ON users(group_name);
            CREATE INDEX IF NOT EXISTS idx_attendance_user_at ON attendance(user_id, at);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users(name, surname, patronymic, group_name, photo_path) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.name, user.surname, user.patronymic, user.group, user.photo_path],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(user_id = id, group = %user.group, "user created");
        Ok(User {
            id,
            name: user.name,
            surname: user.surname,
            patronymic: user.patronymic,
            group: user.group,
            photo_path: user.photo_path,
        })
    }

    pub fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let user = self.lock().query_row(&sql, params![id], user_from_row).optional()?;
        Ok(user)
    }

    /// First user (lowest id) with this name and surname.
    pub fn find_by_full_name(&self, name: &str, surname: &str) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE name = ?1 AND surname = ?2 ORDER BY id LIMIT 1"
        );
        let user = self
            .lock()
            .query_row(&sql, params![name, surname], user_from_row)
            .optional()?;
        Ok(user)
    }

    pub fn all_by_group(&self, group: &str) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE group_name = ?1 ORDER BY surname, name, id");
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![group], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn all(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt.query_map([], user_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn all_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id")?;
        let ids = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Delete a user and their attendance. Returns false if no such user.
    pub fn remove(&self, id: UserId) -> Result<bool, StoreError> {
        let removed = self.lock().execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if removed > 0 {
            tracing::info!(user_id = id, "user removed");
        }
        Ok(removed > 0)
    }

    /// Delete every user and all attendance.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        conn.execute("DELETE FROM attendance", [])?;
        let removed = conn.execute("DELETE FROM users", [])?;
        tracing::warn!(users = removed, "user table cleared");
        Ok(removed)
    }

    /// Insert an attendance row. Returns false, writing nothing, if the
    /// user does not exist.
    pub fn record_attendance(&self, user_id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let exists = tx
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![user_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO attendance(user_id, at) VALUES (?1, ?2)",
            params![user_id, at.timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn last_attendance(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let millis: Option<i64> = self.lock().query_row(
            "SELECT MAX(at) FROM attendance WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        millis.map(timestamp).transpose()
    }

    /// Every attendance time for `user_id`, oldest first.
    pub fn attendance_for(&self, user_id: UserId) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT at FROM attendance WHERE user_id = ?1 ORDER BY at, id")?;
        let millis = stmt
            .query_map(params![user_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        millis.into_iter().map(timestamp).collect()
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        surname: row.get(2)?,
        patronymic: row.get(3)?,
        group: row.get(4)?,
        photo_path: row.get(5)?,
    })
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or(StoreError::BadTimestamp(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn student(name: &str, surname: &str, group: &str) -> NewUser {
        NewUser {
            name: name.into(),
            surname: surname.into(),
            group: group.into(),
            ..NewUser::default()
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn test_create_and_find() {
        let repo = UserRepository::open_in_memory().unwrap();
        let ivan = repo.create(student("Ivan", "Petrov", "IVT-21")).unwrap();
        repo.create(student("Anna", "Sidorova", "IVT-21")).unwrap();
        repo.create(student("Oleg", "Ivanov", "PI-22")).unwrap();

        assert_eq!(repo.find_by_id(ivan.id).unwrap(), Some(ivan.clone()));
        assert_eq!(repo.find_by_id(999).unwrap(), None);
        assert_eq!(repo.find_by_full_name("Ivan", "Petrov").unwrap(), Some(ivan.clone()));
        assert_eq!(repo.find_by_full_name("Ivan", "Nobody").unwrap(), None);
        assert_eq!(ivan.display_name(), "Ivan Petrov IVT-21");

        let group: Vec<_> = repo.all_by_group("IVT-21").unwrap().into_iter().map(|u| u.surname).collect();
        assert_eq!(group, vec!["Petrov", "Sidorova"]);
        assert_eq!(repo.all().unwrap().len(), 3);
        assert_eq!(repo.all_ids().unwrap().len(), 3);
    }

    #[test]
    fn test_attendance_round_trip_in_order() {
        let repo = UserRepository::open_in_memory().unwrap();
        let u = repo.create(student("Ivan", "Petrov", "IVT-21")).unwrap();

        assert_eq!(repo.last_attendance(u.id).unwrap(), None);
        assert!(repo.record_attendance(u.id, at(11, 0)).unwrap());
        assert!(repo.record_attendance(u.id, at(9, 0)).unwrap());

        assert_eq!(repo.attendance_for(u.id).unwrap(), vec![at(9, 0), at(11, 0)]);
        assert_eq!(repo.last_attendance(u.id).unwrap(), Some(at(11, 0)));
    }

    #[test]
    fn test_attendance_keeps_sub_second_precision() {
        let repo = UserRepository::open_in_memory().unwrap();
        let u = repo.create(student("Ivan", "Petrov", "IVT-21")).unwrap();
        let marked = at(9, 0) + Duration::milliseconds(999);

        assert!(repo.record_attendance(u.id, marked).unwrap());
        assert_eq!(repo.last_attendance(u.id).unwrap(), Some(marked));
        // A cooldown measured from the stored time must not end early.
        assert!(at(9, 5) - repo.last_attendance(u.id).unwrap().unwrap() < Duration::minutes(5));
    }

    #[test]
    fn test_attendance_for_unknown_user_is_rejected() {
        let repo = UserRepository::open_in_memory().unwrap();
        assert!(!repo.record_attendance(7, at(9, 0)).unwrap());
        assert!(repo.attendance_for(7).unwrap().is_empty());
    }

    #[test]
    fn test_remove_cascades_attendance() {
        let repo = UserRepository::open_in_memory().unwrap();
        let u = repo.create(student("Ivan", "Petrov", "IVT-21")).unwrap();
        repo.record_attendance(u.id, at(9, 0)).unwrap();

        assert!(repo.remove(u.id).unwrap());
        assert!(!repo.remove(u.id).unwrap());
        assert!(repo.attendance_for(u.id).unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let repo = UserRepository::open_in_memory().unwrap();
        let u = repo.create(student("Ivan", "Petrov", "IVT-21")).unwrap();
        repo.create(student("Anna", "Sidorova", "IVT-21")).unwrap();
        repo.record_attendance(u.id, at(9, 0)).unwrap();

        assert_eq!(repo.clear().unwrap(), 2);
        assert!(repo.all().unwrap().is_empty());
        assert_eq!(repo.last_attendance(u.id).unwrap(), None);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attendance.db");
        let id = {
            let repo = UserRepository::open(&path).unwrap();
            let u = repo.create(student("Ivan", "Petrov", "IVT-21")).unwrap();
            repo.record_attendance(u.id, at(9, 0) + Duration::seconds(1)).unwrap();
            u.id
        };
        let repo = UserRepository::open(&path).unwrap();
        assert_eq!(repo.find_by_id(id).unwrap().unwrap().name, "Ivan");
        assert_eq!(repo.attendance_for(id).unwrap(), vec![at(9, 0) + Duration::seconds(1)]);
    }
}
