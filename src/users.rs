//! ==============================================================================
//! users.rs - per-user credential files
//! ==============================================================================
//!
//! purpose:
//!     one json file per account under `<data_dir>/users/<username>.json`,
//!     holding the profile and a bcrypt password hash.
//!
//! notes:
//!     - usernames name files, so they are restricted to [A-Za-z0-9_.-]
//!     - hashing and file access block; async callers use spawn_blocking
//!
//! ==============================================================================

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_USERNAME_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum UserStoreError {
    #[error("user file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("user file is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("user not found")]
    NotFound,

    #[error("user already exists")]
    AlreadyExists,

    #[error("invalid username {0:?}")]
    InvalidUsername(String),
}

/// on-disk account record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "firstname")]
    pub first_name: String,
    #[serde(rename = "lastname")]
    pub last_name: String,
    pub username: String,
    pub email: String,
    /// bcrypt hash, never the plain password
    pub password: String,
    pub profile_picture: Option<String>,
}

/// what signup collects
#[derive(Clone, Debug, Default)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub profile_picture: Option<String>,
}

/// partial profile update; `None` leaves a field as is
#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
    pub profile_picture: Option<String>,
}

pub struct UserStore {
    dir: PathBuf,
    cost: u32,
}

impl UserStore {
    pub fn open<P: Into<PathBuf>>(dir: P, cost: u32) -> Result<Self, UserStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, cost })
    }

    fn path_for(&self, username: &str) -> Result<PathBuf, UserStoreError> {
        validate_username(username)?;
        Ok(self.dir.join(format!("{username}.json")))
    }

    pub fn get(&self, username: &str) -> Result<UserRecord, UserStoreError> {
        let path = self.path_for(username)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(UserStoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// the file is claimed with `create_new`, so of two signups racing for
    /// one username exactly one wins
    pub fn create(&self, user: NewUser) -> Result<UserRecord, UserStoreError> {
        let path = self.path_for(&user.username)?;
        let record = UserRecord {
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            email: user.email,
            password: bcrypt::hash(&user.password, self.cost)?,
            profile_picture: user.profile_picture,
        };
        let body = serde_json::to_vec_pretty(&record)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(UserStoreError::AlreadyExists)
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = file.write_all(&body).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(record)
    }

    /// Ok(None) when the user exists but the password does not match
    pub fn verify(&self, username: &str, password: &str) -> Result<Option<UserRecord>, UserStoreError> {
        let record = self.get(username)?;
        if bcrypt::verify(password, &record.password)? {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// apply `update`, returning the new record and the replaced picture path
    pub fn update(
        &self,
        username: &str,
        update: ProfileUpdate,
    ) -> Result<(UserRecord, Option<String>), UserStoreError> {
        let mut record = self.get(username)?;

        if let Some(first_name) = update.first_name.filter(|s| !s.is_empty()) {
            record.first_name = first_name;
        }
        if let Some(last_name) = update.last_name.filter(|s| !s.is_empty()) {
            record.last_name = last_name;
        }
        if let Some(password) = update.password.filter(|s| !s.trim().is_empty()) {
            record.password = bcrypt::hash(&password, self.cost)?;
        }
        let replaced = match update.profile_picture {
            Some(picture) => record.profile_picture.replace(picture),
            None => None,
        };

        self.write(&record)?;
        Ok((record, replaced))
    }

    fn write(&self, record: &UserRecord) -> Result<(), UserStoreError> {
        let path = self.path_for(&record.username)?;
        fs::write(path, serde_json::to_vec_pretty(record)?)?;
        Ok(())
    }
}

pub fn validate_username(username: &str) -> Result<(), UserStoreError> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && !username.starts_with('.')
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(UserStoreError::InvalidUsername(username.to_string()))
    }
}
