//! User directory: the profile source conditions and delays read from.

use crate::models::UserProfile;
use anyhow::Result;
use nurture_storage::time_utils;
use parking_lot::RwLock;
use redb::Database;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read/write access to user profiles.
pub trait UserDirectory: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<UserProfile>>;

    fn upsert(&self, profile: &UserProfile) -> Result<()>;

    /// Read-modify-write a profile, creating an empty one when missing.
    fn update(&self, user_id: &str, apply: &mut dyn FnMut(&mut UserProfile)) -> Result<UserProfile>;

    fn list(&self) -> Result<Vec<UserProfile>>;

    fn list_in_segment(&self, segment_id: &str) -> Result<Vec<UserProfile>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|profile| profile.in_segment(segment_id))
            .collect())
    }
}

/// redb-backed directory around nurture-storage::UserProfileStorage.
#[derive(Debug, Clone)]
pub struct UserProfileStore {
    inner: nurture_storage::UserProfileStorage,
}

impl UserProfileStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: nurture_storage::UserProfileStorage::new(db)?,
        })
    }

    pub fn delete(&self, user_id: &str) -> Result<bool> {
        self.inner.delete(user_id)
    }
}

impl UserDirectory for UserProfileStore {
    fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        match self.inner.get_raw(user_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, profile: &UserProfile) -> Result<()> {
        let bytes = serde_json::to_vec(profile)?;
        self.inner.put_raw(&profile.user_id, &bytes)
    }

    fn update(&self, user_id: &str, apply: &mut dyn FnMut(&mut UserProfile)) -> Result<UserProfile> {
        let mut updated = None;
        self.inner.update_raw(user_id, |current| {
            let mut profile = match current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => UserProfile::new(user_id),
            };
            apply(&mut profile);
            profile.updated_at = time_utils::now_ms();
            let bytes = serde_json::to_vec(&profile)?;
            updated = Some(profile);
            Ok(Some(bytes))
        })?;
        updated.ok_or_else(|| anyhow::anyhow!("Update of user {} produced no profile", user_id))
    }

    fn list(&self) -> Result<Vec<UserProfile>> {
        let mut profiles = Vec::new();
        for (_, bytes) in self.inner.list_raw()? {
            profiles.push(serde_json::from_slice(&bytes)?);
        }
        Ok(profiles)
    }
}

/// Process-local directory, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    profiles: RwLock<BTreeMap<String, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            profiles: RwLock::new(
                profiles
                    .into_iter()
                    .map(|profile| (profile.user_id.clone(), profile))
                    .collect(),
            ),
        }
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().get(user_id).cloned())
    }

    fn upsert(&self, profile: &UserProfile) -> Result<()> {
        self.profiles
            .write()
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    fn update(&self, user_id: &str, apply: &mut dyn FnMut(&mut UserProfile)) -> Result<UserProfile> {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id));
        apply(profile);
        profile.updated_at = time_utils::now_ms();
        Ok(profile.clone())
    }

    fn list(&self) -> Result<Vec<UserProfile>> {
        Ok(self.profiles.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn exercise(directory: &dyn UserDirectory) {
        let mut alice = UserProfile::new("alice").with_lifecycle("Trial");
        alice.segments.insert("beta".to_string());
        directory.upsert(&alice).unwrap();

        let updated = directory
            .update("alice", &mut |profile| {
                profile.tags.insert("vip".to_string());
                profile.properties.insert("plan".to_string(), json!("pro"));
            })
            .unwrap();
        assert!(updated.tags.contains("vip"));
        assert_eq!(updated.lifecycle_state.as_deref(), Some("Trial"));

        let created = directory
            .update("bob", &mut |profile| {
                profile.lifecycle_state = Some("Active".to_string())
            })
            .unwrap();
        assert_eq!(created.user_id, "bob");

        assert_eq!(directory.list().unwrap().len(), 2);
        let beta = directory.list_in_segment("beta").unwrap();
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].user_id, "alice");
        assert_eq!(
            directory.get("alice").unwrap().unwrap().properties["plan"],
            json!("pro")
        );
        assert!(directory.get("carol").unwrap().is_none());
    }

    #[test]
    fn test_redb_directory() {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let store = UserProfileStore::new(db).unwrap();
        exercise(&store);
        assert!(store.delete("bob").unwrap());
    }

    #[test]
    fn test_in_memory_directory() {
        exercise(&InMemoryUserDirectory::new());
    }
}
