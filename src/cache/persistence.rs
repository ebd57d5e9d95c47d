//! Hooks that load and save cache snapshots around every store operation.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	cache::{AccessTokenEntry, CacheState, RefreshTokenEntry, StoreError},
};

/// Application hook bracketing every cache operation.
///
/// Both callbacks run while the cache lock is held, so a hook sees a consistent state and no
/// other operation interleaves between `before_access` and `after_access`.
pub trait CachePersistence
where
	Self: Send + Sync,
{
	/// Runs before the operation; typically loads the latest snapshot.
	fn before_access(&self, access: &mut CacheAccess<'_>) -> Result<(), StoreError>;

	/// Runs after the operation; typically saves when [`CacheAccess::has_state_changed`].
	fn after_access(&self, access: &mut CacheAccess<'_>) -> Result<(), StoreError>;
}

/// Access to the locked cache state handed to [`CachePersistence`] hooks.
pub struct CacheAccess<'a> {
	pub(crate) state: &'a mut CacheState,
}
impl CacheAccess<'_> {
	/// Serializes every entry into an opaque JSON snapshot.
	pub fn serialize(&self) -> Result<Vec<u8>, StoreError> {
		let snapshot = CacheSnapshot {
			access_tokens: self.state.access.values().cloned().collect(),
			refresh_tokens: self.state.refresh.values().cloned().collect(),
		};

		serde_json::to_vec(&snapshot).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize cache snapshot: {e}"),
		})
	}

	/// Replaces every entry with the snapshot in `bytes`.
	pub fn deserialize(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
		let snapshot: CacheSnapshot =
			serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse cache snapshot: {e}"),
			})?;

		self.state.access =
			snapshot.access_tokens.into_iter().map(|entry| (entry.key.clone(), entry)).collect();
		self.state.refresh =
			snapshot.refresh_tokens.into_iter().map(|entry| (entry.key.clone(), entry)).collect();

		Ok(())
	}

	/// Returns `true` when the current operation modified the cache.
	pub fn has_state_changed(&self) -> bool {
		self.state.changed
	}
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheSnapshot {
	#[serde(default)]
	access_tokens: Vec<AccessTokenEntry>,
	#[serde(default)]
	refresh_tokens: Vec<RefreshTokenEntry>,
}

/// Persists the cache as a JSON file, rewritten atomically after each mutation.
#[derive(Clone, Debug)]
pub struct FileCachePersistence {
	path: PathBuf,
}
impl FileCachePersistence {
	/// Uses `path` for the snapshot, creating its parent directory.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		Ok(Self { path })
	}

	/// Snapshot location.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
		if !self.path.exists() {
			return Ok(None);
		}

		let bytes = fs::read(&self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", self.path.display()),
		})?;

		Ok((!bytes.is_empty()).then_some(bytes))
	}

	fn persist(&self, bytes: &[u8]) -> Result<(), StoreError> {
		ensure_parent_exists(&self.path)?;

		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(bytes).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CachePersistence for FileCachePersistence {
	fn before_access(&self, access: &mut CacheAccess<'_>) -> Result<(), StoreError> {
		match self.load()? {
			Some(bytes) => access.deserialize(&bytes),
			None => Ok(()),
		}
	}

	fn after_access(&self, access: &mut CacheAccess<'_>) -> Result<(), StoreError> {
		if !access.has_state_changed() {
			return Ok(());
		}

		tracing::trace!(path = %self.path.display(), "Persisting token cache snapshot.");

		self.persist(&access.serialize()?)
	}
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create cache directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::{
		auth::{ClientId, Subject, TokenSecret, UserIdentifier},
		cache::{AccessTokenKey, CacheQuery, TokenCacheStore},
	};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"directory_token_broker_cache_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn file_snapshot_survives_a_new_store() {
		let path = temp_path();
		let persistence =
			Arc::new(FileCachePersistence::open(&path).expect("Snapshot path should open."));
		let store = TokenCacheStore::default().with_persistence(persistence.clone());
		let now = OffsetDateTime::now_utc();
		let key = AccessTokenKey {
			authority: "https://login.windows.net/contoso/".into(),
			resource: "https://graph.example.com".into(),
			client_id: "app-1".into(),
			subject: Subject::user("oid-1"),
			policy: None,
		};

		store
			.store(AccessTokenEntry {
				key,
				access_token: TokenSecret::new("at"),
				expires_on: now + Duration::hours(1),
				extended_expires_on: now + Duration::hours(1),
				id_token: None,
				user: None,
				tenant_id: None,
			})
			.expect("Entry should store.");

		let reopened = TokenCacheStore::default().with_persistence(persistence);
		let query = CacheQuery::user(
			"https://login.windows.net/contoso/",
			ClientId::new("app-1").expect("Client id fixture should be valid."),
			UserIdentifier::UniqueId("oid-1".into()),
		);
		let hit = reopened
			.find_access_token(&query, "https://graph.example.com", now)
			.expect("Lookup should succeed.")
			.expect("Persisted entry should be found.");

		assert_eq!(hit.access_token.expose(), "at");

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary cache snapshot {}: {e}", path.display())
		});
	}
}
