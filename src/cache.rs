//! Offline token cache with multi-resource refresh token matching.
//!
//! Access tokens are keyed by (authority, resource, client, subject, policy); refresh tokens by
//! (authority, client, subject) so one refresh token can serve every resource it is valid for.
//! Every operation runs under one lock, including the optional [`CachePersistence`] hooks.

pub mod entry;
pub mod persistence;

pub use entry::*;
pub use persistence::*;

// std
use std::collections::HashSet;
// self
use crate::{_prelude::*, auth::Subject, config::DEFAULT_CLOCK_SKEW_SECS};

/// Lookup failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CacheError {
	/// The query matched tokens of more than one user.
	#[error("The cache holds tokens for {count} users; specify which user to use.")]
	MultipleUsersMatched {
		/// Number of distinct users matched.
		count: usize,
	},
}

/// Persistence hook and snapshot failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Snapshot could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backing storage failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[derive(Debug, Default)]
pub(crate) struct CacheState {
	pub(crate) access: HashMap<AccessTokenKey, AccessTokenEntry>,
	pub(crate) refresh: HashMap<RefreshTokenKey, RefreshTokenEntry>,
	pub(crate) changed: bool,
}

/// Token cache shared by every flow of a client.
pub struct TokenCacheStore {
	state: Mutex<CacheState>,
	clock_skew: Duration,
	persistence: Option<Arc<dyn CachePersistence>>,
}
impl TokenCacheStore {
	/// Creates an empty cache with the given expiry tolerance.
	pub fn new(clock_skew: Duration) -> Self {
		Self { state: Default::default(), clock_skew, persistence: None }
	}

	/// Attaches a persistence hook.
	pub fn with_persistence(mut self, persistence: Arc<dyn CachePersistence>) -> Self {
		self.persistence = Some(persistence);

		self
	}

	/// Expiry tolerance applied to access tokens.
	pub fn clock_skew(&self) -> Duration {
		self.clock_skew
	}

	/// Returns the fresh access token matching `query` and `resource`.
	///
	/// Entries with `expires_on - clock_skew <= now` are skipped but kept.
	pub fn find_access_token(
		&self,
		query: &CacheQuery,
		resource: &str,
		now: OffsetDateTime,
	) -> Result<Option<AccessTokenEntry>> {
		let skew = self.clock_skew;

		self.with_state(|state| {
			Ok(single_user_match(state.access.values().filter(|entry| {
				query.matches_access(&entry.key, resource)
					&& query.matches_subject(&entry.key.subject, entry.user.as_ref())
			}))?
			.filter(|entry| entry.is_fresh(now, skew))
			.cloned())
		})
	}

	/// Returns an expired access token still inside its extended lifetime.
	pub fn find_stale_access_token(
		&self,
		query: &CacheQuery,
		resource: &str,
		now: OffsetDateTime,
	) -> Result<Option<AccessTokenEntry>> {
		let skew = self.clock_skew;

		self.with_state(|state| {
			Ok(single_user_match(state.access.values().filter(|entry| {
				query.matches_access(&entry.key, resource)
					&& query.matches_subject(&entry.key.subject, entry.user.as_ref())
			}))?
			.filter(|entry| entry.is_stale_but_extended(now, skew))
			.cloned())
		})
	}

	/// Returns the client's own refresh token for the queried subject, whatever resource it was
	/// minted for.
	pub fn find_refresh_token(&self, query: &CacheQuery) -> Result<Option<RefreshTokenEntry>> {
		self.with_state(|state| {
			Ok(single_user_match(state.refresh.values().filter(|entry| {
				query.matches_refresh(&entry.key)
					&& query.matches_subject(&entry.key.subject, entry.user.as_ref())
			}))?
			.cloned())
		})
	}

	/// Returns a refresh token of `family_id` issued to another client for the queried subject.
	pub fn find_family_refresh_token(
		&self,
		query: &CacheQuery,
		family_id: &str,
	) -> Result<Option<RefreshTokenEntry>> {
		self.with_state(|state| {
			Ok(single_user_match(state.refresh.values().filter(|entry| {
				entry.key.authority == query.authority
					&& entry.key.client_id != query.client_id.as_ref()
					&& entry.family_id.as_deref() == Some(family_id)
					&& query.matches_subject(&entry.key.subject, entry.user.as_ref())
			}))?
			.cloned())
		})
	}

	/// Inserts or replaces one entry.
	pub fn store(&self, entry: impl Into<CacheEntry>) -> Result<()> {
		self.store_all([entry.into()])
	}

	/// Inserts or replaces several entries in one locked operation.
	///
	/// Access tokens past their extended expiry are evicted on the way.
	pub fn store_all(&self, entries: impl IntoIterator<Item = CacheEntry>) -> Result<()> {
		let now = OffsetDateTime::now_utc();

		self.with_state(|state| {
			for entry in entries {
				match entry {
					CacheEntry::Access(entry) => {
						state.access.insert(entry.key.clone(), entry);
					},
					CacheEntry::Refresh(entry) => {
						state.refresh.insert(entry.key.clone(), entry);
					},
				}
			}

			evict_expired(state, now);

			state.changed = true;

			Ok(())
		})
	}

	/// Removes one entry, returning whether it existed.
	pub fn remove(&self, key: &CacheKey) -> Result<bool> {
		self.with_state(|state| {
			let removed = match key {
				CacheKey::Access(key) => state.access.remove(key).is_some(),
				CacheKey::Refresh(key) => state.refresh.remove(key).is_some(),
			};

			state.changed |= removed;

			Ok(removed)
		})
	}

	/// Drops every entry.
	pub fn clear(&self) -> Result<()> {
		self.with_state(|state| {
			state.access.clear();
			state.refresh.clear();
			state.changed = true;

			Ok(())
		})
	}

	/// Evicts access tokens past their extended expiry, returning how many were dropped.
	pub fn prune(&self, now: OffsetDateTime) -> Result<usize> {
		self.with_state(|state| {
			let evicted = evict_expired(state, now);

			state.changed |= evicted > 0;

			Ok(evicted)
		})
	}

	/// Total number of access and refresh entries.
	pub fn len(&self) -> Result<usize> {
		self.with_state(|state| Ok(state.access.len() + state.refresh.len()))
	}

	/// Returns `true` when the cache holds nothing.
	pub fn is_empty(&self) -> Result<bool> {
		self.len().map(|len| len == 0)
	}

	fn with_state<T, F>(&self, op: F) -> Result<T>
	where
		F: FnOnce(&mut CacheState) -> Result<T>,
	{
		let mut state = self.state.lock();

		if let Some(persistence) = &self.persistence {
			persistence.before_access(&mut CacheAccess { state: &mut state })?;
		}

		state.changed = false;

		let output = op(&mut state);

		if let Some(persistence) = &self.persistence {
			persistence.after_access(&mut CacheAccess { state: &mut state })?;
		}

		output
	}
}
impl Default for TokenCacheStore {
	fn default() -> Self {
		Self::new(Duration::seconds(i64::from(DEFAULT_CLOCK_SKEW_SECS)))
	}
}
impl Debug for TokenCacheStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("TokenCacheStore")
			.field("access_tokens", &state.access.len())
			.field("refresh_tokens", &state.refresh.len())
			.field("clock_skew", &self.clock_skew)
			.field("persistent", &self.persistence.is_some())
			.finish()
	}
}

trait SubjectEntry {
	fn subject(&self) -> &Subject;
}
impl SubjectEntry for AccessTokenEntry {
	fn subject(&self) -> &Subject {
		&self.key.subject
	}
}
impl SubjectEntry for RefreshTokenEntry {
	fn subject(&self) -> &Subject {
		&self.key.subject
	}
}

// Returns the first match when every match belongs to one subject.
fn single_user_match<'a, E>(
	matches: impl Iterator<Item = &'a E>,
) -> Result<Option<&'a E>, CacheError>
where
	E: 'a + SubjectEntry,
{
	let matches = matches.collect::<Vec<_>>();
	let subjects = matches.iter().map(|entry| entry.subject()).collect::<HashSet<_>>();

	if subjects.len() > 1 {
		return Err(CacheError::MultipleUsersMatched { count: subjects.len() });
	}

	Ok(matches.into_iter().next())
}

fn evict_expired(state: &mut CacheState, now: OffsetDateTime) -> usize {
	let before = state.access.len();

	state.access.retain(|_, entry| entry.extended_expires_on > now);

	before - state.access.len()
}
