//! The token cache
//!
//! Tokens are keyed by authority, resource, client, and user. Readers take a
//! snapshot of the whole map and never block; writers are serialized and
//! replace the map atomically, so a reader sees either the state before a
//! write or the state after it.

use std::{
    collections::HashMap,
    error,
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use ostium_clock::{DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    authority::Authority,
    braids::{AccessToken, ClientId, ClientIdRef, IdToken, RefreshToken, RefreshTokenRef},
    error::CacheError,
    result::AuthenticationResult,
    user::{UserIdentifier, UserInfo},
};

#[cfg(feature = "file")]
mod file;

#[cfg(feature = "file")]
pub use file::FilePersistence;

const FORMAT_VERSION: u32 = 1;

/// Loads and saves a serialized token cache
///
/// The cache calls into the hook only when asked to restore or persist; it
/// never does I/O on its own.
#[async_trait]
pub trait CachePersistence: Send + Sync {
    /// Loads a previously saved cache, if one exists
    async fn load(&self) -> Result<Option<Vec<u8>>, Box<dyn error::Error + Send + Sync + 'static>>;

    /// Saves the serialized cache
    async fn save(&self, blob: &[u8]) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>>;
}

/// Identifies a cached token
///
/// The authority, resource, and displayable user name are compared without
/// regard to case.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenCacheKey {
    authority: String,
    resource: String,
    client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    displayable_id: Option<String>,
    #[serde(default)]
    is_multiple_resource_refresh_token: bool,
}

impl TokenCacheKey {
    /// Constructs a key for a token issued to `user`, or to the client itself
    pub fn new(
        authority: &Authority,
        resource: &str,
        client_id: &ClientIdRef,
        user: Option<&UserInfo>,
        is_multiple_resource_refresh_token: bool,
    ) -> Self {
        Self {
            authority: authority.as_str().to_owned(),
            resource: resource.to_owned(),
            client_id: client_id.to_owned(),
            unique_id: user.and_then(|u| u.unique_id.clone()),
            displayable_id: user.and_then(|u| u.displayable_id.clone()),
            is_multiple_resource_refresh_token,
        }
    }

    /// The authority that issued the token
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The resource the token grants access to
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The client the token was issued to
    #[must_use]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The user's unique identifier, if the token was issued to a user
    #[must_use]
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// The user's displayable identifier, if the token was issued to a user
    #[must_use]
    pub fn displayable_id(&self) -> Option<&str> {
        self.displayable_id.as_deref()
    }

    /// Whether the token's refresh token is valid for other resources
    #[must_use]
    pub fn is_multiple_resource_refresh_token(&self) -> bool {
        self.is_multiple_resource_refresh_token
    }

    fn same_user(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
            && eq_ignore_case_opt(self.displayable_id.as_deref(), other.displayable_id.as_deref())
    }

    fn same_family(&self, other: &Self) -> bool {
        self.authority.eq_ignore_ascii_case(&other.authority)
            && self.client_id == other.client_id
            && self.same_user(other)
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.same_family(other) && self.resource.eq_ignore_ascii_case(&other.resource)
    }

    fn user_identity(&self) -> (Option<String>, Option<String>) {
        (
            self.unique_id.clone(),
            self.displayable_id.as_deref().map(str::to_ascii_lowercase),
        )
    }

    fn matches_user(&self, user: &UserMatch) -> bool {
        match user {
            UserMatch::Identified(UserIdentifier::Any) => true,
            UserMatch::Identified(UserIdentifier::UniqueId(id)) => {
                self.unique_id.as_deref() == Some(id.as_str())
            }
            UserMatch::Identified(UserIdentifier::DisplayableId(id)) => self
                .displayable_id
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case(id)),
            UserMatch::NoUser => self.unique_id.is_none() && self.displayable_id.is_none(),
        }
    }
}

impl PartialEq for TokenCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.same_slot(other)
            && self.is_multiple_resource_refresh_token == other.is_multiple_resource_refresh_token
    }
}

impl Eq for TokenCacheKey {}

impl Hash for TokenCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_ignore_case(&self.authority, state);
        hash_ignore_case(&self.resource, state);
        self.client_id.hash(state);
        self.unique_id.hash(state);
        match &self.displayable_id {
            Some(d) => {
                state.write_u8(1);
                hash_ignore_case(d, state);
            }
            None => state.write_u8(0),
        }
        self.is_multiple_resource_refresh_token.hash(state);
    }
}

fn hash_ignore_case<H: Hasher>(value: &str, state: &mut H) {
    for b in value.bytes() {
        state.write_u8(b.to_ascii_lowercase());
    }
    state.write_u8(0xff);
}

fn eq_ignore_case_opt(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

/// A cached token and the metadata that came with it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCacheEntry {
    access_token: AccessToken,
    token_type: String,
    expires_on: UnixTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<IdToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_info: Option<UserInfo>,
}

impl TokenCacheEntry {
    /// Constructs an entry for a bearer access token
    pub fn new(access_token: AccessToken, expires_on: UnixTime) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_owned(),
            expires_on,
            refresh_token: None,
            id_token: None,
            tenant_id: None,
            user_info: None,
        }
    }

    /// Sets the token type
    #[must_use]
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Sets the refresh token
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<RefreshToken>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// Sets the raw ID token
    #[must_use]
    pub fn with_id_token(mut self, id_token: Option<IdToken>) -> Self {
        self.id_token = id_token;
        self
    }

    /// Sets the issuing tenant
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Sets the user the token was issued to
    #[must_use]
    pub fn with_user_info(mut self, user_info: Option<UserInfo>) -> Self {
        self.user_info = user_info;
        self
    }

    /// The access token
    #[must_use]
    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    /// When the access token expires
    #[must_use]
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// The refresh token, if any
    #[must_use]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// The user the token was issued to
    #[must_use]
    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    /// Whether the token expires within `margin` of `now`
    #[must_use]
    pub fn is_near_expiry(&self, now: UnixTime, margin: DurationSecs) -> bool {
        self.expires_on <= now + margin
    }
}

/// A key and entry pair read from the cache
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCacheItem {
    key: TokenCacheKey,
    entry: TokenCacheEntry,
}

impl TokenCacheItem {
    pub(crate) fn new(key: TokenCacheKey, entry: TokenCacheEntry) -> Self {
        Self { key, entry }
    }

    /// The item's key
    #[must_use]
    pub fn key(&self) -> &TokenCacheKey {
        &self.key
    }

    /// The item's entry
    #[must_use]
    pub fn entry(&self) -> &TokenCacheEntry {
        &self.entry
    }

    /// The authority that issued the token
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.key.authority
    }

    pub(crate) fn to_result(&self) -> AuthenticationResult {
        AuthenticationResult {
            access_token: self.entry.access_token.clone(),
            token_type: self.entry.token_type.clone(),
            expires_on: self.entry.expires_on,
            refresh_token: self.entry.refresh_token.clone(),
            id_token: self.entry.id_token.clone(),
            authority: self.key.authority.clone(),
            resource: self.key.resource.clone(),
            tenant_id: self.entry.tenant_id.clone(),
            user_info: self.entry.user_info.clone(),
            is_multiple_resource_refresh_token: self.key.is_multiple_resource_refresh_token,
            from_cache: true,
        }
    }
}

#[derive(Clone, Debug)]
enum UserMatch {
    Identified(UserIdentifier),
    NoUser,
}

/// Selects entries from the cache
///
/// By default a query matches any resource and any user.
#[derive(Clone, Debug)]
pub struct CacheQuery {
    authority: String,
    client_id: ClientId,
    resource: Option<String>,
    user: UserMatch,
    multiple_resource_only: bool,
}

impl CacheQuery {
    /// Matches tokens issued by `authority` to `client_id`
    pub fn new(authority: &Authority, client_id: &ClientIdRef) -> Self {
        Self {
            authority: authority.as_str().to_owned(),
            client_id: client_id.to_owned(),
            resource: None,
            user: UserMatch::Identified(UserIdentifier::Any),
            multiple_resource_only: false,
        }
    }

    /// Restricts the query to a single resource
    #[must_use]
    pub fn resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_owned());
        self
    }

    /// Restricts the query to a user
    #[must_use]
    pub fn user(mut self, user: &UserIdentifier) -> Self {
        self.user = UserMatch::Identified(user.clone());
        self
    }

    /// Restricts the query to tokens issued to the client itself
    #[must_use]
    pub fn without_user(mut self) -> Self {
        self.user = UserMatch::NoUser;
        self
    }

    /// Restricts the query to entries holding a multiple resource refresh token
    #[must_use]
    pub fn multiple_resource_only(mut self) -> Self {
        self.multiple_resource_only = true;
        self
    }

    fn matches(&self, key: &TokenCacheKey) -> bool {
        key.authority.eq_ignore_ascii_case(&self.authority)
            && key.client_id == self.client_id
            && self
                .resource
                .as_deref()
                .map_or(true, |r| key.resource.eq_ignore_ascii_case(r))
            && (!self.multiple_resource_only || key.is_multiple_resource_refresh_token)
            && key.matches_user(&self.user)
    }
}

#[derive(Serialize, Deserialize)]
struct SerializedCache {
    version: u32,
    items: Vec<TokenCacheItem>,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

/// A thread-safe token cache
///
/// Shared by reference (usually behind an [`Arc`]) between every context that
/// should see the same tokens.
pub struct TokenCache {
    entries: ArcSwap<HashMap<TokenCacheKey, TokenCacheEntry>>,
    write_lock: Mutex<()>,
    persistence: Option<Arc<dyn CachePersistence>>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("count", &self.count())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            persistence: None,
        }
    }
}

impl TokenCache {
    /// Constructs an empty, in-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a persistence hook used by [`restore`][Self::restore] and
    /// [`persist`][Self::persist]
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn CachePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Constructs a cache from a blob produced by [`serialize`][Self::serialize]
    ///
    /// # Errors
    ///
    /// The blob is not a serialized cache, or uses an unknown format version.
    pub fn from_serialized(blob: &[u8]) -> Result<Self, CacheError> {
        let cache = Self::new();
        cache.deserialize(blob)?;
        Ok(cache)
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Finds the single best entry matching `query`
    ///
    /// When several entries for the same user match, the one holding a refresh
    /// token and expiring last is returned.
    ///
    /// # Errors
    ///
    /// Entries for more than one distinct user match the query.
    pub fn lookup(&self, query: &CacheQuery) -> Result<Option<TokenCacheItem>, CacheError> {
        let entries = self.entries.load();
        let matches: Vec<_> = entries.iter().filter(|(k, _)| query.matches(k)).collect();

        let mut users: Vec<_> = matches.iter().map(|(k, _)| k.user_identity()).collect();
        users.sort();
        users.dedup();
        if users.len() > 1 {
            tracing::debug!(users = users.len(), "cache lookup matched multiple users");
            return Err(CacheError::Ambiguous { users: users.len() });
        }

        let best = matches
            .into_iter()
            .max_by_key(|(_, e)| (e.refresh_token.is_some(), e.expires_on))
            .map(|(k, e)| TokenCacheItem {
                key: k.clone(),
                entry: e.clone(),
            });

        tracing::trace!(hit = best.is_some(), "cache lookup");
        Ok(best)
    }

    /// Stores an entry, replacing any entry in the same slot
    ///
    /// A slot is the authority, resource, client, and user of a key. When the
    /// new entry holds a multiple resource refresh token, sibling entries for
    /// the same user also receive the new refresh token.
    pub fn store(&self, key: TokenCacheKey, entry: TokenCacheEntry) {
        let _guard = self.write_guard();
        let mut next = HashMap::clone(&self.entries.load());

        next.retain(|k, _| !k.same_slot(&key));

        if key.is_multiple_resource_refresh_token {
            if let Some(refresh_token) = &entry.refresh_token {
                for (k, e) in next.iter_mut() {
                    if k.is_multiple_resource_refresh_token && k.same_family(&key) {
                        e.refresh_token = Some(refresh_token.clone());
                    }
                }
            }
        }

        next.insert(key, entry);
        self.entries.store(Arc::new(next));
    }

    /// Removes the entry stored under `key`
    pub fn remove(&self, key: &TokenCacheKey) -> Option<TokenCacheEntry> {
        let _guard = self.write_guard();
        let mut next = HashMap::clone(&self.entries.load());
        let removed = next.remove(key);
        if removed.is_some() {
            self.entries.store(Arc::new(next));
        }
        removed
    }

    /// Removes every entry
    pub fn clear(&self) {
        let _guard = self.write_guard();
        self.entries.store(Arc::new(HashMap::new()));
    }

    /// The number of entries
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.load().len()
    }

    /// A snapshot of every entry, in no particular order
    #[must_use]
    pub fn read_items(&self) -> Vec<TokenCacheItem> {
        self.entries
            .load()
            .iter()
            .map(|(key, entry)| TokenCacheItem {
                key: key.clone(),
                entry: entry.clone(),
            })
            .collect()
    }

    /// Serializes every entry into a versioned JSON blob
    ///
    /// # Errors
    ///
    /// An entry could not be serialized.
    pub fn serialize(&self) -> Result<Vec<u8>, CacheError> {
        let blob = SerializedCache {
            version: FORMAT_VERSION,
            items: self.read_items(),
        };
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Replaces the cache's contents with those of a serialized blob
    ///
    /// On failure the cache is left unchanged.
    ///
    /// # Errors
    ///
    /// The blob is not a serialized cache, or uses an unknown format version.
    pub fn deserialize(&self, blob: &[u8]) -> Result<(), CacheError> {
        let header: VersionHeader = serde_json::from_slice(blob)?;
        if header.version != FORMAT_VERSION {
            return Err(CacheError::UnsupportedVersion(header.version));
        }

        let cache: SerializedCache = serde_json::from_slice(blob)?;
        let entries = cache
            .items
            .into_iter()
            .map(|item| (item.key, item.entry))
            .collect();

        let _guard = self.write_guard();
        self.entries.store(Arc::new(entries));
        Ok(())
    }

    /// Loads the cache from the persistence hook, if one is attached
    ///
    /// Returns whether a saved cache was found and loaded.
    ///
    /// # Errors
    ///
    /// The hook failed, or the saved blob could not be read.
    pub async fn restore(&self) -> Result<bool, CacheError> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };

        match persistence.load().await.map_err(CacheError::Persistence)? {
            Some(blob) => {
                self.deserialize(&blob)?;
                tracing::debug!(entries = self.count(), "restored token cache");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Saves the cache through the persistence hook, if one is attached
    ///
    /// # Errors
    ///
    /// The cache could not be serialized or the hook failed.
    pub async fn persist(&self) -> Result<(), CacheError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let blob = self.serialize()?;
        persistence
            .save(&blob)
            .await
            .map_err(CacheError::Persistence)?;
        tracing::trace!(bytes = blob.len(), "persisted token cache");
        Ok(())
    }
}
