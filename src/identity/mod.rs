mod cache;
mod directory;

use tracing::debug;

pub use cache::{CacheBackend, CacheLookup, IdentityCache};
pub use directory::{Directory, DirectoryError, DirectoryUser, FasjsonDirectory};

pub const DEFAULT_FIRST_PARTY_DOMAIN: &str = "fedoraproject.org";

/// Maps email addresses to account usernames.
///
/// First-party addresses are resolved from their local part. Everything else
/// goes through the directory, and the outcome (including "no single match")
/// is cached per email.
pub struct IdentityResolver<D> {
    directory: D,
    cache: IdentityCache,
    first_party_suffix: String,
}

impl<D: Directory> IdentityResolver<D> {
    pub fn new(directory: D, cache: IdentityCache, first_party_domain: &str) -> Self {
        Self {
            directory,
            cache,
            first_party_suffix: format!("@{}", first_party_domain.trim_start_matches('@')),
        }
    }

    pub fn resolve(&self, email: &str) -> Result<Option<String>, DirectoryError> {
        if let Some(local_part) = email.strip_suffix(&self.first_party_suffix) {
            return Ok(Some(local_part.to_owned()));
        }

        if let CacheLookup::Hit(cached) = self.cache.get(email) {
            return Ok(cached);
        }

        debug!(email, "Searching identity directory by email");
        let matches = self.directory.search_by_email(email)?;
        let username = match matches.as_slice() {
            [single] => Some(single.username.clone()),
            _ => None,
        };
        self.cache.insert(email, username.clone());

        Ok(username)
    }

    /// Directory-free variant used for display purposes: first-party
    /// addresses are shortened, anything else is returned as-is.
    pub fn display_name(&self, email: &str) -> String {
        email
            .strip_suffix(&self.first_party_suffix)
            .unwrap_or(email)
            .to_owned()
    }

    #[cfg(test)]
    pub fn directory(&self) -> &D {
        &self.directory
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{Directory, DirectoryError, DirectoryUser};

    #[derive(Default)]
    pub struct FakeDirectory {
        users: HashMap<String, Vec<String>>,
        failing: bool,
        calls: AtomicUsize,
    }

    impl FakeDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_user(mut self, email: &str, username: &str) -> Self {
            self.users
                .entry(email.to_owned())
                .or_default()
                .push(username.to_owned());
            self
        }

        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Directory for FakeDirectory {
        fn search_by_email(&self, email: &str) -> Result<Vec<DirectoryUser>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(DirectoryError::Unavailable {
                    message: "directory is down".to_owned(),
                });
            }

            Ok(self
                .users
                .get(email)
                .map(|usernames| {
                    usernames
                        .iter()
                        .map(|username| DirectoryUser {
                            username: username.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}
