//! Write authorities and permissions.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::path::VfsPath;

/// The non-empty set of account identifiers credited with a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Authorities {
    accounts: BTreeSet<String>,
}

impl Authorities {
    /// Build from any collection of account ids; `None` if the collection
    /// is empty.
    pub fn new<I, S>(accounts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accounts: BTreeSet<String> = accounts.into_iter().map(Into::into).collect();
        if accounts.is_empty() {
            None
        } else {
            Some(Self { accounts })
        }
    }

    /// A single-account authority set.
    pub fn single(account: impl Into<String>) -> Self {
        Self {
            accounts: BTreeSet::from([account.into()]),
        }
    }

    pub fn accounts(&self) -> &BTreeSet<String> {
        &self.accounts
    }

    /// True when every account here is also present in `other`.
    pub fn is_subset_of(&self, other: &Authorities) -> bool {
        self.accounts.is_subset(&other.accounts)
    }
}

impl fmt::Display for Authorities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for account in &self.accounts {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", account)?;
            first = false;
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Authorities {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let accounts = BTreeSet::<String>::deserialize(deserializer)?;
        Authorities::new(accounts)
            .ok_or_else(|| serde::de::Error::custom("authorities must be non-empty"))
    }
}

/// A grant to write under a path subtree on behalf of a set of accounts.
///
/// A permission covers any path equal to or below its own, and any write
/// whose authorities are a subset of the granted accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePermission {
    pub path: VfsPath,
    pub authorities: Authorities,
}

impl WritePermission {
    pub fn new(path: VfsPath, authorities: Authorities) -> Self {
        Self { path, authorities }
    }

    /// Does this permission allow writing to `path` as `write_as`?
    pub fn grants(&self, path: &VfsPath, write_as: &Authorities) -> bool {
        self.path.is_ancestor_of(path) && write_as.is_subset_of(&self.authorities)
    }
}
