//! Remote locations and watches.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{LocationId, WatchId};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable descriptor of a folder on the remote share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLocation {
    pub id: LocationId,
    pub host: String,
    pub share: String,
    pub path: String,
    pub credentials: Option<Credentials>,
}

impl fmt::Display for NetworkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}/{}/{}", self.host, self.share, self.path.trim_matches('/'))
    }
}

/// Pairs a measurement drop folder with the folder that receives panel output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
    pub id: WatchId,
    pub name: String,
    pub drop_location: NetworkLocation,
    pub output_location: NetworkLocation,
}

/// A folder scanned by name to find design descriptor files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignLocation {
    pub id: LocationId,
    pub location: NetworkLocation,
}
