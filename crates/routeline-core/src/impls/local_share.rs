//! LocalShare - ローカルディレクトリをリモート共有に見立てた実装
//!
//! `//host/share/path` を `<root>/host/share/path` に対応させます。
//! 認証情報は使いません。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{NetworkLocation, PipelineError, Result};
use crate::ports::{RemoteShare, is_ignored_entry};

pub struct LocalShare {
    root: PathBuf,
}

impl LocalShare {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory backing `location`.
    pub fn dir(&self, location: &NetworkLocation) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        for part in [&location.host, &location.share, &location.path] {
            let relative = Path::new(part.trim_matches('/'));
            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(PipelineError::Share(format!(
                    "{location}: path escapes the share root"
                )));
            }
            dir.push(relative);
        }
        Ok(dir)
    }

    fn file(&self, location: &NetworkLocation, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || is_ignored_entry(name) {
            return Err(PipelineError::Share(format!("invalid file name {name:?}")));
        }
        Ok(self.dir(location)?.join(name))
    }
}

fn share_error(location: &NetworkLocation, name: &str, e: std::io::Error) -> PipelineError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PipelineError::not_found(format!("{location}/{name}"))
    } else {
        PipelineError::Share(format!("{location}/{name}: {e}"))
    }
}

#[async_trait]
impl RemoteShare for LocalShare {
    async fn list(&self, location: &NetworkLocation) -> Result<Vec<String>> {
        let dir = self.dir(location)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PipelineError::Share(format!("{location}: {e}")))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::Share(format!("{location}: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_ignored_entry(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self, location: &NetworkLocation, name: &str) -> Result<Vec<u8>> {
        let path = self.file(location, name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| share_error(location, name, e))
    }

    async fn write(&self, location: &NetworkLocation, name: &str, data: &[u8]) -> Result<()> {
        let path = self.file(location, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| share_error(location, name, e))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| share_error(location, name, e))?;
        debug!(location = %location, file = name, bytes = data.len(), "wrote file");
        Ok(())
    }

    async fn delete(&self, location: &NetworkLocation, name: &str) -> Result<()> {
        let path = self.file(location, name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| share_error(location, name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, LocationId};
    use ulid::Ulid;

    fn location(path: &str) -> NetworkLocation {
        NetworkLocation {
            id: LocationId::from_ulid(Ulid::new()),
            host: "fab01".into(),
            share: "measure".into(),
            path: path.into(),
            credentials: None,
        }
    }

    #[tokio::test]
    async fn write_then_list_and_read() {
        let root = tempfile::tempdir().unwrap();
        let share = LocalShare::new(root.path());
        let loc = location("line3/drop");

        share.write(&loc, "b.shifts", b"2").await.unwrap();
        share.write(&loc, "a.shifts", b"1").await.unwrap();
        std::fs::write(share.dir(&loc).unwrap().join(".DS_Store"), b"").unwrap();

        assert_eq!(
            share.list(&loc).await.unwrap(),
            vec!["a.shifts".to_string(), "b.shifts".to_string()]
        );
        assert_eq!(share.read(&loc, "a.shifts").await.unwrap(), b"1");
        assert!(root.path().join("fab01/measure/line3/drop/a.shifts").exists());
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let root = tempfile::tempdir().unwrap();
        let share = LocalShare::new(root.path());
        let loc = location("out");

        let read = share.read(&loc, "nope").await.unwrap_err();
        let delete = share.delete(&loc, "nope").await.unwrap_err();

        assert_eq!(read.kind(), ErrorKind::NotFound);
        assert_eq!(delete.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn listing_a_missing_folder_is_a_share_error() {
        let root = tempfile::tempdir().unwrap();
        let share = LocalShare::new(root.path());

        let err = share.list(&location("absent")).await.unwrap_err();

        assert!(matches!(err, PipelineError::Share(_)));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn parent_components_are_rejected() {
        let share = LocalShare::new("/srv/share");
        assert!(share.dir(&location("../../etc")).is_err());
    }
}
