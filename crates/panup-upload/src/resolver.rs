//! Virtual path → remote node resolution.
//!
//! The drive only knows identifiers, so a path is resolved by resolving its
//! parent first and then scanning the parent's children for the last
//! component. Nothing is cached: every call reflects the drive as it is now.

use futures::future::BoxFuture;
use panup_core::path::{ROOT_ID, VirtualPath};
use panup_core::types::RemoteNode;
use panup_remote::{DriveApi, RemoteError};

use crate::result::UploadError;

/// Children requested per listing page.
pub const PAGE_SIZE: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("path not found: {0}")]
    NotFound(VirtualPath),

    #[error("not a directory: {0}")]
    NotADirectory(VirtualPath),

    #[error("failed to create directory {path}: {source}")]
    CreateFolder {
        path: VirtualPath,
        source: RemoteError,
    },

    #[error("failed to list {path}: {source}")]
    List {
        path: VirtualPath,
        source: RemoteError,
    },
}

impl From<ResolveError> for UploadError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(path) => UploadError::PathNotFound(path.to_string()),
            ResolveError::NotADirectory(path) => UploadError::NotADirectory(path.to_string()),
            ResolveError::CreateFolder { path, source }
            | ResolveError::List { path, source } => UploadError::remote(
                |source| UploadError::CreateDirectory {
                    path: path.to_string(),
                    source,
                },
                source,
            ),
        }
    }
}

pub struct PathResolver<'a> {
    drive: &'a dyn DriveApi,
}

impl<'a> PathResolver<'a> {
    pub fn new(drive: &'a dyn DriveApi) -> Self {
        Self { drive }
    }

    /// Every child of `dir_id`, across all pages.
    pub async fn list_children(&self, dir_id: &str) -> Result<Vec<RemoteNode>, RemoteError> {
        let mut children = Vec::new();
        let mut page = 1;
        loop {
            let listing = self.drive.list_page(dir_id, page, PAGE_SIZE).await?;
            let got = listing.nodes.len();
            children.extend(listing.nodes);
            if got < PAGE_SIZE as usize {
                break;
            }
            if listing.total.is_some_and(|total| children.len() as u64 >= total) {
                break;
            }
            page += 1;
        }
        tracing::debug!(dir = dir_id, count = children.len(), "listed directory");
        Ok(children)
    }

    async fn find_child(&self, dir_id: &str, name: &str) -> Result<Option<RemoteNode>, RemoteError> {
        Ok(self
            .list_children(dir_id)
            .await?
            .into_iter()
            .find(|node| node.name == name))
    }

    /// Resolve a path to its node. The root never touches the drive.
    pub fn resolve<'p>(&'p self, path: &'p VirtualPath) -> BoxFuture<'p, Result<RemoteNode, ResolveError>>
    where
        'a: 'p,
    {
        Box::pin(async move {
            let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
                return Ok(RemoteNode::root());
            };
            let dir = self.resolve(&parent).await?;
            if !dir.is_dir {
                return Err(ResolveError::NotADirectory(parent));
            }
            self.find_child(&dir.id, name)
                .await
                .map_err(|source| ResolveError::List {
                    path: parent,
                    source,
                })?
                .ok_or_else(|| ResolveError::NotFound(path.clone()))
        })
    }

    /// Identifier of the directory at `path`, creating missing components.
    ///
    /// Components are walked from the root. Once one is missing every deeper
    /// component is created directly under the previous one without looking
    /// it up again.
    pub async fn ensure_dir(&self, path: &VirtualPath) -> Result<String, ResolveError> {
        let mut id = ROOT_ID.to_string();
        let mut walked = VirtualPath::root();
        let mut creating = false;

        for name in path.components() {
            let child = walked.join(name);
            if !creating {
                let found = self
                    .find_child(&id, name)
                    .await
                    .map_err(|source| ResolveError::List {
                        path: walked.clone(),
                        source,
                    })?;
                match found {
                    Some(node) if node.is_dir => {
                        id = node.id;
                        walked = child;
                        continue;
                    }
                    Some(_) => return Err(ResolveError::NotADirectory(child)),
                    None => creating = true,
                }
            }
            tracing::info!(path = %child, "creating folder");
            id = self
                .drive
                .create_folder(&id, name)
                .await
                .map_err(|source| ResolveError::CreateFolder {
                    path: child.clone(),
                    source,
                })?;
            walked = child;
        }
        Ok(id)
    }
}
