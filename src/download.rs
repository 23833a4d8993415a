use crate::recorder::Recorder;
use crate::request::RequestError;
use log::{debug, error, warn};
use std::path::PathBuf;
use std::time::Duration;
use tgcore::api::{Object, RemoteFile, Request};
use tgcore::content::ContentKey;
use tgcore::records::ContentFile;
use thiserror::Error;

/// Synchronous downloads can be slow for large media.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download request failed: {0}")]
    Request(#[from] RequestError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file {0} was not fully downloaded")]
    Incomplete(i32),
    #[error("unexpected reply to downloadFile: {0}")]
    UnexpectedReply(String),
}

impl Recorder {
    /// Fetch `file` into the download folder under its content key and record
    /// it. Content already recorded under the same key is neither downloaded
    /// nor recorded again. Returns `None` if the content could not be saved.
    pub(crate) async fn fetch_content(&self, file: &RemoteFile, origin_id: &str) -> Option<ContentKey> {
        let key = ContentKey::derive(&file.remote_id(), origin_id);
        match self.store.get_file(&key).await {
            Ok(Some(existing)) => {
                debug!(target: "Recorder/Download", "Content {key} already stored at {}", existing.local_path);
                return Some(key);
            }
            Ok(None) => {}
            Err(e) => warn!(target: "Recorder/Download", "Lookup of content {key} failed: {e}"),
        }

        let local_path = match self.download(file, &key).await {
            Ok(path) => path,
            Err(e) => {
                warn!(target: "Recorder/Download", "Content of {origin_id} not saved: {e}");
                return None;
            }
        };

        let record = ContentFile {
            key: key.clone(),
            local_path: local_path.to_string_lossy().into_owned(),
            origin_id: origin_id.to_string(),
        };
        match self.store.put_file(&record).await {
            Ok(()) => Some(key),
            Err(e) => {
                error!(target: "Recorder/Download", "Failed to record content {key}: {e}");
                None
            }
        }
    }

    /// Make sure `file` is available locally and copy it to
    /// `<download folder>/<key>`.
    pub async fn download(&self, file: &RemoteFile, key: &ContentKey) -> Result<PathBuf, DownloadError> {
        let source = match file.downloaded_path() {
            Some(path) => PathBuf::from(path),
            None => match self.call(Request::download(file.id), DOWNLOAD_TIMEOUT).await? {
                Object::File(done) => done
                    .downloaded_path()
                    .map(PathBuf::from)
                    .ok_or(DownloadError::Incomplete(file.id))?,
                other => return Err(DownloadError::UnexpectedReply(format!("{other:?}"))),
            },
        };

        let folder = &self.config.download_folder;
        tokio::fs::create_dir_all(folder).await?;
        let target = folder.join(key.as_str());

        // a partial copy must not survive
        let partial = scopeguard::guard(target.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });
        tokio::fs::copy(&source, &target).await?;
        let target = scopeguard::ScopeGuard::into_inner(partial);

        debug!(target: "Recorder/Download", "Saved {} as {}", source.display(), target.display());
        Ok(target)
    }
}
