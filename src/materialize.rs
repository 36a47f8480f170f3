use std::io::Write;

use tracing::{debug, info, warn};

use crate::booru::{AssetResponse, BooruClient};
use crate::cancel::CancellationToken;
use crate::convert::webp_to_jpeg;
use crate::domain::{MediaCandidate, TagTask};
use crate::error::HarvestError;
use crate::retry::RetryPolicy;
use crate::store::{OutputStore, StagedAsset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Video,
}

#[derive(Debug)]
pub enum MaterializeOutcome {
    /// Asset and metadata record written.
    Stored { location: String },
    /// Not an error; the item is dropped without touching ErrorState.
    Skipped(SkipReason),
    /// Terminal for the item, escalated to the line.
    Failed(HarvestError),
    Cancelled,
}

/// Downloads, normalizes and persists one candidate. Never returns an error:
/// every condition is folded into a `MaterializeOutcome`, and temp files are
/// owned by `NamedTempFile` so every exit path cleans them up.
pub struct Materializer<'a, C: BooruClient + ?Sized, S: OutputStore + ?Sized> {
    pub client: &'a C,
    pub store: &'a S,
    pub retry: RetryPolicy,
    pub cancel: &'a CancellationToken,
}

impl<C: BooruClient + ?Sized, S: OutputStore + ?Sized> Materializer<'_, C, S> {
    pub fn materialize(&self, task: &TagTask, candidate: &MediaCandidate) -> MaterializeOutcome {
        let response = match self.fetch(candidate) {
            Ok(response) => response,
            Err(HarvestError::Cancelled) => return MaterializeOutcome::Cancelled,
            Err(err) => {
                warn!(line = task.line_number, url = %candidate.url, error = %err, "giving up on asset");
                return MaterializeOutcome::Failed(err);
            }
        };

        if response.is_video() {
            info!(url = %candidate.url, "skipping video asset");
            return MaterializeOutcome::Skipped(SkipReason::Video);
        }

        match self.stage_and_persist(task, candidate, response) {
            Ok(location) => {
                info!(line = task.line_number, key = %candidate.key, "stored {location}");
                MaterializeOutcome::Stored { location }
            }
            Err(err) => {
                warn!(line = task.line_number, key = %candidate.key, error = %err, "could not persist asset");
                MaterializeOutcome::Failed(err)
            }
        }
    }

    fn fetch(&self, candidate: &MediaCandidate) -> Result<AssetResponse, HarvestError> {
        self.retry.run(&candidate.url, self.cancel, |attempt| {
            debug!(url = %candidate.url, attempt, "fetching asset");
            self.client.fetch_asset(&candidate.url)
        })
    }

    fn stage_and_persist(
        &self,
        task: &TagTask,
        candidate: &MediaCandidate,
        response: AssetResponse,
    ) -> Result<String, HarvestError> {
        let staging = self.store.staging_dir();
        let mut raw = tempfile::Builder::new()
            .prefix(".harvest-")
            .suffix(&format!(".{}", candidate.remote_ext()))
            .tempfile_in(staging.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        raw.write_all(&response.bytes)
            .and_then(|_| raw.flush())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let file = if candidate.needs_conversion() {
            let converted = webp_to_jpeg(raw.path(), staging)?;
            debug!(key = %candidate.key, "converted intermediate format");
            // Dropping `raw` removes the intermediate file.
            drop(raw);
            converted
        } else {
            raw
        };

        self.store.persist(
            task,
            StagedAsset {
                file,
                key: candidate.key.clone(),
                tag_payload: candidate.tag_payload.clone(),
            },
        )
    }
}
