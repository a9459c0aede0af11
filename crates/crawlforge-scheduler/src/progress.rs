use crawlforge_store::Store;
use crawlforge_types::Progress;
use tracing::warn;

/// Read the singleton Progress row, falling back to a zero-initialized
/// record on a missing or malformed checkpoint (§4.8) — never fails
/// Scheduler startup.
pub async fn load_or_initial(store: &dyn Store, batch_size: usize) -> Progress {
    match store.load_progress().await {
        Ok(Some(progress)) if progress.is_consistent() => progress,
        Ok(Some(progress)) => {
            warn!(?progress, "stored progress failed consistency check, resetting");
            Progress::initial(batch_size)
        }
        Ok(None) => Progress::initial(batch_size),
        Err(err) => {
            warn!(error = %err, "failed to load progress, starting fresh");
            Progress::initial(batch_size)
        }
    }
}
