use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

/// Owns the underlying file-system watcher. Dropping the subscription
/// stops watching.
pub struct WatchSubscription {
    _watcher: RecommendedWatcher,
}

/// Watches `dir` recursively and forwards one message per `.scss`
/// create/modify/remove event. No debouncing: overlapping rebuilds are
/// acceptable at this scale.
pub fn watch_styles(dir: &Path, tx: mpsc::UnboundedSender<()>) -> Result<WatchSubscription> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if !is_style_event(&event) {
                    return;
                }
                if tx.send(()).is_err() {
                    debug!("change receiver dropped, event ignored");
                }
            }
            Err(e) => warn!("watch error: {}", e),
        },
        notify::Config::default(),
    )?;

    watcher.watch(dir, RecursiveMode::Recursive)?;
    debug!("watching {} recursively", dir.display());

    Ok(WatchSubscription { _watcher: watcher })
}

fn is_style_event(event: &Event) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );

    relevant_kind
        && event.paths.iter().any(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("scss"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};
    use std::time::Duration;

    #[test]
    fn filters_on_kind_and_extension() {
        let create_scss =
            Event::new(EventKind::Create(CreateKind::File)).add_path("sass/main.scss".into());
        assert!(is_style_event(&create_scss));

        let create_txt =
            Event::new(EventKind::Create(CreateKind::File)).add_path("notes.txt".into());
        assert!(!is_style_event(&create_txt));

        let access_scss = Event::new(EventKind::Access(AccessKind::Any))
            .add_path("sass/main.scss".into());
        assert!(!is_style_event(&access_scss));
    }

    #[tokio::test]
    async fn scss_change_produces_a_message() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = watch_styles(dir.path(), tx).unwrap();

        // Give the backend a moment to arm before touching the tree.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("main.scss"), "body { color: red; }").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(received.is_ok(), "no change event within the timeout");
    }
}
