//! Wiring of the built-in task graph:
//!
//! - `sass`: compile the style sources once
//! - `build`: run the `sass` sequence
//! - `serve`: start the dev server and arm the watcher
//! - `default`: `serve`, then the initial `build`

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::{
    config::Config,
    error::{CascadeError, Result},
    pipeline::StylePipeline,
    registry::TaskRegistry,
    server::{self, ServerHandle},
    watch::{self, WatchSubscription},
};

/// Handles created by the `serve` task, parked here so the server and the
/// watch subscription stay alive until the process shuts down.
#[derive(Default)]
pub struct DevSession {
    server: Mutex<Option<ServerHandle>>,
    watcher: Mutex<Option<WatchSubscription>>,
}

impl DevSession {
    pub fn is_serving(&self) -> bool {
        self.server.lock().expect("session lock poisoned").is_some()
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server
            .lock()
            .expect("session lock poisoned")
            .as_ref()
            .map(|handle| handle.addr())
    }

    /// Subscribe to reload signals. `None` until `serve` has run.
    pub fn subscribe_reload(&self) -> Option<broadcast::Receiver<()>> {
        self.server
            .lock()
            .expect("session lock poisoned")
            .as_ref()
            .map(|handle| handle.subscribe())
    }
}

/// Registers the four built-in tasks and returns the session that `serve`
/// populates.
pub fn register_builtin_tasks(
    registry: &Arc<TaskRegistry>,
    config: &Config,
) -> Result<Arc<DevSession>> {
    let session = Arc::new(DevSession::default());
    let pipeline = Arc::new(StylePipeline::new(&config.styles)?);

    let sass_pipeline = Arc::clone(&pipeline);
    registry.register("sass", &[], move || {
        let pipeline = Arc::clone(&sass_pipeline);
        async move {
            let written = tokio::task::spawn_blocking(move || pipeline.compile())
                .await
                .map_err(|e| CascadeError::Task(format!("sass task panicked: {}", e)))??;
            info!(files = written.len(), "stylesheets compiled");
            Ok(())
        }
    })?;

    let build_registry = Arc::clone(registry);
    registry.register("build", &[], move || {
        let registry = Arc::clone(&build_registry);
        async move { registry.run_sequence(&["sass"]).await }
    })?;

    let serve_registry = Arc::clone(registry);
    let serve_session = Arc::clone(&session);
    let server_config = config.server.clone();
    let source_dir = config.styles.source_dir.clone();
    registry.register("serve", &[], move || {
        let registry = Arc::clone(&serve_registry);
        let session = Arc::clone(&serve_session);
        let server_config = server_config.clone();
        let source_dir = source_dir.clone();
        async move {
            // A bind failure (port in use) is fatal to this task.
            let handle = server::start(
                server_config.base_dir.clone(),
                &server_config.host,
                server_config.port,
            )
            .await?;
            let reloader = handle.reloader();

            let (tx, mut rx) = mpsc::unbounded_channel();
            let subscription = watch::watch_styles(&source_dir, tx)?;

            tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    // A failed compile is reported and the loop stays
                    // alive; the reload still fires so the browser shows
                    // the last good state against the current markup.
                    if let Err(e) = registry.run("sass").await {
                        error!("rebuild failed: {}", e);
                    }
                    reloader.reload();
                }
            });

            info!("watching {} for changes", source_dir.display());

            *session.server.lock().expect("session lock poisoned") = Some(handle);
            *session.watcher.lock().expect("session lock poisoned") = Some(subscription);
            Ok(())
        }
    })?;

    let default_registry = Arc::clone(registry);
    registry.register("default", &["serve"], move || {
        let registry = Arc::clone(&default_registry);
        async move {
            // The server is already up (serve is a prerequisite), so an
            // initial build failure is reported without tearing it down.
            if let Err(e) = registry.run("build").await {
                error!("initial build failed: {}", e);
            }
            Ok(())
        }
    })?;

    Ok(session)
}
