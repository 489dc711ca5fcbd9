/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use log::{error, info, warn};
use tokio::sync::Mutex;

static RELOAD_MUTEX: Mutex<()> = Mutex::const_new(());

trait AsyncSignalAction: Copy {
    fn run(&self) -> impl Future<Output = ()> + Send;
}

/// Re-run the config resolution pass and respawn the writer from the new
/// config. Serialized so a SIGHUP and a watcher event can't interleave.
pub(crate) async fn do_reload() {
    let _guard = RELOAD_MUTEX.lock().await;
    info!("reloading config");

    if let Err(e) = crate::config::load().await {
        warn!("error reloading config: {e:?}");
        warn!("reload aborted");
        return;
    }

    if let Err(e) = crate::writer::spawn_all().await {
        error!("failed to respawn writer: {e:?}");
        return;
    }

    info!("reload finished");
}

#[derive(Clone, Copy)]
struct QuitAction {}

impl AsyncSignalAction for QuitAction {
    async fn run(&self) {
        crate::control::trigger_shutdown();
    }
}

#[derive(Clone, Copy)]
struct ReloadAction {}

impl AsyncSignalAction for ReloadAction {
    async fn run(&self) {
        do_reload().await
    }
}

#[cfg(unix)]
mod unix {
    use std::future::poll_fn;

    use anyhow::anyhow;
    use log::info;
    use tokio::signal::unix::{SignalKind, signal};

    use super::AsyncSignalAction;

    pub(super) fn register_quit<QUIT>(do_quit: QUIT) -> anyhow::Result<()>
    where
        QUIT: AsyncSignalAction + Send + 'static,
    {
        let mut quit_sig = signal(SignalKind::quit())
            .map_err(|e| anyhow!("failed to create SIGQUIT listener: {e}"))?;
        tokio::spawn(async move {
            if poll_fn(|cx| quit_sig.poll_recv(cx)).await.is_some() {
                info!("got quit signal");
                do_quit.run().await;
            }
        });

        let mut int_sig = signal(SignalKind::interrupt())
            .map_err(|e| anyhow!("failed to create SIGINT listener: {e}"))?;
        tokio::spawn(async move {
            if poll_fn(|cx| int_sig.poll_recv(cx)).await.is_some() {
                info!("got quit signal");
                do_quit.run().await;
            }
        });

        let mut term_sig = signal(SignalKind::terminate())
            .map_err(|e| anyhow!("failed to create SIGTERM listener: {e}"))?;
        tokio::spawn(async move {
            if poll_fn(|cx| term_sig.poll_recv(cx)).await.is_some() {
                info!("got quit signal");
                do_quit.run().await;
            }
        });

        Ok(())
    }

    pub(super) fn register_reload<RELOAD>(call_reload: RELOAD) -> anyhow::Result<()>
    where
        RELOAD: AsyncSignalAction + Send + 'static,
    {
        let mut hup_sig = signal(SignalKind::hangup())
            .map_err(|e| anyhow!("failed to create SIGHUP listener: {e}"))?;
        tokio::spawn(async move {
            loop {
                if poll_fn(|cx| hup_sig.poll_recv(cx)).await.is_none() {
                    break;
                }
                info!("got reload signal");
                call_reload.run().await;
            }
        });

        Ok(())
    }
}

pub(crate) fn register() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        unix::register_reload(ReloadAction {})?;
        unix::register_quit(QuitAction {})
    }
    #[cfg(not(unix))]
    {
        let do_quit = QuitAction {};
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("got quit signal");
                do_quit.run().await;
            }
        });
        Ok(())
    }
}
