use owo_colors::OwoColorize;

/// Resolves when the process receives SIGINT or SIGTERM. Used as the
/// graceful-shutdown future for every listener and worker drain.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => eprintln!("{}", "received SIGINT, shutting down".red()),
            _ = sigterm.recv() => eprintln!("{}", "received SIGTERM, shutting down".red()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    }
}
