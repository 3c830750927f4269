// serve.rs — Run the session daemon in the foreground.
//
// Same behavior as the warden-daemon binary, reachable as `warden serve`.

use std::path::Path;

use warden_daemon::{Daemon, DaemonConfig};

pub fn execute(socket: &Path, state: &Path) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let daemon = Daemon::bind(DaemonConfig::new(socket, state))?;
        println!(
            "Listening on {:?} {}",
            socket.display().to_string(),
            chrono::Utc::now().to_rfc3339()
        );
        daemon.run().await?;
        Ok::<(), anyhow::Error>(())
    })
}
