use std::net::{SocketAddr, TcpListener};

use anyhow::{Context as _, Result};

/// A loopback address whose port was free a moment ago.
pub fn free_local_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind ephemeral port")?;
    listener.local_addr().context("read ephemeral port")
}
