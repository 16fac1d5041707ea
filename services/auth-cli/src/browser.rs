//! Browser hand-off

use std::io;

use tracing::debug;

/// Opens the authorization URL for the user.
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// The operating system's default browser.
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    /// Fire-and-forget: the opener runs detached and is never waited on.
    fn open(&self, url: &str) -> io::Result<()> {
        ensure_web_url(url)?;
        debug!("launching system browser");
        open::that_detached(url)
    }
}

/// Only http(s) URLs are handed to the OS opener.
fn ensure_web_url(url: &str) -> io::Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to open {scheme}: URL"),
        )),
    }
}
