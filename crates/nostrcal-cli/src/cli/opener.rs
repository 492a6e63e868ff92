use nostrcal_core::nostr::bunker::{AuthUrlDisposition, AuthUrlOpener};
use tracing::{debug, warn};

/// Opens authorization URLs in the default browser, falling back to the
/// clipboard. With both disabled the URL is only surfaced.
#[derive(Debug, Clone)]
pub struct DesktopOpener {
    pub browser: bool,
    pub clipboard: bool,
}

impl Default for DesktopOpener {
    fn default() -> Self {
        Self {
            browser: true,
            clipboard: true,
        }
    }
}

impl AuthUrlOpener for DesktopOpener {
    fn present(&self, url: &str) -> AuthUrlDisposition {
        if self.browser {
            match open::that(url) {
                Ok(()) => return AuthUrlDisposition::Opened,
                Err(e) => warn!("failed to open browser: {}", e),
            }
        }

        if self.clipboard {
            if let Ok(mut clipboard) = arboard::Clipboard::new() {
                if clipboard.set_text(url.to_string()).is_ok() {
                    return AuthUrlDisposition::Copied;
                }
            }
            debug!("clipboard unavailable");
        }

        AuthUrlDisposition::Surfaced
    }
}
