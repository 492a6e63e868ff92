/// What happened to an authorization URL handed to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthUrlDisposition {
    /// Opened in the browser
    Opened,
    /// Copied to the clipboard
    Copied,
    /// Only reported through `CoreEvent::AuthUrl`
    Surfaced,
}

/// Presents a signer's approval URL to the user. Called off the async
/// executor, so implementations may block briefly.
pub trait AuthUrlOpener: Send + Sync {
    fn present(&self, url: &str) -> AuthUrlDisposition;
}

/// Leaves the URL to whoever listens on the event bus.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfaceOnly;

impl AuthUrlOpener for SurfaceOnly {
    fn present(&self, _url: &str) -> AuthUrlDisposition {
        AuthUrlDisposition::Surfaced
    }
}
