// Page events and two-phase waits
//
// A wait is registered before the action that triggers it and resolved
// afterwards, so an event fired during the action is never missed:
//
//     let wait = session.begin_wait(EventKind::Download)?;
//     link.click(None).await?;
//     let event = wait.resolve(Duration::from_secs(5)).await?;

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// A download the page started. Only the metadata is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    url: String,
    suggested_filename: String,
}

impl Download {
    pub fn new(url: impl Into<String>, suggested_filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            suggested_filename: suggested_filename.into(),
        }
    }

    /// URL the download was requested from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// File name the browser proposes for saving
    pub fn suggested_filename(&self) -> &str {
        &self.suggested_filename
    }
}

/// Something that happened on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Download(Download),
    /// The main frame committed a navigation
    Navigated { url: String },
    Closed,
}

impl PageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PageEvent::Download(_) => EventKind::Download,
            PageEvent::Navigated { .. } => EventKind::Navigation,
            PageEvent::Closed => EventKind::Close,
        }
    }
}

/// Filter for [`PendingWait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Download,
    Navigation,
    Close,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Download => "download",
            EventKind::Navigation => "navigation",
            EventKind::Close => "close",
        }
    }
}

/// A registered interest in the next event of one kind
#[derive(Debug)]
pub struct PendingWait {
    kind: EventKind,
    rx: broadcast::Receiver<PageEvent>,
}

impl PendingWait {
    pub(crate) fn new(kind: EventKind, rx: broadcast::Receiver<PageEvent>) -> Self {
        Self { kind, rx }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Waits for the first matching event published since registration.
    ///
    /// # Errors
    ///
    /// - `Error::Timeout` if nothing matching arrives within `timeout`
    /// - `Error::SessionClosed` if the page closes first
    pub async fn resolve(mut self, timeout: Duration) -> Result<PageEvent> {
        let kind = self.kind;
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Ok(event) if event.kind() == kind => return Ok(event),
                    Ok(PageEvent::Closed) => return Err(Error::SessionClosed),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event wait for {} lagged, {} events dropped", kind.as_str(), skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => return Err(Error::SessionClosed),
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                format!("waiting for {} event", kind.as_str()),
                timeout,
            )),
        }
    }

    /// Drops the registration without waiting
    pub fn cancel(self) {
        tracing::debug!("Cancelled wait for {} event", self.kind.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_skips_other_kinds() {
        let (tx, rx) = broadcast::channel(8);
        let wait = PendingWait::new(EventKind::Download, rx);

        tx.send(PageEvent::Navigated { url: "https://a.test/".into() })
            .unwrap();
        tx.send(PageEvent::Download(Download::new("https://a.test/f", "f.txt")))
            .unwrap();

        let event = wait.resolve(Duration::from_secs(1)).await.unwrap();
        match event {
            PageEvent::Download(d) => assert_eq!(d.suggested_filename(), "f.txt"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_times_out() {
        let (_tx, rx) = broadcast::channel::<PageEvent>(8);
        let wait = PendingWait::new(EventKind::Download, rx);
        let err = wait.resolve(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_close_ends_wait() {
        let (tx, rx) = broadcast::channel(8);
        let wait = PendingWait::new(EventKind::Download, rx);
        tx.send(PageEvent::Closed).unwrap();
        let err = wait.resolve(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));

        let (tx, rx) = broadcast::channel(8);
        let wait = PendingWait::new(EventKind::Close, rx);
        tx.send(PageEvent::Closed).unwrap();
        assert_eq!(
            wait.resolve(Duration::from_secs(1)).await.unwrap(),
            PageEvent::Closed
        );
    }
}
