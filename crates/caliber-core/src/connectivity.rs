//! Online/offline signal feeding the sync scheduler.

use tokio::sync::watch;

/// Read side of the connectivity signal.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    receiver: watch::Receiver<bool>,
    last_seen: bool,
}

/// Write side, owned by whatever observes the network.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    sender: watch::Sender<bool>,
}

/// Create a linked handle and signal starting in the given state.
pub fn connectivity(initially_online: bool) -> (ConnectivityHandle, ConnectivitySignal) {
    let (sender, receiver) = watch::channel(initially_online);
    (
        ConnectivityHandle { sender },
        ConnectivitySignal {
            receiver,
            last_seen: initially_online,
        },
    )
}

impl ConnectivityHandle {
    /// Publish the current state. Repeating the same state notifies nobody.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                tracing::info!(online, "Connectivity changed");
                *current = online;
                true
            }
        });
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> ConnectivitySignal {
        let receiver = self.sender.subscribe();
        let last_seen = *receiver.borrow();
        ConnectivitySignal {
            receiver,
            last_seen,
        }
    }
}

impl ConnectivitySignal {
    /// Signal that never changes, for hosts without network detection.
    pub fn fixed(online: bool) -> Self {
        let (_, signal) = connectivity(online);
        signal
    }

    pub fn is_online(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the next change of state. `None` once the handle is gone.
    pub async fn next_change(&mut self) -> Option<bool> {
        loop {
            self.receiver.changed().await.ok()?;
            let online = *self.receiver.borrow_and_update();
            if std::mem::replace(&mut self.last_seen, online) != online {
                return Some(online);
            }
        }
    }

    /// Resolve on the next offline to online transition.
    ///
    /// Returns `false` once the handle is gone and no transition can follow.
    pub async fn changed_to_online(&mut self) -> bool {
        loop {
            match self.next_change().await {
                Some(true) => return true,
                Some(false) => {}
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn resolves_on_offline_to_online() {
        let (handle, mut signal) = connectivity(false);
        assert!(!signal.is_online());

        let waiter = tokio::spawn(async move { signal.changed_to_online().await });
        handle.set_online(true);

        assert!(waiter.await.unwrap());
        assert!(handle.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn going_offline_does_not_resolve() {
        let (handle, mut signal) = connectivity(true);

        let waiter = tokio::spawn(async move { signal.changed_to_online().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.set_online(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handle.set_online(true);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn next_change_reports_both_directions() {
        let (handle, mut signal) = connectivity(true);

        handle.set_online(false);
        assert_eq!(signal.next_change().await, Some(false));
        handle.set_online(true);
        assert_eq!(signal.next_change().await, Some(true));

        drop(handle);
        assert_eq!(signal.next_change().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn returns_false_when_handle_dropped() {
        let mut signal = ConnectivitySignal::fixed(true);
        assert!(signal.is_online());
        assert!(!signal.changed_to_online().await);
    }
}
