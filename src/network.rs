use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityClass {
    Wifi,
    Cellular,
    Offline,
    Unknown,
}

impl ConnectivityClass {
    /// Whether starting a large transfer on this class needs the user's
    /// explicit go-ahead. Unknown is treated as Wi-Fi until the first
    /// real event arrives.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Cellular | Self::Offline)
    }
}

pub trait NetworkMonitor: Send + Sync {
    fn current(&self) -> ConnectivityClass;
    fn subscribe(&self) -> watch::Receiver<ConnectivityClass>;
}

/// Monitor fed by an external platform layer through `set`.
pub struct WatchNetworkMonitor {
    tx: watch::Sender<ConnectivityClass>,
}

impl WatchNetworkMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectivityClass::Unknown);
        Self { tx }
    }

    // send_replace: a plain send drops the value when no receiver is
    // subscribed, and the gate reads through current() without one.
    pub fn set(&self, class: ConnectivityClass) {
        self.tx.send_replace(class);
    }
}

impl Default for WatchNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor for WatchNetworkMonitor {
    fn current(&self) -> ConnectivityClass {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityClass> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectivityClass, NetworkMonitor, WatchNetworkMonitor};

    #[test]
    fn starts_unknown_and_tracks_changes() {
        let monitor = WatchNetworkMonitor::new();
        assert_eq!(monitor.current(), ConnectivityClass::Unknown);
        assert!(!monitor.current().requires_confirmation());

        monitor.set(ConnectivityClass::Cellular);
        assert_eq!(monitor.current(), ConnectivityClass::Cellular);
        assert!(monitor.current().requires_confirmation());
    }

    #[test]
    fn updates_land_without_any_subscriber() {
        let monitor = WatchNetworkMonitor::new();
        monitor.set(ConnectivityClass::Wifi);
        monitor.set(ConnectivityClass::Offline);
        assert_eq!(monitor.current(), ConnectivityClass::Offline);
        assert!(monitor.current().requires_confirmation());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let monitor = WatchNetworkMonitor::new();
        let mut rx = monitor.subscribe();
        monitor.set(ConnectivityClass::Wifi);
        rx.changed().await.expect("watch change");
        assert_eq!(*rx.borrow(), ConnectivityClass::Wifi);
    }
}
