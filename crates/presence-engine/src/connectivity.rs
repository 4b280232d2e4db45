use tokio::sync::watch;

/// Current reachability of the submission endpoint.
///
/// Observers subscribe for changes; the engine task is the only writer.
pub struct Connectivity {
    online: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self { online }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record the new state. Returns true on an offline to online edge.
    pub fn set(&self, online: bool) -> bool {
        let was_online = self.online.send_replace(online);
        if was_online != online {
            tracing::info!(online, "connectivity changed");
        }
        online && !was_online
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}
