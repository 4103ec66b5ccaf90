use tokio::sync::oneshot;

pub mod app_state;
pub mod args;

/// Single-use stop trigger for one supervised loop. The receiving side
/// is owned by the loop's cancellation watcher; once fired, further
/// calls to `signal` are no-ops.
pub struct StopHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl StopHandle {
    pub fn new() -> (StopHandle, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (StopHandle { tx: Some(tx) }, rx)
    }

    pub fn signal(&mut self) {
        if let Some(tx) = self.tx.take() {
            // an error just means the loop is already gone
            _ = tx.send(());
        }
    }
}
