use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, PartialEq, Clone, serde::Serialize)]
pub enum ProcState {
    Faulty,
    Stopped,
    Starting,
    Stopping,
    Running,
}

#[derive(Debug)]
pub struct AppState {
    pub exit: AtomicBool,
    pub proc_status_map: Arc<dashmap::DashMap<String, ProcState>>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            exit: AtomicBool::new(false),
            proc_status_map: Arc::new(dashmap::DashMap::new()),
        }
    }
}
