//! 退出信号
//!
//! 调度循环、传输线程和主线程共享同一个 [ShutdownToken]。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ctrl-C 时请求退出
pub fn setup_ctrl_c_handler(token: ShutdownToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        log::warn!("[Main] KeyboardInterrupt received.");
        token.request();
    })?;
    Ok(())
}

#[test]
fn token_is_shared_between_clones() {
    let token = ShutdownToken::new();
    let other = token.clone();
    assert!(!other.is_requested());
    token.request();
    assert!(other.is_requested());
}
