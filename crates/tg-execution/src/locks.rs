use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per symbol. Same-symbol submissions queue behind each
/// other; different symbols never contend.
#[derive(Debug, Default)]
pub struct SymbolLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let m = {
            let mut map = self.inner.lock().await;
            map.entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        m.lock_owned().await
    }
}
