// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tokio::sync::watch;

/// Listens for the reactor shutdown signal.
///
/// Every listener and connection task owns one. The signal is a `watch` value
/// rather than a one-shot message, so a task subscribed after shutdown was
/// signalled still observes it.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new(notify: watch::Receiver<bool>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // a dropped sender means the reactor is gone, which is shutdown too
        let _ = self.notify.wait_for(|stopped| *stopped).await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_shutdown_latches() {
        let (notify, _) = watch::channel(false);
        let mut shutdown = Shutdown::new(notify.subscribe());
        assert!(!shutdown.is_shutdown());

        notify.send_replace(true);
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());

        // second recv must not block
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let (notify, _) = watch::channel(false);
        notify.send_replace(true);

        let mut shutdown = Shutdown::new(notify.subscribe());
        tokio::time::timeout(Duration::from_secs(1), shutdown.recv())
            .await
            .expect("late subscriber must not wait");
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_on_dropped_sender() {
        let (notify, receiver) = watch::channel(false);
        let mut shutdown = Shutdown::new(receiver);
        drop(notify);
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_pending_until_signalled() {
        let (notify, receiver) = watch::channel(false);
        let mut shutdown = Shutdown::new(receiver);
        let waited = tokio::time::timeout(Duration::from_millis(50), shutdown.recv()).await;
        assert!(waited.is_err());
        assert!(!shutdown.is_shutdown());
        drop(notify);
    }
}
