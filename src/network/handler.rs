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

use std::net::SocketAddr;
use std::sync::Weak;

use crate::message::Message;
use crate::AppError;

/// Application side of the messaging core.
///
/// The application owns its handlers; listeners and connections only keep a
/// [`Weak`] reference. Both methods run on the reactor thread, so they should
/// hand heavy work off rather than block it.
pub trait MessageHandler: Send + Sync {
    /// A complete message arrived on a connection registered with this handler.
    fn incoming_message(&self, message: Message);

    /// A background operation failed and the affected connection (or listener)
    /// was closed. The rest of the reactor keeps running.
    fn connection_error(&self, peer_addr: SocketAddr, error: &AppError) {
        let _ = (peer_addr, error);
    }
}

pub type HandlerRef = Weak<dyn MessageHandler>;
