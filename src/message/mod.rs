pub use constants::*;
pub use net_message::Message;
pub use payload::{PayloadReader, PayloadWriter};

mod constants;
mod net_message;
mod payload;
