mod order;
mod webhook_event;

pub use order::*;
pub use webhook_event::*;
