pub mod account;
pub mod conversation;
pub mod message;

pub use account::AccountSnapshot;
pub use conversation::{Conversation, LastMessage, PairSide, UnreadCounters};
pub use message::{Message, MessageKind, NewMessage};
