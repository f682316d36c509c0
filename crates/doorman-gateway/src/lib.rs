pub mod fanout;
pub mod watch;

pub use fanout::{Fanout, Subscription};
