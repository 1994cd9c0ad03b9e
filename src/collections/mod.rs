pub mod ordered_list;
pub mod queue;

pub use ordered_list::{Node, OrderedList};
pub use queue::Queue;
