mod thread;

pub use thread::{ThreadPriority, thread_boot};
