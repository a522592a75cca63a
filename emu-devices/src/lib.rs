pub mod prng;
pub mod tty;

pub use prng::{OsRandomDevice, SeededPrngDevice};
pub use tty::{BaudRate, TtyDevice};
