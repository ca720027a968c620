pub mod ascii_preview;
pub mod presenter;

pub use ascii_preview::{AsciiRenderer, WatchKey, clear_screen, poll_key};
pub use presenter::{Alert, ConsolePresenter};
