pub mod event;
pub mod options;
pub mod page;

pub use event::*;
pub use options::*;
pub use page::*;
