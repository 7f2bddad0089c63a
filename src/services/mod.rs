pub mod image;
pub mod outline;
pub mod tasks;

pub use image::{image_url, ImageService, ImageTaskRequest, RegeneratedImage};
pub use outline::{parse_outline, OutlineService};
pub use tasks::{TaskRegistry, TaskState};
