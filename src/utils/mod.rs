pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{
    decode_rgba_async, encode_png, encode_png_async, load_rgba_async, save_png_async,
};
pub use metrics::{Metrics, MetricsSnapshot, Step};
