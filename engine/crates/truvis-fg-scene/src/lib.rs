pub mod camera;
pub mod image_cache;
pub mod render_layer;
pub mod render_queue;
