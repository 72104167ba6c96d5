pub mod engine;
pub mod normalize;
pub mod scanner;

pub use engine::{Embedding, FaceEmbedder, FaceEngine, FaceModelPaths};
pub use normalize::{decode_rgb, normalize_photo};
