// Pipeline processing: schema normalization, text attribute extraction,
// sanitization, and feature assembly.

pub mod extract;
pub mod features;
pub mod normalize;
pub mod sanitize;
