mod deeplab;
mod error;
mod labels;
mod preprocess;
pub mod types;

pub use deeplab::DeepLabSegmentor;
pub use error::LoadError;
pub use labels::{labels_for_classes, load_labels};
pub use preprocess::{Affine, Preprocessor, Rotation};
pub use types::{SegmentationResult, Segmentor};

use std::path::Path;

/// Load the label list and model; any failure here is fatal for the session.
pub fn create_default_model(
    model_path: &Path,
    labels_path: &Path,
    num_classes: Option<usize>,
    input_size: (u32, u32),
    intra_threads: usize,
) -> Result<Box<dyn Segmentor>, LoadError> {
    let labels = labels_for_classes(load_labels(labels_path)?, num_classes)?;
    let model = DeepLabSegmentor::new(
        model_path,
        labels,
        input_size.0,
        input_size.1,
        intra_threads,
    )?;
    Ok(Box::new(model))
}
