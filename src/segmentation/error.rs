use std::path::PathBuf;
use thiserror::Error;

/// Fatal startup errors: a missing or unusable model or label asset.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read label list {path}")]
    LabelsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("label list {0} contains no labels")]
    LabelsEmpty(PathBuf),

    #[error("label list has {found} labels but the model declares {expected} classes")]
    TooFewLabels { expected: usize, found: usize },

    #[error("failed to load model {path}")]
    Model {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
}
