use super::error::LoadError;
use std::fs;
use std::path::Path;

/// Load a newline-delimited label list; line index is the class index.
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>, LoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| LoadError::LabelsUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let labels = parse_labels(&text);
    if labels.is_empty() {
        return Err(LoadError::LabelsEmpty(path.to_path_buf()));
    }

    tracing::info!("Loaded {} labels from {}", labels.len(), path.display());
    Ok(labels)
}

fn parse_labels(text: &str) -> Vec<String> {
    let mut labels: Vec<String> = text
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();

    // A trailing blank line is an artifact of the file ending, not a class
    while labels.last().is_some_and(|l| l.is_empty()) {
        labels.pop();
    }
    labels
}

/// Trim a label table to `num_classes` entries, failing if it is too short.
pub fn labels_for_classes(
    mut labels: Vec<String>,
    num_classes: Option<usize>,
) -> Result<Vec<String>, LoadError> {
    let Some(expected) = num_classes else {
        return Ok(labels);
    };
    if labels.len() < expected {
        return Err(LoadError::TooFewLabels {
            expected,
            found: labels.len(),
        });
    }
    labels.truncate(expected);
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_one_label_per_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "background\r\naeroplane\nbicycle\n").unwrap();

        let labels = load_labels(file.path()).unwrap();
        assert_eq!(labels, vec!["background", "aeroplane", "bicycle"]);
    }

    #[test]
    fn empty_label_file_is_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = load_labels(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::LabelsEmpty(_)));
    }

    #[test]
    fn missing_label_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_labels(dir.path().join("labels.txt")).unwrap_err();
        assert!(matches!(err, LoadError::LabelsUnreadable { .. }));
    }

    #[test]
    fn interior_blank_lines_keep_their_index() {
        assert_eq!(parse_labels("a\n\nc\n\n"), vec!["a", "", "c"]);
    }

    #[test]
    fn class_count_truncates_or_rejects() {
        let labels: Vec<String> = ["bg", "cat", "dog"].iter().map(|s| s.to_string()).collect();

        assert_eq!(labels_for_classes(labels.clone(), None).unwrap().len(), 3);
        assert_eq!(labels_for_classes(labels.clone(), Some(2)).unwrap(), vec!["bg", "cat"]);
        assert!(matches!(
            labels_for_classes(labels, Some(21)),
            Err(LoadError::TooFewLabels { expected: 21, found: 3 })
        ));
    }
}
