//! Precondition errors reported at the public API boundary.
//!
//! Fit failures and degenerate geometry are not errors: they surface as
//! `None` surfaces, sentinel costs and limit/zero values in result maps.

/// Errors raised while configuring or committing a [`crate::LayersBuilder`],
/// or while configuring the search heuristics.
#[derive(Debug, Clone, PartialEq)]
pub enum LayersError {
    /// A segmentation label is not below the declared segment count.
    SegmentOutOfRange {
        /// Offending label.
        segment: u32,
        /// Declared number of segments.
        count: usize,
    },
    /// A field does not have the dimensions of the segmentation.
    DimensionMismatch {
        /// Segmentation dimensions `(width, height)`.
        expected: (usize, usize),
        /// Offending field dimensions `(width, height)`.
        got: (usize, usize),
    },
    /// `commit` was called without any feature source registered.
    NoFeatureSources,
    /// `commit` was called without any surface type registered.
    NoSurfaceTypes,
    /// A feature source index returned by `add_ied` was not used.
    UnknownSource(usize),
    /// A surface type index returned by `add_surface_type` was not used.
    UnknownSurfaceType(usize),
    /// A tuning parameter is outside its valid range.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },
}

impl std::fmt::Display for LayersError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SegmentOutOfRange { segment, count } => {
                write!(f, "segment label {} out of range (count {})", segment, count)
            }
            Self::DimensionMismatch { expected, got } => write!(
                f,
                "dimension mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, got.0, got.1
            ),
            Self::NoFeatureSources => write!(f, "no feature source registered"),
            Self::NoSurfaceTypes => write!(f, "no surface type registered"),
            Self::UnknownSource(i) => write!(f, "unknown feature source index {}", i),
            Self::UnknownSurfaceType(i) => write!(f, "unknown surface type index {}", i),
            Self::InvalidParameter { name, value } => {
                write!(f, "invalid value {} for parameter `{}`", value, name)
            }
        }
    }
}

impl std::error::Error for LayersError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_offending_values() {
        let e = LayersError::SegmentOutOfRange {
            segment: 7,
            count: 4,
        };
        assert_eq!(e.to_string(), "segment label 7 out of range (count 4)");

        let e = LayersError::DimensionMismatch {
            expected: (8, 6),
            got: (8, 5),
        };
        assert!(e.to_string().contains("8x5"));

        let e = LayersError::InvalidParameter {
            name: "bias",
            value: 0.5,
        };
        assert!(e.to_string().contains("`bias`"));
    }
}
