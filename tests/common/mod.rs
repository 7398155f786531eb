mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from pcbinspect for tests
pub use pcbinspect::{
    BatchPipeline, BinaryMask, BoundingBox, DefectPipeline, ImagePair, InspectionConfig,
    InspectionError,
};
