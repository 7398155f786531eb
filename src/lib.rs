pub mod config;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;

pub use config::{
    AlignmentConfig, DifferenceConfig, EdgePolicy, ExtractionConfig, FilterConfig,
    InspectionConfig, Kernel, KernelShape,
};
pub use detection::{DefectPipeline, StageOutputs};
pub use error::{AlignmentError, InspectionError, Result};
pub use models::{AlignedImage, BinaryMask, BoundingBox, DefectRecord, DefectRegion};
pub use pipeline::{
    BatchPipeline, BatchReport, DebugConfig, Discovery, ImagePair, PairOutcome, ReferenceCache,
    discover_pairs, reference_for,
};
