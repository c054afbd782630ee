//! 证据层：带证据的分群类型与确定性校验器

pub mod types;
pub mod validator;

pub use types::{
    Behaviors, ConfidenceLevel, EngagementStyle, EvidenceSegment, EvidenceSource, EvidenceType,
    ExcludedSegment, Psychographics, SegmentDemographics, SegmentEvidence,
};
pub use validator::{
    validate, ValidationConstraints, ValidationOutcome, DEFAULT_LOCATION_MARKERS,
    DEFAULT_MIN_SCORE,
};
